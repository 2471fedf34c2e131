// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service-chain specifications.
//!
//! A chain spec is an ordered token list such as
//! `["tcp", "frontend", "udp", "transcoder", "store"]`: a leading
//! transport token, then service names, with further transport tokens
//! switching the transport for subsequent hops.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// L4 transport selection for a chain hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

impl FromStr for Transport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chain-spec validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainSpecError {
    #[error("chain spec must contain at least two tokens (a transport protocol and a service name)")]
    TooShort,

    #[error("expecting transport protocol to be either 'tcp' or 'udp', got '{0}'")]
    UnknownTransport(String),

    #[error("empty token in chain spec")]
    EmptyToken,

    #[error("service '{0}' appears more than once in the chain spec")]
    DuplicateService(String),
}

/// This node's position within a chain, produced by [`ChainSpec::locate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainPosition {
    /// Transport in effect at this node's hop.
    pub transport: Transport,
    /// The service after this node, if any; `None` at the chain
    /// terminus.
    pub next_service: Option<String>,
}

/// A validated service-chain specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    tokens: Vec<String>,
}

impl ChainSpec {
    /// Validate a token list into a chain spec.
    ///
    /// Rules: at least two tokens; the first token is a transport; no
    /// empty tokens; no service name occurs twice (the minimum loop
    /// guard — a looped chain would otherwise thread forever).
    pub fn parse<I, S>(tokens: I) -> Result<Self, ChainSpecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.len() < 2 {
            return Err(ChainSpecError::TooShort);
        }
        if Transport::from_str(&tokens[0]).is_err() {
            return Err(ChainSpecError::UnknownTransport(tokens[0].clone()));
        }

        let mut services = Vec::new();
        for token in &tokens {
            if token.is_empty() {
                return Err(ChainSpecError::EmptyToken);
            }
            if Transport::from_str(token).is_ok() {
                continue;
            }
            if services.contains(token) {
                return Err(ChainSpecError::DuplicateService(token.clone()));
            }
            services.push(token.clone());
        }
        if services.is_empty() {
            return Err(ChainSpecError::TooShort);
        }

        Ok(Self { tokens })
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The transport of the first hop.
    pub fn first_transport(&self) -> Transport {
        Transport::from_str(&self.tokens[0]).expect("validated at parse time")
    }

    /// The first service in the chain.
    pub fn first_service(&self) -> &str {
        self.tokens
            .iter()
            .find(|t| Transport::from_str(t).is_err())
            .expect("validated at parse time")
    }

    /// Key under which L4 listeners for this chain are memoised.
    pub fn key(&self) -> String {
        self.tokens.join("/")
    }

    /// Find `service` in the chain and report the transport in effect
    /// there plus the following service, if any.
    pub fn locate(&self, service: &str) -> Option<ChainPosition> {
        let mut transport = self.first_transport();
        for token in &self.tokens {
            if let Ok(tp) = Transport::from_str(token) {
                transport = tp;
            } else if token == service {
                // The transport for this hop is the one in effect here
                return Some(ChainPosition {
                    transport,
                    next_service: self.next_service_after(service),
                });
            }
        }
        None
    }

    fn next_service_after(&self, service: &str) -> Option<String> {
        let mut seen = false;
        for token in &self.tokens {
            if Transport::from_str(token).is_ok() {
                continue;
            }
            if seen {
                return Some(token.clone());
            }
            if token == service {
                seen = true;
            }
        }
        None
    }
}

impl fmt::Display for ChainSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tokens: &[&str]) -> ChainSpec {
        ChainSpec::parse(tokens.iter().copied()).unwrap()
    }

    #[test]
    fn test_parse_minimal() {
        let s = spec(&["tcp", "echo"]);
        assert_eq!(s.first_transport(), Transport::Tcp);
        assert_eq!(s.first_service(), "echo");
        assert_eq!(s.key(), "tcp/echo");
    }

    #[test]
    fn test_parse_rejects_short_spec() {
        assert_eq!(
            ChainSpec::parse(["tcp"]).unwrap_err(),
            ChainSpecError::TooShort
        );
        assert_eq!(
            ChainSpec::parse(Vec::<String>::new()).unwrap_err(),
            ChainSpecError::TooShort
        );
        // Two transports and no service is still too short
        assert_eq!(
            ChainSpec::parse(["tcp", "udp"]).unwrap_err(),
            ChainSpecError::TooShort
        );
    }

    #[test]
    fn test_parse_rejects_unknown_transport() {
        assert_eq!(
            ChainSpec::parse(["icmp", "echo"]).unwrap_err(),
            ChainSpecError::UnknownTransport("icmp".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_duplicate_service() {
        assert_eq!(
            ChainSpec::parse(["tcp", "a", "b", "a"]).unwrap_err(),
            ChainSpecError::DuplicateService("a".to_string())
        );
    }

    #[test]
    fn test_locate_terminal() {
        let s = spec(&["tcp", "a", "b"]);
        let pos = s.locate("b").unwrap();
        assert_eq!(pos.transport, Transport::Tcp);
        assert_eq!(pos.next_service, None);
    }

    #[test]
    fn test_locate_intermediate() {
        let s = spec(&["tcp", "a", "b"]);
        let pos = s.locate("a").unwrap();
        assert_eq!(pos.transport, Transport::Tcp);
        assert_eq!(pos.next_service, Some("b".to_string()));
    }

    #[test]
    fn test_locate_mixed_transports() {
        // /udp/A/tcp/B/C: A runs over udp, B and C over tcp
        let s = spec(&["udp", "a", "tcp", "b", "c"]);
        assert_eq!(s.locate("a").unwrap().transport, Transport::Udp);
        assert_eq!(
            s.locate("a").unwrap().next_service,
            Some("b".to_string())
        );
        assert_eq!(s.locate("b").unwrap().transport, Transport::Tcp);
        assert_eq!(s.locate("c").unwrap().transport, Transport::Tcp);
        assert_eq!(s.locate("c").unwrap().next_service, None);
    }

    #[test]
    fn test_locate_absent_service() {
        let s = spec(&["tcp", "a", "b"]);
        assert!(s.locate("z").is_none());
    }

    #[test]
    fn test_key_is_listener_map_key() {
        let s = spec(&["udp", "a", "tcp", "b"]);
        assert_eq!(s.key(), "udp/a/tcp/b");
    }
}
