// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Proxy configuration loading from environment variables.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use weft_cache::ServiceInfo;
use weft_overlay::PerfInd;

use crate::context::LocalService;

/// Proxy agent configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Port of the local HTTP control endpoint.
    pub ctrl_port: u16,
    /// Sponsored service, or `None` for anonymous mode.
    pub service: Option<LocalService>,
    /// Overlay bootstrap addresses. At least one is required; a proxy
    /// with no way into the mesh is useless.
    pub bootstraps: Vec<SocketAddr>,
    /// Time-to-live for registry cache entries.
    pub registry_ttl: Duration,
    /// Seed registry entries, keyed by service name.
    pub services: HashMap<String, ServiceInfo>,
}

/// Registry entry shape accepted in `WEFT_REGISTRY_JSON`.
#[derive(Debug, Deserialize)]
struct RegistryEntry {
    content_hash: String,
    docker_hash: String,
    soft_rtt_ms: u64,
    hard_rtt_ms: u64,
}

impl ProxyConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WEFT_BOOTSTRAPS`: space-separated `IP:PORT` bootstrap addresses
    ///
    /// Optional (with defaults):
    /// - `WEFT_CTRL_PORT`: control endpoint port (default: 7080)
    /// - `WEFT_SERVICE_NAME` + `WEFT_SERVICE_ENDPOINT`: sponsored
    ///   service name and its `IP:PORT`; both present for service mode,
    ///   both absent for anonymous mode
    /// - `WEFT_RCACHE_TTL_SECS`: registry cache TTL (default: 3600)
    /// - `WEFT_REGISTRY_JSON`: JSON object seeding the service
    ///   registry, e.g. `{"echo":{"content_hash":"Qm...",
    ///   "docker_hash":"echo:latest","soft_rtt_ms":100,"hard_rtt_ms":500}}`
    pub fn from_env() -> Result<Self, ConfigError> {
        let ctrl_port: u16 = std::env::var("WEFT_CTRL_PORT")
            .unwrap_or_else(|_| "7080".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("WEFT_CTRL_PORT", "must be a valid port number"))?;

        let service = match (
            std::env::var("WEFT_SERVICE_NAME").ok(),
            std::env::var("WEFT_SERVICE_ENDPOINT").ok(),
        ) {
            (Some(name), Some(endpoint)) => Some(LocalService { name, endpoint }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "WEFT_SERVICE_NAME",
                    "service name and endpoint must be set together",
                ));
            }
        };

        let bootstraps: Result<Vec<SocketAddr>, _> = std::env::var("WEFT_BOOTSTRAPS")
            .map_err(|_| ConfigError::Missing("WEFT_BOOTSTRAPS"))?
            .split_whitespace()
            .map(str::parse)
            .collect();
        let bootstraps = bootstraps
            .map_err(|_| ConfigError::Invalid("WEFT_BOOTSTRAPS", "must be IP:PORT addresses"))?;
        if bootstraps.is_empty() {
            return Err(ConfigError::Missing("WEFT_BOOTSTRAPS"));
        }

        let registry_ttl = Duration::from_secs(
            std::env::var("WEFT_RCACHE_TTL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::Invalid("WEFT_RCACHE_TTL_SECS", "must be a number of seconds")
                })?,
        );

        let services = match std::env::var("WEFT_REGISTRY_JSON") {
            Ok(json) => parse_registry(&json)?,
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            ctrl_port,
            service,
            bootstraps,
            registry_ttl,
            services,
        })
    }
}

fn parse_registry(json: &str) -> Result<HashMap<String, ServiceInfo>, ConfigError> {
    let entries: HashMap<String, RegistryEntry> = serde_json::from_str(json)
        .map_err(|_| ConfigError::Invalid("WEFT_REGISTRY_JSON", "must be a JSON service map"))?;
    Ok(entries
        .into_iter()
        .map(|(name, entry)| {
            (
                name,
                ServiceInfo {
                    content_hash: entry.content_hash,
                    docker_hash: entry.docker_hash,
                    soft_req: PerfInd::new(Duration::from_millis(entry.soft_rtt_ms)),
                    hard_req: PerfInd::new(Duration::from_millis(entry.hard_rtt_ms)),
                },
            )
        })
        .collect())
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_registry() {
        let services = parse_registry(
            r#"{"echo":{"content_hash":"Qmabc","docker_hash":"echo:latest",
                "soft_rtt_ms":100,"hard_rtt_ms":500}}"#,
        )
        .unwrap();
        let info = &services["echo"];
        assert_eq!(info.content_hash, "Qmabc");
        assert_eq!(info.soft_req.rtt, Duration::from_millis(100));
        assert_eq!(info.hard_req.rtt, Duration::from_millis(500));
    }

    #[test]
    fn test_parse_registry_rejects_garbage() {
        assert!(parse_registry("not json").is_err());
    }
}
