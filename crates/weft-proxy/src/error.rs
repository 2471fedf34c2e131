// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the proxy agent.

use axum::http::StatusCode;
use thiserror::Error;

use weft_cache::RegistryError;
use weft_overlay::OverlayError;
use weft_protocol::{ChainSpecError, FrameError};

/// Proxy agent failures, mapped onto control-endpoint status codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// The registry does not know the requested service.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// The registry itself could not be reached.
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Find-or-allocate exhausted its attempts.
    #[error("unable to find or allocate service {0}")]
    ServiceUnavailable(String),

    /// A downstream hop reported a setup failure.
    #[error("chain setup failed: {0}")]
    ChainSetup(String),

    /// A peer violated the chain-setup protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The chain spec in the request is malformed.
    #[error(transparent)]
    BadChainSpec(#[from] ChainSpecError),

    /// The control request itself is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// Overlay transport failure.
    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),

    /// Frame codec failure on a setup stream.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The setup ack did not arrive in time.
    #[error("chain setup timed out")]
    SetupTimeout,

    /// Could not open a local L4 listener.
    #[error("unable to open listening port: {0}")]
    Listener(std::io::Error),
}

impl ProxyError {
    /// Status code shown to the local HTTP client.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UnknownService(_) => StatusCode::NOT_FOUND,
            ProxyError::BadChainSpec(_) | ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::RegistryUnavailable(_)
            | ProxyError::ServiceUnavailable(_)
            | ProxyError::ChainSetup(_)
            | ProxyError::Protocol(_)
            | ProxyError::Overlay(_)
            | ProxyError::Frame(_)
            | ProxyError::SetupTimeout => StatusCode::BAD_GATEWAY,
            ProxyError::Listener(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RegistryError> for ProxyError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownService(name) => ProxyError::UnknownService(name),
            RegistryError::Unavailable(detail) => ProxyError::RegistryUnavailable(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::UnknownService("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProxyError::BadChainSpec(ChainSpecError::TooShort).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::ServiceUnavailable("x".into()).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::Listener(std::io::Error::other("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
