// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Allocator configuration loading from environment variables.

use thiserror::Error;

/// Allocator daemon configuration.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Overlay bootstrap addresses handed to spawned instances
    /// (space-separated in their environment).
    pub bootstraps: Vec<String>,
    /// Pre-shared network key passphrase handed to spawned instances.
    pub psk: String,
}

impl AllocatorConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `WEFT_BOOTSTRAPS`: space-separated overlay bootstrap addresses
    ///
    /// Optional:
    /// - `WEFT_PSK`: pre-shared network key passphrase (default: empty)
    pub fn from_env() -> Result<Self, ConfigError> {
        let bootstraps: Vec<String> = std::env::var("WEFT_BOOTSTRAPS")
            .map_err(|_| ConfigError::Missing("WEFT_BOOTSTRAPS"))?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if bootstraps.is_empty() {
            return Err(ConfigError::Missing("WEFT_BOOTSTRAPS"));
        }

        let psk = std::env::var("WEFT_PSK").unwrap_or_default();

        Ok(Self { bootstraps, psk })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing or empty.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}
