// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the cache layers.

use thiserror::Error;

/// Peer-cache lookup failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// No suitable peer cached for the requested service hash.
    #[error("no suitable peer found in cache")]
    NotFound,
}
