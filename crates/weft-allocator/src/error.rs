// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the allocator.

use thiserror::Error;

/// Allocator failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocatorError {
    /// Container driver operation failed.
    #[error("driver error: {0}")]
    Driver(#[from] crate::driver::DriverError),

    /// Could not determine a public address or free ports.
    #[error("network setup error: {0}")]
    NetSetup(String),

    /// I/O on the command stream failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Overlay operation failed.
    #[error("overlay error: {0}")]
    Overlay(#[from] weft_overlay::OverlayError),
}
