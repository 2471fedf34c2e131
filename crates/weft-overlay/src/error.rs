// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for overlay operations.

use thiserror::Error;

use crate::peer::PeerId;
use crate::stream::ProtocolId;

/// Errors that can occur in an overlay transport.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OverlayError {
    /// No route to the requested peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// The remote peer has no handler for the requested protocol.
    #[error("peer {peer} does not speak {protocol}")]
    UnsupportedProtocol { peer: PeerId, protocol: ProtocolId },

    /// Dialing the peer failed.
    #[error("dial error: {0}")]
    Dial(String),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// I/O error on a stream or socket.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hello or preamble exchange produced malformed data.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// The overlay has been shut down.
    #[error("overlay closed")]
    Closed,
}
