// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Overlay network contract and transports for the weft service mesh.
//!
//! Every other weft crate talks to the overlay through the [`Overlay`]
//! trait: peers are opaque [`PeerId`]s, discovery happens by rendezvous
//! string, and all peer-to-peer traffic flows over protocol-tagged
//! [`OverlayStream`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       weft-overlay                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Contract: Overlay trait + OverlayStream + StreamEvent      │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  QuicOverlay (quinn + TLS)   │  MemoryMesh (in-process)     │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Two transports implement the contract:
//! - [`QuicOverlay`]: QUIC connections between hosts, with a hello
//!   exchange that gossips peer addresses and rendezvous advertisements.
//! - [`MemoryMesh`]: an in-process mesh of nodes connected by duplex
//!   pipes, with scripted ping results. Used by tests across the
//!   workspace.

pub mod error;
pub mod memory;
pub mod overlay;
pub mod peer;
pub mod quic;
pub mod ranking;
pub mod stream;

pub use error::OverlayError;
pub use memory::{MemoryMesh, MemoryOverlay};
pub use overlay::{Overlay, StreamHandler, stream_handler};
pub use peer::{PeerId, PeerInfo, PerfInd};
pub use quic::{QuicOverlay, QuicOverlayConfig};
pub use ranking::rank_peers;
pub use stream::{OverlayStream, ProtocolId, StreamEvent, StreamId, StreamReader, StreamWriter};
