// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The overlay network contract.
//!
//! Everything above the transport layer — the proxy agent, the peer
//! cache, the allocator — programs against this trait. The production
//! transport is [`crate::quic::QuicOverlay`]; tests use
//! [`crate::memory::MemoryMesh`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::OverlayError;
use crate::peer::PeerId;
use crate::stream::{OverlayStream, ProtocolId, StreamEvent};

/// Handler invoked for each inbound stream on a registered protocol.
///
/// Handlers run in their own task; a handler returning ends that task
/// but not the stream — drop or reset the stream explicitly.
pub type StreamHandler =
    Arc<dyn Fn(OverlayStream) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Contract implemented by overlay transports.
#[async_trait]
pub trait Overlay: Send + Sync {
    /// This node's peer identity.
    fn local_peer(&self) -> PeerId;

    /// Register this node as a provider of `rendezvous`.
    async fn advertise(&self, rendezvous: &str) -> Result<(), OverlayError>;

    /// Peers currently known to provide `rendezvous`, excluding self.
    async fn find_providers(&self, rendezvous: &str) -> Result<Vec<PeerId>, OverlayError>;

    /// Measure the round-trip time to a peer.
    ///
    /// Returns [`Duration::ZERO`] when the peer is unreachable; probe
    /// failures are never surfaced as errors.
    async fn ping(&self, peer: PeerId) -> Duration;

    /// Open a bidirectional stream to `peer` tagged with `protocol`.
    async fn open_stream(
        &self,
        peer: PeerId,
        protocol: &ProtocolId,
    ) -> Result<OverlayStream, OverlayError>;

    /// Install the handler for inbound streams tagged with `protocol`.
    ///
    /// Replaces any previous handler for the same protocol.
    fn set_handler(&self, protocol: ProtocolId, handler: StreamHandler);

    /// Subscribe to stream-closed notifications.
    fn events(&self) -> broadcast::Receiver<StreamEvent>;
}

/// Convenience for building a [`StreamHandler`] from an async closure.
pub fn stream_handler<F, Fut>(f: F) -> StreamHandler
where
    F: Fn(OverlayStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |stream| Box::pin(f(stream)))
}
