// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol-tagged bidirectional streams.
//!
//! An [`OverlayStream`] is the unit of peer-to-peer communication: a
//! byte-oriented duplex pipe tagged with a [`ProtocolId`]. The tag can be
//! switched while the stream is open (e.g. from the chain-setup protocol
//! to a tunnel protocol); the switch is local metadata only and is
//! reflected in the [`StreamEvent`] emitted when the stream closes.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::peer::PeerId;

/// Identifier of an application protocol carried on an overlay stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolId(String);

impl ProtocolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProtocolId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Node-local identifier of a single overlay stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(Uuid);

impl StreamId {
    fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Emitted on the overlay's event channel when a stream closes.
///
/// `protocol` is the protocol id the stream carried *at close time*, so
/// subscribers interested only in, say, UDP tunnel streams can filter.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub stream: StreamId,
    pub peer: PeerId,
    pub protocol: ProtocolId,
}

/// Shared control block for a stream and its split halves.
pub(crate) struct StreamCtl {
    id: StreamId,
    peer: PeerId,
    protocol: Mutex<ProtocolId>,
    cancel: CancellationToken,
    events: broadcast::Sender<StreamEvent>,
    closed: AtomicBool,
}

impl StreamCtl {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let event = StreamEvent {
            stream: self.id,
            peer: self.peer,
            protocol: self.protocol.lock().expect("protocol lock poisoned").clone(),
        };
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

impl Drop for StreamCtl {
    fn drop(&mut self) {
        self.close();
    }
}

/// A bidirectional, protocol-tagged stream to a remote peer.
///
/// Implements [`AsyncRead`] and [`AsyncWrite`] directly for sequential
/// request/response use; call [`OverlayStream::split`] to drive both
/// directions from independent tasks.
pub struct OverlayStream {
    ctl: Arc<StreamCtl>,
    read: Box<dyn AsyncRead + Send + Unpin>,
    write: Box<dyn AsyncWrite + Send + Unpin>,
}

impl OverlayStream {
    /// Assemble a stream from raw transport halves.
    ///
    /// Transports construct one of these per side; `events` is the
    /// owning overlay's close-notification channel.
    pub(crate) fn new(
        peer: PeerId,
        protocol: ProtocolId,
        read: Box<dyn AsyncRead + Send + Unpin>,
        write: Box<dyn AsyncWrite + Send + Unpin>,
        events: broadcast::Sender<StreamEvent>,
    ) -> Self {
        let ctl = Arc::new(StreamCtl {
            id: StreamId::random(),
            peer,
            protocol: Mutex::new(protocol),
            cancel: CancellationToken::new(),
            events,
            closed: AtomicBool::new(false),
        });
        Self { ctl, read, write }
    }

    pub fn id(&self) -> StreamId {
        self.ctl.id
    }

    pub fn peer(&self) -> PeerId {
        self.ctl.peer
    }

    pub fn protocol(&self) -> ProtocolId {
        self.ctl.protocol.lock().expect("protocol lock poisoned").clone()
    }

    /// Switch the stream's protocol tag.
    ///
    /// Local metadata only; the remote side performs its own switch when
    /// it hands the stream over.
    pub fn set_protocol(&self, protocol: ProtocolId) {
        *self.ctl.protocol.lock().expect("protocol lock poisoned") = protocol;
    }

    /// Abort both directions and emit the close event immediately.
    pub fn reset(&self) {
        self.ctl.close();
    }

    /// Resolves once the stream has been reset or fully dropped.
    pub async fn closed(&self) {
        self.ctl.cancel.cancelled().await;
    }

    /// Split into independently-owned read and write halves.
    ///
    /// The halves share reset control: resetting either one cancels the
    /// other's pending operations via [`StreamReader::closed`] /
    /// [`StreamWriter::closed`].
    pub fn split(self) -> (StreamReader, StreamWriter) {
        let reader = StreamReader {
            ctl: self.ctl.clone(),
            inner: self.read,
        };
        let writer = StreamWriter {
            ctl: self.ctl,
            inner: self.write,
        };
        (reader, writer)
    }
}

impl fmt::Debug for OverlayStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayStream")
            .field("id", &self.ctl.id)
            .field("peer", &self.ctl.peer)
            .field("protocol", &self.protocol())
            .finish()
    }
}

impl AsyncRead for OverlayStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.read).poll_read(cx, buf)
    }
}

impl AsyncWrite for OverlayStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.write).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.write).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.write).poll_shutdown(cx)
    }
}

/// Read half of a split [`OverlayStream`].
pub struct StreamReader {
    ctl: Arc<StreamCtl>,
    inner: Box<dyn AsyncRead + Send + Unpin>,
}

impl StreamReader {
    pub fn id(&self) -> StreamId {
        self.ctl.id
    }

    pub fn peer(&self) -> PeerId {
        self.ctl.peer
    }

    pub fn reset(&self) {
        self.ctl.close();
    }

    pub async fn closed(&self) {
        self.ctl.cancel.cancelled().await;
    }
}

impl AsyncRead for StreamReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Write half of a split [`OverlayStream`].
pub struct StreamWriter {
    ctl: Arc<StreamCtl>,
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl StreamWriter {
    pub fn id(&self) -> StreamId {
        self.ctl.id
    }

    pub fn peer(&self) -> PeerId {
        self.ctl.peer
    }

    pub fn reset(&self) {
        self.ctl.close();
    }

    pub async fn closed(&self) {
        self.ctl.cancel.cancelled().await;
    }
}

impl AsyncWrite for StreamWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
