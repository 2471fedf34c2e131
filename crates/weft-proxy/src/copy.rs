// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tunnel copy loops.
//!
//! All tunnel traffic is `Data`-framed on the overlay side and raw
//! bytes on the socket side. Each loop runs until its source closes or
//! errors; callers race the loops of one flow against each other and
//! tear everything down when the first one returns.

use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use weft_protocol::{ChainMessage, FrameError, read_message, write_message};

/// Socket → overlay: read up to `max_payload` bytes per read and frame
/// each chunk as a `Data` message.
pub async fn socket_to_stream<R, W>(mut src: R, mut dst: W, max_payload: usize)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; max_payload];
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => {
                debug!("socket closed by remote");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "socket read failed");
                return;
            }
        };
        let message = ChainMessage::Data(Bytes::copy_from_slice(&buf[..n]));
        if let Err(e) = write_message(&mut dst, &message).await {
            debug!(error = %e, "tunnel write failed");
            return;
        }
    }
}

/// Overlay → socket: unwrap `Data` messages and write their bytes out
/// in full.
pub async fn stream_to_socket<R, W>(mut src: R, mut dst: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let data = match next_data(&mut src).await {
            Some(data) => data,
            None => return,
        };
        if let Err(e) = dst.write_all(&data).await {
            debug!(error = %e, "socket write failed");
            return;
        }
    }
}

/// Overlay → overlay: decode and re-encode each `Data` frame.
///
/// Forwarding raw bytes would be faster, but decoding lets a hop see
/// and log malformed traffic instead of passing it along.
pub async fn stream_to_stream<R, W>(mut src: R, mut dst: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let data = match next_data(&mut src).await {
            Some(data) => data,
            None => return,
        };
        if let Err(e) = write_message(&mut dst, &ChainMessage::Data(data)).await {
            debug!(error = %e, "tunnel write failed");
            return;
        }
    }
}

/// Overlay → UDP socket: unwrap `Data` messages onto a connected
/// datagram socket.
pub async fn stream_to_udp<R>(mut src: R, dst: Arc<UdpSocket>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let data = match next_data(&mut src).await {
            Some(data) => data,
            None => return,
        };
        if let Err(e) = dst.send(&data).await {
            debug!(error = %e, "datagram send failed");
            return;
        }
    }
}

/// Overlay → shared UDP socket: unwrap `Data` messages and address
/// them to one client. Used by the ingress demultiplexer's reverse
/// path, where one socket serves many clients.
pub async fn stream_to_udp_addr<R>(mut src: R, dst: Arc<UdpSocket>, client: std::net::SocketAddr)
where
    R: AsyncRead + Unpin,
{
    loop {
        let data = match next_data(&mut src).await {
            Some(data) => data,
            None => return,
        };
        if let Err(e) = dst.send_to(&data, client).await {
            debug!(error = %e, %client, "datagram send failed");
            return;
        }
    }
}

/// Connected UDP socket → overlay: frame each datagram as `Data`.
pub async fn udp_to_stream<W>(src: Arc<UdpSocket>, mut dst: W, max_payload: usize)
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; max_payload];
    loop {
        let n = match src.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "datagram receive failed");
                return;
            }
        };
        let message = ChainMessage::Data(Bytes::copy_from_slice(&buf[..n]));
        if let Err(e) = write_message(&mut dst, &message).await {
            debug!(error = %e, "tunnel write failed");
            return;
        }
    }
}

/// Read the next `Data` payload, ending the flow on close, decode
/// error, or a non-`Data` frame.
async fn next_data<R: AsyncRead + Unpin>(src: &mut R) -> Option<Bytes> {
    match read_message(src).await {
        Ok(ChainMessage::Data(data)) => Some(data),
        Ok(other) => {
            warn!(message = other.type_name(), "unexpected message type on tunnel");
            None
        }
        Err(FrameError::StreamClosed) => {
            debug!("tunnel closed by remote");
            None
        }
        Err(e) => {
            debug!(error = %e, "tunnel read failed");
            None
        }
    }
}
