// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for chain messages.
//!
//! Each frame on a chain-setup or tunnel stream has the format:
//! - 4 bytes: payload length (big-endian)
//! - 2 bytes: message type
//! - N bytes: payload
//!
//! Payload encoding depends on the type: `SetupRequest` carries JSON of
//! the chain-spec token list, `SetupAck` and `Error` carry UTF-8 text,
//! `Data` carries raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame payload (64 KB; tunnel payloads are capped below this).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Frame header size (4 bytes length + 2 bytes type).
pub const HEADER_SIZE: usize = 6;

const TYPE_ERROR: u16 = 1;
const TYPE_SETUP_REQUEST: u16 = 2;
const TYPE_SETUP_ACK: u16 = 3;
const TYPE_DATA: u16 = 4;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload decode error: {0}")]
    Decode(String),

    #[error("stream closed")]
    StreamClosed,
}

/// A typed message on a chain-setup or tunnel stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainMessage {
    /// Setup failure, reported back along the chain.
    Error(String),
    /// Request to thread a chain described by the token list.
    SetupRequest(Vec<String>),
    /// Setup success; the payload is a human-readable debug trail.
    SetupAck(String),
    /// Tunnel payload.
    Data(Bytes),
}

impl ChainMessage {
    /// Short name of the message type, for logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ChainMessage::Error(_) => "Error",
            ChainMessage::SetupRequest(_) => "SetupRequest",
            ChainMessage::SetupAck(_) => "SetupAck",
            ChainMessage::Data(_) => "Data",
        }
    }

    fn type_tag(&self) -> u16 {
        match self {
            ChainMessage::Error(_) => TYPE_ERROR,
            ChainMessage::SetupRequest(_) => TYPE_SETUP_REQUEST,
            ChainMessage::SetupAck(_) => TYPE_SETUP_ACK,
            ChainMessage::Data(_) => TYPE_DATA,
        }
    }

    fn encode_payload(&self) -> Result<Bytes, FrameError> {
        match self {
            ChainMessage::Error(text) | ChainMessage::SetupAck(text) => {
                Ok(Bytes::copy_from_slice(text.as_bytes()))
            }
            ChainMessage::SetupRequest(tokens) => {
                let payload =
                    serde_json::to_vec(tokens).map_err(|e| FrameError::Decode(e.to_string()))?;
                Ok(Bytes::from(payload))
            }
            ChainMessage::Data(bytes) => Ok(bytes.clone()),
        }
    }

    fn decode_payload(tag: u16, payload: Bytes) -> Result<Self, FrameError> {
        match tag {
            TYPE_ERROR => Ok(ChainMessage::Error(decode_utf8(payload)?)),
            TYPE_SETUP_ACK => Ok(ChainMessage::SetupAck(decode_utf8(payload)?)),
            TYPE_SETUP_REQUEST => {
                let tokens: Vec<String> = serde_json::from_slice(&payload)
                    .map_err(|e| FrameError::Decode(e.to_string()))?;
                Ok(ChainMessage::SetupRequest(tokens))
            }
            TYPE_DATA => Ok(ChainMessage::Data(payload)),
            other => Err(FrameError::InvalidMessageType(other)),
        }
    }

    /// Encode the message to bytes for wire transmission.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let payload = self.encode_payload()?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_u16(self.type_tag());
        buf.put(payload);
        Ok(buf.freeze())
    }

    /// Decode a message from a complete frame.
    pub fn decode(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame header",
            )));
        }
        let length = bytes.get_u32() as usize;
        let tag = bytes.get_u16();
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }
        if bytes.len() < length {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "incomplete frame payload",
            )));
        }
        Self::decode_payload(tag, bytes.split_to(length))
    }
}

fn decode_utf8(payload: Bytes) -> Result<String, FrameError> {
    String::from_utf8(payload.to_vec()).map_err(|e| FrameError::Decode(e.to_string()))
}

/// Write one message to an async writer and flush it.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &ChainMessage,
) -> Result<(), FrameError> {
    let encoded = message.encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one message from an async reader.
///
/// A clean EOF at a frame boundary is reported as
/// [`FrameError::StreamClosed`].
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<ChainMessage, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::StreamClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let tag = u16::from_be_bytes([header[4], header[5]]);
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    ChainMessage::decode_payload(tag, Bytes::from(payload))
}
