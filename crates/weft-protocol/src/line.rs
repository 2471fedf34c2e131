// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Newline-terminated line protocol used by the allocator.
//!
//! One request line, one reply line, then the stream closes.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single line; allocator exchanges are tiny.
const MAX_LINE_LEN: usize = 4 * 1024;

/// Read one newline-terminated line, without the trailing newline.
pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut buf = BufReader::new(reader).take(MAX_LINE_LEN as u64);
    let mut line = String::new();
    let n = buf.read_line(&mut line).await?;
    if n == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream closed before a line was read",
        ));
    }
    if !line.ends_with('\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "line not newline-terminated",
        ));
    }
    line.truncate(line.len() - 1);
    Ok(line)
}

/// Write one line, appending the newline, and flush.
pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
