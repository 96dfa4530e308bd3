//! Newline framing for the agent socket.
//!
//! Every request and response is one UTF-8 line terminated by `\n`. Socket
//! reads rarely line up with message boundaries, so [`LineBuffer`] keeps
//! whatever arrived after a newline for the next call instead of discarding
//! it. The same buffer backs the blocking client ([`read_line`]) and the
//! async server ([`read_line_async`]).

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::ProtocolError;

/// Upper bound on a single line, newline excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Bytes requested per socket read.
const READ_CHUNK: usize = 256;

/// Accumulates raw socket bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Whether any unconsumed bytes remain.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the next complete line, if one is buffered.
    ///
    /// The newline is consumed but not returned. Bytes after it stay in the
    /// buffer.
    pub fn next_line(&mut self) -> Option<Result<String, ProtocolError>> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop();
                Some(decode(line))
            }
            None if self.buf.len() > MAX_LINE_LEN => {
                self.buf.clear();
                Some(Err(ProtocolError::LineTooLong(MAX_LINE_LEN)))
            }
            None => None,
        }
    }

    /// Drain an unterminated tail once the peer has closed the stream.
    pub fn take_remainder(&mut self) -> Option<Result<String, ProtocolError>> {
        if self.buf.is_empty() {
            return None;
        }
        Some(decode(std::mem::take(&mut self.buf)))
    }
}

fn decode(bytes: Vec<u8>) -> Result<String, ProtocolError> {
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Frame a payload as a single line.
///
/// Fails if the payload itself contains a newline, which would split it into
/// two messages.
pub fn encode_line(payload: &str) -> Result<Vec<u8>, ProtocolError> {
    if payload.contains('\n') {
        return Err(ProtocolError::EmbeddedNewline);
    }
    let mut bytes = Vec::with_capacity(payload.len() + 1);
    bytes.extend_from_slice(payload.as_bytes());
    bytes.push(b'\n');
    Ok(bytes)
}

/// Read one line from a blocking stream.
///
/// Returns `Ok(None)` when the peer closed the stream with nothing buffered.
pub fn read_line<R: Read>(
    reader: &mut R,
    buffer: &mut LineBuffer,
) -> Result<Option<String>, ProtocolError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(line) = buffer.next_line() {
            return line.map(Some);
        }
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            return buffer.take_remainder().transpose();
        }
        buffer.extend(&chunk[..n]);
    }
}

/// Write one framed line to a blocking stream.
pub fn write_line<W: Write>(writer: &mut W, payload: &str) -> Result<(), ProtocolError> {
    writer.write_all(&encode_line(payload)?)?;
    writer.flush()?;
    Ok(())
}

/// Read one line from an async stream.
///
/// Same contract as [`read_line`]; cancellation-safe only at line
/// boundaries, so callers that time out should drop the connection.
pub async fn read_line_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    buffer: &mut LineBuffer,
) -> Result<Option<String>, ProtocolError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(line) = buffer.next_line() {
            return line.map(Some);
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return buffer.take_remainder().transpose();
        }
        buffer.extend(&chunk[..n]);
    }
}

/// Write one framed line to an async stream.
pub async fn write_line_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &str,
) -> Result<(), ProtocolError> {
    writer.write_all(&encode_line(payload)?).await?;
    writer.flush().await?;
    Ok(())
}
