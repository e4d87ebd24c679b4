//! Wire format for message framing.
//!
//! Every message is one or more chunks, each `payload || trailer`:
//!
//! ```text
//! [payload: chunk_size bytes][0x00]   continuation chunk
//! [payload: 0..=chunk_size bytes][t]  final chunk, t in {0x01 bytes, 0x02 text, 0x03 json}
//! ```
//!
//! The format carries no length prefix, so the reader is told which kinds
//! the caller expects ([`Expect`]):
//!
//! - A continuation chunk is always exactly `chunk_size` bytes.
//! - Compact JSON never contains a raw byte <= 0x03, so the first such
//!   byte ends a JSON chunk. This rule is exact.
//! - A short bytes or text chunk ends at the last buffered byte, or at an
//!   earlier bytes/text trailer that a JSON message follows. A raw message
//!   is never queued behind another raw message, since the handshake
//!   strictly alternates.

use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{FramingErrorKind, RpcError};

use super::value::{MessageValue, Trailer};

/// Default maximum payload bytes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default maximum reassembled message size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const READ_BUFFER_SIZE: usize = 4096;

/// Encode a value into its complete chunk sequence.
pub fn encode_message(value: &MessageValue, chunk_size: usize) -> Result<Vec<u8>, RpcError> {
    let (payload, trailer) = value.to_payload()?;
    let chunk_size = chunk_size.max(1);

    if payload.is_empty() {
        return Ok(vec![trailer as u8]);
    }

    let count = payload.len().div_ceil(chunk_size);
    let mut out = Vec::with_capacity(payload.len() + count);
    for (index, chunk) in payload.chunks(chunk_size).enumerate() {
        out.extend_from_slice(chunk);
        if index + 1 == count {
            out.push(trailer as u8);
        } else {
            out.push(Trailer::Continue as u8);
        }
    }

    Ok(out)
}

/// Write one chunked message to the writer.
pub async fn write_message<W>(
    writer: &mut W,
    value: &MessageValue,
    chunk_size: usize,
) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    let data = encode_message(value, chunk_size)?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Message kinds a receiver is prepared to accept.
///
/// The hint decides where a message ends when several are buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Structured messages. Bytes or text still end at their trailer,
    /// so the caller can reject them.
    Json,
    /// Bytes or text, as exchanged during the handshake.
    Raw,
    /// Any kind; a complete JSON list or map is recognised first.
    Any,
}

enum Step {
    Partial,
    Complete(MessageValue),
}

/// Incremental reader that reassembles chunked messages.
///
/// Buffered bytes and partially assembled payloads survive a cancelled
/// or timed-out read, so callers may poll with short bounded waits
/// without losing data. No partial message is ever returned.
#[derive(Debug)]
pub struct FrameReader {
    chunk_size: usize,
    max_message_size: usize,
    /// Raw bytes read from the transport but not yet consumed.
    buffer: Vec<u8>,
    /// Payload of the message currently being assembled.
    pending: Vec<u8>,
}

impl FrameReader {
    /// Create a reader for the given chunk size.
    pub fn new(chunk_size: usize, max_message_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_message_size,
            buffer: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Read one complete message of an expected kind.
    pub async fn read_message<R>(&mut self, reader: &mut R, expect: Expect) -> Result<MessageValue, RpcError>
    where
        R: AsyncRead + Unpin,
    {
        let mut scratch = [0u8; READ_BUFFER_SIZE];
        loop {
            if let Some(value) = self.decode_buffered(expect)? {
                return Ok(value);
            }

            let n = reader.read(&mut scratch).await?;
            if n == 0 {
                return Err(RpcError::connection_closed());
            }
            self.buffer.extend_from_slice(&scratch[..n]);
        }
    }

    /// Read one complete message, failing with a timeout error if none
    /// arrives within `timeout_duration`.
    pub async fn read_message_with_timeout<R>(
        &mut self,
        reader: &mut R,
        expect: Expect,
        timeout_duration: Duration,
    ) -> Result<MessageValue, RpcError>
    where
        R: AsyncRead + Unpin,
    {
        timeout(timeout_duration, self.read_message(reader, expect))
            .await
            .map_err(|_| RpcError::timeout())?
    }

    /// Whether any unconsumed bytes are buffered.
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn decode_buffered(&mut self, expect: Expect) -> Result<Option<MessageValue>, RpcError> {
        loop {
            match self.next_chunk(expect)? {
                None => return Ok(None),
                Some(Step::Partial) => continue,
                Some(Step::Complete(value)) => return Ok(Some(value)),
            }
        }
    }

    fn next_chunk(&mut self, expect: Expect) -> Result<Option<Step>, RpcError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match expect {
            Expect::Json => self.next_json_chunk(),
            Expect::Raw => self.next_raw_chunk(),
            Expect::Any => match self.complete_json()? {
                Some(step) => Ok(Some(step)),
                None => self.next_raw_chunk(),
            },
        }
    }

    /// Position of the first byte <= 0x03 within one chunk's reach.
    fn first_control(&self) -> Option<usize> {
        let window = self.buffer.len().min(self.chunk_size + 1);
        self.buffer[..window]
            .iter()
            .position(|&b| b <= Trailer::EndJson as u8)
    }

    fn next_json_chunk(&mut self) -> Result<Option<Step>, RpcError> {
        let n = self.chunk_size;
        let Some(i) = self.first_control() else {
            if self.buffer.len() > n {
                return Err(malformed(format!("no trailer within {} bytes", n)));
            }
            return Ok(None);
        };

        match Trailer::from_byte(self.buffer[i]) {
            Some(Trailer::Continue) if i == n => self.consume(n, Trailer::Continue).map(Some),
            Some(trailer) if trailer.is_terminal() => self.consume(i, trailer).map(Some),
            _ => Err(malformed(format!("continuation trailer after {} of {} bytes", i, n))),
        }
    }

    /// Complete a JSON list or map if one ends in the current chunk.
    fn complete_json(&mut self) -> Result<Option<Step>, RpcError> {
        let Some(i) = self.first_control() else {
            return Ok(None);
        };
        if self.buffer[i] != Trailer::EndJson as u8 {
            return Ok(None);
        }

        let mark = self.pending.len();
        self.pending.extend_from_slice(&self.buffer[..i]);
        let structured = matches!(
            serde_json::from_slice::<Value>(&self.pending),
            Ok(Value::Array(_) | Value::Object(_))
        );
        self.pending.truncate(mark);

        if structured {
            self.consume(i, Trailer::EndJson).map(Some)
        } else {
            Ok(None)
        }
    }

    fn next_raw_chunk(&mut self) -> Result<Option<Step>, RpcError> {
        let n = self.chunk_size;

        if self.buffer.len() > n {
            if let Some(trailer) = Trailer::from_byte(self.buffer[n]).filter(|t| *t != Trailer::EndJson) {
                return self.consume(n, trailer).map(Some);
            }
            // A short final chunk with the next message behind it.
            return match self.buffer[..n].iter().position(|&b| raw_terminal(b).is_some()) {
                Some(i) => self.end_raw_at(i),
                None => Err(malformed(format!(
                    "invalid trailer byte 0x{:02x} after {} bytes",
                    self.buffer[n], n
                ))),
            };
        }

        let last = self.buffer.len() - 1;
        if raw_terminal(self.buffer[last]).is_some() {
            return self.end_raw_at(last);
        }

        let boundary = self.buffer[..last]
            .iter()
            .zip(&self.buffer[1..])
            .position(|(&b, &next)| raw_terminal(b).is_some() && matches!(next, b'{' | b'['));
        match boundary {
            Some(i) => self.end_raw_at(i),
            None => Ok(None),
        }
    }

    fn end_raw_at(&mut self, index: usize) -> Result<Option<Step>, RpcError> {
        match raw_terminal(self.buffer[index]) {
            Some(trailer) => self.consume(index, trailer).map(Some),
            None => Ok(None),
        }
    }

    fn consume(&mut self, len: usize, trailer: Trailer) -> Result<Step, RpcError> {
        self.pending.extend_from_slice(&self.buffer[..len]);
        self.buffer.drain(..=len);

        if self.pending.len() > self.max_message_size {
            let size = self.pending.len();
            self.pending.clear();
            return Err(RpcError::Framing {
                kind: FramingErrorKind::MessageTooLarge {
                    size,
                    max: self.max_message_size,
                },
            });
        }

        if !trailer.is_terminal() {
            return Ok(Step::Partial);
        }

        let payload = std::mem::take(&mut self.pending);
        MessageValue::from_payload(payload, trailer).map(Step::Complete)
    }
}

fn raw_terminal(byte: u8) -> Option<Trailer> {
    match Trailer::from_byte(byte) {
        Some(trailer @ (Trailer::EndBytes | Trailer::EndText)) => Some(trailer),
        _ => None,
    }
}

fn malformed(message: String) -> RpcError {
    RpcError::Framing {
        kind: FramingErrorKind::MalformedChunk { message },
    }
}
