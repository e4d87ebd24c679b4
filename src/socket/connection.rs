//! One framed TCP connection.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::RpcError;
use crate::protocol::{encode_message, write_message, Envelope, Expect, FrameReader, MessageValue};

/// A TCP stream with the frame codec on top.
///
/// Owns the receive-side reassembly state, so a receive that times out
/// can simply be retried.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    chunk_size: usize,
    reader: FrameReader,
}

impl Connection {
    /// Wrap a connected stream.
    pub fn new(
        stream: TcpStream,
        chunk_size: usize,
        max_message_size: usize,
    ) -> Result<Self, RpcError> {
        let peer = stream.peer_addr().map_err(|e| RpcError::Socket {
            message: format!("Failed to read peer address: {}", e),
        })?;
        // Request/response traffic is latency-bound.
        stream.set_nodelay(true)?;

        let chunk_size = chunk_size.max(1);
        Ok(Self {
            stream,
            peer,
            chunk_size,
            reader: FrameReader::new(chunk_size, max_message_size),
        })
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Chunk size used for sending.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Send one message.
    pub async fn send(&mut self, value: &MessageValue) -> Result<(), RpcError> {
        write_message(&mut self.stream, value, self.chunk_size).await
    }

    /// Receive one message of the expected kind, waiting at most
    /// `timeout` (forever if `None`).
    pub async fn recv(&mut self, expect: Expect, timeout: Option<Duration>) -> Result<MessageValue, RpcError> {
        match timeout {
            Some(duration) => {
                self.reader
                    .read_message_with_timeout(&mut self.stream, expect, duration)
                    .await
            }
            None => self.reader.read_message(&mut self.stream, expect).await,
        }
    }

    /// Send an envelope.
    pub async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), RpcError> {
        let message = envelope.to_message()?;
        self.send(&message).await
    }

    /// Receive an envelope.
    pub async fn recv_envelope(&mut self, timeout: Option<Duration>) -> Result<Envelope, RpcError> {
        let message = self.recv(Expect::Json, timeout).await?;
        Envelope::from_message(message)
    }

    /// Send a message without awaiting, for use from `Drop`.
    ///
    /// Succeeds only if the whole encoded message fits in the socket's
    /// send buffer right now.
    pub fn try_send_now(&self, value: &MessageValue) -> Result<(), RpcError> {
        let encoded = encode_message(value, self.chunk_size)?;
        let written = self.stream.try_write(&encoded)?;
        if written < encoded.len() {
            return Err(RpcError::Socket {
                message: format!(
                    "Partial write to {} ({} of {} bytes)",
                    self.peer,
                    written,
                    encoded.len()
                ),
            });
        }
        Ok(())
    }

    /// Shut down the write side and drop the stream.
    pub async fn shutdown(mut self) -> Result<(), RpcError> {
        debug!(peer = %self.peer, "Shutting down connection");
        self.stream.shutdown().await?;
        Ok(())
    }
}
