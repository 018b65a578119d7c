//! Physical connections and packet I/O.

use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::pool::ConnectionHandler;
use crate::stream::BoxedTransport;
use bytes::BytesMut;
use futures::FutureExt;
use rasmux_protocol::{Packet, SEND_CHUNK_SIZE};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

/// Identifier of a connection within its pool.
pub type ConnId = u64;

/// Upper bound for a single read attempt while waiting for a packet.
pub const READ_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read buffer capacity (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Packet-level reader/writer over one transport.
pub struct PacketIo {
    stream: BoxedTransport,
    read_buf: BytesMut,
    used_at: Instant,
}

impl PacketIo {
    pub fn new(stream: BoxedTransport) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(DEFAULT_READ_BUFFER_SIZE),
            used_at: Instant::now(),
        }
    }

    pub fn used_at(&self) -> Instant {
        self.used_at
    }

    /// Writes a packet in chunks of at most `SEND_CHUNK_SIZE` bytes.
    ///
    /// Fails with [`ClientError::Timeout`] if the peer does not take the
    /// whole packet within `timeout`.
    pub async fn send_packet(
        &mut self,
        packet: &Packet,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.used_at = Instant::now();
        let wire = packet.encode()?;
        let stream = &mut self.stream;
        let write = async move {
            for chunk in wire.chunks(SEND_CHUNK_SIZE) {
                stream.write_all(chunk).await?;
            }
            stream.flush().await
        };

        match tokio::time::timeout(timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::debug!("Write timeout");
                Err(ClientError::Timeout)
            }
        }
    }

    /// Waits for the next complete packet.
    ///
    /// Reads are retried in short attempts until `timeout` elapses; a closed
    /// stream fails immediately.
    pub async fn get_packet(&mut self, timeout: Duration) -> Result<Packet, ClientError> {
        self.used_at = Instant::now();
        let deadline = self.used_at + timeout;

        loop {
            if let Some(packet) = Packet::decode(&mut self.read_buf)? {
                return Ok(packet);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Read timeout");
                return Err(ClientError::Timeout);
            }
            let attempt = (deadline - now).min(READ_ATTEMPT_TIMEOUT);

            match tokio::time::timeout(attempt, self.stream.read_buf(&mut self.read_buf)).await {
                Err(_) => {
                    tracing::trace!("Read attempt timed out, retrying");
                }
                Ok(Ok(0)) => {
                    tracing::debug!("Connection closed (0 bytes)");
                    return Err(ClientError::ConnectionClosed);
                }
                Ok(Ok(n)) => {
                    tracing::trace!("Read {} bytes from socket", n);
                }
                Ok(Err(e)) => return Err(ClientError::Io(e)),
            }
        }
    }

    /// Polls the stream once without waiting.
    ///
    /// An idle connection must have nothing to read: end of stream, an error
    /// or unsolicited bytes all mean it can no longer be used.
    pub fn probe_closed(&mut self) -> bool {
        if !self.read_buf.is_empty() {
            return true;
        }
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte).now_or_never() {
            None => false,
            Some(Ok(0)) => {
                tracing::trace!("Idle connection closed by peer");
                true
            }
            Some(Ok(_)) => {
                tracing::trace!("Unsolicited byte {:#04x} on idle connection", byte[0]);
                true
            }
            Some(Err(e)) => {
                tracing::trace!("Idle connection read failed: {}", e);
                true
            }
        }
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!("Stream shutdown failed: {}", e);
        }
    }
}

/// A physical connection and the endpoints open on it.
pub struct Connection {
    id: ConnId,
    io: PacketIo,
    endpoints: Vec<Endpoint>,
    created_at: Instant,
    pooled: bool,
    initialized: bool,
    closed: bool,
}

impl Connection {
    pub fn new(id: ConnId, stream: BoxedTransport, pooled: bool) -> Self {
        Self {
            id,
            io: PacketIo::new(stream),
            endpoints: Vec::new(),
            created_at: Instant::now(),
            pooled,
            initialized: false,
            closed: false,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn io_mut(&mut self) -> &mut PacketIo {
        &mut self.io
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, idx: usize) -> Option<&Endpoint> {
        self.endpoints.get(idx)
    }

    /// Borrows the packet I/O and one endpoint at the same time.
    pub fn split_endpoint(&mut self, idx: usize) -> Option<(&mut PacketIo, &mut Endpoint)> {
        let endpoint = self.endpoints.get_mut(idx)?;
        Some((&mut self.io, endpoint))
    }

    /// Attaches an endpoint and returns its index.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) -> usize {
        self.endpoints.push(endpoint);
        self.endpoints.len() - 1
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn used_at(&self) -> Instant {
        self.io.used_at()
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub fn set_pooled(&mut self, pooled: bool) {
        self.pooled = pooled;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn set_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns whether the connection has been closed or the peer has gone.
    pub fn probe_closed(&mut self) -> bool {
        if self.closed {
            return true;
        }
        if self.io.probe_closed() {
            self.closed = true;
        }
        self.closed
    }

    /// Closes every endpoint through `handler`, then shuts the stream down.
    /// Calling it again is a no-op.
    ///
    /// The whole sequence is bounded by `timeout`; whatever is left when it
    /// expires is abandoned and the stream is dropped with the connection.
    pub async fn close<H: ConnectionHandler>(&mut self, handler: &H, timeout: Duration) {
        if self.closed {
            return;
        }
        self.closed = true;

        let id = self.id;
        let endpoints = std::mem::take(&mut self.endpoints);
        let io = &mut self.io;
        let close = async move {
            for endpoint in endpoints {
                if let Err(e) = handler.close_endpoint(io, &endpoint).await {
                    tracing::debug!(
                        "Failed to close endpoint {} on connection {}: {}",
                        endpoint.id(),
                        id,
                        e
                    );
                }
            }
            io.shutdown().await;
        };

        if tokio::time::timeout(timeout, close).await.is_err() {
            tracing::debug!("Timed out closing connection {}", id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoints", &self.endpoints.len())
            .field("pooled", &self.pooled)
            .field("initialized", &self.initialized)
            .field("closed", &self.closed)
            .finish()
    }
}
