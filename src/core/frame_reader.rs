//! Byte accumulation over a transport.
//!
//! [`FrameReader`] owns the session's transport and a growable buffer. Each
//! read pulls chunks until the caller's request can be satisfied, hands back
//! exactly what was asked for, and keeps every surplus byte for the next
//! call. A chunk boundary can fall anywhere, including mid-field, without
//! losing or duplicating bytes.
//!
//! Every receive races an absolute deadline. Losing that race drops the
//! pending receive, so no read outlives the phase that issued it.

use crate::error::{ProbeError, Result};
use crate::transport::Transport;
use crate::utils::timeout::within;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tracing::trace;

pub struct FrameReader<T> {
    transport: T,
    buffer: BytesMut,
    chunk_size: usize,
    max_buffered: usize,
    recv_calls: u64,
    bytes_received: u64,
}

impl<T: Transport> FrameReader<T> {
    pub fn new(transport: T, chunk_size: usize, max_buffered: usize) -> Self {
        Self {
            transport,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size: chunk_size.max(1),
            max_buffered,
            recv_calls: 0,
            bytes_received: 0,
        }
    }

    /// Bytes received but not yet handed to a caller
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn recv_calls(&self) -> u64 {
        self.recv_calls
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Issue one receive. Returns the byte count; `0` is a clean close.
    async fn fill(&mut self, deadline: Instant, operation: &str) -> Result<usize> {
        if self.buffer.len() >= self.max_buffered {
            return Err(ProbeError::OversizedFrame(self.buffer.len()));
        }
        self.buffer.reserve(self.chunk_size);
        self.recv_calls += 1;
        let n = within(deadline, operation, self.transport.recv(&mut self.buffer)).await?;
        self.bytes_received += n as u64;
        trace!(bytes = n, buffered = self.buffer.len(), "Received chunk");
        Ok(n)
    }

    /// Exactly `n` bytes; the surplus stays buffered.
    pub async fn read_exact(&mut self, n: usize, deadline: Instant) -> Result<Bytes> {
        if n > self.max_buffered {
            return Err(ProbeError::OversizedFrame(n));
        }
        while self.buffer.len() < n {
            if self.fill(deadline, "read_exact").await? == 0 {
                return Err(ProbeError::TransportClosed);
            }
        }
        Ok(self.buffer.split_to(n).freeze())
    }

    /// Scan the growing buffer until `complete` reports a frame length.
    ///
    /// `complete` sees the whole unconsumed buffer after every chunk and
    /// returns `Some(len)` once the first `len` bytes form a frame.
    pub async fn read_until<F>(&mut self, mut complete: F, deadline: Instant) -> Result<Bytes>
    where
        F: FnMut(&[u8]) -> Result<Option<usize>>,
    {
        loop {
            if let Some(len) = complete(&self.buffer)? {
                if len > self.buffer.len() {
                    return Err(ProbeError::Protocol(format!(
                        "frame length {len} exceeds {} buffered bytes",
                        self.buffer.len()
                    )));
                }
                return Ok(self.buffer.split_to(len).freeze());
            }
            if self.fill(deadline, "read_until").await? == 0 {
                return Err(ProbeError::TransportClosed);
            }
        }
    }

    /// Decode one item with a tokio codec.
    pub async fn read_frame<D>(&mut self, decoder: &mut D, deadline: Instant) -> Result<D::Item>
    where
        D: Decoder<Error = ProbeError>,
    {
        loop {
            if let Some(item) = decoder.decode(&mut self.buffer)? {
                return Ok(item);
            }
            if self.fill(deadline, "read_frame").await? == 0 {
                return Err(ProbeError::TransportClosed);
            }
        }
    }

    /// One receive's worth of bytes, for transports that preserve datagram
    /// boundaries.
    ///
    /// Bytes already buffered are returned without receiving. A zero-length
    /// receive is an empty datagram, not a close.
    pub async fn read_datagram(&mut self, deadline: Instant) -> Result<Bytes> {
        if self.buffer.is_empty() {
            self.fill(deadline, "read_datagram").await?;
        }
        Ok(self.buffer.split().freeze())
    }

    /// Everything up to the peer's clean close.
    ///
    /// For protocols whose framing is "response ends at close". A close with
    /// nothing received is still [`ProbeError::TransportClosed`].
    pub async fn read_to_close(&mut self, deadline: Instant) -> Result<Bytes> {
        while self.fill(deadline, "read_to_close").await? > 0 {}
        if self.buffer.is_empty() {
            return Err(ProbeError::TransportClosed);
        }
        Ok(self.buffer.split().freeze())
    }
}
