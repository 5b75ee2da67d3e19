//! # Transport Layer
//!
//! Byte-stream duplexes a probe session runs over.
//!
//! A [`Connector`] opens one [`Transport`]; the session that opened it owns
//! it exclusively until it calls [`Transport::close`]. Transports know nothing
//! about frames. They append whatever bytes arrive to the caller's buffer.
//!
//! ## Implementations
//! - **TCP** (`tcp`): plain TCP with an optional mid-stream TLS upgrade
//! - **TLS** (`tls`): rustls client configuration for that upgrade
//! - **UDP** (`udp`): connected datagram socket, one datagram per receive
//! - **Stream** (`stream`): any `AsyncRead + AsyncWrite`, e.g. `tokio::io::duplex`
//! - **Memory** (`memory`): scripted replay with call counters for tests

pub mod memory;
pub mod stream;
pub mod tcp;
pub mod tls;
pub mod udp;

use crate::error::{constants, ProbeError, Result};
use crate::transport::tls::TlsUpgradeConfig;
use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::sync::Mutex;

/// An opened byte duplex with explicit close.
#[async_trait]
pub trait Transport: Send {
    /// Append the next chunk of received bytes to `buf`.
    ///
    /// Returns the number of bytes appended; `0` means the peer closed. On a
    /// datagram transport `0` is an empty datagram instead.
    async fn recv(&mut self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Write all of `data`.
    async fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Re-wrap the stream in TLS, trusting the server per `tls`. Later
    /// `recv`/`send` calls go through the encrypted layer.
    async fn upgrade(&mut self, _server_name: &str, _tls: &TlsUpgradeConfig) -> Result<()> {
        Err(ProbeError::Protocol(
            constants::ERR_UPGRADE_UNSUPPORTED.to_string(),
        ))
    }

    /// Release the underlying resource. Idempotent and infallible; the
    /// session bounds how long it may take.
    async fn close(&mut self);
}

/// Opens transports to one peer.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    /// Resolve once the transport is open, or fail with a connect error.
    async fn connect(&self) -> Result<Self::Transport>;
}

/// Hands out a single pre-built transport.
///
/// Useful for driving a session over an already-open stream. A second
/// `connect` fails.
pub struct OnceConnector<T> {
    transport: Mutex<Option<T>>,
}

impl<T: Transport> OnceConnector<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> Connector for OnceConnector<T> {
    type Transport = T;

    async fn connect(&self) -> Result<T> {
        let taken = self
            .transport
            .lock()
            .map_err(|_| ProbeError::Connect("connector lock poisoned".into()))?
            .take();
        taken.ok_or_else(|| ProbeError::Connect("transport already handed out".into()))
    }
}
