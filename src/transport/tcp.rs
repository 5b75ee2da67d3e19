//! TCP transport with an optional in-place TLS upgrade.

use crate::error::{ProbeError, Result};
use crate::transport::tls::TlsUpgradeConfig;
use crate::transport::{Connector, Transport};
use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};

/// Opens [`TcpTransport`]s to `addr` (`host:port`).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new<S: Into<String>>(addr: S) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn connect(&self) -> Result<TcpTransport> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ProbeError::Connect(format!("{}: {e}", self.addr)))?;
        stream.set_nodelay(true).map_err(ProbeError::Io)?;
        debug!("TCP connection established");

        Ok(TcpTransport {
            stream: StreamState::Plain(stream),
        })
    }
}

enum StreamState {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Closed,
}

/// An open TCP connection, plain or upgraded.
pub struct TcpTransport {
    stream: StreamState,
}

impl TcpTransport {
    pub fn is_encrypted(&self) -> bool {
        matches!(self.stream, StreamState::Tls(_))
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "transport closed")
}

#[async_trait]
impl Transport for TcpTransport {
    async fn recv(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self.stream {
            StreamState::Plain(ref mut s) => s.read_buf(buf).await,
            StreamState::Tls(ref mut s) => s.read_buf(buf).await,
            StreamState::Closed => Err(not_connected()),
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match self.stream {
            StreamState::Plain(ref mut s) => s.write_all(data).await,
            StreamState::Tls(ref mut s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            StreamState::Closed => Err(not_connected()),
        }
    }

    async fn upgrade(&mut self, server_name: &str, tls: &TlsUpgradeConfig) -> Result<()> {
        let plain = match std::mem::replace(&mut self.stream, StreamState::Closed) {
            StreamState::Plain(s) => s,
            other => {
                self.stream = other;
                return Err(ProbeError::TlsError(
                    "transport is not a plain stream".into(),
                ));
            }
        };

        let config = tls.load_client_config()?;
        let name = TlsUpgradeConfig::server_name(server_name)?;
        let connector = TlsConnector::from(Arc::new(config));

        // A failed handshake consumes the socket; the transport stays Closed.
        let encrypted = connector
            .connect(name, plain)
            .await
            .map_err(|e| ProbeError::TlsError(e.to_string()))?;
        debug!(server_name, trust = ?tls.trust_mode(), "TLS upgrade complete");
        self.stream = StreamState::Tls(Box::new(encrypted));
        Ok(())
    }

    async fn close(&mut self) {
        match std::mem::replace(&mut self.stream, StreamState::Closed) {
            StreamState::Plain(mut s) => {
                let _ = s.shutdown().await;
            }
            StreamState::Tls(mut s) => {
                let _ = s.shutdown().await;
            }
            StreamState::Closed => {}
        }
    }
}
