//! Connected UDP socket as a transport.
//!
//! Each `recv` appends exactly one datagram, so a reader that frames on
//! "whatever one receive produced" sees datagram boundaries intact. There is
//! no close on the wire: a `recv` of `0` is an empty datagram.

use crate::error::{ProbeError, Result};
use crate::transport::{Connector, Transport};
use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

/// Largest datagram a receive accepts
pub const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct UdpConnector {
    addr: String,
}

impl UdpConnector {
    pub fn new<S: Into<String>>(addr: S) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connector for UdpConnector {
    type Transport = UdpTransport;

    #[instrument(skip(self), fields(addr = %self.addr))]
    async fn connect(&self) -> Result<UdpTransport> {
        let peer: SocketAddr = tokio::net::lookup_host(&self.addr)
            .await
            .map_err(|e| ProbeError::Connect(format!("{}: {e}", self.addr)))?
            .next()
            .ok_or_else(|| ProbeError::Connect(format!("{}: no address resolved", self.addr)))?;

        let local = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| ProbeError::Connect(format!("bind {local}: {e}")))?;
        socket
            .connect(peer)
            .await
            .map_err(|e| ProbeError::Connect(format!("{peer}: {e}")))?;
        debug!(%peer, "UDP socket connected");

        Ok(UdpTransport {
            socket: Some(socket),
        })
    }
}

pub struct UdpTransport {
    socket: Option<UdpSocket>,
}

#[async_trait]
impl Transport for UdpTransport {
    async fn recv(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut datagram = vec![0u8; MAX_DATAGRAM];
        let n = socket.recv(&mut datagram).await?;
        buf.extend_from_slice(&datagram[..n]);
        Ok(n)
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let sent = socket.send(data).await?;
        if sent != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "datagram truncated on send",
            ));
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.socket = None;
    }
}
