//! Any async byte stream as a transport.

use crate::transport::Transport;
use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wraps an `AsyncRead + AsyncWrite` stream. No upgrade support.
pub struct StreamTransport<S> {
    inner: Option<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: Some(stream),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self.inner {
            Some(ref mut s) => s.read_buf(buf).await,
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match self.inner {
            Some(ref mut s) => {
                s.write_all(data).await?;
                s.flush().await
            }
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    async fn close(&mut self) {
        if let Some(mut s) = self.inner.take() {
            let _ = s.shutdown().await;
        }
    }
}
