//! Scripted in-memory transport.
//!
//! Replays a fixed sequence of receive outcomes (chunks, delays, stalls,
//! EOF, reset) and counts every call made against it. Sessions can then be
//! checked for how they touched the transport without a socket.

use crate::transport::tls::{TlsUpgradeConfig, TrustMode};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted receive outcome
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver these bytes
    Chunk(Bytes),
    /// Sleep, then continue with the next step in the same receive call
    Delay(Duration),
    /// Never complete
    Stall,
    /// Report a clean close
    Eof,
    /// Fail with `ConnectionReset`
    Reset,
}

/// Shared counters observing a [`ScriptedTransport`] after it moves into a session.
#[derive(Debug, Clone, Default)]
pub struct TransportProbe {
    recv_calls: Arc<AtomicUsize>,
    send_calls: Arc<AtomicUsize>,
    close_calls: Arc<AtomicUsize>,
    upgrade_calls: Arc<AtomicUsize>,
    upgrade_trust: Arc<Mutex<Vec<TrustMode>>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl TransportProbe {
    pub fn recv_calls(&self) -> usize {
        self.recv_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn upgrade_calls(&self) -> usize {
        self.upgrade_calls.load(Ordering::SeqCst)
    }

    /// Trust mode handed to each `upgrade` call, in order
    pub fn upgrade_trust(&self) -> Vec<TrustMode> {
        self.upgrade_trust.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Everything the session wrote, concatenated
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

pub struct ScriptedTransport {
    script: VecDeque<ScriptStep>,
    probe: TransportProbe,
    upgradable: bool,
    hang_on_close: bool,
    closed: bool,
}

impl ScriptedTransport {
    pub fn new<I: IntoIterator<Item = ScriptStep>>(script: I) -> Self {
        Self {
            script: script.into_iter().collect(),
            probe: TransportProbe::default(),
            upgradable: false,
            hang_on_close: false,
            closed: false,
        }
    }

    /// Deliver `chunks` in order, then EOF
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::new(chunks.into_iter().map(|c| ScriptStep::Chunk(c.into())))
    }

    /// Accept `upgrade` calls as a no-op
    pub fn upgradable(mut self) -> Self {
        self.upgradable = true;
        self
    }

    /// Make `close` count the call and then never complete
    pub fn hang_on_close(mut self) -> Self {
        self.hang_on_close = true;
        self
    }

    /// Counters that stay readable after the transport is moved
    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn recv(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.probe.recv_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }

        loop {
            match self.script.pop_front() {
                Some(ScriptStep::Chunk(bytes)) => {
                    buf.extend_from_slice(&bytes);
                    return Ok(bytes.len());
                }
                Some(ScriptStep::Delay(d)) => tokio::time::sleep(d).await,
                Some(ScriptStep::Stall) => std::future::pending::<()>().await,
                Some(ScriptStep::Reset) => {
                    return Err(io::Error::from(io::ErrorKind::ConnectionReset))
                }
                Some(ScriptStep::Eof) | None => return Ok(0),
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.probe.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        if let Ok(mut sent) = self.probe.sent.lock() {
            sent.extend_from_slice(data);
        }
        Ok(())
    }

    async fn upgrade(
        &mut self,
        _server_name: &str,
        tls: &TlsUpgradeConfig,
    ) -> crate::error::Result<()> {
        self.probe.upgrade_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut trust) = self.probe.upgrade_trust.lock() {
            trust.push(tls.trust_mode());
        }
        if self.upgradable {
            Ok(())
        } else {
            Err(crate::error::ProbeError::Protocol(
                crate::error::constants::ERR_UPGRADE_UNSUPPORTED.to_string(),
            ))
        }
    }

    async fn close(&mut self) {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
    }
}
