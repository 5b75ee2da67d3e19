//! # Handshake Session
//!
//! One probe conversation with one peer. The session owns its transport
//! (through a [`FrameReader`]), its deadline budget, its transcript and its
//! metrics, and walks the phase table one step at a time:
//!
//! ```text
//! Connecting -> Greeting -> Negotiating -> [Upgrading] -> Authenticating -> Ready
//! ```
//!
//! Any error moves the session to `Failed` and then `Closed`. Every exit
//! path (success, error, timeout) runs the same finalizer, which closes the
//! transport exactly once and waits at most one phase floor for it. No
//! transition into a live phase happens once the budget is spent. The protocol-specific wire work is delegated to a
//! [`ProtocolCatalog`], which receives a [`PhaseIo`] scoped to the current
//! phase and its deadline.

use crate::catalog::{Negotiation, Payload, ProtocolCatalog, Request};
use crate::config::{ProbeConfig, TransportConfig};
use crate::core::deadline::DeadlineBudget;
use crate::core::frame_reader::FrameReader;
use crate::core::message::ProtocolMessage;
use crate::error::{constants, ProbeError, Result};
use crate::protocol::phase::Phase;
use crate::protocol::transcript::{Direction, Transcript, TranscriptEntry};
use crate::transport::tls::TlsUpgradeConfig;
use crate::transport::{Connector, Transport};
use crate::utils::metrics::{MetricsSnapshot, SessionMetrics};
use crate::utils::timeout::{within, within_result};
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, instrument, warn};

/// A single probe session over transport `T`.
pub struct HandshakeSession<T> {
    config: ProbeConfig,
    budget: DeadlineBudget,
    phase: Phase,
    /// Furthest non-terminal phase entered
    reached: Phase,
    failed_in: Option<Phase>,
    reader: Option<FrameReader<T>>,
    transcript: Transcript,
    metrics: SessionMetrics,
    phase_started: Instant,
}

impl<T: Transport> HandshakeSession<T> {
    /// Create a session. The overall budget starts counting now.
    pub fn new(config: ProbeConfig) -> Self {
        let budget = DeadlineBudget::from_config(&config.budget);
        Self {
            phase_started: budget.started_at(),
            budget,
            config,
            phase: Phase::Connecting,
            reached: Phase::Connecting,
            failed_in: None,
            reader: None,
            transcript: Transcript::new(),
            metrics: SessionMetrics::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Furthest phase the session got to. `Failed` once any step failed.
    pub fn phase_reached(&self) -> Phase {
        if self.failed_in.is_some() {
            Phase::Failed
        } else {
            self.reached
        }
    }

    /// The phase that was active when the session failed
    pub fn failed_in(&self) -> Option<Phase> {
        self.failed_in
    }

    /// Last live phase entered before a close or failure
    pub fn last_live_phase(&self) -> Phase {
        self.reached
    }

    pub fn budget(&self) -> &DeadlineBudget {
        &self.budget
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn into_transcript(self) -> Transcript {
        self.transcript
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Counters so far, including receives still held by an open reader.
    pub fn metrics(&self) -> MetricsSnapshot {
        let mut metrics = self.metrics.clone();
        if let Some(reader) = &self.reader {
            metrics.record_receives(reader.recv_calls(), reader.bytes_received());
        }
        metrics.snapshot()
    }

    /// Open the transport. Bounded by the connect cap.
    #[instrument(skip_all)]
    pub async fn open<C>(&mut self, connector: &C) -> Result<()>
    where
        C: Connector<Transport = T>,
    {
        self.expect_phase(Phase::Connecting)?;
        match self.connect(connector).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn connect<C>(&mut self, connector: &C) -> Result<()>
    where
        C: Connector<Transport = T>,
    {
        let deadline = self.phase_deadline()?;
        let transport = within_result(deadline, "connect", connector.connect()).await?;
        self.reader = Some(FrameReader::new(
            transport,
            self.config.transport.read_chunk_size,
            self.config.transport.max_frame_size,
        ));
        self.record(Direction::Event, "transport open".to_string(), 0);
        self.transition(Phase::Greeting)
    }

    /// Drive greeting, negotiation, the optional upgrade and authentication.
    #[instrument(skip_all, fields(protocol = catalog.name()))]
    pub async fn handshake(&mut self, catalog: &mut ProtocolCatalog) -> Result<()> {
        self.expect_phase(Phase::Greeting)?;
        match self.drive_handshake(catalog).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn drive_handshake(&mut self, catalog: &mut ProtocolCatalog) -> Result<()> {
        {
            let mut io = self.phase_io()?;
            catalog.greet(&mut io).await?;
        }
        self.transition(Phase::Negotiating)?;

        let negotiation = {
            let mut io = self.phase_io()?;
            catalog.negotiate(&mut io).await?
        };

        if let Negotiation::Upgrade { server_name } = negotiation {
            self.transition(Phase::Upgrading)?;
            let mut io = self.phase_io()?;
            io.upgrade(&server_name).await?;
        }
        self.transition(Phase::Authenticating)?;

        {
            let mut io = self.phase_io()?;
            catalog.authenticate(&mut io).await?;
        }
        self.transition(Phase::Ready)
    }

    /// One request/response exchange. Only legal in `Ready`.
    #[instrument(skip_all, fields(protocol = catalog.name()))]
    pub async fn request(
        &mut self,
        catalog: &mut ProtocolCatalog,
        request: &Request,
    ) -> Result<Payload> {
        if self.phase != Phase::Ready {
            return Err(match self.phase {
                Phase::Closed => ProbeError::SessionClosed,
                _ => ProbeError::Protocol(constants::ERR_NOT_READY.to_string()),
            });
        }

        let outcome = match self.phase_io() {
            Ok(mut io) => catalog.exchange(&mut io, request).await,
            Err(e) => Err(e),
        };

        let outcome = match outcome {
            Ok(payload) => self.transition(Phase::Ready).map(|()| payload),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(payload) => Ok(payload),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Close the session, sending the protocol's farewell first when Ready.
    ///
    /// The farewell is best effort and bounded by the phase floor. Closing a
    /// session that is already closed fails with [`ProbeError::SessionClosed`].
    #[instrument(skip_all)]
    pub async fn close(&mut self, catalog: &mut ProtocolCatalog) -> Result<()> {
        if self.phase == Phase::Closed {
            return Err(ProbeError::SessionClosed);
        }

        if self.phase == Phase::Ready && !self.budget.is_exhausted() {
            let deadline = Instant::now() + self.budget.floor();
            if let Ok(mut io) = self.io_until(deadline) {
                if let Err(e) = catalog.farewell(&mut io).await {
                    debug!(error = %e, "Farewell not delivered");
                }
            }
        }

        self.finalize().await;
        Ok(())
    }

    fn expect_phase(&self, expected: Phase) -> Result<()> {
        match self.phase {
            p if p == expected => Ok(()),
            Phase::Closed => Err(ProbeError::SessionClosed),
            p => Err(ProbeError::Protocol(format!(
                "operation requires phase {expected}, session is in {p}"
            ))),
        }
    }

    fn phase_deadline(&self) -> Result<Instant> {
        self.budget
            .phase_deadline(self.config.budget.cap_for(self.phase))
    }

    fn phase_io(&mut self) -> Result<PhaseIo<'_, T>> {
        let deadline = self.phase_deadline()?;
        self.io_until(deadline)
    }

    fn io_until(&mut self, deadline: Instant) -> Result<PhaseIo<'_, T>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ProbeError::Protocol(constants::ERR_NOT_CONNECTED.to_string()))?;
        Ok(PhaseIo {
            reader,
            transcript: &mut self.transcript,
            metrics: &mut self.metrics,
            transport_config: &self.config.transport,
            phase: self.phase,
            deadline,
            session_start: self.budget.started_at(),
        })
    }

    fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(ProbeError::Protocol(format!(
                "illegal phase transition {} -> {next}",
                self.phase
            )));
        }
        if !next.is_terminal() && self.budget.is_exhausted() {
            debug!(phase = %self.phase, to = %next, "Budget spent before transition");
            return Err(ProbeError::BudgetExhausted);
        }

        self.finish_phase();
        let previous = std::mem::replace(&mut self.phase, next);
        if previous == next {
            debug!(phase = %next, "Exchange complete");
        } else {
            info!(from = %previous, to = %next, "Phase transition");
            self.record(Direction::Event, format!("enter {next}"), 0);
        }
        if !next.is_terminal() {
            self.reached = next;
        }
        Ok(())
    }

    fn finish_phase(&mut self) {
        let now = Instant::now();
        self.metrics
            .phase_finished(self.phase, now.saturating_duration_since(self.phase_started));
        self.phase_started = now;
    }

    fn record(&mut self, direction: Direction, summary: String, bytes: usize) {
        self.transcript.push(TranscriptEntry {
            phase: self.phase,
            direction,
            summary,
            bytes,
            at_ms: self.budget.elapsed().as_millis() as u64,
        });
    }

    async fn fail(&mut self, error: ProbeError) -> ProbeError {
        let phase = self.phase;
        warn!(%phase, kind = %error.kind(), error = %error, "Session failed");
        if !phase.is_terminal() {
            self.failed_in = Some(phase);
            self.record(Direction::Event, format!("failed: {error}"), 0);
            self.finish_phase();
            self.phase = Phase::Failed;
        }
        self.finalize().await;
        error
    }

    /// Release the transport exactly once and settle in `Closed`.
    async fn finalize(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            self.metrics
                .record_receives(reader.recv_calls(), reader.bytes_received());
            if reader.buffered() > 0 {
                debug!(bytes = reader.buffered(), "Discarding unread bytes");
            }
            let grace = self.budget.floor();
            let closed =
                tokio::time::timeout_at(Instant::now() + grace, reader.transport_mut().close())
                    .await;
            match closed {
                Ok(()) => self.record(Direction::Event, "transport closed".to_string(), 0),
                Err(_) => {
                    warn!(grace_ms = grace.as_millis() as u64, "Transport close timed out, releasing it");
                    self.record(Direction::Event, "transport close timed out".to_string(), 0);
                }
            }
            drop(reader);
        }

        if self.phase != Phase::Closed {
            if self.phase != Phase::Failed {
                self.finish_phase();
            }
            self.phase = Phase::Closed;
            info!(reached = %self.phase_reached(), "Session closed");
            self.metrics.log_metrics();
        }
    }
}

/// Transport access for one phase of a session.
///
/// Every operation is bounded by the phase deadline and logged to the
/// session transcript.
pub struct PhaseIo<'a, T> {
    reader: &'a mut FrameReader<T>,
    transcript: &'a mut Transcript,
    metrics: &'a mut SessionMetrics,
    transport_config: &'a TransportConfig,
    phase: Phase,
    deadline: Instant,
    session_start: Instant,
}

impl<'a, T: Transport> PhaseIo<'a, T> {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Configured ceiling for one frame
    pub fn max_frame_size(&self) -> usize {
        self.transport_config.max_frame_size
    }

    /// Bytes received but not yet consumed
    pub fn buffered(&self) -> usize {
        self.reader.buffered()
    }

    fn record(&mut self, direction: Direction, summary: &str, bytes: usize) {
        self.transcript.push(TranscriptEntry {
            phase: self.phase,
            direction,
            summary: summary.to_string(),
            bytes,
            at_ms: Instant::now()
                .saturating_duration_since(self.session_start)
                .as_millis() as u64,
        });
    }

    /// Log a local decision to the transcript.
    pub fn note(&mut self, summary: &str) {
        debug!(phase = %self.phase, "{summary}");
        self.record(Direction::Event, summary, 0);
    }

    fn annotate(&self, summary: &str, error: ProbeError) -> ProbeError {
        match error {
            ProbeError::Timeout(_) => {
                ProbeError::Timeout(format!("{} waiting for {summary}", self.phase))
            }
            other => other,
        }
    }

    fn received(&mut self, summary: &str, bytes: usize) {
        self.metrics.frame_received();
        debug!(phase = %self.phase, bytes, "Received {summary}");
        self.record(Direction::Received, summary, bytes);
    }

    pub async fn send(&mut self, data: &[u8], summary: &str) -> Result<()> {
        let sent = within(self.deadline, summary, self.reader.transport_mut().send(data)).await;
        sent.map_err(|e| self.annotate(summary, e))?;

        self.metrics.frame_sent(data.len());
        debug!(phase = %self.phase, bytes = data.len(), "Sent {summary}");
        self.record(Direction::Sent, summary, data.len());
        Ok(())
    }

    /// Encode `message` with `codec` and send it.
    pub async fn send_frame<E>(
        &mut self,
        codec: &mut E,
        message: ProtocolMessage,
        summary: &str,
    ) -> Result<()>
    where
        E: Encoder<ProtocolMessage, Error = ProbeError>,
    {
        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf)?;
        self.send(&buf, summary).await
    }

    pub async fn read_frame<D>(&mut self, codec: &mut D, summary: &str) -> Result<ProtocolMessage>
    where
        D: Decoder<Item = ProtocolMessage, Error = ProbeError>,
    {
        let frame = self.reader.read_frame(codec, self.deadline).await;
        let frame = frame.map_err(|e| self.annotate(summary, e))?;
        self.received(summary, frame.len());
        Ok(frame)
    }

    pub async fn read_exact(&mut self, n: usize, summary: &str) -> Result<Bytes> {
        let data = self.reader.read_exact(n, self.deadline).await;
        let data = data.map_err(|e| self.annotate(summary, e))?;
        self.received(summary, data.len());
        Ok(data)
    }

    /// See [`FrameReader::read_until`].
    pub async fn read_until<F>(&mut self, complete: F, summary: &str) -> Result<Bytes>
    where
        F: FnMut(&[u8]) -> Result<Option<usize>>,
    {
        let data = self.reader.read_until(complete, self.deadline).await;
        let data = data.map_err(|e| self.annotate(summary, e))?;
        self.received(summary, data.len());
        Ok(data)
    }

    /// See [`FrameReader::read_datagram`].
    pub async fn read_datagram(&mut self, summary: &str) -> Result<Bytes> {
        let data = self.reader.read_datagram(self.deadline).await;
        let data = data.map_err(|e| self.annotate(summary, e))?;
        self.received(summary, data.len());
        Ok(data)
    }

    pub async fn read_to_close(&mut self, summary: &str) -> Result<Bytes> {
        let data = self.reader.read_to_close(self.deadline).await;
        let data = data.map_err(|e| self.annotate(summary, e))?;
        self.received(summary, data.len());
        Ok(data)
    }

    /// Swap the transport to TLS, trusting the server per the probe's
    /// transport config. Refused while plaintext bytes are pending.
    pub async fn upgrade(&mut self, server_name: &str) -> Result<()> {
        if self.reader.buffered() > 0 {
            return Err(ProbeError::Protocol(format!(
                "{} ({} bytes)",
                constants::ERR_PENDING_PLAINTEXT,
                self.reader.buffered()
            )));
        }

        let tls = TlsUpgradeConfig::from_config(self.transport_config)?;
        let deadline = self.deadline;
        let upgraded = within_result(
            deadline,
            "tls upgrade",
            self.reader.transport_mut().upgrade(server_name, &tls),
        )
        .await;
        upgraded.map_err(|e| self.annotate("tls upgrade", e))?;

        info!(server_name, trust = ?tls.trust_mode(), "Transport upgraded to TLS");
        self.record(Direction::Event, "tls upgrade complete", 0);
        Ok(())
    }
}
