//! One-shot probe: connect, handshake, run the requests, close, and report.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{Payload, PeerInfo, ProtocolCatalog, Request};
use crate::config::ProbeConfig;
use crate::error::{ErrorKind, ProbeError, Result};
use crate::protocol::phase::Phase;
use crate::protocol::session::HandshakeSession;
use crate::protocol::transcript::Transcript;
use crate::transport::Connector;
use crate::utils::metrics::{MetricsSnapshot, Timer};

/// What a successful probe decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedPayload {
    /// Facts the peer revealed during the handshake
    pub peer: Option<PeerInfo>,
    /// One entry per request, in request order
    pub responses: Vec<Payload>,
}

/// Caller-facing outcome of one probe.
///
/// Either `success` with a decoded payload, or a failure naming the phase
/// and error kind. A failed probe never carries a partial payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub success: bool,
    pub protocol: String,
    pub phase_reached: Phase,
    pub failed_phase: Option<Phase>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub elapsed_ms: u64,
    pub decoded_payload: Option<DecodedPayload>,
    pub transcript: Transcript,
    pub metrics: MetricsSnapshot,
}

impl ProbeResult {
    fn failure(protocol: &str, failed_phase: Option<Phase>, error: &ProbeError) -> Self {
        Self {
            success: false,
            protocol: protocol.to_string(),
            phase_reached: Phase::Failed,
            failed_phase,
            error_kind: Some(error.kind()),
            error_detail: Some(error.to_string()),
            elapsed_ms: 0,
            decoded_payload: None,
            transcript: Transcript::new(),
            metrics: MetricsSnapshot::default(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Run a complete probe against the peer behind `connector`.
///
/// Every exit path closes the transport before this returns. The whole run
/// stays inside `config.budget.total_timeout` plus at most two phase floors:
/// one for the farewell and one for the transport close. A close that takes
/// longer is abandoned and the transport dropped.
#[instrument(skip_all, fields(protocol = catalog.name(), requests = requests.len()))]
pub async fn run_probe<C>(
    config: ProbeConfig,
    connector: &C,
    mut catalog: ProtocolCatalog,
    requests: &[Request],
) -> ProbeResult
where
    C: Connector,
{
    let _timer = Timer::start("run_probe");
    let protocol = catalog.name();

    if let Err(e) = config.validate_strict() {
        warn!(error = %e, "Refusing to probe with invalid configuration");
        return ProbeResult::failure(protocol, Some(Phase::Connecting), &e);
    }

    let mut session = HandshakeSession::<C::Transport>::new(config);
    let outcome = drive(&mut session, connector, &mut catalog, requests).await;

    if !session.is_closed() {
        if let Err(e) = session.close(&mut catalog).await {
            debug!(error = %e, "Close after probe");
        }
    }

    let elapsed_ms = session.budget().elapsed().as_millis() as u64;
    let metrics = session.metrics();

    match outcome {
        Ok(responses) => {
            info!(elapsed_ms, responses = responses.len(), "Probe succeeded");
            ProbeResult {
                success: true,
                protocol: protocol.to_string(),
                phase_reached: session.last_live_phase(),
                failed_phase: None,
                error_kind: None,
                error_detail: None,
                elapsed_ms,
                decoded_payload: Some(DecodedPayload {
                    peer: catalog.peer_info(),
                    responses,
                }),
                transcript: session.into_transcript(),
                metrics,
            }
        }
        Err(e) => {
            info!(elapsed_ms, kind = %e.kind(), failed_in = ?session.failed_in(), "Probe failed");
            let mut result = ProbeResult::failure(protocol, session.failed_in(), &e);
            result.elapsed_ms = elapsed_ms;
            result.metrics = metrics;
            result.transcript = session.into_transcript();
            result
        }
    }
}

async fn drive<C>(
    session: &mut HandshakeSession<C::Transport>,
    connector: &C,
    catalog: &mut ProtocolCatalog,
    requests: &[Request],
) -> Result<Vec<Payload>>
where
    C: Connector,
{
    session.open(connector).await?;
    session.handshake(catalog).await?;

    let mut responses = Vec::with_capacity(requests.len());
    for request in requests {
        responses.push(session.request(catalog, request).await?);
    }
    Ok(responses)
}
