//! Per-session observability
//!
//! Counters live on the session that produces them. Sessions share nothing,
//! so a metrics value is owned data that travels out with the probe result.

use crate::protocol::phase::Phase;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Counters for one probe session
#[derive(Debug, Default, Clone)]
pub struct SessionMetrics {
    /// Frames written to the transport
    pub frames_sent: u64,
    /// Frames (or reads) delivered to the session
    pub frames_received: u64,
    /// Total bytes sent
    pub bytes_sent: u64,
    /// Total bytes pulled from the transport
    pub bytes_received: u64,
    /// Receive calls issued to the transport
    pub recv_calls: u64,
    /// Time spent in each phase, in the order phases were left
    pub phase_durations: Vec<PhaseDuration>,
}

impl SessionMetrics {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame sent
    pub fn frame_sent(&mut self, byte_count: usize) {
        self.frames_sent += 1;
        self.bytes_sent += byte_count as u64;
    }

    /// Record a frame handed to the session
    pub fn frame_received(&mut self) {
        self.frames_received += 1;
    }

    /// Fold in receive counters kept by the frame reader
    pub fn record_receives(&mut self, calls: u64, byte_count: u64) {
        self.recv_calls += calls;
        self.bytes_received += byte_count;
    }

    /// Record how long the session stayed in `phase`
    pub fn phase_finished(&mut self, phase: Phase, elapsed: Duration) {
        debug!(%phase, duration_ms = elapsed.as_millis() as u64, "Phase finished");
        self.phase_durations.push(PhaseDuration {
            phase,
            duration_ms: elapsed.as_millis() as u64,
        });
    }

    /// Owned copy for the probe result
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_sent: self.frames_sent,
            frames_received: self.frames_received,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            recv_calls: self.recv_calls,
            phase_durations: self.phase_durations.clone(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        info!(
            frames_sent = self.frames_sent,
            frames_received = self.frames_received,
            bytes_sent = self.bytes_sent,
            bytes_received = self.bytes_received,
            recv_calls = self.recv_calls,
            phases = self.phase_durations.len(),
            "Session metrics snapshot"
        );
    }
}

/// Time spent in one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseDuration {
    pub phase: Phase,
    pub duration_ms: u64,
}

/// Point-in-time copy of [`SessionMetrics`], serialized into the probe result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub recv_calls: u64,
    pub phase_durations: Vec<PhaseDuration>,
}

/// Logs how long an operation took when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut metrics = SessionMetrics::new();
        metrics.frame_sent(10);
        metrics.frame_sent(5);
        metrics.record_receives(2, 7);
        metrics.frame_received();
        metrics.phase_finished(Phase::Greeting, Duration::from_millis(12));

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 15);
        assert_eq!(snap.recv_calls, 2);
        assert_eq!(snap.bytes_received, 7);
        assert_eq!(snap.frames_received, 1);
        assert_eq!(
            snap.phase_durations,
            vec![PhaseDuration {
                phase: Phase::Greeting,
                duration_ms: 12
            }]
        );
    }
}
