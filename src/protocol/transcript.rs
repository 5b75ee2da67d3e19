//! Ordered diagnostic log of what a session exchanged.

use crate::protocol::phase::Phase;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Sent,
    Received,
    /// State change or local decision, no bytes on the wire
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub phase: Phase,
    pub direction: Direction,
    pub summary: String,
    pub bytes: usize,
    /// Milliseconds since the session started
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded while the session was in `phase`
    pub fn in_phase(&self, phase: Phase) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter().filter(move |e| e.phase == phase)
    }
}
