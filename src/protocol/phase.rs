//! Session phases and the legal transitions between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a [`HandshakeSession`](crate::protocol::session::HandshakeSession) is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Connecting,
    Greeting,
    Negotiating,
    Upgrading,
    Authenticating,
    Ready,
    Closed,
    Failed,
}

impl Phase {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Any live phase may fail, and every phase except `Closed` itself may
    /// close. `Ready -> Ready` covers repeated request/response exchanges.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Connecting, Greeting)
            | (Greeting, Negotiating)
            | (Negotiating, Upgrading)
            | (Negotiating, Authenticating)
            | (Upgrading, Authenticating)
            | (Authenticating, Ready)
            | (Ready, Ready) => true,
            _ => false,
        }
    }

    /// `Closed` and `Failed` accept no further protocol work.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Connecting => "Connecting",
            Phase::Greeting => "Greeting",
            Phase::Negotiating => "Negotiating",
            Phase::Upgrading => "Upgrading",
            Phase::Authenticating => "Authenticating",
            Phase::Ready => "Ready",
            Phase::Closed => "Closed",
            Phase::Failed => "Failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
