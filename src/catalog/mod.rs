//! # Protocol Catalog
//!
//! The closed set of protocols a session can speak. Each catalog entry owns
//! the per-protocol state (sequence numbers, negotiated capabilities, what
//! the peer revealed) and performs the wire work for each phase through the
//! [`PhaseIo`] the session hands it.
//!
//! ## Entries
//! - **MySql** (`mysql`): greeting, capability intersection, native and
//!   caching_sha2 authentication, queries and pings
//! - **Rdp** (`rdp`): X.224 negotiation, TLS upgrade, CredSSP/NTLM challenge
//! - **Rip** (`rip`): RIPv2 route-table request with simple or Keyed-MD5 auth
//! - **Simple** (`simple`): Echo, Daytime, Time and Finger

pub mod mysql;
pub mod rdp;
pub mod rip;
pub mod simple;

pub use mysql::{MySqlCatalog, MySqlOptions, MySqlServerInfo, OkSummary};
pub use rdp::{RdpCatalog, RdpNegotiationInfo, RdpOptions};
pub use rip::{RipAuth, RipCatalog, RipRoute};
pub use simple::{SimpleCatalog, SimpleService, TimeValue};

use crate::error::Result;
use crate::protocol::decoder::ResultSet;
use crate::protocol::session::PhaseIo;
use crate::transport::Transport;
use serde::{Deserialize, Serialize};

/// What the negotiation phase decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// Stay on the current transport
    Plain,
    /// Wrap the transport in TLS for `server_name` before authenticating
    Upgrade { server_name: String },
}

/// An application request issued once a session is Ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Request {
    /// SQL text (MySQL `COM_QUERY`)
    Query(String),
    /// Liveness check (MySQL `COM_PING`)
    Ping,
    /// Full routing table (RIP)
    RouteTable,
    /// Send text and read the reply (Echo, Finger)
    Text(String),
    /// Read whatever the service volunteers (Daytime, Time)
    Fetch,
}

/// Decoded response to one [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Ok(OkSummary),
    ResultSet(ResultSet),
    Pong,
    Routes(Vec<RipRoute>),
    Text(String),
    Time(TimeValue),
}

/// Facts the peer revealed during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum PeerInfo {
    #[serde(rename = "mysql")]
    MySql(MySqlServerInfo),
    Rdp(RdpNegotiationInfo),
}

pub enum ProtocolCatalog {
    MySql(MySqlCatalog),
    Rdp(RdpCatalog),
    Rip(RipCatalog),
    Simple(SimpleCatalog),
}

impl ProtocolCatalog {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolCatalog::MySql(_) => "mysql",
            ProtocolCatalog::Rdp(_) => "rdp",
            ProtocolCatalog::Rip(_) => "rip",
            ProtocolCatalog::Simple(c) => c.service().name(),
        }
    }

    /// Read (and for client-first protocols, provoke) the peer's greeting.
    pub async fn greet<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        match self {
            ProtocolCatalog::MySql(c) => c.greet(io).await,
            ProtocolCatalog::Rdp(c) => c.greet(io).await,
            ProtocolCatalog::Rip(c) => c.greet(io).await,
            ProtocolCatalog::Simple(c) => c.greet(io).await,
        }
    }

    pub async fn negotiate<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<Negotiation> {
        match self {
            ProtocolCatalog::MySql(c) => c.negotiate(io).await,
            ProtocolCatalog::Rdp(c) => c.negotiate(io).await,
            ProtocolCatalog::Rip(_) | ProtocolCatalog::Simple(_) => {
                io.note("no negotiation");
                Ok(Negotiation::Plain)
            }
        }
    }

    pub async fn authenticate<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        match self {
            ProtocolCatalog::MySql(c) => c.authenticate(io).await,
            ProtocolCatalog::Rdp(c) => c.authenticate(io).await,
            ProtocolCatalog::Rip(c) => c.authenticate(io).await,
            ProtocolCatalog::Simple(_) => {
                io.note("no authentication");
                Ok(())
            }
        }
    }

    /// One request/response exchange in the Ready phase.
    pub async fn exchange<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
        request: &Request,
    ) -> Result<Payload> {
        match self {
            ProtocolCatalog::MySql(c) => c.exchange(io, request).await,
            ProtocolCatalog::Rdp(c) => c.exchange(io, request).await,
            ProtocolCatalog::Rip(c) => c.exchange(io, request).await,
            ProtocolCatalog::Simple(c) => c.exchange(io, request).await,
        }
    }

    /// Polite goodbye before the transport closes. Best effort.
    pub async fn farewell<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        match self {
            ProtocolCatalog::MySql(c) => c.farewell(io).await,
            ProtocolCatalog::Rdp(_) | ProtocolCatalog::Rip(_) | ProtocolCatalog::Simple(_) => {
                Ok(())
            }
        }
    }

    pub fn peer_info(&self) -> Option<PeerInfo> {
        match self {
            ProtocolCatalog::MySql(c) => c.server_info().map(PeerInfo::MySql),
            ProtocolCatalog::Rdp(c) => c.negotiation_info().map(PeerInfo::Rdp),
            ProtocolCatalog::Rip(_) | ProtocolCatalog::Simple(_) => None,
        }
    }
}

impl From<MySqlCatalog> for ProtocolCatalog {
    fn from(c: MySqlCatalog) -> Self {
        ProtocolCatalog::MySql(c)
    }
}

impl From<RdpCatalog> for ProtocolCatalog {
    fn from(c: RdpCatalog) -> Self {
        ProtocolCatalog::Rdp(c)
    }
}

impl From<RipCatalog> for ProtocolCatalog {
    fn from(c: RipCatalog) -> Self {
        ProtocolCatalog::Rip(c)
    }
}

impl From<SimpleCatalog> for ProtocolCatalog {
    fn from(c: SimpleCatalog) -> Self {
        ProtocolCatalog::Simple(c)
    }
}
