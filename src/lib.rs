//! # Protocol Probe
//!
//! Bounded-time, multi-phase network protocol probes.
//!
//! A probe opens one transport to one peer, walks a phase state machine
//! (greeting, negotiation, optional TLS upgrade, challenge-response
//! authentication), issues application requests, decodes the framed
//! responses, and always releases the transport, all inside a single time
//! budget. Slow, fragmenting or hostile peers end in a typed failure naming
//! the phase, never a hang or a partial result.
//!
//! ## Modules
//! - [`transport`]: TCP (with TLS upgrade), UDP, generic streams, scripted memory
//! - [`core`]: frame accumulation, deadline budget, codecs, length-encoded fields
//! - [`auth`]: MySQL native / caching_sha2, NTLM, Keyed-MD5
//! - [`protocol`]: phases, the handshake session, response decoding
//! - [`catalog`]: MySQL, RDP, RIP and simple RFC services
//! - [`service`]: one-shot [`run_probe`] and [`ProbeResult`]
//!
//! ## Example
//! ```no_run
//! use protocol_probe::catalog::{MySqlCatalog, MySqlOptions, Request};
//! use protocol_probe::config::ProbeConfig;
//! use protocol_probe::transport::tcp::TcpConnector;
//! use protocol_probe::run_probe;
//!
//! # async fn demo() {
//! let connector = TcpConnector::new("127.0.0.1:3306");
//! let catalog = MySqlCatalog::new(MySqlOptions::new("root", "secret")).into();
//! let result = run_probe(
//!     ProbeConfig::default(),
//!     &connector,
//!     catalog,
//!     &[Request::Query("SELECT 1".into())],
//! )
//! .await;
//! println!("{}", result.to_json().unwrap_or_default());
//! # }
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ErrorKind, ProbeError, Result};
pub use protocol::{HandshakeSession, Phase};
pub use service::{run_probe, ProbeResult};
