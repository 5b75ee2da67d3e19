//! # Probe Service
//!
//! The one-shot entry point that drives a [`HandshakeSession`] from connect
//! to close and folds the outcome into a serializable [`ProbeResult`].
//!
//! [`HandshakeSession`]: crate::protocol::session::HandshakeSession

pub mod probe;

pub use probe::{run_probe, DecodedPayload, ProbeResult};
