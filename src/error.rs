//! # Error Types
//!
//! Error handling for the probe engine.
//!
//! Every failure a probe can hit is a [`ProbeError`] variant. Variants are
//! finer-grained than what callers act on, so each one folds onto a stable
//! [`ErrorKind`] via [`ProbeError::kind`]. That kind is what a probe result
//! reports alongside the phase in which the failure happened.
//!
//! ## Error Categories
//! - **Connect**: refused, unreachable, or blocked-by-policy peers
//! - **Timeout / BudgetExhausted**: a single phase stalled vs. the whole probe ran out of time
//! - **Protocol**: malformed frames, wrong magic or version, out-of-phase messages
//! - **UnsupportedAuth / Auth**: mechanism not implementable vs. credentials rejected
//! - **TransportClosed**: the peer went away before a frame boundary
//!
//! ## Example Usage
//! ```rust
//! use protocol_probe::error::{ErrorKind, ProbeError, Result};
//!
//! fn check_magic(buf: &[u8]) -> Result<()> {
//!     if buf.starts_with(b"NTLMSSP\0") {
//!         Ok(())
//!     } else {
//!         Err(ProbeError::Protocol("bad NTLM signature".into()))
//!     }
//! }
//!
//! let err = check_magic(b"garbage").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::ProtocolError);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_TRUNCATED_FRAME: &str = "Frame truncated";
    pub const ERR_TRAILING_BYTES: &str = "Unexpected trailing bytes after frame";
    pub const ERR_UNEXPECTED_ERROR_SENTINEL: &str = "Unexpected error sentinel in length-encoded field";
    pub const ERR_NULL_NOT_ALLOWED: &str = "NULL marker where a length was required";

    /// Session errors
    pub const ERR_NOT_READY: &str = "Session is not ready for application requests";
    pub const ERR_NOT_CONNECTED: &str = "Session has no open transport";
    pub const ERR_PENDING_PLAINTEXT: &str = "Plaintext bytes pending before transport upgrade";
    pub const ERR_UPGRADE_UNSUPPORTED: &str = "Transport does not support an encrypted upgrade";

    /// Authentication errors
    pub const ERR_SHORT_SCRAMBLE: &str = "Authentication challenge shorter than 20 bytes";
    pub const ERR_FULL_AUTH_REQUIRED: &str =
        "Server requested caching_sha2_password full authentication (RSA or TLS exchange)";
    pub const ERR_REPEATED_AUTH_SWITCH: &str = "Server requested a second authentication switch";
    pub const ERR_DIGEST_MISMATCH: &str = "Keyed-MD5 digest mismatch";
    pub const ERR_UNAUTHENTICATED_RESPONSE: &str = "Response carried no authentication trailer";

    /// Catalog errors
    pub const ERR_REQUEST_NOT_SUPPORTED: &str = "Request not supported by this protocol catalog";
}

/// Caller-facing failure taxonomy.
///
/// Probe results carry exactly one of these (or none on success) together with
/// the phase the session failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectError,
    Timeout,
    BudgetExhausted,
    ProtocolError,
    UnsupportedAuthError,
    AuthError,
    TransportClosed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ConnectError => "connect_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::BudgetExhausted => "budget_exhausted",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::UnsupportedAuthError => "unsupported_auth_error",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::TransportClosed => "transport_closed",
        };
        f.write_str(name)
    }
}

// ProbeError is the primary error type for every probe operation
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Overall probe budget exhausted")]
    BudgetExhausted,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported authentication: {0}")]
    UnsupportedAuth(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transport closed before a complete frame arrived")]
    TransportClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Session already closed")]
    SessionClosed,

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),
}

impl ProbeError {
    /// Fold this error onto the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::Connect(_) | ProbeError::ConfigError(_) => ErrorKind::ConnectError,
            ProbeError::Timeout(_) => ErrorKind::Timeout,
            ProbeError::BudgetExhausted => ErrorKind::BudgetExhausted,
            ProbeError::Protocol(_) | ProbeError::TlsError(_) | ProbeError::OversizedFrame(_) => {
                ErrorKind::ProtocolError
            }
            ProbeError::UnsupportedAuth(_) => ErrorKind::UnsupportedAuthError,
            ProbeError::Auth(_) => ErrorKind::AuthError,
            ProbeError::TransportClosed | ProbeError::SessionClosed => ErrorKind::TransportClosed,
            ProbeError::Io(err) => io_kind(err.kind()),
        }
    }

    /// Shorthand for a truncated-frame protocol error naming the field.
    pub fn truncated(field: &str) -> Self {
        ProbeError::Protocol(format!("{}: {field}", constants::ERR_TRUNCATED_FRAME))
    }
}

fn io_kind(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::PermissionDenied => ErrorKind::ConnectError,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
        io::ErrorKind::InvalidData => ErrorKind::ProtocolError,
        _ => ErrorKind::TransportClosed,
    }
}

/// Type alias for Results using ProbeError
pub type Result<T> = std::result::Result<T, ProbeError>;
