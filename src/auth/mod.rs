//! # Authentication Mechanisms
//!
//! Pure challenge-response functions. Each mechanism maps
//! `(challenge, secret)` to the exact bytes the client puts in its next
//! frame and touches no transport or session state, so any number of
//! sessions may call them concurrently.
//!
//! ## Components
//! - **mysql**: `mysql_native_password` and the `caching_sha2_password` fast path
//! - **ntlm**: NEGOTIATE message and CHALLENGE / AV_PAIR parsing
//! - **keyed_md5**: RFC 2082 Keyed-MD5 and 16-byte simple passwords

pub mod keyed_md5;
pub mod mysql;
pub mod ntlm;

use crate::error::{ProbeError, Result};
use serde::Serialize;
use std::fmt;

/// Closed set of supported challenge-response mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMechanism {
    MySqlNative,
    CachingSha2,
    /// NTLM first leg: the response is a NEGOTIATE message; challenge and
    /// secret are unused
    NtlmNegotiate,
    /// RFC 2082: the challenge is the packet with its digest slot zeroed
    KeyedMd5,
    SimplePassword,
}

impl AuthMechanism {
    /// Select a mechanism by the identifier a peer advertised.
    ///
    /// Mechanisms the engine recognizes but cannot perform (for example
    /// `sha256_password`, which needs RSA) and unknown names both fail with
    /// [`ProbeError::UnsupportedAuth`].
    pub fn select(identifier: &str) -> Result<Self> {
        match identifier {
            "mysql_native_password" => Ok(AuthMechanism::MySqlNative),
            "caching_sha2_password" => Ok(AuthMechanism::CachingSha2),
            "ntlm" | "NTLM" => Ok(AuthMechanism::NtlmNegotiate),
            "keyed-md5" => Ok(AuthMechanism::KeyedMd5),
            "simple-password" => Ok(AuthMechanism::SimplePassword),
            "sha256_password" | "mysql_clear_password" | "client_ed25519" => Err(
                ProbeError::UnsupportedAuth(format!("{identifier} is not implemented")),
            ),
            other => Err(ProbeError::UnsupportedAuth(format!(
                "unknown mechanism '{other}'"
            ))),
        }
    }

    pub fn identifier(self) -> &'static str {
        match self {
            AuthMechanism::MySqlNative => "mysql_native_password",
            AuthMechanism::CachingSha2 => "caching_sha2_password",
            AuthMechanism::NtlmNegotiate => "ntlm",
            AuthMechanism::KeyedMd5 => "keyed-md5",
            AuthMechanism::SimplePassword => "simple-password",
        }
    }

    /// Compute the response bytes for `challenge` using `secret`.
    pub fn respond(self, challenge: &[u8], secret: &[u8]) -> Result<Vec<u8>> {
        match self {
            AuthMechanism::MySqlNative => mysql::native_password(challenge, secret),
            AuthMechanism::CachingSha2 => mysql::caching_sha2_password(challenge, secret),
            AuthMechanism::NtlmNegotiate => Ok(ntlm::negotiate_message()),
            AuthMechanism::KeyedMd5 => Ok(keyed_md5::digest(secret, challenge).to_vec()),
            AuthMechanism::SimplePassword => Ok(keyed_md5::simple_password(secret).to_vec()),
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
