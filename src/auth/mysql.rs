//! MySQL authentication plugins
//!
//! - `mysql_native_password`: SHA1 scramble
//! - `caching_sha2_password`: SHA256 scramble, fast path only
//!
//! Full caching_sha2 authentication (server continuation byte `0x04`) needs
//! an RSA key exchange or a TLS channel. It is reported as unsupported and
//! never attempted.

use crate::error::{constants, ProbeError, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Scramble length both plugins hash over
pub const SCRAMBLE_LEN: usize = 20;

/// Auth-more-data status: cached credentials accepted, OK packet follows
pub const FAST_AUTH_SUCCESS: u8 = 0x03;

/// Auth-more-data status: server wants the full (RSA/TLS) exchange
pub const PERFORM_FULL_AUTHENTICATION: u8 = 0x04;

fn scramble(challenge: &[u8]) -> Result<&[u8]> {
    challenge
        .get(..SCRAMBLE_LEN)
        .ok_or_else(|| ProbeError::Protocol(constants::ERR_SHORT_SCRAMBLE.to_string()))
}

/// `SHA1(password) XOR SHA1(scramble || SHA1(SHA1(password)))`
///
/// An empty password produces an empty token.
pub fn native_password(challenge: &[u8], password: &[u8]) -> Result<Vec<u8>> {
    let scramble = scramble(challenge)?;
    if password.is_empty() {
        return Ok(Vec::new());
    }

    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    Ok(stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect())
}

/// `SHA256(password) XOR SHA256(SHA256(SHA256(password)) || nonce)`
///
/// An empty password produces an empty token.
pub fn caching_sha2_password(challenge: &[u8], password: &[u8]) -> Result<Vec<u8>> {
    let nonce = scramble(challenge)?;
    if password.is_empty() {
        return Ok(Vec::new());
    }

    let stage1 = Sha256::digest(password);
    let stage2 = Sha256::digest(stage1);
    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(nonce);
    let stage3 = hasher.finalize();

    Ok(stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect())
}

/// Outcome of a caching_sha2 auth-more-data packet the client can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// The final OK/ERR packet follows
    FastAuthSuccess,
}

/// Interpret the body of an auth-more-data (`0x01`) packet.
///
/// `0x04` is always [`ProbeError::UnsupportedAuth`], whatever follows it.
pub fn caching_sha2_continuation(data: &[u8]) -> Result<Continuation> {
    match data.first() {
        Some(&FAST_AUTH_SUCCESS) => Ok(Continuation::FastAuthSuccess),
        Some(&PERFORM_FULL_AUTHENTICATION) => Err(ProbeError::UnsupportedAuth(
            constants::ERR_FULL_AUTH_REQUIRED.to_string(),
        )),
        Some(other) => Err(ProbeError::Protocol(format!(
            "unknown caching_sha2_password continuation {other:#04x}"
        ))),
        None => Err(ProbeError::truncated("auth-more-data status")),
    }
}
