//! RFC 2082 Keyed-MD5 and plain 16-byte password authentication.
//!
//! The key is the password padded with NULs (or truncated) to 16 bytes.
//! The digest covers the whole packet with the trailing authentication data
//! zeroed, sandwiched between two copies of the key. Sequence numbers and key
//! ids are the caller's business; nothing here remembers them.

use md5::{Digest, Md5};

pub const KEY_LEN: usize = 16;
pub const DIGEST_LEN: usize = 16;

/// Pad with NULs or truncate to exactly 16 bytes.
pub fn pad_key(password: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let n = password.len().min(KEY_LEN);
    key[..n].copy_from_slice(&password[..n]);
    key
}

/// `MD5(key || packet || key)`
///
/// `packet` must already have its trailing authentication data zeroed.
pub fn digest(password: &[u8], packet: &[u8]) -> [u8; DIGEST_LEN] {
    let key = pad_key(password);
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(packet);
    hasher.update(key);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Zero the last 16 bytes of `packet` (the digest slot).
pub fn zero_trailing_auth(packet: &mut [u8]) {
    let start = packet.len().saturating_sub(DIGEST_LEN);
    packet[start..].fill(0);
}

/// Recompute the digest over `packet` and compare with its trailing 16 bytes.
pub fn verify(password: &[u8], packet: &[u8]) -> bool {
    if packet.len() < DIGEST_LEN {
        return false;
    }
    let split = packet.len() - DIGEST_LEN;
    let mut zeroed = packet.to_vec();
    zero_trailing_auth(&mut zeroed);
    digest(password, &zeroed)[..] == packet[split..]
}

/// Simple password authentication: the padded key itself.
pub fn simple_password(password: &[u8]) -> [u8; KEY_LEN] {
    pad_key(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_md5_vector() {
        let packet: Vec<u8> = (0u8..40).collect();
        assert_eq!(
            hex::encode(digest(b"secret", &packet)),
            "0460b8a813ebc6abb4aba928f3e1eab9"
        );
    }

    #[test]
    fn test_key_padding_and_truncation() {
        assert_eq!(&pad_key(b"abc")[..4], b"abc\0");
        assert_eq!(pad_key(b"0123456789abcdefXYZ"), *b"0123456789abcdef");
        assert_eq!(
            digest(b"0123456789abcdef", b"pkt"),
            digest(b"0123456789abcdefIGNORED", b"pkt")
        );
    }

    #[test]
    fn test_verify_round_trip() {
        let mut packet = b"header and body".to_vec();
        packet.extend_from_slice(&[0u8; DIGEST_LEN]);
        let tag = digest(b"pw", &packet);
        let split = packet.len() - DIGEST_LEN;
        packet[split..].copy_from_slice(&tag);

        assert!(verify(b"pw", &packet));
        assert!(!verify(b"other", &packet));
        packet[0] ^= 1;
        assert!(!verify(b"pw", &packet));
    }
}
