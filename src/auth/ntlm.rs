//! NTLM NEGOTIATE / CHALLENGE messages (MS-NLMP).
//!
//! A probe only needs the first round trip: send a NEGOTIATE (Type 1), read
//! the server's CHALLENGE (Type 2), and pull the target's identity out of the
//! AV_PAIR list. No AUTHENTICATE (Type 3) message is ever produced.

use crate::core::lenenc::PacketCursor;
use crate::error::{ProbeError, Result};
use bytes::{BufMut, BytesMut};
use serde::Serialize;

pub const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
pub const NEGOTIATE_MESSAGE: u32 = 1;
pub const CHALLENGE_MESSAGE: u32 = 2;

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const NEGOTIATE_OEM: u32 = 0x0000_0002;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_SIGN: u32 = 0x0000_0010;
pub const NEGOTIATE_LM_KEY: u32 = 0x0000_0080;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_VERSION: u32 = 0x0200_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_KEY_EXCH: u32 = 0x4000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

/// Flags sent in our NEGOTIATE message (`0xE2088297`)
pub const CLIENT_FLAGS: u32 = NEGOTIATE_56
    | NEGOTIATE_KEY_EXCH
    | NEGOTIATE_128
    | NEGOTIATE_VERSION
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_NTLM
    | NEGOTIATE_LM_KEY
    | NEGOTIATE_SIGN
    | REQUEST_TARGET
    | NEGOTIATE_OEM
    | NEGOTIATE_UNICODE;

const NEGOTIATE_LEN: u32 = 40;
const CHALLENGE_FIXED_LEN: usize = 48;

// AV_PAIR ids
const MSV_AV_EOL: u16 = 0;
const MSV_AV_NB_COMPUTER_NAME: u16 = 1;
const MSV_AV_NB_DOMAIN_NAME: u16 = 2;
const MSV_AV_DNS_COMPUTER_NAME: u16 = 3;
const MSV_AV_DNS_DOMAIN_NAME: u16 = 4;
const MSV_AV_DNS_TREE_NAME: u16 = 5;
const MSV_AV_TIMESTAMP: u16 = 7;

/// Build the 40-byte NEGOTIATE message with empty domain/workstation fields.
pub fn negotiate_message() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(NEGOTIATE_LEN as usize);
    buf.put_slice(SIGNATURE);
    buf.put_u32_le(NEGOTIATE_MESSAGE);
    buf.put_u32_le(CLIENT_FLAGS);
    // DomainNameFields, WorkstationFields: len, max len, offset
    for _ in 0..2 {
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_u32_le(NEGOTIATE_LEN);
    }
    // Version: 10.0 build 19041, NTLMSSP revision 15
    buf.put_u8(10);
    buf.put_u8(0);
    buf.put_u16_le(19041);
    buf.put_slice(&[0, 0, 0]);
    buf.put_u8(0x0F);
    buf.to_vec()
}

/// Identity fields the target reveals in its CHALLENGE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NtlmInfo {
    pub nb_computer_name: Option<String>,
    pub nb_domain_name: Option<String>,
    pub dns_computer_name: Option<String>,
    pub dns_domain_name: Option<String>,
    pub dns_tree_name: Option<String>,
    /// FILETIME (100ns ticks since 1601-01-01)
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NtlmChallenge {
    pub flags: u32,
    #[serde(with = "hex_bytes")]
    pub server_challenge: [u8; 8],
    pub target_name: Option<String>,
    /// `major.minor.build` when the server sent a version block
    pub os_version: Option<String>,
    pub info: NtlmInfo,
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8; 8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}

fn utf16le(raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Slice a `(len u16, max_len u16, offset u32)` security buffer out of `msg`.
fn security_buffer<'a>(msg: &'a [u8], cur: &mut PacketCursor<'_>, field: &str) -> Result<&'a [u8]> {
    let len = cur.u16_le(field)? as usize;
    let _max_len = cur.u16_le(field)?;
    let offset = cur.u32_le(field)? as usize;
    if len == 0 {
        return Ok(&[]);
    }
    offset
        .checked_add(len)
        .and_then(|end| msg.get(offset..end))
        .ok_or_else(|| ProbeError::Protocol(format!("NTLM {field} points outside the message")))
}

/// Parse a CHALLENGE (Type 2) message.
pub fn parse_challenge(msg: &[u8]) -> Result<NtlmChallenge> {
    if msg.len() < CHALLENGE_FIXED_LEN {
        return Err(ProbeError::truncated("NTLM challenge"));
    }

    let mut cur = PacketCursor::new(msg);
    if cur.bytes(8, "signature")? != SIGNATURE {
        return Err(ProbeError::Protocol("bad NTLM signature".into()));
    }
    let message_type = cur.u32_le("message type")?;
    if message_type != CHALLENGE_MESSAGE {
        return Err(ProbeError::Protocol(format!(
            "expected NTLM CHALLENGE, got message type {message_type}"
        )));
    }

    let target_name_raw = security_buffer(msg, &mut cur, "target name")?;
    let flags = cur.u32_le("negotiate flags")?;
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(cur.bytes(8, "server challenge")?);
    cur.skip(8, "reserved")?;
    let target_info = security_buffer(msg, &mut cur, "target info")?;

    let os_version = if flags & NEGOTIATE_VERSION != 0 && cur.remaining() >= 8 {
        let major = cur.u8("version")?;
        let minor = cur.u8("version")?;
        let build = cur.u16_le("version")?;
        Some(format!("{major}.{minor}.{build}"))
    } else {
        None
    };

    let target_name = (!target_name_raw.is_empty()).then(|| {
        if flags & NEGOTIATE_UNICODE != 0 {
            utf16le(target_name_raw)
        } else {
            String::from_utf8_lossy(target_name_raw).into_owned()
        }
    });

    Ok(NtlmChallenge {
        flags,
        server_challenge,
        target_name,
        os_version,
        info: parse_av_pairs(target_info)?,
    })
}

/// Walk `(id u16, len u16, value)` entries until MsvAvEOL.
///
/// Unknown ids are skipped. Running out of input exactly at an entry
/// boundary ends the list; a partial entry is a protocol error.
pub fn parse_av_pairs(data: &[u8]) -> Result<NtlmInfo> {
    let mut info = NtlmInfo::default();
    let mut cur = PacketCursor::new(data);

    while !cur.is_empty() {
        let id = cur.u16_le("AV_PAIR id")?;
        let len = cur.u16_le("AV_PAIR length")? as usize;
        if id == MSV_AV_EOL {
            break;
        }
        let value = cur.bytes(len, "AV_PAIR value")?;

        match id {
            MSV_AV_NB_COMPUTER_NAME => info.nb_computer_name = Some(utf16le(value)),
            MSV_AV_NB_DOMAIN_NAME => info.nb_domain_name = Some(utf16le(value)),
            MSV_AV_DNS_COMPUTER_NAME => info.dns_computer_name = Some(utf16le(value)),
            MSV_AV_DNS_DOMAIN_NAME => info.dns_domain_name = Some(utf16le(value)),
            MSV_AV_DNS_TREE_NAME => info.dns_tree_name = Some(utf16le(value)),
            MSV_AV_TIMESTAMP if len == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(value);
                info.timestamp = Some(u64::from_le_bytes(raw));
            }
            _ => {}
        }
    }

    Ok(info)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn av_pair(id: u16, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_le_bytes());
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    pub(crate) fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    /// CHALLENGE message with a version block and the given target info.
    pub(crate) fn challenge_message(target_info: &[u8]) -> Vec<u8> {
        let target_name = utf16("CORP");
        let name_offset = 56u32;
        let info_offset = name_offset + target_name.len() as u32;
        let flags = NEGOTIATE_UNICODE | NEGOTIATE_VERSION | NEGOTIATE_NTLM;

        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&CHALLENGE_MESSAGE.to_le_bytes());
        msg.extend_from_slice(&(target_name.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(target_name.len() as u16).to_le_bytes());
        msg.extend_from_slice(&name_offset.to_le_bytes());
        msg.extend_from_slice(&flags.to_le_bytes());
        msg.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        msg.extend_from_slice(&[0; 8]);
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&info_offset.to_le_bytes());
        msg.extend_from_slice(&[10, 0, 0x63, 0x45, 0, 0, 0, 0x0F]);
        msg.extend_from_slice(&target_name);
        msg.extend_from_slice(target_info);
        msg
    }

    #[test]
    fn test_negotiate_message_layout() {
        let msg = negotiate_message();
        assert_eq!(msg.len(), 40);
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes([msg[8], msg[9], msg[10], msg[11]]), 1);
        assert_eq!(
            u32::from_le_bytes([msg[12], msg[13], msg[14], msg[15]]),
            0xE208_8297
        );
        assert_eq!(&msg[32..], &[10, 0, 0x61, 0x4A, 0, 0, 0, 0x0F]);
    }

    #[test]
    fn test_av_pairs_in_any_order() {
        let mut info = Vec::new();
        info.extend(av_pair(4, &utf16("corp.example")));
        info.extend(av_pair(1, &utf16("DC01")));
        info.extend(av_pair(3, &utf16("dc01.corp.example")));
        info.extend(av_pair(2, &utf16("CORP")));
        info.extend(av_pair(0, &[]));

        let parsed = parse_av_pairs(&info).unwrap();
        assert_eq!(parsed.nb_computer_name.as_deref(), Some("DC01"));
        assert_eq!(parsed.nb_domain_name.as_deref(), Some("CORP"));
        assert_eq!(parsed.dns_computer_name.as_deref(), Some("dc01.corp.example"));
        assert_eq!(parsed.dns_domain_name.as_deref(), Some("corp.example"));
    }

    #[test]
    fn test_unknown_av_pair_is_skipped() {
        let mut info = Vec::new();
        info.extend(av_pair(9, b"\xde\xad\xbe\xef"));
        info.extend(av_pair(1, &utf16("HOST")));
        info.extend(av_pair(7, &0x01D9_0000_0000_0000u64.to_le_bytes()));
        info.extend(av_pair(0, &[]));

        let parsed = parse_av_pairs(&info).unwrap();
        assert_eq!(parsed.nb_computer_name.as_deref(), Some("HOST"));
        assert_eq!(parsed.timestamp, Some(0x01D9_0000_0000_0000));
    }

    #[test]
    fn test_entries_after_eol_are_ignored() {
        let mut info = av_pair(0, &[]);
        info.extend(av_pair(1, &utf16("LATE")));
        assert_eq!(parse_av_pairs(&info).unwrap(), NtlmInfo::default());
    }

    #[test]
    fn test_truncated_av_pair_value() {
        let mut info = av_pair(1, &utf16("HOST"));
        info.truncate(info.len() - 1);
        assert!(parse_av_pairs(&info).is_err());
    }

    #[test]
    fn test_parse_full_challenge() {
        let mut info = av_pair(2, &utf16("CORP"));
        info.extend(av_pair(0, &[]));
        let challenge = parse_challenge(&challenge_message(&info)).unwrap();

        assert_eq!(challenge.server_challenge, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(challenge.target_name.as_deref(), Some("CORP"));
        assert_eq!(challenge.os_version.as_deref(), Some("10.0.17763"));
        assert_eq!(challenge.info.nb_domain_name.as_deref(), Some("CORP"));
    }

    #[test]
    fn test_wrong_message_type() {
        let mut msg = challenge_message(&[0, 0, 0, 0]);
        msg[8] = 3;
        assert!(parse_challenge(&msg).is_err());
        assert!(parse_challenge(&negotiate_message()).is_err());
    }
}
