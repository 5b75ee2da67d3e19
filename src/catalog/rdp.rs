//! RDP connection negotiation up to the NTLM challenge.
//!
//! X.224 Connection Request / Confirm over TPKT, the TLS upgrade the
//! selected security protocol calls for, and (for NLA) the first CredSSP
//! round trip: a `TSRequest` carrying NTLM NEGOTIATE, answered by one
//! carrying the CHALLENGE. The probe stops there; no credentials are sent.

use crate::auth::ntlm::{self, NtlmChallenge};
use crate::auth::AuthMechanism;
use crate::catalog::{Negotiation, Payload, Request};
use crate::core::codec::{TpktCodec, TPKT_VERSION};
use crate::core::lenenc::PacketCursor;
use crate::core::message::ProtocolMessage;
use crate::error::{constants, ProbeError, Result};
use crate::protocol::session::PhaseIo;
use crate::transport::Transport;
use serde::Serialize;
use tracing::info;

pub const PROTOCOL_RDP: u32 = 0x0000_0000;
pub const PROTOCOL_SSL: u32 = 0x0000_0001;
pub const PROTOCOL_HYBRID: u32 = 0x0000_0002;
pub const PROTOCOL_RDSTLS: u32 = 0x0000_0004;
pub const PROTOCOL_HYBRID_EX: u32 = 0x0000_0008;

const X224_CONNECTION_REQUEST: u8 = 0xE0;
const X224_CONNECTION_CONFIRM: u8 = 0xD0;

const TYPE_RDP_NEG_REQ: u8 = 0x01;
const TYPE_RDP_NEG_RSP: u8 = 0x02;
const TYPE_RDP_NEG_FAILURE: u8 = 0x03;

const CREDSSP_VERSION: u8 = 6;

const DER_SEQUENCE: u8 = 0x30;
const DER_INTEGER: u8 = 0x02;
const DER_OCTET_STRING: u8 = 0x04;

/// Human name for an `RDP_NEG_FAILURE` code.
pub fn failure_name(code: u32) -> &'static str {
    match code {
        0x01 => "SSL_REQUIRED_BY_SERVER",
        0x02 => "SSL_NOT_ALLOWED_BY_SERVER",
        0x03 => "SSL_CERT_NOT_ON_SERVER",
        0x04 => "INCONSISTENT_FLAGS",
        0x05 => "HYBRID_REQUIRED_BY_SERVER",
        0x06 => "SSL_WITH_USER_AUTH_REQUIRED_BY_SERVER",
        _ => "UNKNOWN_FAILURE",
    }
}

pub fn protocol_name(selected: u32) -> &'static str {
    match selected {
        PROTOCOL_RDP => "RDP",
        PROTOCOL_SSL => "SSL",
        PROTOCOL_HYBRID => "HYBRID",
        PROTOCOL_RDSTLS => "RDSTLS",
        PROTOCOL_HYBRID_EX => "HYBRID_EX",
        _ => "UNKNOWN",
    }
}

/// X.224 Connection Request TPDU (without the TPKT header).
pub fn connection_request(cookie: Option<&str>, requested_protocols: u32) -> Vec<u8> {
    // LI, CR|CDT, DST-REF, SRC-REF, class 0
    let mut tpdu = vec![0, X224_CONNECTION_REQUEST, 0, 0, 0, 0, 0];
    if let Some(cookie) = cookie {
        tpdu.extend_from_slice(format!("Cookie: mstshash={cookie}\r\n").as_bytes());
    }
    tpdu.push(TYPE_RDP_NEG_REQ);
    tpdu.push(0);
    tpdu.extend_from_slice(&8u16.to_le_bytes());
    tpdu.extend_from_slice(&requested_protocols.to_le_bytes());
    tpdu[0] = (tpdu.len() - 1) as u8;
    tpdu
}

/// Selected protocol from an X.224 Connection Confirm.
///
/// A confirm without a negotiation block means a legacy server that only
/// speaks standard RDP security.
pub fn parse_connection_confirm(tpdu: &[u8]) -> Result<u32> {
    let mut cur = PacketCursor::new(tpdu);
    let li = cur.u8("X.224 length indicator")? as usize;
    if li + 1 > tpdu.len() {
        return Err(ProbeError::truncated("X.224 Connection Confirm"));
    }
    let code = cur.u8("X.224 TPDU code")?;
    if code & 0xF0 != X224_CONNECTION_CONFIRM {
        return Err(ProbeError::Protocol(format!(
            "expected X.224 Connection Confirm, got TPDU code {code:#04x}"
        )));
    }
    cur.skip(5, "X.224 references and class")?;

    if cur.remaining() < 8 {
        return Ok(PROTOCOL_RDP);
    }
    let neg_type = cur.u8("negotiation type")?;
    let _flags = cur.u8("negotiation flags")?;
    let length = cur.u16_le("negotiation length")?;
    if length != 8 {
        return Err(ProbeError::Protocol(format!(
            "negotiation block length {length}, expected 8"
        )));
    }
    let value = cur.u32_le("negotiation value")?;

    match neg_type {
        TYPE_RDP_NEG_RSP => Ok(value),
        TYPE_RDP_NEG_FAILURE => Err(ProbeError::Protocol(format!(
            "RDP negotiation failure: {} ({value:#x})",
            failure_name(value)
        ))),
        other => Err(ProbeError::Protocol(format!(
            "unknown negotiation type {other:#04x}"
        ))),
    }
}

fn put_der_len(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.extend_from_slice(&[0x81, len as u8]);
    } else if len <= 0xFFFF {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x83);
        out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    }
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 5);
    out.push(tag);
    put_der_len(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

/// Context-specific constructed tag `[n]`
fn ctx(n: u8) -> u8 {
    0xA0 | n
}

/// `TSRequest { version [0], negoTokens [1] { { negoToken [0] OCTET STRING } } }`
pub fn ts_request(nego_token: &[u8]) -> Vec<u8> {
    let version = der(ctx(0), &der(DER_INTEGER, &[CREDSSP_VERSION]));
    let token = der(ctx(0), &der(DER_OCTET_STRING, nego_token));
    let nego_tokens = der(ctx(1), &der(DER_SEQUENCE, &der(DER_SEQUENCE, &token)));
    der(DER_SEQUENCE, &[version, nego_tokens].concat())
}

/// Frame boundary for a DER SEQUENCE in a growing buffer.
///
/// `Ok(None)` until the whole element has arrived.
pub fn der_frame_len(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != DER_SEQUENCE {
        return Err(ProbeError::Protocol(format!(
            "CredSSP reply is not a DER SEQUENCE (tag {:#04x})",
            buf[0]
        )));
    }
    let (header, len) = match buf[1] {
        short if short < 0x80 => (2, short as usize),
        long => {
            let n = (long & 0x7F) as usize;
            if n == 0 || n > 4 {
                return Err(ProbeError::Protocol(format!(
                    "unsupported DER length form {long:#04x}"
                )));
            }
            if buf.len() < 2 + n {
                return Ok(None);
            }
            let len = buf[2..2 + n]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (2 + n, len)
        }
    };
    let total = header + len;
    Ok((buf.len() >= total).then_some(total))
}

/// Split one TLV off `buf`: `(tag, content, rest)`.
fn read_tlv(buf: &[u8]) -> Result<(u8, &[u8], &[u8])> {
    let mut cur = PacketCursor::new(buf);
    let tag = cur.u8("DER tag")?;
    let first = cur.u8("DER length")?;
    let len = if first < 0x80 {
        first as usize
    } else {
        let n = (first & 0x7F) as usize;
        if n == 0 || n > 4 {
            return Err(ProbeError::Protocol(format!(
                "unsupported DER length form {first:#04x}"
            )));
        }
        cur.bytes(n, "DER length")?
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize)
    };
    let content = cur.bytes(len, "DER content")?;
    Ok((tag, content, cur.rest()))
}

fn expect_tlv<'a>(buf: &'a [u8], tag: u8, what: &str) -> Result<&'a [u8]> {
    let (found, content, _) = read_tlv(buf)?;
    if found != tag {
        return Err(ProbeError::Protocol(format!(
            "{what}: expected tag {tag:#04x}, got {found:#04x}"
        )));
    }
    Ok(content)
}

/// The NTLM token inside a server `TSRequest`.
///
/// A TSRequest carrying `errorCode [4]` instead is a protocol error naming
/// the NTSTATUS.
pub fn parse_ts_request(buf: &[u8]) -> Result<Vec<u8>> {
    let mut fields = expect_tlv(buf, DER_SEQUENCE, "TSRequest")?;
    let mut token = None;

    while !fields.is_empty() {
        let (tag, content, rest) = read_tlv(fields)?;
        match tag {
            t if t == ctx(1) => {
                let tokens = expect_tlv(content, DER_SEQUENCE, "negoTokens")?;
                let item = expect_tlv(tokens, DER_SEQUENCE, "NegoData")?;
                let wrapped = expect_tlv(item, ctx(0), "negoToken")?;
                token = Some(expect_tlv(wrapped, DER_OCTET_STRING, "negoToken")?.to_vec());
            }
            t if t == ctx(4) => {
                let code = expect_tlv(content, DER_INTEGER, "errorCode")?
                    .iter()
                    .fold(0u32, |acc, b| (acc << 8) | *b as u32);
                return Err(ProbeError::Protocol(format!(
                    "CredSSP error code {code:#010x}"
                )));
            }
            _ => {}
        }
        fields = rest;
    }

    token.ok_or_else(|| ProbeError::Protocol("TSRequest carried no negoToken".into()))
}

#[derive(Debug, Clone)]
pub struct RdpOptions {
    /// Name used for the TLS upgrade (SNI / certificate check)
    pub server_name: String,
    /// Optional `mstshash` routing cookie
    pub cookie: Option<String>,
    pub requested_protocols: u32,
}

impl RdpOptions {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            cookie: None,
            requested_protocols: PROTOCOL_SSL | PROTOCOL_HYBRID,
        }
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }
}

/// Negotiation outcome reported with the probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RdpNegotiationInfo {
    pub requested_protocols: u32,
    pub selected_protocol: u32,
    pub selected_protocol_name: String,
    pub tls: bool,
    pub nla: bool,
    pub ntlm: Option<NtlmChallenge>,
}

pub struct RdpCatalog {
    options: RdpOptions,
    codec: TpktCodec,
    selected: Option<u32>,
    ntlm: Option<NtlmChallenge>,
}

impl RdpCatalog {
    pub fn new(options: RdpOptions) -> Self {
        Self {
            options,
            codec: TpktCodec,
            selected: None,
            ntlm: None,
        }
    }

    pub fn selected_protocol(&self) -> Option<u32> {
        self.selected
    }

    pub fn challenge(&self) -> Option<&NtlmChallenge> {
        self.ntlm.as_ref()
    }

    fn wants_tls(selected: u32) -> bool {
        selected & (PROTOCOL_SSL | PROTOCOL_HYBRID | PROTOCOL_HYBRID_EX) != 0
    }

    fn wants_nla(selected: u32) -> bool {
        selected & (PROTOCOL_HYBRID | PROTOCOL_HYBRID_EX) != 0
    }

    pub fn negotiation_info(&self) -> Option<RdpNegotiationInfo> {
        self.selected.map(|selected| RdpNegotiationInfo {
            requested_protocols: self.options.requested_protocols,
            selected_protocol: selected,
            selected_protocol_name: protocol_name(selected).to_string(),
            tls: Self::wants_tls(selected),
            nla: self.ntlm.is_some(),
            ntlm: self.ntlm.clone(),
        })
    }

    pub(crate) async fn greet<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        let request = connection_request(
            self.options.cookie.as_deref(),
            self.options.requested_protocols,
        );
        io.send_frame(
            &mut self.codec,
            ProtocolMessage::new(TPKT_VERSION, request),
            "X.224 Connection Request",
        )
        .await?;

        let confirm = io
            .read_frame(&mut self.codec, "X.224 Connection Confirm")
            .await?;
        let selected = parse_connection_confirm(&confirm.payload)?;
        info!(
            selected = protocol_name(selected),
            "RDP security protocol negotiated"
        );
        self.selected = Some(selected);
        Ok(())
    }

    pub(crate) async fn negotiate<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
    ) -> Result<Negotiation> {
        let selected = self
            .selected
            .ok_or_else(|| ProbeError::Protocol("negotiation before Connection Confirm".into()))?;
        if Self::wants_tls(selected) {
            Ok(Negotiation::Upgrade {
                server_name: self.options.server_name.clone(),
            })
        } else {
            io.note("standard RDP security, no upgrade");
            Ok(Negotiation::Plain)
        }
    }

    pub(crate) async fn authenticate<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
    ) -> Result<()> {
        let selected = self.selected.unwrap_or(PROTOCOL_RDP);
        if !Self::wants_nla(selected) {
            io.note("no network level authentication");
            return Ok(());
        }

        let negotiate = AuthMechanism::NtlmNegotiate.respond(&[], &[])?;
        io.send(&ts_request(&negotiate), "TSRequest (NTLM NEGOTIATE)")
            .await?;
        let reply = io
            .read_until(der_frame_len, "TSRequest (NTLM CHALLENGE)")
            .await?;
        let token = parse_ts_request(&reply)?;
        let challenge = ntlm::parse_challenge(&token)?;
        info!(
            target = ?challenge.target_name,
            dns_computer = ?challenge.info.dns_computer_name,
            os_version = ?challenge.os_version,
            "NTLM challenge received"
        );
        self.ntlm = Some(challenge);
        Ok(())
    }

    pub(crate) async fn exchange<T: Transport>(
        &mut self,
        _io: &mut PhaseIo<'_, T>,
        request: &Request,
    ) -> Result<Payload> {
        Err(ProbeError::Protocol(format!(
            "{}: {request:?}",
            constants::ERR_REQUEST_NOT_SUPPORTED
        )))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::ntlm::tests::{av_pair, challenge_message, utf16};
    use crate::error::ErrorKind;

    /// Connection Confirm TPDU with an RDP_NEG_RSP or RDP_NEG_FAILURE block.
    pub(crate) fn confirm_tpdu(neg_type: u8, value: u32) -> Vec<u8> {
        let mut tpdu = vec![0x0E, X224_CONNECTION_CONFIRM, 0, 0, 0x12, 0x34, 0];
        tpdu.push(neg_type);
        tpdu.push(0);
        tpdu.extend_from_slice(&8u16.to_le_bytes());
        tpdu.extend_from_slice(&value.to_le_bytes());
        tpdu
    }

    /// Connection Confirm selecting `protocol`.
    pub(crate) fn confirm_selecting(protocol: u32) -> Vec<u8> {
        confirm_tpdu(TYPE_RDP_NEG_RSP, protocol)
    }

    /// Server TSRequest wrapping an NTLM CHALLENGE for host DC01.
    pub(crate) fn challenge_ts_request() -> Vec<u8> {
        let mut info = av_pair(1, &utf16("DC01"));
        info.extend(av_pair(2, &utf16("CORP")));
        info.extend(av_pair(3, &utf16("dc01.corp.example")));
        info.extend(av_pair(4, &utf16("corp.example")));
        info.extend(av_pair(0, &[]));
        ts_request(&challenge_message(&info))
    }

    #[test]
    fn test_connection_request_layout() {
        let tpdu = connection_request(Some("probe"), PROTOCOL_SSL | PROTOCOL_HYBRID);
        assert_eq!(tpdu[0] as usize, tpdu.len() - 1);
        assert_eq!(tpdu[1], X224_CONNECTION_REQUEST);
        assert!(tpdu
            .windows(22)
            .any(|w| w == b"Cookie: mstshash=probe"));
        assert_eq!(&tpdu[tpdu.len() - 8..], &[0x01, 0x00, 0x08, 0x00, 0x03, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_confirm_selects_protocol() {
        assert_eq!(
            parse_connection_confirm(&confirm_tpdu(TYPE_RDP_NEG_RSP, PROTOCOL_HYBRID)).unwrap(),
            PROTOCOL_HYBRID
        );
        let legacy = [0x06, X224_CONNECTION_CONFIRM, 0, 0, 0, 0, 0];
        assert_eq!(parse_connection_confirm(&legacy).unwrap(), PROTOCOL_RDP);
    }

    #[test]
    fn test_negotiation_failure_is_an_error() {
        let err = parse_connection_confirm(&confirm_tpdu(TYPE_RDP_NEG_FAILURE, 0x05)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
        assert!(err.to_string().contains("HYBRID_REQUIRED_BY_SERVER"));
    }

    #[test]
    fn test_ts_request_round_trip_through_parser() {
        let token = ntlm::negotiate_message();
        let req = ts_request(&token);
        assert_eq!(der_frame_len(&req).unwrap(), Some(req.len()));
        assert_eq!(parse_ts_request(&req).unwrap(), token);
    }

    #[test]
    fn test_der_frame_len_waits_for_whole_element() {
        let msg = challenge_ts_request();
        assert!(msg.len() > 0x80, "exercise the long length form");
        for cut in 0..msg.len() {
            assert_eq!(der_frame_len(&msg[..cut]).unwrap(), None, "cut at {cut}");
        }
        assert_eq!(der_frame_len(&msg).unwrap(), Some(msg.len()));
        assert!(der_frame_len(&[0x04, 0x00]).is_err());
    }

    #[test]
    fn test_ts_request_error_code() {
        let error = der(ctx(4), &der(DER_INTEGER, &[0xC0, 0x00, 0x00, 0x6D]));
        let version = der(ctx(0), &der(DER_INTEGER, &[CREDSSP_VERSION]));
        let msg = der(DER_SEQUENCE, &[version, error].concat());
        let err = parse_ts_request(&msg).unwrap_err();
        assert!(err.to_string().contains("0xc000006d"));
    }

    #[test]
    fn test_challenge_extracted_from_ts_request() {
        let token = parse_ts_request(&challenge_ts_request()).unwrap();
        let challenge = ntlm::parse_challenge(&token).unwrap();
        assert_eq!(challenge.target_name.as_deref(), Some("CORP"));
        assert_eq!(challenge.info.nb_computer_name.as_deref(), Some("DC01"));
    }
}
