//! RIP version 2 route-table probe (RFC 2453) with RFC 2082 authentication.
//!
//! RIP has no greeting and no session: the client sends one whole-table
//! request datagram and decodes the first response datagram. Authentication
//! rides inside the packet as a pseudo route entry (`AFI 0xFFFF`), and for
//! Keyed-MD5 as a trailer after the last route entry.

use crate::auth::keyed_md5::{self, DIGEST_LEN};
use crate::auth::AuthMechanism;
use crate::catalog::{Payload, Request};
use crate::core::lenenc::PacketCursor;
use crate::error::{constants, ProbeError, Result};
use crate::protocol::session::PhaseIo;
use crate::transport::Transport;
use serde::Serialize;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

pub const RIP_PORT: u16 = 520;
pub const RIP_VERSION: u8 = 2;
pub const COMMAND_REQUEST: u8 = 1;
pub const COMMAND_RESPONSE: u8 = 2;

const HEADER_LEN: usize = 4;
const ENTRY_LEN: usize = 20;
const AFI_INET: u16 = 2;
const AFI_AUTH: u16 = 0xFFFF;
const AUTH_TRAILER: u16 = 1;
const AUTH_SIMPLE: u16 = 2;
const AUTH_KEYED_MD5: u16 = 3;
const METRIC_INFINITY: u32 = 16;

/// Authentication carried in requests and expected in responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RipAuth {
    None,
    Simple {
        password: String,
    },
    /// `sequence` is supplied by the caller and sent as-is
    KeyedMd5 {
        key_id: u8,
        password: String,
        sequence: u32,
    },
}

impl RipAuth {
    pub fn mechanism(&self) -> Option<AuthMechanism> {
        match self {
            RipAuth::None => None,
            RipAuth::Simple { .. } => Some(AuthMechanism::SimplePassword),
            RipAuth::KeyedMd5 { .. } => Some(AuthMechanism::KeyedMd5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RipRoute {
    pub afi: u16,
    pub route_tag: u16,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

/// Whole-table request datagram, authenticated per `auth`.
pub fn build_request(auth: &RipAuth) -> Result<Vec<u8>> {
    let mut packet = vec![COMMAND_REQUEST, RIP_VERSION, 0, 0];

    match auth {
        RipAuth::None => {}
        RipAuth::Simple { password } => {
            packet.extend_from_slice(&AFI_AUTH.to_be_bytes());
            packet.extend_from_slice(&AUTH_SIMPLE.to_be_bytes());
            let key = AuthMechanism::SimplePassword.respond(&[], password.as_bytes())?;
            packet.extend_from_slice(&key);
        }
        RipAuth::KeyedMd5 {
            key_id, sequence, ..
        } => {
            // header + auth entry + one route entry
            let packet_len = (HEADER_LEN + 2 * ENTRY_LEN) as u16;
            packet.extend_from_slice(&AFI_AUTH.to_be_bytes());
            packet.extend_from_slice(&AUTH_KEYED_MD5.to_be_bytes());
            packet.extend_from_slice(&packet_len.to_be_bytes());
            packet.push(*key_id);
            packet.push(DIGEST_LEN as u8);
            packet.extend_from_slice(&sequence.to_be_bytes());
            packet.extend_from_slice(&[0; 8]);
        }
    }

    // AFI 0, metric 16: "send the whole table"
    packet.extend_from_slice(&0u16.to_be_bytes());
    packet.extend_from_slice(&[0; 14]);
    packet.extend_from_slice(&METRIC_INFINITY.to_be_bytes());

    if let RipAuth::KeyedMd5 { password, .. } = auth {
        packet.extend_from_slice(&AFI_AUTH.to_be_bytes());
        packet.extend_from_slice(&AUTH_TRAILER.to_be_bytes());
        packet.extend_from_slice(&[0; DIGEST_LEN]);
        let digest = AuthMechanism::KeyedMd5.respond(&packet, password.as_bytes())?;
        let start = packet.len() - DIGEST_LEN;
        packet[start..].copy_from_slice(&digest);
    }

    Ok(packet)
}

fn ipv4(cur: &mut PacketCursor<'_>, field: &str) -> Result<Ipv4Addr> {
    Ok(Ipv4Addr::from(cur.u32_be(field)?))
}

/// Decode a response datagram and check it against `auth`.
pub fn parse_response(datagram: &[u8], auth: &RipAuth) -> Result<Vec<RipRoute>> {
    let mut cur = PacketCursor::new(datagram);
    let command = cur.u8("RIP command")?;
    let version = cur.u8("RIP version")?;
    cur.skip(2, "RIP reserved")?;
    if command != COMMAND_RESPONSE {
        return Err(ProbeError::Protocol(format!(
            "expected RIP response, got command {command}"
        )));
    }
    if version != 1 && version != RIP_VERSION {
        return Err(ProbeError::Protocol(format!("unsupported RIP version {version}")));
    }

    let mut end = datagram.len();
    let mut trailer_at = None;
    let mut simple_password = None;
    let mut routes = Vec::new();

    while cur.position() + ENTRY_LEN <= end {
        let afi = cur.u16_be("route AFI")?;
        if afi == AFI_AUTH {
            let auth_type = cur.u16_be("auth type")?;
            let body = cur.bytes(16, "auth data")?;
            match auth_type {
                AUTH_SIMPLE => simple_password = Some(body),
                AUTH_KEYED_MD5 => {
                    let packet_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    if packet_len < HEADER_LEN || packet_len + 4 + DIGEST_LEN > datagram.len() {
                        return Err(ProbeError::Protocol(format!(
                            "Keyed-MD5 packet length {packet_len} outside a {}-byte datagram",
                            datagram.len()
                        )));
                    }
                    end = packet_len;
                    trailer_at = Some(packet_len);
                }
                other => debug!(auth_type = other, "Skipping unknown authentication entry"),
            }
            continue;
        }

        let route_tag = cur.u16_be("route tag")?;
        let address = ipv4(&mut cur, "address")?;
        let mask = ipv4(&mut cur, "subnet mask")?;
        let next_hop = ipv4(&mut cur, "next hop")?;
        let metric = cur.u32_be("metric")?;
        if afi == AFI_INET {
            routes.push(RipRoute {
                afi,
                route_tag,
                address,
                mask,
                next_hop,
                metric,
            });
        } else {
            debug!(afi, "Skipping route entry with unknown address family");
        }
    }

    if trailer_at.is_none() && cur.position() != end {
        warn!(
            trailing = end - cur.position(),
            "RIP response ends with a partial entry"
        );
    }

    match auth {
        RipAuth::None => {}
        RipAuth::Simple { password } => {
            let expected = keyed_md5::simple_password(password.as_bytes());
            match simple_password {
                Some(got) if got == &expected[..] => {}
                Some(_) => {
                    return Err(ProbeError::Auth("simple password mismatch".into()));
                }
                None => {
                    return Err(ProbeError::Auth(
                        constants::ERR_UNAUTHENTICATED_RESPONSE.to_string(),
                    ));
                }
            }
        }
        RipAuth::KeyedMd5 { password, .. } => {
            let at = trailer_at.ok_or_else(|| {
                ProbeError::Auth(constants::ERR_UNAUTHENTICATED_RESPONSE.to_string())
            })?;
            if datagram[at..at + 4] != [0xFF, 0xFF, 0x00, 0x01] {
                return Err(ProbeError::Protocol("malformed Keyed-MD5 trailer".into()));
            }
            let signed = &datagram[..at + 4 + DIGEST_LEN];
            if !keyed_md5::verify(password.as_bytes(), signed) {
                return Err(ProbeError::Auth(constants::ERR_DIGEST_MISMATCH.to_string()));
            }
        }
    }

    Ok(routes)
}

pub struct RipCatalog {
    auth: RipAuth,
}

impl RipCatalog {
    pub fn new(auth: RipAuth) -> Self {
        Self { auth }
    }

    pub fn auth(&self) -> &RipAuth {
        &self.auth
    }

    pub(crate) async fn greet<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        io.note("RIP has no greeting");
        Ok(())
    }

    pub(crate) async fn authenticate<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
    ) -> Result<()> {
        match self.auth.mechanism() {
            Some(mechanism) => io.note(&format!("{mechanism} carried per datagram")),
            None => io.note("unauthenticated"),
        }
        Ok(())
    }

    pub(crate) async fn exchange<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
        request: &Request,
    ) -> Result<Payload> {
        if *request != Request::RouteTable {
            return Err(ProbeError::Protocol(format!(
                "{}: {request:?}",
                constants::ERR_REQUEST_NOT_SUPPORTED
            )));
        }

        let packet = build_request(&self.auth)?;
        io.send(&packet, "RIP request").await?;
        let datagram = io.read_datagram("RIP response").await?;
        let routes = parse_response(&datagram, &self.auth)?;
        debug!(routes = routes.len(), "RIP routes decoded");
        Ok(Payload::Routes(routes))
    }
}
