//! MySQL client protocol (4.1+).
//!
//! Greeting parse, capability intersection, `HandshakeResponse41`, the
//! authentication loop (one plugin switch at most, caching_sha2 fast path),
//! `COM_QUERY` result sets, `COM_PING` and `COM_QUIT`.
//!
//! Sequence ids are checked on every packet: the server's greeting is 0,
//! each reply continues the client's numbering, and each command restarts
//! at 0.

use crate::auth::mysql::{caching_sha2_continuation, Continuation, SCRAMBLE_LEN};
use crate::auth::AuthMechanism;
use crate::catalog::{Negotiation, Payload, Request};
use crate::core::codec::{mysql_packet_count, MySqlPacketCodec};
use crate::core::lenenc::{PacketCursor, ERROR_SENTINEL, LENENC_NULL};
use crate::core::message::ProtocolMessage;
use crate::error::{constants, ProbeError, Result};
use crate::protocol::decoder::{DecodeStep, ResponseDecoder, ServerError};
use crate::protocol::session::PhaseIo;
use crate::transport::Transport;
use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tracing::{debug, info};

pub const PROTOCOL_VERSION: u8 = 10;

pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_SSL: u32 = 0x0000_0800;
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;

const BASE_CLIENT_FLAGS: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_LONG_FLAG
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH;

/// utf8mb4_general_ci
const CLIENT_CHARSET: u8 = 45;
const CLIENT_MAX_PACKET: u32 = 16 * 1024 * 1024;

const OK_TAG: u8 = 0x00;
const AUTH_MORE_DATA_TAG: u8 = 0x01;
const AUTH_SWITCH_TAG: u8 = 0xFE;

const COM_QUIT: u8 = 0x01;
const COM_QUERY: u8 = 0x03;
const COM_PING: u8 = 0x0E;

/// Parsed protocol-10 server greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub character_set: u8,
    pub status_flags: u16,
    /// Auth challenge, at most 20 bytes
    pub scramble: Vec<u8>,
    pub auth_plugin: Option<String>,
}

impl ServerGreeting {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cur = PacketCursor::new(payload);
        let protocol_version = cur.u8("protocol version")?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(ProbeError::Protocol(format!(
                "unsupported MySQL protocol version {protocol_version}"
            )));
        }

        let server_version = String::from_utf8_lossy(cur.null_terminated("server version")?).into_owned();
        let connection_id = cur.u32_le("connection id")?;
        let mut scramble = cur.bytes(8, "auth data part 1")?.to_vec();
        cur.skip(1, "filler")?;
        let cap_low = cur.u16_le("capability flags")? as u32;

        if cur.is_empty() {
            return Ok(Self {
                protocol_version,
                server_version,
                connection_id,
                capabilities: cap_low,
                character_set: 0,
                status_flags: 0,
                scramble,
                auth_plugin: None,
            });
        }

        let character_set = cur.u8("character set")?;
        let status_flags = cur.u16_le("status flags")?;
        let cap_high = cur.u16_le("capability flags (upper)")? as u32;
        let capabilities = cap_low | (cap_high << 16);
        let auth_data_len = cur.u8("auth data length")? as usize;
        cur.skip(10, "reserved")?;

        if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = auth_data_len.saturating_sub(8).max(13);
            let take = part2_len.min(cur.remaining());
            scramble.extend_from_slice(cur.bytes(take, "auth data part 2")?);
        }
        if scramble.last() == Some(&0) {
            scramble.pop();
        }
        scramble.truncate(SCRAMBLE_LEN);

        let auth_plugin = if capabilities & CLIENT_PLUGIN_AUTH != 0 {
            let name = cur.null_terminated_or_rest();
            (!name.is_empty()).then(|| String::from_utf8_lossy(name).into_owned())
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capabilities,
            character_set,
            status_flags,
            scramble,
            auth_plugin,
        })
    }
}

/// What the server revealed, reported with the probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MySqlServerInfo {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin: Option<String>,
    /// Plugin that finally authenticated the session
    pub authenticated_with: Option<String>,
    pub supports_tls: bool,
}

/// OK packet fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OkSummary {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkSummary {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut cur = PacketCursor::new(payload);
        if cur.u8("ok tag")? != OK_TAG {
            return Err(ProbeError::Protocol("not an OK packet".into()));
        }
        let affected_rows = cur.lenenc_len("affected rows")?;
        let last_insert_id = cur.lenenc_len("last insert id")?;
        let (status_flags, warnings) = if cur.remaining() >= 4 {
            (cur.u16_le("status flags")?, cur.u16_le("warnings")?)
        } else {
            (0, 0)
        };
        let info = String::from_utf8_lossy(cur.rest()).into_owned();
        Ok(Self {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }
}

/// Credentials and target schema.
#[derive(Debug, Clone, Default)]
pub struct MySqlOptions {
    pub username: String,
    pub password: String,
    pub database: Option<String>,
}

impl MySqlOptions {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

pub struct MySqlCatalog {
    options: MySqlOptions,
    codec: MySqlPacketCodec,
    sequence: u8,
    greeting: Option<ServerGreeting>,
    client_flags: u32,
    authenticated_with: Option<AuthMechanism>,
}

impl MySqlCatalog {
    pub fn new(options: MySqlOptions) -> Self {
        Self::with_codec(options, MySqlPacketCodec::default())
    }

    pub fn with_codec(options: MySqlOptions, codec: MySqlPacketCodec) -> Self {
        Self {
            options,
            codec,
            sequence: 0,
            greeting: None,
            client_flags: 0,
            authenticated_with: None,
        }
    }

    pub fn greeting(&self) -> Option<&ServerGreeting> {
        self.greeting.as_ref()
    }

    /// Flags sent in the handshake response
    pub fn client_flags(&self) -> u32 {
        self.client_flags
    }

    pub fn server_info(&self) -> Option<MySqlServerInfo> {
        self.greeting.as_ref().map(|g| MySqlServerInfo {
            protocol_version: g.protocol_version,
            server_version: g.server_version.clone(),
            connection_id: g.connection_id,
            capabilities: g.capabilities,
            character_set: g.character_set,
            status_flags: g.status_flags,
            auth_plugin: g.auth_plugin.clone(),
            authenticated_with: self.authenticated_with.map(|m| m.identifier().to_string()),
            supports_tls: g.capabilities & CLIENT_SSL != 0,
        })
    }

    /// A continuation chain uses one sequence id per wire packet.
    fn advance_sequence(&mut self, payload_len: usize) {
        self.sequence = self
            .sequence
            .wrapping_add(mysql_packet_count(payload_len) as u8);
    }

    async fn read_packet<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
        summary: &str,
    ) -> Result<ProtocolMessage> {
        let packet = io.read_frame(&mut self.codec, summary).await?;
        if packet.header.opcode != self.sequence {
            return Err(ProbeError::Protocol(format!(
                "packet out of order: expected sequence {}, got {}",
                self.sequence, packet.header.opcode
            )));
        }
        self.advance_sequence(packet.payload.len());
        Ok(packet)
    }

    async fn write_packet<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
        payload: Vec<u8>,
        summary: &str,
    ) -> Result<()> {
        let len = payload.len();
        let packet = ProtocolMessage::new(self.sequence, payload);
        self.advance_sequence(len);
        io.send_frame(&mut self.codec, packet, summary).await
    }

    pub(crate) async fn greet<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        self.sequence = 0;
        self.codec = self.codec.capped_at(io.max_frame_size());
        let packet = self.read_packet(io, "server greeting").await?;
        if packet.tag() == Some(ERROR_SENTINEL) {
            let err = ServerError::parse(&packet.payload)?;
            return Err(ProbeError::Connect(format!("server refused connection: {err}")));
        }

        let greeting = ServerGreeting::parse(&packet.payload)?;
        info!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            auth_plugin = ?greeting.auth_plugin,
            "MySQL greeting"
        );
        self.greeting = Some(greeting);
        Ok(())
    }

    pub(crate) async fn negotiate<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
    ) -> Result<Negotiation> {
        let greeting = self
            .greeting
            .as_ref()
            .ok_or_else(|| ProbeError::Protocol("negotiation before greeting".into()))?;

        if greeting.capabilities & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProbeError::Protocol(
                "server does not speak protocol 4.1".into(),
            ));
        }
        if greeting.capabilities & CLIENT_SECURE_CONNECTION == 0 {
            return Err(ProbeError::UnsupportedAuth(
                "pre-4.1 password authentication".into(),
            ));
        }

        let mut wanted = BASE_CLIENT_FLAGS;
        if self.options.database.is_some() {
            wanted |= CLIENT_CONNECT_WITH_DB;
        }
        self.client_flags = wanted & greeting.capabilities;
        io.note(&format!("client flags {:#010x}", self.client_flags));
        Ok(Negotiation::Plain)
    }

    fn handshake_response(&self, plugin: AuthMechanism, token: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64 + self.options.username.len());
        buf.put_u32_le(self.client_flags);
        buf.put_u32_le(CLIENT_MAX_PACKET);
        buf.put_u8(CLIENT_CHARSET);
        buf.put_bytes(0, 23);
        buf.put_slice(self.options.username.as_bytes());
        buf.put_u8(0);
        buf.put_u8(token.len() as u8);
        buf.put_slice(token);
        if self.client_flags & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(db) = &self.options.database {
                buf.put_slice(db.as_bytes());
                buf.put_u8(0);
            }
        }
        if self.client_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.put_slice(plugin.identifier().as_bytes());
            buf.put_u8(0);
        }
        buf.to_vec()
    }

    pub(crate) async fn authenticate<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
    ) -> Result<()> {
        let (plugin_name, scramble) = match &self.greeting {
            Some(g) => (
                g.auth_plugin
                    .clone()
                    .unwrap_or_else(|| AuthMechanism::MySqlNative.identifier().to_string()),
                g.scramble.clone(),
            ),
            None => return Err(ProbeError::Protocol("authentication before greeting".into())),
        };

        let mut mechanism = AuthMechanism::select(&plugin_name)?;
        let password = self.options.password.clone();
        let token = mechanism.respond(&scramble, password.as_bytes())?;
        let response = self.handshake_response(mechanism, &token);
        self.write_packet(io, response, "handshake response").await?;

        let mut switched = false;
        loop {
            let packet = self.read_packet(io, "authentication result").await?;
            match packet.tag() {
                Some(OK_TAG) => {
                    info!(plugin = %mechanism, user = %self.options.username, "Authenticated");
                    self.authenticated_with = Some(mechanism);
                    return Ok(());
                }
                Some(ERROR_SENTINEL) => {
                    let err = ServerError::parse(&packet.payload)?;
                    return Err(ProbeError::Auth(err.to_string()));
                }
                Some(AUTH_SWITCH_TAG) => {
                    if switched {
                        return Err(ProbeError::Protocol(
                            constants::ERR_REPEATED_AUTH_SWITCH.to_string(),
                        ));
                    }
                    switched = true;
                    if packet.len() == 1 {
                        return Err(ProbeError::UnsupportedAuth(
                            "old password authentication".into(),
                        ));
                    }

                    let mut cur = PacketCursor::new(&packet.payload[1..]);
                    let name = String::from_utf8_lossy(cur.null_terminated("plugin name")?).into_owned();
                    let mut challenge = cur.rest();
                    if challenge.last() == Some(&0) {
                        challenge = &challenge[..challenge.len() - 1];
                    }
                    debug!(plugin = %name, "Auth switch requested");
                    mechanism = AuthMechanism::select(&name)?;
                    let token = mechanism.respond(challenge, password.as_bytes())?;
                    self.write_packet(io, token, "auth switch response").await?;
                }
                Some(AUTH_MORE_DATA_TAG) if mechanism == AuthMechanism::CachingSha2 => {
                    match caching_sha2_continuation(&packet.payload[1..])? {
                        Continuation::FastAuthSuccess => io.note("fast auth success"),
                    }
                }
                Some(other) => {
                    return Err(ProbeError::Protocol(format!(
                        "unexpected packet {other:#04x} during authentication"
                    )));
                }
                None => return Err(ProbeError::truncated("authentication result")),
            }
        }
    }

    pub(crate) async fn exchange<T: Transport>(
        &mut self,
        io: &mut PhaseIo<'_, T>,
        request: &Request,
    ) -> Result<Payload> {
        match request {
            Request::Query(sql) => self.query(io, sql).await,
            Request::Ping => self.ping(io).await,
            _ => Err(ProbeError::Protocol(format!(
                "{}: {request:?}",
                constants::ERR_REQUEST_NOT_SUPPORTED
            ))),
        }
    }

    async fn query<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>, sql: &str) -> Result<Payload> {
        self.sequence = 0;
        let mut payload = Vec::with_capacity(sql.len() + 1);
        payload.push(COM_QUERY);
        payload.extend_from_slice(sql.as_bytes());
        self.write_packet(io, payload, "COM_QUERY").await?;

        let first = self.read_packet(io, "query response").await?;
        match first.tag() {
            Some(OK_TAG) => return Ok(Payload::Ok(OkSummary::parse(&first.payload)?)),
            Some(ERROR_SENTINEL) => {
                let err = ServerError::parse(&first.payload)?;
                return Err(ProbeError::Protocol(format!("query failed: {err}")));
            }
            Some(LENENC_NULL) => {
                return Err(ProbeError::Protocol("LOCAL INFILE request refused".into()));
            }
            Some(_) => {}
            None => return Err(ProbeError::truncated("query response")),
        }

        let mut decoder = ResponseDecoder::from_header(&first.payload)?;
        debug!(columns = decoder.column_count(), "Result set header");
        loop {
            let packet = self.read_packet(io, "result set packet").await?;
            if let DecodeStep::Complete(set) = decoder.push(&packet.payload)? {
                debug!(rows = set.rows.len(), "Result set complete");
                return Ok(Payload::ResultSet(set));
            }
        }
    }

    async fn ping<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<Payload> {
        self.sequence = 0;
        self.write_packet(io, vec![COM_PING], "COM_PING").await?;
        let reply = self.read_packet(io, "ping response").await?;
        match reply.tag() {
            Some(OK_TAG) => Ok(Payload::Pong),
            Some(ERROR_SENTINEL) => {
                let err = ServerError::parse(&reply.payload)?;
                Err(ProbeError::Protocol(format!("ping failed: {err}")))
            }
            _ => Err(ProbeError::Protocol("unexpected ping response".into())),
        }
    }

    pub(crate) async fn farewell<T: Transport>(&mut self, io: &mut PhaseIo<'_, T>) -> Result<()> {
        self.sequence = 0;
        self.write_packet(io, vec![COM_QUIT], "COM_QUIT").await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;

    pub(crate) const SCRAMBLE: &[u8; 20] = b"abcdefghijklmnopqrst";

    /// Protocol-10 greeting advertising `plugin` with the standard 20-byte scramble.
    pub(crate) fn greeting_payload(plugin: &str, capabilities: u32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_slice(b"8.0.36\0");
        buf.put_u32_le(42);
        buf.put_slice(&SCRAMBLE[..8]);
        buf.put_u8(0);
        buf.put_u16_le(capabilities as u16);
        buf.put_u8(0xFF);
        buf.put_u16_le(0x0002);
        buf.put_u16_le((capabilities >> 16) as u16);
        buf.put_u8(21);
        buf.put_bytes(0, 10);
        buf.put_slice(&SCRAMBLE[8..]);
        buf.put_u8(0);
        buf.put_slice(plugin.as_bytes());
        buf.put_u8(0);
        buf.to_vec()
    }

    pub(crate) const SERVER_CAPS: u32 = BASE_CLIENT_FLAGS | CLIENT_CONNECT_WITH_DB | CLIENT_SSL | CLIENT_DEPRECATE_EOF;

    #[test]
    fn test_parse_greeting() {
        let g = ServerGreeting::parse(&greeting_payload("caching_sha2_password", SERVER_CAPS)).unwrap();
        assert_eq!(g.server_version, "8.0.36");
        assert_eq!(g.connection_id, 42);
        assert_eq!(g.scramble, SCRAMBLE.to_vec());
        assert_eq!(g.capabilities, SERVER_CAPS);
        assert_eq!(g.auth_plugin.as_deref(), Some("caching_sha2_password"));
        assert_eq!(g.status_flags, 0x0002);
    }

    #[test]
    fn test_greeting_rejects_other_protocol_versions() {
        let mut payload = greeting_payload("mysql_native_password", SERVER_CAPS);
        payload[0] = 9;
        let err = ServerGreeting::parse(&payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_truncated_greeting() {
        let payload = greeting_payload("mysql_native_password", SERVER_CAPS);
        let err = ServerGreeting::parse(&payload[..12]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_handshake_response_layout() {
        let mut catalog = MySqlCatalog::new(MySqlOptions::new("root", "secret").with_database("app"));
        catalog.client_flags = BASE_CLIENT_FLAGS | CLIENT_CONNECT_WITH_DB;
        let token = [0xAAu8; 20];
        let resp = catalog.handshake_response(AuthMechanism::MySqlNative, &token);

        let mut cur = PacketCursor::new(&resp);
        assert_eq!(cur.u32_le("flags").unwrap(), BASE_CLIENT_FLAGS | CLIENT_CONNECT_WITH_DB);
        assert_eq!(cur.u32_le("max packet").unwrap(), CLIENT_MAX_PACKET);
        assert_eq!(cur.u8("charset").unwrap(), CLIENT_CHARSET);
        assert_eq!(cur.bytes(23, "filler").unwrap(), &[0u8; 23][..]);
        assert_eq!(cur.null_terminated("user").unwrap(), b"root");
        assert_eq!(cur.u8("token len").unwrap(), 20);
        assert_eq!(cur.bytes(20, "token").unwrap(), &token[..]);
        assert_eq!(cur.null_terminated("db").unwrap(), b"app");
        assert_eq!(cur.null_terminated("plugin").unwrap(), b"mysql_native_password");
        assert!(cur.is_empty());
    }

    #[test]
    fn test_ok_summary() {
        let ok = OkSummary::parse(&[0x00, 0x03, 0xFC, 0x10, 0x27, 0x02, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert_eq!(ok.last_insert_id, 10_000);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 1);
    }
}
