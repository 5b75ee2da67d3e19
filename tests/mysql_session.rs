//! End-to-end MySQL probes against an in-process fake server.
//!
//! The server side speaks real MySQL framing over a `tokio::io::duplex` pipe,
//! so the probe runs its normal transport, reader and codec stack.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use protocol_probe::auth::mysql::native_password;
use protocol_probe::catalog::mysql::{
    MySqlCatalog, MySqlOptions, CLIENT_LONG_FLAG, CLIENT_LONG_PASSWORD, CLIENT_MULTI_RESULTS,
    CLIENT_PLUGIN_AUTH, CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION, CLIENT_TRANSACTIONS,
};
use protocol_probe::catalog::{Payload, PeerInfo, Request};
use protocol_probe::config::ProbeConfig;
use protocol_probe::core::codec::MySqlPacketCodec;
use protocol_probe::core::lenenc::put_lenenc_bytes;
use protocol_probe::core::ProtocolMessage;
use protocol_probe::transport::memory::ScriptedTransport;
use protocol_probe::transport::stream::StreamTransport;
use protocol_probe::transport::OnceConnector;
use protocol_probe::{run_probe, ErrorKind, Phase};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const SCRAMBLE: &[u8; 20] = b"0123456789abcdefghij";
const SERVER_CAPS: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_LONG_FLAG
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH;
const OK: &[u8] = &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];
const EOF: &[u8] = &[0xFE, 0x00, 0x00, 0x02, 0x00];

type ServerConn = Framed<DuplexStream, MySqlPacketCodec>;

fn greeting() -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(10);
    buf.put_slice(b"5.7.44-fake\0");
    buf.put_u32_le(7);
    buf.put_slice(&SCRAMBLE[..8]);
    buf.put_u8(0);
    buf.put_u16_le(SERVER_CAPS as u16);
    buf.put_u8(33);
    buf.put_u16_le(0x0002);
    buf.put_u16_le((SERVER_CAPS >> 16) as u16);
    buf.put_u8(21);
    buf.put_bytes(0, 10);
    buf.put_slice(&SCRAMBLE[8..]);
    buf.put_u8(0);
    buf.put_slice(b"mysql_native_password\0");
    buf.to_vec()
}

fn column(name: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for field in ["def", "", "", "", name, name] {
        put_lenenc_bytes(&mut buf, field.as_bytes());
    }
    buf.put_slice(&[0x0C, 0x21, 0x00, 0x40, 0x00, 0x00, 0x00, 0xFD, 0x00, 0x00, 0x1F, 0x00, 0x00]);
    buf.to_vec()
}

fn row(value: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_lenenc_bytes(&mut buf, value.as_bytes());
    buf.to_vec()
}

async fn send(conn: &mut ServerConn, sequence: u8, payload: &[u8]) {
    conn.send(ProtocolMessage::new(sequence, payload.to_vec()))
        .await
        .expect("server send");
}

async fn recv(conn: &mut ServerConn) -> ProtocolMessage {
    conn.next()
        .await
        .expect("client hung up early")
        .expect("server decode")
}

/// Serve one connection with `handler`, returning the client end.
fn fake_server<F, Fut>(handler: F) -> (DuplexStream, JoinHandle<()>)
where
    F: FnOnce(ServerConn) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (client, server) = tokio::io::duplex(64 * 1024);
    let handle = tokio::spawn(handler(Framed::new(server, MySqlPacketCodec::default())));
    (client, handle)
}

/// Greet, accept `password` for user `probe`, reply `ok` or an access-denied error.
async fn authenticate(conn: &mut ServerConn, password: &str) -> bool {
    send(conn, 0, &greeting()).await;
    let response = recv(conn).await;
    assert_eq!(response.header.opcode, 1);

    let expected = native_password(SCRAMBLE, password.as_bytes()).unwrap();
    let accepted = response
        .payload
        .windows(expected.len())
        .any(|w| w == &expected[..]);
    if accepted {
        send(conn, 2, OK).await;
    } else {
        let mut err = vec![0xFF, 0x15, 0x04, b'#'];
        err.extend_from_slice(b"28000Access denied for user 'probe'@'localhost'");
        send(conn, 2, &err).await;
    }
    accepted
}

fn catalog(password: &str) -> MySqlCatalog {
    MySqlCatalog::new(MySqlOptions::new("probe", password))
}

#[tokio::test]
async fn test_probe_queries_and_pings() {
    let (client, server) = fake_server(|mut conn| async move {
        assert!(authenticate(&mut conn, "hunter2").await);

        let query = recv(&mut conn).await;
        assert_eq!(query.header.opcode, 0);
        assert_eq!(&query.payload[..], b"\x03SELECT @@version");
        send(&mut conn, 1, &[0x01]).await;
        send(&mut conn, 2, &column("@@version")).await;
        send(&mut conn, 3, EOF).await;
        send(&mut conn, 4, &row("5.7.44-fake")).await;
        send(&mut conn, 5, EOF).await;

        let ping = recv(&mut conn).await;
        assert_eq!(&ping.payload[..], &[0x0E]);
        send(&mut conn, 1, OK).await;

        let quit = recv(&mut conn).await;
        assert_eq!(quit.header.opcode, 0);
        assert_eq!(&quit.payload[..], &[0x01]);
    });

    let result = run_probe(
        ProbeConfig::default(),
        &OnceConnector::new(StreamTransport::new(client)),
        catalog("hunter2").into(),
        &[Request::Query("SELECT @@version".into()), Request::Ping],
    )
    .await;
    server.await.expect("server task");

    assert!(result.success, "probe failed: {:?}", result.error_detail);
    assert_eq!(result.protocol, "mysql");
    assert_eq!(result.phase_reached, Phase::Ready);
    assert_eq!(result.failed_phase, None);

    let decoded = result.decoded_payload.as_ref().expect("payload");
    match &decoded.responses[0] {
        Payload::ResultSet(set) => {
            assert_eq!(set.columns[0].name, "@@version");
            assert_eq!(set.rows, vec![vec![Some("5.7.44-fake".to_string())]]);
        }
        other => panic!("expected result set, got {other:?}"),
    }
    assert_eq!(decoded.responses[1], Payload::Pong);
    match &decoded.peer {
        Some(PeerInfo::MySql(info)) => {
            assert_eq!(info.server_version, "5.7.44-fake");
            assert_eq!(info.connection_id, 7);
            assert!(!info.supports_tls);
        }
        other => panic!("unexpected peer {other:?}"),
    }

    assert_eq!(result.metrics.frames_received, 8);
    assert!(result.metrics.bytes_sent > 0);
}

#[tokio::test]
async fn test_wrong_password_fails_in_authenticating() {
    let (client, server) = fake_server(|mut conn| async move {
        assert!(!authenticate(&mut conn, "right-password").await);
        // the probe must hang up without sending anything else
        assert!(conn.next().await.is_none());
    });

    let result = run_probe(
        ProbeConfig::default(),
        &OnceConnector::new(StreamTransport::new(client)),
        catalog("wrong-password").into(),
        &[Request::Ping],
    )
    .await;
    server.await.expect("server task");

    assert!(!result.success);
    assert_eq!(result.phase_reached, Phase::Failed);
    assert_eq!(result.failed_phase, Some(Phase::Authenticating));
    assert_eq!(result.error_kind, Some(ErrorKind::AuthError));
    assert!(result.decoded_payload.is_none());
    assert!(result
        .error_detail
        .as_deref()
        .unwrap_or_default()
        .contains("Access denied"));
}

#[tokio::test]
async fn test_server_hangs_up_after_greeting() {
    let (client, server) = fake_server(|mut conn| async move {
        send(&mut conn, 0, &greeting()).await;
        let _response = recv(&mut conn).await;
    });

    let result = run_probe(
        ProbeConfig::default(),
        &OnceConnector::new(StreamTransport::new(client)),
        catalog("hunter2").into(),
        &[],
    )
    .await;
    server.await.expect("server task");

    assert!(!result.success);
    assert_eq!(result.failed_phase, Some(Phase::Authenticating));
    assert_eq!(result.error_kind, Some(ErrorKind::TransportClosed));
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_times_out_within_budget() {
    let (client, server) = fake_server(|conn| async move {
        // accept, then never speak
        tokio::time::sleep(Duration::from_secs(60)).await;
        drop(conn);
    });

    let config = ProbeConfig::default_with_overrides(|c| {
        c.budget.total_timeout = Duration::from_secs(2);
        c.budget.greeting_cap = Duration::from_secs(1);
    });
    let started = tokio::time::Instant::now();
    let result = run_probe(
        config,
        &OnceConnector::new(StreamTransport::new(client)),
        catalog("hunter2").into(),
        &[],
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.failed_phase, Some(Phase::Greeting));
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(2));
    server.abort();
}

#[tokio::test]
async fn test_invalid_config_never_connects() {
    let transport = ScriptedTransport::from_chunks(Vec::<Vec<u8>>::new());
    let probe = transport.probe();
    let config = ProbeConfig::default_with_overrides(|c| c.budget.total_timeout = Duration::ZERO);

    let result = run_probe(config, &OnceConnector::new(transport), catalog("x").into(), &[]).await;

    assert!(!result.success);
    assert_eq!(result.failed_phase, Some(Phase::Connecting));
    assert_eq!(result.error_kind, Some(ErrorKind::ConnectError));
    assert_eq!(probe.recv_calls(), 0);
    assert_eq!(probe.close_calls(), 0);
}

#[tokio::test]
async fn test_result_serializes_to_camel_case_json() {
    let (client, server) = fake_server(|mut conn| async move {
        assert!(!authenticate(&mut conn, "right-password").await);
    });

    let result = run_probe(
        ProbeConfig::default(),
        &OnceConnector::new(StreamTransport::new(client)),
        catalog("wrong").into(),
        &[],
    )
    .await;
    server.await.expect("server task");

    let json: serde_json::Value =
        serde_json::from_str(&result.to_json().expect("serialize")).expect("valid json");
    assert_eq!(json["success"], false);
    assert_eq!(json["phaseReached"], "Failed");
    assert_eq!(json["failedPhase"], "Authenticating");
    assert_eq!(json["errorKind"], "auth_error");
    assert!(json["decodedPayload"].is_null());
    assert!(json["transcript"].as_array().map_or(false, |t| !t.is_empty()));
    assert!(result.to_json_pretty().expect("pretty").contains('\n'));
}
