//! RIP route-table probes over loopback UDP, with and without authentication.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use protocol_probe::auth::keyed_md5;
use protocol_probe::catalog::rip::{COMMAND_REQUEST, COMMAND_RESPONSE, RIP_VERSION};
use protocol_probe::catalog::{Payload, Request, RipAuth, RipCatalog, RipRoute};
use protocol_probe::config::ProbeConfig;
use protocol_probe::transport::udp::UdpConnector;
use protocol_probe::{run_probe, ErrorKind, Phase, ProbeResult};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

fn route(address: [u8; 4], mask: [u8; 4], metric: u32) -> Vec<u8> {
    let mut entry = 2u16.to_be_bytes().to_vec();
    entry.extend_from_slice(&[0, 0]);
    entry.extend_from_slice(&address);
    entry.extend_from_slice(&mask);
    entry.extend_from_slice(&[0, 0, 0, 0]);
    entry.extend_from_slice(&metric.to_be_bytes());
    entry
}

fn plain_response(routes: &[Vec<u8>]) -> Vec<u8> {
    let mut packet = vec![COMMAND_RESPONSE, RIP_VERSION, 0, 0];
    for r in routes {
        packet.extend_from_slice(r);
    }
    packet
}

fn simple_response(password: &str, routes: &[Vec<u8>]) -> Vec<u8> {
    let mut packet = vec![COMMAND_RESPONSE, RIP_VERSION, 0, 0, 0xFF, 0xFF, 0x00, 0x02];
    packet.extend_from_slice(&keyed_md5::simple_password(password.as_bytes()));
    for r in routes {
        packet.extend_from_slice(r);
    }
    packet
}

fn md5_response(password: &str, routes: &[Vec<u8>]) -> Vec<u8> {
    let packet_len = (4 + 20 * (routes.len() + 1)) as u16;
    let mut packet = vec![COMMAND_RESPONSE, RIP_VERSION, 0, 0, 0xFF, 0xFF, 0x00, 0x03];
    packet.extend_from_slice(&packet_len.to_be_bytes());
    packet.push(1);
    packet.push(16);
    packet.extend_from_slice(&99u32.to_be_bytes());
    packet.extend_from_slice(&[0; 8]);
    for r in routes {
        packet.extend_from_slice(r);
    }
    packet.extend_from_slice(&[0xFF, 0xFF, 0x00, 0x01]);
    packet.extend_from_slice(&[0; 16]);
    let digest = keyed_md5::digest(password.as_bytes(), &packet);
    let start = packet.len() - 16;
    packet[start..].copy_from_slice(&digest);
    packet
}

/// Answer one request with `reply(request)`; `None` stays silent.
async fn router<F>(reply: F) -> (String, JoinHandle<Vec<u8>>)
where
    F: FnOnce(&[u8]) -> Option<Vec<u8>> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
    let addr = socket.local_addr().expect("addr").to_string();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        let (n, peer) = socket.recv_from(&mut buf).await.expect("recv");
        let request = buf[..n].to_vec();
        if let Some(datagram) = reply(&request) {
            socket.send_to(&datagram, peer).await.expect("send");
        }
        request
    });
    (addr, handle)
}

async fn probe(addr: &str, auth: RipAuth, config: ProbeConfig) -> ProbeResult {
    run_probe(
        config,
        &UdpConnector::new(addr),
        RipCatalog::new(auth).into(),
        &[Request::RouteTable],
    )
    .await
}

fn routes_of(result: &ProbeResult) -> &[RipRoute] {
    assert!(result.success, "probe failed: {:?}", result.error_detail);
    match &result.decoded_payload.as_ref().expect("payload").responses[0] {
        Payload::Routes(routes) => routes,
        other => panic!("expected routes, got {other:?}"),
    }
}

fn md5_auth(password: &str) -> RipAuth {
    RipAuth::KeyedMd5 {
        key_id: 1,
        password: password.into(),
        sequence: 42,
    }
}

#[tokio::test]
async fn test_unauthenticated_table() {
    let (addr, server) = router(|_| {
        Some(plain_response(&[
            route([10, 0, 0, 0], [255, 0, 0, 0], 1),
            route([172, 16, 0, 0], [255, 240, 0, 0], 2),
        ]))
    })
    .await;

    let result = probe(&addr, RipAuth::None, ProbeConfig::default()).await;
    let request = server.await.expect("router");

    assert_eq!(&request[..4], &[COMMAND_REQUEST, RIP_VERSION, 0, 0]);
    let routes = routes_of(&result);
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[1].address, Ipv4Addr::new(172, 16, 0, 0));
    assert_eq!(routes[1].metric, 2);
    assert_eq!(result.protocol, "rip");
}

#[tokio::test]
async fn test_keyed_md5_both_directions() {
    let (addr, server) = router(|request| {
        if !keyed_md5::verify(b"s3cret", request) {
            return None;
        }
        Some(md5_response("s3cret", &[route([192, 168, 10, 0], [255, 255, 255, 0], 4)]))
    })
    .await;

    let result = probe(&addr, md5_auth("s3cret"), ProbeConfig::default()).await;
    let request = server.await.expect("router");

    assert_eq!(&request[12..16], &42u32.to_be_bytes());
    let routes = routes_of(&result);
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].mask, Ipv4Addr::new(255, 255, 255, 0));
}

#[tokio::test]
async fn test_keyed_md5_wrong_key_is_auth_error() {
    let (addr, server) = router(|_| {
        Some(md5_response("other-key", &[route([10, 0, 0, 0], [255, 0, 0, 0], 1)]))
    })
    .await;

    let result = probe(&addr, md5_auth("s3cret"), ProbeConfig::default()).await;
    server.await.expect("router");

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::AuthError));
    assert_eq!(result.failed_phase, Some(Phase::Ready));
}

#[tokio::test]
async fn test_unsigned_reply_to_signed_request() {
    let (addr, server) =
        router(|_| Some(plain_response(&[route([10, 0, 0, 0], [255, 0, 0, 0], 1)]))).await;

    let result = probe(&addr, md5_auth("s3cret"), ProbeConfig::default()).await;
    server.await.expect("router");

    assert_eq!(result.error_kind, Some(ErrorKind::AuthError));
    assert!(result
        .error_detail
        .as_deref()
        .unwrap_or_default()
        .contains("no authentication trailer"));
}

#[tokio::test]
async fn test_simple_password() {
    let (addr, server) = router(|request| {
        assert_eq!(&request[8..10], b"pw");
        Some(simple_response("pw", &[route([10, 1, 0, 0], [255, 255, 0, 0], 1)]))
    })
    .await;

    let result = probe(
        &addr,
        RipAuth::Simple {
            password: "pw".into(),
        },
        ProbeConfig::default(),
    )
    .await;
    server.await.expect("router");

    assert_eq!(routes_of(&result).len(), 1);
}

#[tokio::test]
async fn test_simple_password_mismatch() {
    let (addr, server) = router(|_| Some(simple_response("nope", &[]))).await;

    let result = probe(
        &addr,
        RipAuth::Simple {
            password: "pw".into(),
        },
        ProbeConfig::default(),
    )
    .await;
    server.await.expect("router");

    assert_eq!(result.error_kind, Some(ErrorKind::AuthError));
}

#[tokio::test]
async fn test_silent_router_times_out() {
    let (addr, server) = router(|_| None).await;
    let config = ProbeConfig::default_with_overrides(|c| {
        c.budget.total_timeout = Duration::from_millis(600);
        c.budget.floor = Duration::from_millis(100);
        c.budget.request_cap = Duration::from_millis(300);
    });

    let result = probe(&addr, RipAuth::None, config).await;
    server.await.expect("router");

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(result.failed_phase, Some(Phase::Ready));
    assert!(result.elapsed_ms < 600);
}

#[tokio::test]
async fn test_empty_datagram_is_a_frame_not_a_close() {
    let (addr, server) = router(|_| Some(Vec::new())).await;

    let result = probe(&addr, RipAuth::None, ProbeConfig::default()).await;
    server.await.expect("router");

    assert!(!result.success);
    assert_eq!(result.failed_phase, Some(Phase::Ready));
    assert_eq!(result.error_kind, Some(ErrorKind::ProtocolError));
    assert_eq!(result.metrics.bytes_received, 0);
}
