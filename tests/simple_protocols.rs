//! Echo, Daytime, Time and Finger probes over real loopback TCP.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use protocol_probe::catalog::simple::EPOCH_OFFSET;
use protocol_probe::catalog::{Payload, Request, SimpleCatalog, SimpleService, TimeValue};
use protocol_probe::config::ProbeConfig;
use protocol_probe::transport::tcp::TcpConnector;
use protocol_probe::{run_probe, ErrorKind, Phase, ProbeResult};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Accept exactly one connection and hand it to `handler`.
async fn one_shot_server<F, Fut>(handler: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr").to_string();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        handler(stream).await;
    });
    (addr, handle)
}

async fn probe(addr: &str, service: SimpleService, request: Request) -> ProbeResult {
    run_probe(
        ProbeConfig::default(),
        &TcpConnector::new(addr),
        SimpleCatalog::new(service).into(),
        &[request],
    )
    .await
}

fn only_response(result: &ProbeResult) -> &Payload {
    assert!(result.success, "probe failed: {:?}", result.error_detail);
    let decoded = result.decoded_payload.as_ref().expect("payload");
    assert_eq!(decoded.responses.len(), 1);
    &decoded.responses[0]
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (addr, server) = one_shot_server(|mut stream| async move {
        let mut buf = [0u8; 256];
        loop {
            let n = stream.read(&mut buf).await.expect("read");
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.expect("write");
        }
    })
    .await;

    let result = probe(&addr, SimpleService::Echo, Request::Text("hello probe".into())).await;
    server.await.expect("server");

    assert_eq!(only_response(&result), &Payload::Text("hello probe".into()));
    assert_eq!(result.protocol, "echo");
    assert_eq!(result.phase_reached, Phase::Ready);
}

#[tokio::test]
async fn test_echo_mismatch_is_protocol_error() {
    let (addr, server) = one_shot_server(|mut stream| async move {
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.expect("read");
        stream.write_all(b"HELLO").await.expect("write");
    })
    .await;

    let result = probe(&addr, SimpleService::Echo, Request::Text("hello".into())).await;
    server.await.expect("server");

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ProtocolError));
    assert_eq!(result.failed_phase, Some(Phase::Ready));
}

#[tokio::test]
async fn test_daytime_reads_until_close() {
    let (addr, server) = one_shot_server(|mut stream| async move {
        stream
            .write_all(b"Friday, February 16, 2024 12:00:00 UTC\r\n")
            .await
            .expect("write");
    })
    .await;

    let result = probe(&addr, SimpleService::Daytime, Request::Fetch).await;
    server.await.expect("server");

    assert_eq!(
        only_response(&result),
        &Payload::Text("Friday, February 16, 2024 12:00:00 UTC".into())
    );
}

#[tokio::test]
async fn test_daytime_close_without_data() {
    let (addr, server) = one_shot_server(|stream| async move {
        drop(stream);
    })
    .await;

    let result = probe(&addr, SimpleService::Daytime, Request::Fetch).await;
    server.await.expect("server");

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::TransportClosed));
    assert_eq!(result.failed_phase, Some(Phase::Ready));
}

#[tokio::test]
async fn test_time_converts_to_unix_seconds() {
    let unix = 1_708_084_800u64;
    let (addr, server) = one_shot_server(move |mut stream| async move {
        let wire = ((unix + EPOCH_OFFSET) as u32).to_be_bytes();
        stream.write_all(&wire).await.expect("write");
    })
    .await;

    let result = probe(&addr, SimpleService::Time, Request::Fetch).await;
    server.await.expect("server");

    match only_response(&result) {
        Payload::Time(TimeValue { unix_seconds, .. }) => assert_eq!(*unix_seconds, unix as i64),
        other => panic!("expected time, got {other:?}"),
    }
}

#[tokio::test]
async fn test_time_short_reply() {
    let (addr, server) = one_shot_server(|mut stream| async move {
        stream.write_all(&[0x01, 0x02]).await.expect("write");
    })
    .await;

    let result = probe(&addr, SimpleService::Time, Request::Fetch).await;
    server.await.expect("server");

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::TransportClosed));
}

#[tokio::test]
async fn test_finger_sends_query_line() {
    let (addr, server) = one_shot_server(|stream| async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read line");
        assert_eq!(line, "alice\r\n");
        let mut stream = reader.into_inner();
        stream
            .write_all(b"Login: alice\r\nName: Alice Example\r\n")
            .await
            .expect("write");
    })
    .await;

    let result = probe(&addr, SimpleService::Finger, Request::Text("alice".into())).await;
    server.await.expect("server");

    assert_eq!(
        only_response(&result),
        &Payload::Text("Login: alice\r\nName: Alice Example".into())
    );
}

#[tokio::test]
async fn test_unsupported_request_for_service() {
    let (addr, server) = one_shot_server(|mut stream| async move {
        let _ = stream.write_all(b"ignored\r\n").await;
    })
    .await;

    let result = probe(&addr, SimpleService::Daytime, Request::Ping).await;
    server.await.expect("server");

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::ProtocolError));
    assert!(result
        .error_detail
        .as_deref()
        .unwrap_or_default()
        .contains("not supported"));
}

#[tokio::test]
async fn test_refused_connection_fails_in_connecting() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let result = probe(&addr, SimpleService::Echo, Request::Text("x".into())).await;

    assert!(!result.success);
    assert_eq!(result.failed_phase, Some(Phase::Connecting));
    assert_eq!(result.error_kind, Some(ErrorKind::ConnectError));
    assert_eq!(result.transcript.len(), 1);
}
