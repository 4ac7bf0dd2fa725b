//! Robustness tests for procctld.
//!
//! Malformed input, oversized lines, idle clients and concurrent load must
//! never take the listener down or corrupt another client's stream.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{test_config, TestServer, FIXTURE_PS};
use procctl_client::{ClientConfig, ClientError, ProtocolClient};
use procctl_core::{decode, SnapshotFormat};
use procctld::inspector::{InspectionError, ProcessSource};
use procctld::server::ServerEvent;
use procctld::ServerConfig;
use tokio::io::AsyncReadExt;
use tokio::time::{sleep, timeout, Instant};

/// Source that takes a while to answer.
struct SlowSource {
    delay: Duration,
}

#[async_trait]
impl ProcessSource for SlowSource {
    async fn list(&self) -> Result<String, InspectionError> {
        sleep(self.delay).await;
        Ok(FIXTURE_PS.to_string())
    }
}

// ============================================================================
// Malformed Input Tests
// ============================================================================

#[tokio::test]
async fn test_oversized_line_closes_connection() {
    let mut server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let long_line = format!("update {}\n", "x".repeat(16 * 1024));
    client.send_raw(long_line.as_bytes()).await;

    let mut buf = [0u8; 64];
    let read = timeout(Duration::from_secs(5), client.reader.read(&mut buf))
        .await
        .expect("oversized line should close the session");
    assert!(matches!(read, Ok(0) | Err(_)));

    let event = server
        .wait_for_event(|e| matches!(e, ServerEvent::Disconnected { .. }))
        .await;
    assert!(matches!(event, ServerEvent::Disconnected { reason: Some(_), .. }));

    // Server still accepts new clients
    let mut client2 = server.connect().await;
    client2.send("update json").await;
    assert!(!client2.read_frame().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_non_utf8_line_closes_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client.send_raw(&[0xff, 0xfe, 0xfd, b'\n']).await;

    let mut buf = [0u8; 64];
    let read = timeout(Duration::from_secs(5), client.reader.read(&mut buf))
        .await
        .expect("invalid UTF-8 should close the session");
    assert!(matches!(read, Ok(0) | Err(_)));

    let mut client2 = server.connect().await;
    assert_eq!(
        client2.request_status("signal abc SIGTERM").await,
        "Error: Invalid process ID: abc"
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_multiple_errors_dont_break_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    for line in ["foo", "signal", "signal x y", "signal 1 NOPE", "bar baz"] {
        let status = client.request_status(line).await;
        assert!(status.starts_with("Error: "), "{line}: {status}");
    }

    client.send("update xml").await;
    let snapshot = decode(&client.read_frame().await, SnapshotFormat::Xml).unwrap();
    assert_eq!(snapshot.len(), 3);

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_disconnect_mid_command() {
    let server = TestServer::spawn().await;

    // Partial line, then hang up
    let mut client = server.connect().await;
    client.send_raw(b"upd").await;
    drop(client);

    // Request sent, reply never read
    let mut client = server.connect().await;
    client.send("update json").await;
    drop(client);

    sleep(Duration::from_millis(50)).await;

    let mut client = server.connect().await;
    client.send("update json").await;
    assert!(!client.read_frame().await.is_empty());

    server.shutdown().await;
}

// ============================================================================
// Timeout Tests
// ============================================================================

#[tokio::test]
async fn test_idle_session_times_out() {
    let config = ServerConfig {
        idle_timeout_secs: 1,
        ..test_config()
    };
    let mut server = TestServer::spawn_with(
        Arc::new(procctld::FixtureSource::new(FIXTURE_PS)),
        config,
    )
    .await;
    let mut client = server.connect().await;

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), client.reader.read(&mut buf))
        .await
        .expect("idle session should be closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    let event = server
        .wait_for_event(|e| matches!(e, ServerEvent::Disconnected { .. }))
        .await;
    assert!(matches!(
        event,
        ServerEvent::Disconnected { reason: Some(reason), .. } if reason == "Idle timeout"
    ));

    server.shutdown().await;
}

#[tokio::test]
async fn test_idle_session_kept_by_default() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    sleep(Duration::from_millis(1500)).await;

    let status = client.request_status("signal abc SIGTERM").await;
    assert_eq!(status, "Error: Invalid process ID: abc");

    server.shutdown().await;
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_not_interleaved() {
    let server = TestServer::spawn().await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let mut client = server.connect().await;
        handles.push(tokio::spawn(async move {
            let format = if i % 2 == 0 {
                SnapshotFormat::Json
            } else {
                SnapshotFormat::Xml
            };
            for _ in 0..5 {
                client.send(&format!("update {format}")).await;
                let snapshot = decode(&client.read_frame().await, format).unwrap();
                assert_eq!(snapshot.len(), 3);
            }
        }));
    }

    for handle in handles {
        handle.await.expect("concurrent client should succeed");
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_update_does_not_block_signal() {
    let server = TestServer::spawn_with_source(Arc::new(SlowSource {
        delay: Duration::from_millis(800),
    }))
    .await;

    let mut slow = server.connect().await;
    slow.send("update json").await;

    let mut fast = server.connect().await;
    let start = Instant::now();
    let status = fast.request_status("signal abc SIGTERM").await;
    assert_eq!(status, "Error: Invalid process ID: abc");
    assert!(start.elapsed() < Duration::from_millis(500));

    assert!(!slow.read_frame().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_client_timeout_then_reconnect() {
    let server = TestServer::spawn_with_source(Arc::new(SlowSource {
        delay: Duration::from_millis(600),
    }))
    .await;
    let dir = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        host: server.addr.ip().to_string(),
        port: server.addr.port(),
        output_dir: dir.path().to_path_buf(),
        io_timeout: Duration::from_millis(300),
    };

    let mut client = ProtocolClient::connect(&config).await.unwrap();
    let err = client.request_update(SnapshotFormat::Json).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    // Let the late frame arrive; it must not be read as a status line
    sleep(Duration::from_millis(600)).await;
    let err = client.send_signal("abc", "SIGTERM").await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(ref m) if m == "connection desynchronized"));

    client.reconnect().await.unwrap();
    assert!(!client.is_broken());
    let status = client.send_signal("abc", "SIGTERM").await.unwrap();
    assert_eq!(status, "Error: Invalid process ID: abc");

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..20 {
        let client = server.connect().await;
        drop(client);
    }

    let mut client = server.connect().await;
    client.send("update json").await;
    assert!(!client.read_frame().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_active_session_count() {
    let server = TestServer::spawn().await;

    let mut a = server.connect().await;
    let mut b = server.connect().await;
    a.request_status("x").await;
    b.request_status("x").await;
    assert_eq!(server.sessions.load(Ordering::Relaxed), 2);

    drop(a);
    drop(b);

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.sessions.load(Ordering::Relaxed) != 0 {
        assert!(Instant::now() < deadline, "sessions were not released");
        sleep(Duration::from_millis(10)).await;
    }

    server.shutdown().await;
}
