//! End-to-end tests: `procctl_client::ProtocolClient` against a live listener.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

mod common;

use std::time::Duration;

use common::TestServer;
use procctl_client::{ClientConfig, ClientError, Outcome, ProtocolClient};
use procctl_core::{decode, SnapshotFormat};
use procctl_protocol::Command;

fn client_config(server: &TestServer, output_dir: &std::path::Path) -> ClientConfig {
    ClientConfig {
        host: server.addr.ip().to_string(),
        port: server.addr.port(),
        output_dir: output_dir.to_path_buf(),
        io_timeout: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn test_update_round_trip_to_disk() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = ProtocolClient::connect(&client_config(&server, dir.path()))
        .await
        .unwrap();

    let json_path = client.request_update(SnapshotFormat::Json).await.unwrap();
    let xml_path = client.request_update(SnapshotFormat::Xml).await.unwrap();

    let json = decode(&std::fs::read(&json_path).unwrap(), SnapshotFormat::Json).unwrap();
    let xml = decode(&std::fs::read(&xml_path).unwrap(), SnapshotFormat::Xml).unwrap();
    assert_eq!(json.len(), 3);
    assert_eq!(xml.len(), 3);
    assert!(json_path.starts_with(dir.path()));
    assert_eq!(xml_path.extension().unwrap(), "xml");

    client.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_multi_format_update_shares_timestamp() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = ProtocolClient::connect(&client_config(&server, dir.path()))
        .await
        .unwrap();

    let paths = client
        .request_updates(&[SnapshotFormat::Json, SnapshotFormat::Xml])
        .await
        .unwrap();

    assert_eq!(paths.len(), 2);
    assert_eq!(paths[0].file_stem(), paths[1].file_stem());
    assert_eq!(paths[0].parent(), paths[1].parent());

    server.shutdown().await;
}

#[tokio::test]
async fn test_signal_via_client() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = ProtocolClient::connect(&client_config(&server, dir.path()))
        .await
        .unwrap();

    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let pid = child.id().unwrap().to_string();

    let outcome = client
        .execute(&Command::signal(pid.clone(), "sigkill"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        Outcome::Status(format!("Signal SIGKILL sent to process {pid} successfully"))
    );
    child.wait().await.unwrap();

    let status = client.send_signal("abc", "SIGTERM").await.unwrap();
    assert_eq!(status, "Error: Invalid process ID: abc");

    server.shutdown().await;
}

#[tokio::test]
async fn test_rejected_update_via_client() {
    let source = procctld::PsCommand::new("false", Vec::new());
    let server = TestServer::spawn_with_source(std::sync::Arc::new(source)).await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = ProtocolClient::connect(&client_config(&server, dir.path()))
        .await
        .unwrap();

    let err = client.request_update(SnapshotFormat::Json).await.unwrap_err();
    assert!(matches!(err, ClientError::UpdateRejected(ref s) if s.starts_with("Error: ")));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

    // Connection still usable
    let status = client.send_signal("0", "SIGTERM").await.unwrap();
    assert_eq!(status, "Error: Invalid process ID: 0");

    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_after_idle_close() {
    let config = procctld::ServerConfig {
        idle_timeout_secs: 1,
        ..common::test_config()
    };
    let mut server = TestServer::spawn_with(
        std::sync::Arc::new(procctld::FixtureSource::new(common::FIXTURE_PS)),
        config,
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut client = ProtocolClient::connect(&client_config(&server, dir.path()))
        .await
        .unwrap();

    server
        .wait_for_event(|e| matches!(e, procctld::server::ServerEvent::Disconnected { .. }))
        .await;

    let err = client.request_update(SnapshotFormat::Json).await.unwrap_err();
    assert!(err.breaks_connection());
    assert!(client.is_broken());

    client.reconnect().await.unwrap();
    let path = client.request_update(SnapshotFormat::Json).await.unwrap();
    let snapshot = decode(&std::fs::read(&path).unwrap(), SnapshotFormat::Json).unwrap();
    assert_eq!(snapshot.len(), 3);

    client.close().await;
    server.shutdown().await;
}
