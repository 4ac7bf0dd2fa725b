//! Shared helpers for procctld integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use procctl_protocol::{read_length, read_payload, read_status, MAX_PAYLOAD_LEN, MAX_STATUS_LEN};
use procctld::inspector::{FixtureSource, ProcessInspector, ProcessSource, PsCommand};
use procctld::server::{Listener, ServerEvent};
use procctld::ServerConfig;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Grace period for server shutdown
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// Upper bound for any single reply in tests
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Listing served by the fixture source. The last command contains spaces.
pub const FIXTURE_PS: &str = "\
USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND
root           1  0.0  0.1 167744 11880 ?        Ss   Oct17   0:04 /sbin/init splash
alice       4242  1.5  2.3 912345 45678 pts/0    Sl+  09:15   1:02 python3 -m http.server 8080
bob         5151  0.0  0.0   5000  1000 pts/1    S    10:00   0:00 sh -c echo \"a & b\" <x>
";

// ============================================================================
// Test Server
// ============================================================================

/// Test server bound to an ephemeral localhost port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub cancel_token: CancellationToken,
    pub events: broadcast::Receiver<ServerEvent>,
    pub sessions: procctld::monitor::SessionCounter,
}

impl TestServer {
    /// Spawns a server that serves [`FIXTURE_PS`].
    pub async fn spawn() -> Self {
        Self::spawn_with_source(Arc::new(FixtureSource::new(FIXTURE_PS))).await
    }

    /// Spawns a server that lists the real process table.
    pub async fn spawn_system() -> Self {
        Self::spawn_with_source(Arc::new(PsCommand::default())).await
    }

    pub async fn spawn_with_source(source: Arc<dyn ProcessSource>) -> Self {
        Self::spawn_with(source, test_config()).await
    }

    pub async fn spawn_with(source: Arc<dyn ProcessSource>, config: ServerConfig) -> Self {
        let cancel_token = CancellationToken::new();
        let listener = Listener::bind(&config, ProcessInspector::new(source), cancel_token.clone())
            .await
            .expect("bind test server");

        let addr = listener.local_addr();
        let events = listener.subscribe();
        let sessions = listener.active_sessions();

        tokio::spawn(async move {
            let _ = listener.run().await;
        });

        Self {
            addr,
            cancel_token,
            events,
            sessions,
        }
    }

    /// Opens a raw client connection.
    pub async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect to server");
        TestClient::new(stream)
    }

    /// Waits for the first event matching `pred`, skipping others.
    pub async fn wait_for_event<F>(&mut self, pred: F) -> ServerEvent
    where
        F: Fn(&ServerEvent) -> bool,
    {
        let events = &mut self.events;
        timeout(REPLY_TIMEOUT, async move {
            loop {
                let event = events.recv().await.expect("event channel open");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event not published in time")
    }

    /// Shuts down the server gracefully.
    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        sleep(SHUTDOWN_GRACE_PERIOD).await;
    }
}

/// Localhost config on an ephemeral port.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// Raw protocol client.
pub struct TestClient {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl TestClient {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Sends one command line (newline appended).
    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Reads the next length prefix.
    pub async fn read_length(&mut self) -> u32 {
        timeout(REPLY_TIMEOUT, read_length(&mut self.reader))
            .await
            .expect("reply timed out")
            .unwrap()
    }

    /// Reads one payload frame and returns its bytes.
    pub async fn read_frame(&mut self) -> Vec<u8> {
        let len = self.read_length().await;
        assert_ne!(len, 0, "expected a payload, got a failure marker");
        let payload = timeout(REPLY_TIMEOUT, read_payload(&mut self.reader, len, MAX_PAYLOAD_LEN))
            .await
            .expect("payload timed out")
            .unwrap();
        assert_eq!(payload.len(), len as usize);
        payload
    }

    /// Reads one status line.
    pub async fn read_status(&mut self) -> String {
        timeout(REPLY_TIMEOUT, read_status(&mut self.reader, MAX_STATUS_LEN))
            .await
            .expect("status timed out")
            .unwrap()
    }

    /// Sends a command and reads the status line it gets back.
    pub async fn request_status(&mut self, line: &str) -> String {
        self.send(line).await;
        self.read_status().await
    }
}
