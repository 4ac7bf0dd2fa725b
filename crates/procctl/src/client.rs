//! TCP client for procctld.
//!
//! This module provides the `ProtocolClient` which handles:
//! - Connecting to the daemon over TCP
//! - Requesting snapshots and saving each payload to disk
//! - Sending signal requests and returning the status line
//!
//! One client holds one connection; requests on it are strictly sequential.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use procctl_core::SnapshotFormat;
use procctl_protocol::{
    read_length, read_payload, read_status, Command, FrameError, FAILURE_MARKER,
    MAX_PAYLOAD_LEN, MAX_STATUS_LEN,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::storage::{persist, snapshot_path, unique_path};

/// Result of one executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Snapshot files written, one per requested format.
    Saved(Vec<PathBuf>),
    /// Status line returned by the server, verbatim.
    Status(String),
}

// ============================================================================
// Protocol Client
// ============================================================================

/// Client connection to procctld.
///
/// # Example
///
/// ```rust,ignore
/// use procctl_client::{ClientConfig, ProtocolClient};
/// use procctl_core::SnapshotFormat;
///
/// let mut client = ProtocolClient::connect(&ClientConfig::default()).await?;
/// let path = client.request_update(SnapshotFormat::Json).await?;
/// let status = client.send_signal("1234", "SIGTERM").await?;
/// client.close().await;
/// ```
pub struct ProtocolClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    config: ClientConfig,
    addr: String,
    /// Set when a reply was left half-read; the stream position is unknown.
    broken: bool,
}

impl ProtocolClient {
    /// Connects to the server named by `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let (reader, writer) = open(config).await?;
        Ok(Self {
            reader,
            writer,
            config: config.clone(),
            addr: config.addr(),
            broken: false,
        })
    }

    /// Replaces the connection with a fresh one to the same server.
    ///
    /// Clears the broken state.
    pub async fn reconnect(&mut self) -> Result<()> {
        let (reader, writer) = open(&self.config).await?;
        let mut stale = std::mem::replace(&mut self.writer, writer);
        self.reader = reader;
        self.broken = false;
        let _ = stale.shutdown().await;

        info!(addr = %self.addr, "Reconnected to procctld");
        Ok(())
    }

    /// Returns the server address this client connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Returns the directory snapshots are saved under.
    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Returns true once a transport failure has left the stream unusable.
    ///
    /// Every request fails until [`reconnect`](Self::reconnect) succeeds.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Requests one snapshot and saves it. Returns the file path.
    pub async fn request_update(&mut self, format: SnapshotFormat) -> Result<PathBuf> {
        let mut paths = self.request_updates(&[format]).await?;
        paths
            .pop()
            .ok_or_else(|| ClientError::Protocol("no payload received".to_string()))
    }

    /// Requests the snapshot in several formats with one command.
    ///
    /// All payloads are received before any file is written; the files share
    /// one timestamp.
    pub async fn request_updates(&mut self, formats: &[SnapshotFormat]) -> Result<Vec<PathBuf>> {
        let payloads = self.fetch(formats).await?;
        let received_at = Local::now();

        let mut paths = Vec::with_capacity(payloads.len());
        for (format, payload) in formats.iter().zip(payloads) {
            let path = unique_path(snapshot_path(self.output_dir(), received_at, *format)).await?;
            persist(&path, &payload).await?;
            info!(
                path = %path.display(),
                format = %format,
                bytes = payload.len(),
                "Snapshot saved"
            );
            paths.push(path);
        }
        Ok(paths)
    }

    /// Requests snapshots and returns the raw payloads without saving them.
    pub async fn fetch(&mut self, formats: &[SnapshotFormat]) -> Result<Vec<Vec<u8>>> {
        if formats.is_empty() {
            return Err(ClientError::InvalidRequest(
                "at least one format is required".to_string(),
            ));
        }
        self.ensure_usable()?;

        let result = self.exchange_update(formats).await;
        self.track(result)
    }

    /// Sends a signal request and returns the server's status line verbatim.
    ///
    /// Error lines (`Error: ...`) are returned as `Ok`; only transport and
    /// protocol failures are `Err`.
    pub async fn send_signal(&mut self, pid: &str, signal: &str) -> Result<String> {
        for (name, value) in [("pid", pid), ("signal", signal)] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(ClientError::InvalidRequest(format!(
                    "{name} must be a single word, got {value:?}"
                )));
            }
        }
        self.ensure_usable()?;

        let result = self.exchange_signal(pid, signal).await;
        self.track(result)
    }

    /// Runs a parsed command.
    pub async fn execute(&mut self, command: &Command) -> Result<Outcome> {
        match command {
            Command::Update { formats } => Ok(Outcome::Saved(self.request_updates(formats).await?)),
            Command::Signal { pid, signal } => {
                Ok(Outcome::Status(self.send_signal(pid, signal).await?))
            }
        }
    }

    /// Closes the connection.
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
        debug!(addr = %self.addr, "Connection closed");
    }

    async fn exchange_update(&mut self, formats: &[SnapshotFormat]) -> Result<Vec<Vec<u8>>> {
        let command = Command::Update {
            formats: formats.to_vec(),
        };
        self.send_command(&command).await?;

        let limit = self.config.io_timeout;
        let mut payloads = Vec::with_capacity(formats.len());
        for format in formats {
            let len = timed(limit, read_length(&mut self.reader)).await?;
            if len == FAILURE_MARKER {
                let status = timed(limit, read_status(&mut self.reader, MAX_STATUS_LEN)).await?;
                return Err(ClientError::UpdateRejected(status));
            }

            let payload = timed(limit, read_payload(&mut self.reader, len, MAX_PAYLOAD_LEN)).await?;
            debug!(format = %format, bytes = payload.len(), "Payload received");
            payloads.push(payload);
        }
        Ok(payloads)
    }

    async fn exchange_signal(&mut self, pid: &str, signal: &str) -> Result<String> {
        self.send_command(&Command::signal(pid, signal)).await?;
        let status = timed(
            self.config.io_timeout,
            read_status(&mut self.reader, MAX_STATUS_LEN),
        )
        .await?;
        debug!(status = %status, "Signal reply received");
        Ok(status)
    }

    async fn send_command(&mut self, command: &Command) -> Result<()> {
        let line = command.to_line();
        let writer = &mut self.writer;
        let write = async move {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            Ok::<(), FrameError>(())
        };
        timed(self.config.io_timeout, write).await?;
        debug!(command = %command, "Command sent");
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.broken {
            return Err(ClientError::Protocol(DESYNCHRONIZED.to_string()));
        }
        Ok(())
    }

    /// Marks the connection broken when `result` left the stream mid-reply.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.breaks_connection() {
                warn!(addr = %self.addr, error = %e, "Connection no longer usable");
                self.broken = true;
            }
        }
        result
    }
}

/// Reported for every request on a broken connection.
const DESYNCHRONIZED: &str = "connection desynchronized";

async fn open(
    config: &ClientConfig,
) -> Result<(BufReader<OwnedReadHalf>, BufWriter<OwnedWriteHalf>)> {
    let addr = config.addr();
    let stream = match timeout(config.io_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(ClientError::Connect {
                addr,
                error: e.to_string(),
            })
        }
        Err(_) => {
            return Err(ClientError::Connect {
                addr,
                error: "connection timed out".to_string(),
            })
        }
    };
    let _ = stream.set_nodelay(true);

    debug!(addr = %addr, "Connected to procctld");

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), BufWriter::new(writer)))
}

/// Runs a frame operation under the I/O timeout.
async fn timed<T, F>(limit: Duration, operation: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, FrameError>>,
{
    match timeout(limit, operation).await {
        Ok(result) => result.map_err(ClientError::from),
        Err(_) => Err(ClientError::Timeout),
    }
}

// ============================================================================
// Tests
// ============================================================================
