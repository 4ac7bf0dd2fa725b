//! One client session.
//!
//! A session reads command lines and answers each one before reading the
//! next. Per-command failures are reported to the client and the session
//! keeps going; only framing, I/O and timeout errors end it.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`.
//! Errors are logged and either answered or turned into a disconnect.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use procctl_core::{encode, FormatError, SnapshotFormat};
use procctl_protocol::{
    error_status, read_line, write_failure, write_payload, write_status, Command, CommandError,
    FrameError, MAX_COMMAND_LEN,
};

use super::events::{publish, EventSender, ServerEvent};
use crate::dispatcher::{SignalDispatcher, SignalError};
use crate::inspector::{InspectionError, ProcessInspector};

/// Default write timeout (10 seconds).
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Close the session after this long without a command; `None` never
    pub idle_timeout: Option<Duration>,
    /// Give up on a reply that takes longer than this to write
    pub write_timeout: Duration,
    /// Longest accepted command line
    pub max_command_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            write_timeout: WRITE_TIMEOUT,
            max_command_len: MAX_COMMAND_LEN,
        }
    }
}

/// Handles shared by every session of one listener.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub inspector: ProcessInspector,
    pub dispatcher: SignalDispatcher,
    pub config: SessionConfig,
    pub events: EventSender,
    pub cancel_token: CancellationToken,
}

/// A reply to one command.
enum Reply {
    /// One payload frame per entry, back to back
    Frames(Vec<Vec<u8>>),
    /// Zero-length frame then an error status line
    Failure(String),
    /// A single status line
    Status(String),
}

/// Session state for a single TCP client.
pub struct ConnectionSession {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    connection_number: u64,
    ctx: SessionContext,
}

impl ConnectionSession {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        connection_number: u64,
        ctx: SessionContext,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
            peer,
            connection_number,
            ctx,
        }
    }

    /// Serves the client until it disconnects, fails, or the server stops.
    pub async fn run(mut self) {
        info!(
            connection = self.connection_number,
            peer = %self.peer,
            "Client connected"
        );
        publish(
            &self.ctx.events,
            ServerEvent::Connected {
                connection: self.connection_number,
                peer: self.peer,
            },
        );

        let reason = match self.process_commands().await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    connection = self.connection_number,
                    peer = %self.peer,
                    error = %e,
                    "Closing connection"
                );
                Some(e.to_string())
            }
        };

        let _ = self.writer.shutdown().await;

        info!(
            connection = self.connection_number,
            peer = %self.peer,
            "Client disconnected"
        );
        publish(
            &self.ctx.events,
            ServerEvent::Disconnected {
                connection: self.connection_number,
                peer: self.peer,
                reason,
            },
        );
    }

    /// Reads and answers commands until EOF, shutdown, or a fatal error.
    async fn process_commands(&mut self) -> Result<(), ConnectionError> {
        let cancel_token = self.ctx.cancel_token.clone();
        let idle_timeout = self.ctx.config.idle_timeout;
        let max_len = self.ctx.config.max_command_len;

        loop {
            let line = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!(connection = self.connection_number, "Session cancelled by shutdown");
                    return Ok(());
                }

                read = read_command(&mut self.reader, max_len, idle_timeout) => match read? {
                    Some(line) => line,
                    None => {
                        debug!(connection = self.connection_number, "Client sent EOF");
                        return Ok(());
                    }
                },
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            self.handle_line(line).await?;
        }
    }

    /// Parses and answers one command line.
    async fn handle_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        debug!(connection = self.connection_number, command = line, "Command received");
        publish(
            &self.ctx.events,
            ServerEvent::CommandReceived {
                connection: self.connection_number,
                command: line.to_string(),
            },
        );

        match Command::parse(line) {
            Ok(Command::Update { formats }) => self.handle_update(line, &formats).await,
            Ok(Command::Signal { pid, signal }) => self.handle_signal(line, &pid, &signal).await,
            Err(e) => self.fail(line, e.into()).await,
        }
    }

    async fn handle_update(
        &mut self,
        line: &str,
        formats: &[SnapshotFormat],
    ) -> Result<(), ConnectionError> {
        let payloads = match self.build_payloads(formats).await {
            Ok(payloads) => payloads,
            Err(e) => return self.fail(line, e).await,
        };

        let bytes: usize = payloads.iter().map(Vec::len).sum();
        let frames = payloads.len();
        self.send(Reply::Frames(payloads)).await?;

        self.completed(line, format!("sent {frames} frame(s), {bytes} bytes"));
        Ok(())
    }

    /// Captures one snapshot and encodes it in every requested format.
    ///
    /// Nothing is written until all encodings succeed.
    async fn build_payloads(
        &self,
        formats: &[SnapshotFormat],
    ) -> Result<Vec<Vec<u8>>, RequestError> {
        let snapshot = self.ctx.inspector.capture().await?;
        let payloads = formats
            .iter()
            .map(|format| encode(&snapshot, *format))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(payloads)
    }

    async fn handle_signal(
        &mut self,
        line: &str,
        pid: &str,
        signal: &str,
    ) -> Result<(), ConnectionError> {
        match self.ctx.dispatcher.deliver(pid, signal) {
            Ok(message) => {
                self.send(Reply::Status(message.clone())).await?;
                self.completed(line, message);
                Ok(())
            }
            Err(e) => self.fail(line, e.into()).await,
        }
    }

    fn completed(&self, line: &str, outcome: String) {
        info!(
            connection = self.connection_number,
            command = line,
            outcome = %outcome,
            "Command completed"
        );
        publish(
            &self.ctx.events,
            ServerEvent::CommandCompleted {
                connection: self.connection_number,
                command: line.to_string(),
                outcome,
            },
        );
    }

    /// Logs a failed command and answers with an error reply.
    async fn fail(&mut self, line: &str, err: RequestError) -> Result<(), ConnectionError> {
        if matches!(err, RequestError::Inspection(_) | RequestError::Format(_)) {
            error!(
                connection = self.connection_number,
                command = line,
                error = %err,
                "Command failed"
            );
        } else {
            warn!(
                connection = self.connection_number,
                command = line,
                error = %err,
                "Command rejected"
            );
        }
        publish(
            &self.ctx.events,
            ServerEvent::CommandFailed {
                connection: self.connection_number,
                command: line.to_string(),
                error: err.to_string(),
            },
        );

        let status = error_status(&err);
        let reply = if err.replies_with_frame() {
            Reply::Failure(status)
        } else {
            Reply::Status(status)
        };
        self.send(reply).await
    }

    /// Writes a reply within the write timeout.
    async fn send(&mut self, reply: Reply) -> Result<(), ConnectionError> {
        let write_timeout = self.ctx.config.write_timeout;
        let writer = &mut self.writer;

        let write = async move {
            match reply {
                Reply::Frames(payloads) => {
                    for payload in &payloads {
                        write_payload(&mut *writer, payload).await?;
                    }
                }
                Reply::Failure(message) => write_failure(&mut *writer, &message).await?,
                Reply::Status(line) => write_status(&mut *writer, &line).await?,
            }
            Ok::<(), FrameError>(())
        };

        match timeout(write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Why a single command failed. The session continues.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Protocol(#[from] CommandError),

    #[error(transparent)]
    Inspection(#[from] InspectionError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}

impl RequestError {
    /// True when the client expects a payload frame for this command.
    pub fn replies_with_frame(&self) -> bool {
        match self {
            Self::Protocol(e) => e.replies_with_frame(),
            Self::Inspection(_) | Self::Format(_) => true,
            Self::Signal(_) => false,
        }
    }
}

/// Errors that end a session.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Idle timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Command too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Command is not valid UTF-8")]
    NotUtf8,
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TooLarge { size, max } => Self::MessageTooLarge { size, max },
            FrameError::NotUtf8 => Self::NotUtf8,
            other => Self::Io(other.to_string()),
        }
    }
}

/// Reads one command line, bounded by the idle timeout when one is set.
async fn read_command<R>(
    reader: &mut R,
    max_len: usize,
    idle_timeout: Option<Duration>,
) -> Result<Option<String>, ConnectionError>
where
    R: AsyncBufRead + Unpin,
{
    let line = match idle_timeout {
        Some(limit) => timeout(limit, read_line(reader, max_len))
            .await
            .map_err(|_| ConnectionError::Timeout)??,
        None => read_line(reader, max_len).await?,
    };
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.max_command_len, MAX_COMMAND_LEN);
    }

    #[test]
    fn test_reply_shape_per_error() {
        let unsupported: RequestError = CommandError::from(FormatError::UnsupportedFormat(
            "yaml".to_string(),
        ))
        .into();
        assert!(unsupported.replies_with_frame());
        assert_eq!(unsupported.to_string(), "Unsupported format: yaml");

        let unknown: RequestError = CommandError::UnknownCommand("list".to_string()).into();
        assert!(!unknown.replies_with_frame());

        let inspection: RequestError = InspectionError::Spawn {
            program: "ps".to_string(),
            error: "not found".to_string(),
        }
        .into();
        assert!(inspection.replies_with_frame());

        let signal: RequestError = SignalError::InvalidPid("abc".to_string()).into();
        assert!(!signal.replies_with_frame());
        assert_eq!(error_status(&signal), "Error: Invalid process ID: abc");
    }

    #[test]
    fn test_frame_error_mapping() {
        let err: ConnectionError = FrameError::TooLarge { size: 5000, max: 4096 }.into();
        assert!(matches!(err, ConnectionError::MessageTooLarge { size: 5000, max: 4096 }));
        assert!(err.to_string().contains("4096"));

        let err: ConnectionError = FrameError::NotUtf8.into();
        assert!(matches!(err, ConnectionError::NotUtf8));
    }
}
