//! Error types for the procctl client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` in this module.

use std::path::PathBuf;

use procctl_core::FormatError;
use procctl_protocol::FrameError;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors that can occur while talking to procctld.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not open the TCP connection.
    ///
    /// Usually the daemon is not running or the host/port is wrong.
    #[error("Failed to connect to {addr}: {error}")]
    Connect { addr: String, error: String },

    /// Socket I/O failed after connecting.
    #[error("I/O error: {0}")]
    Io(String),

    /// The server stopped answering within the I/O timeout.
    #[error("Timed out waiting for the server")]
    Timeout,

    /// The connection closed before the announced payload arrived.
    ///
    /// Nothing is written to disk in this case.
    #[error("Truncated transfer: expected {expected} bytes, received {received}")]
    TruncatedTransfer { expected: usize, received: usize },

    /// The server answered an update with a failure marker.
    ///
    /// Carries the server's status line verbatim.
    #[error("Update rejected: {0}")]
    UpdateRejected(String),

    /// The server sent something that does not fit the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The command was refused locally before being sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Writing a received snapshot to disk failed.
    #[error("Failed to save {path}: {error}")]
    Persist { path: PathBuf, error: String },

    /// A saved snapshot could not be decoded.
    #[error(transparent)]
    Format(#[from] FormatError),
}

impl ClientError {
    /// Returns true if the error leaves the connection at an unknown point
    /// of the reply stream.
    ///
    /// A rejected update has consumed its status line and local failures
    /// happen before or after the exchange, so those keep the connection.
    pub fn breaks_connection(&self) -> bool {
        !matches!(
            self,
            Self::UpdateRejected(_) | Self::InvalidRequest(_) | Self::Persist { .. } | Self::Format(_)
        )
    }
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Truncated { expected, received } => {
                Self::TruncatedTransfer { expected, received }
            }
            FrameError::Closed => Self::Protocol("connection closed by server".to_string()),
            FrameError::Io(e) => Self::Io(e.to_string()),
            other => Self::Protocol(other.to_string()),
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
