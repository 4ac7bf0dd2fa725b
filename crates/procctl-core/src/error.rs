//! Error types for snapshot encoding and decoding, following panic-free policy.

use thiserror::Error;

/// Errors that can occur while converting snapshots to or from a wire format.
#[derive(Error, Debug)]
pub enum FormatError {
    /// The requested format name is not one of the supported formats
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML writing or reading failed
    #[error("XML error: {0}")]
    Xml(String),

    /// Document was well-formed but did not describe a snapshot
    #[error("Malformed snapshot: {0}")]
    Malformed(String),
}

/// Result type for format operations.
pub type FormatResult<T> = Result<T, FormatError>;
