//! procctl client library
//!
//! Talks to a running `procctld`:
//! - `client` - TCP connection, update and signal requests
//! - `storage` - dated snapshot paths and atomic saves
//! - `config` - host, port, output directory and timeouts
//! - `error` - the `ClientError` type

pub mod client;
pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types
pub use client::{Outcome, ProtocolClient};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
