//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use procctl_protocol::{DEFAULT_CONNECT_HOST, DEFAULT_PORT};

use crate::error::{ClientError, Result};

/// Environment variable overriding the server host.
pub const HOST_ENV: &str = "PROCCTL_HOST";

/// Environment variable overriding the server port.
pub const PORT_ENV: &str = "PROCCTL_PORT";

/// Default I/O timeout for a single request.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the procctl client.
///
/// # Example
///
/// ```rust
/// use procctl_client::ClientConfig;
///
/// let config = ClientConfig {
///     host: "10.0.0.5".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.addr(), "10.0.0.5:9000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Root directory for saved snapshots.
    pub output_dir: PathBuf,

    /// Maximum time to wait for any single read or write.
    pub io_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CONNECT_HOST.to_string(),
            port: DEFAULT_PORT,
            output_dir: PathBuf::from("."),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies `PROCCTL_HOST` / `PROCCTL_PORT` from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides using `lookup` as the environment.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV) {
            self.host = host;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ClientError::InvalidRequest(format!("{PORT_ENV}={port}")))?;
        }
        Ok(())
    }
}
