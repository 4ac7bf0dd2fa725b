//! Daemon configuration.
//!
//! Resolution order, later sources win:
//! 1. built-in defaults
//! 2. TOML file (`<config_dir>/procctl/procctld.toml` unless given explicitly)
//! 3. `PROCCTLD_HOST` / `PROCCTLD_PORT`
//! 4. command line flags (applied by the binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use procctl_protocol::{DEFAULT_BIND_HOST, DEFAULT_PORT, MAX_COMMAND_LEN};

use crate::inspector::{PsCommand, DEFAULT_PS_ARGS, DEFAULT_PS_PROGRAM};
use crate::server::SessionConfig;

/// Environment variable overriding the bind host.
pub const HOST_ENV: &str = "PROCCTLD_HOST";

/// Environment variable overriding the port.
pub const PORT_ENV: &str = "PROCCTLD_PORT";

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "procctld.toml";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid config {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Configuration for the procctld server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub host: String,

    /// TCP port to bind (0 picks a free port)
    pub port: u16,

    /// Seconds a session may sit idle before it is closed (0 disables)
    pub idle_timeout_secs: u64,

    /// Seconds a single reply may take to write
    pub write_timeout_secs: u64,

    /// Longest accepted command line in bytes
    pub max_command_len: usize,

    /// Program used to list processes
    pub ps_program: String,

    /// Arguments passed to `ps_program`
    pub ps_args: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BIND_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout_secs: 0,
            write_timeout_secs: 10,
            max_command_len: MAX_COMMAND_LEN,
            ps_program: DEFAULT_PS_PROGRAM.to_string(),
            ps_args: DEFAULT_PS_ARGS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl ServerConfig {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("procctl").join(CONFIG_FILE_NAME))
    }

    /// Loads a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Loads `path` if given, else the default file if it exists, else defaults.
    ///
    /// An explicitly named file must exist; the default one is optional.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Applies `PROCCTLD_HOST` / `PROCCTLD_PORT` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides using `lookup` as the environment.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_ENV) {
            self.host = host;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: PORT_ENV,
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    /// Returns `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Per-session limits derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: (self.idle_timeout_secs > 0)
                .then_some(Duration::from_secs(self.idle_timeout_secs)),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            max_command_len: self.max_command_len,
        }
    }

    /// The process listing command this config names.
    pub fn ps_command(&self) -> PsCommand {
        PsCommand::new(self.ps_program.clone(), self.ps_args.clone())
    }
}
