//! Command lines sent from client to server.
//!
//! A command is one `\n`-terminated line: a case-insensitive keyword
//! followed by whitespace separated arguments.
//!
//! ```text
//! update [json|xml ...]
//! signal <pid> <SIGNAL_NAME>
//! ```

use std::fmt;
use std::str::FromStr;

use procctl_core::{FormatError, SnapshotFormat};
use thiserror::Error;

/// Keyword for snapshot requests.
pub const UPDATE_KEYWORD: &str = "update";

/// Keyword for signal requests.
pub const SIGNAL_KEYWORD: &str = "signal";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Capture the process table and send it once per requested format
    Update { formats: Vec<SnapshotFormat> },

    /// Deliver a signal to a process.
    ///
    /// Arguments are kept as text; validation belongs to the dispatcher so
    /// each failure can be reported separately.
    Signal { pid: String, signal: String },
}

impl Command {
    /// Creates an update command for a single format.
    pub fn update(format: SnapshotFormat) -> Self {
        Self::Update {
            formats: vec![format],
        }
    }

    /// Creates a signal command.
    pub fn signal(pid: impl Into<String>, signal: impl Into<String>) -> Self {
        Self::Signal {
            pid: pid.into(),
            signal: signal.into(),
        }
    }

    /// Parses one command line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next().ok_or(CommandError::Empty)?.to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();

        match keyword.as_str() {
            UPDATE_KEYWORD => {
                if args.is_empty() {
                    return Ok(Self::update(SnapshotFormat::default()));
                }
                let formats = args
                    .iter()
                    .map(|arg| arg.parse::<SnapshotFormat>())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Update { formats })
            }
            SIGNAL_KEYWORD => match args.as_slice() {
                [pid, signal] => Ok(Self::signal(*pid, *signal)),
                _ => Err(CommandError::SignalUsage),
            },
            _ => Err(CommandError::UnknownCommand(keyword)),
        }
    }

    /// Renders the command as a wire line, including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update { formats } => {
                f.write_str(UPDATE_KEYWORD)?;
                for format in formats {
                    write!(f, " {format}")?;
                }
                Ok(())
            }
            Self::Signal { pid, signal } => write!(f, "{SIGNAL_KEYWORD} {pid} {signal}"),
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors produced while parsing a command line.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Invalid signal command format. Use: signal <pid> <signal_name>")]
    SignalUsage,

    #[error(transparent)]
    UnsupportedFormat(#[from] FormatError),
}

impl CommandError {
    /// Returns true if the client is waiting for a payload frame.
    ///
    /// A rejected `update` must still be answered with a (failure) frame so
    /// the client's framing stays in sync.
    pub fn replies_with_frame(&self) -> bool {
        matches!(self, Self::UnsupportedFormat(_))
    }
}
