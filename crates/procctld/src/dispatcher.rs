//! Signal delivery.
//!
//! A request is validated in three steps, each with its own error variant:
//! 1. the pid text must be a positive integer
//! 2. the signal name must name a POSIX signal on this platform
//! 3. the `kill(2)` call itself (missing process, missing permission)
//!
//! No system call is made unless steps 1 and 2 succeed.

use std::str::FromStr;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::info;

/// Errors that can occur while delivering a signal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("Invalid process ID: {0}")]
    InvalidPid(String),

    #[error("Invalid signal name: {0}")]
    InvalidSignal(String),

    #[error("Process with ID {pid} not found")]
    ProcessNotFound { pid: i32 },

    #[error("Permission denied to send signal to process {pid}")]
    PermissionDenied { pid: i32 },

    #[error("Error sending signal to process {pid}: {error}")]
    Os { pid: i32, error: String },
}

/// Parses a pid, accepting only positive values.
///
/// Zero and negative values address process groups in `kill(2)` and are
/// rejected.
pub fn parse_pid(text: &str) -> Result<Pid, SignalError> {
    text.trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
        .map(Pid::from_raw)
        .ok_or_else(|| SignalError::InvalidPid(text.to_string()))
}

/// Parses a signal name such as `SIGTERM`, `sigkill` or `HUP`.
pub fn parse_signal(name: &str) -> Result<Signal, SignalError> {
    let upper = name.trim().to_ascii_uppercase();
    let canonical = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&canonical).map_err(|_| SignalError::InvalidSignal(name.to_string()))
}

/// Delivers signals to local processes.
///
/// Holds no state; one value can be shared by every session.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalDispatcher;

impl SignalDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Validates and delivers `signal_name` to `pid_text`.
    ///
    /// Returns the success status message.
    pub fn deliver(&self, pid_text: &str, signal_name: &str) -> Result<String, SignalError> {
        let pid = parse_pid(pid_text)?;
        let signal = parse_signal(signal_name)?;

        kill(pid, signal).map_err(|errno| classify(pid, errno))?;

        info!(pid = pid.as_raw(), signal = signal.as_str(), "Signal delivered");
        Ok(format!(
            "Signal {} sent to process {} successfully",
            signal.as_str(),
            pid
        ))
    }
}

fn classify(pid: Pid, errno: Errno) -> SignalError {
    let pid = pid.as_raw();
    match errno {
        Errno::ESRCH => SignalError::ProcessNotFound { pid },
        Errno::EPERM => SignalError::PermissionDenied { pid },
        other => SignalError::Os {
            pid,
            error: other.desc().to_string(),
        },
    }
}
