//! procctl protocol - wire format of the control channel
//!
//! This crate provides the command grammar (client to server) and the
//! response framing (server to client) shared by `procctld` and the
//! `procctl` client.
//!
//! | Command | Response |
//! |---|---|
//! | `update [json\|xml ...]` | one length-prefixed frame per format |
//! | `signal <pid> <SIGNAL>` | one status line |
//! | anything else | one `Error: Unknown command` status line |

pub mod command;
pub mod frame;

pub use command::{Command, CommandError};
pub use frame::{
    error_status, is_error_status, read_length, read_line, read_payload, read_status,
    write_failure, write_payload, write_status, FrameError, FAILURE_MARKER,
};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default server bind address (all interfaces).
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Default host the client connects to.
pub const DEFAULT_CONNECT_HOST: &str = "localhost";

/// Maximum length of a command line in bytes.
pub const MAX_COMMAND_LEN: usize = 4096;

/// Maximum length of a status line in bytes.
pub const MAX_STATUS_LEN: usize = 64 * 1024;

/// Maximum payload a client accepts (64 MB).
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;
