//! procctld - remote process inspection and signal delivery over TCP
//!
//! This crate provides the daemon side of procctl:
//! - `inspector` - captures the process table (`ps aux` behind a trait)
//! - `dispatcher` - validates and delivers POSIX signals
//! - `server` - TCP listener and per-client sessions
//! - `config` - server configuration (defaults, TOML file, environment)
//! - `monitor` - periodic self monitoring of CPU/memory usage
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       procctld                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │    Listener     │────▶│  ConnectionSession (task)   │   │
//! │  │ (TcpListener)   │     │  one per client             │   │
//! │  └────────┬────────┘     └──────┬──────────────┬───────┘   │
//! │           │                     │              │           │
//! │           │ events              ▼              ▼           │
//! │           ▼            ┌──────────────┐ ┌──────────────┐   │
//! │  ┌─────────────────┐   │  Inspector   │ │  Dispatcher  │   │
//! │  │broadcast::Sender│   │  (ps aux)    │ │  (kill(2))   │   │
//! │  └─────────────────┘   └──────────────┘ └──────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows a panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel sends tolerate missing receivers

pub mod config;
pub mod dispatcher;
pub mod inspector;
pub mod monitor;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use dispatcher::{SignalDispatcher, SignalError};
pub use inspector::{FixtureSource, InspectionError, ProcessInspector, ProcessSource, PsCommand};
pub use server::{Listener, ServerError, ServerEvent};
