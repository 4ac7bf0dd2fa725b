//! procctl core - process table snapshots shared by the daemon and client
//!
//! This crate provides:
//! - `record` - `ProcessRecord` / `ProcessSnapshot` and `ps aux` parsing
//! - `format` - JSON and XML snapshot encodings
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod format;
pub mod record;

// Re-exports for convenience
pub use error::{FormatError, FormatResult};
pub use format::{decode, encode, SnapshotFormat};
pub use record::{parse_ps_output, ProcessRecord, ProcessSnapshot, PS_COLUMNS};
