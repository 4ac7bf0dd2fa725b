//! Process table inspection.
//!
//! The OS listing is behind the [`ProcessSource`] trait so the server can
//! run against a fixed fixture in tests. The production source runs
//! `ps aux`; parsing lives in `procctl_core::record`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use procctl_core::ProcessSnapshot;

/// Default listing program.
pub const DEFAULT_PS_PROGRAM: &str = "ps";

/// Default listing arguments.
pub const DEFAULT_PS_ARGS: [&str; 1] = ["aux"];

/// Errors that can occur while querying the process table.
#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error("Failed to run {program}: {error}")]
    Spawn { program: String, error: String },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Something that can produce a `ps aux` style listing.
#[async_trait]
pub trait ProcessSource: Send + Sync {
    /// Returns the raw listing, header line included.
    async fn list(&self) -> Result<String, InspectionError>;
}

/// Production source: shells out to the system `ps`.
#[derive(Debug, Clone)]
pub struct PsCommand {
    program: String,
    args: Vec<String>,
}

impl PsCommand {
    /// Creates a source running `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Returns the program name.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for PsCommand {
    fn default() -> Self {
        Self::new(
            DEFAULT_PS_PROGRAM,
            DEFAULT_PS_ARGS.iter().map(|a| a.to_string()).collect(),
        )
    }
}

#[async_trait]
impl ProcessSource for PsCommand {
    async fn list(&self) -> Result<String, InspectionError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| InspectionError::Spawn {
                program: self.program.clone(),
                error: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(InspectionError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Source that always returns the same listing.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    output: String,
}

impl FixtureSource {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

#[async_trait]
impl ProcessSource for FixtureSource {
    async fn list(&self) -> Result<String, InspectionError> {
        Ok(self.output.clone())
    }
}

/// Captures process snapshots from a [`ProcessSource`].
///
/// Cheap to clone; every session holds its own handle.
#[derive(Clone)]
pub struct ProcessInspector {
    source: Arc<dyn ProcessSource>,
}

impl ProcessInspector {
    pub fn new(source: Arc<dyn ProcessSource>) -> Self {
        Self { source }
    }

    /// Creates an inspector backed by the system `ps aux`.
    pub fn system() -> Self {
        Self::new(Arc::new(PsCommand::default()))
    }

    /// Captures a full snapshot.
    ///
    /// Either the whole listing is parsed or an error is returned; a failed
    /// listing never produces a partial snapshot.
    pub async fn capture(&self) -> Result<ProcessSnapshot, InspectionError> {
        let output = self.source.list().await?;
        let snapshot = ProcessSnapshot::from_ps_output(&output);
        debug!(
            processes = snapshot.len(),
            timestamp = %snapshot.timestamp,
            "Captured process table"
        );
        Ok(snapshot)
    }
}

impl std::fmt::Debug for ProcessInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessInspector").finish_non_exhaustive()
    }
}
