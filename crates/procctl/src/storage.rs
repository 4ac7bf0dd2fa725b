//! Saving received snapshots.
//!
//! Files land at `<output_dir>/<DD-MM-YYYY>/<HH-MM-SS>.<format>` in local
//! time. A payload is first written to a `.part` sibling and renamed into
//! place, so a file with the final name always holds a complete payload.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use procctl_core::SnapshotFormat;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Date directory format.
pub const DATE_DIR_FORMAT: &str = "%d-%m-%Y";

/// File stem format.
pub const TIME_STEM_FORMAT: &str = "%H-%M-%S";

/// Suffix of in-progress files.
pub const PARTIAL_SUFFIX: &str = "part";

/// Returns the path a snapshot received at `at` is saved under.
pub fn snapshot_path(output_dir: &Path, at: DateTime<Local>, format: SnapshotFormat) -> PathBuf {
    output_dir
        .join(at.format(DATE_DIR_FORMAT).to_string())
        .join(format!("{}.{}", at.format(TIME_STEM_FORMAT), format.as_str()))
}

/// Returns `path`, or `<stem>-N.<ext>` for the first N that does not exist.
///
/// Two updates in the same second would otherwise overwrite each other.
pub async fn unique_path(path: PathBuf) -> Result<PathBuf> {
    if !exists(&path).await? {
        return Ok(path);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    for n in 1..=u32::MAX {
        let candidate = path.with_file_name(format!("{stem}-{n}.{ext}"));
        if !exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Ok(path)
}

async fn exists(path: &Path) -> Result<bool> {
    fs::try_exists(path).await.map_err(|e| ClientError::Persist {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Writes `payload` to `path` through a `.part` file and a rename.
pub async fn persist(path: &Path, payload: &[u8]) -> Result<()> {
    let persist_err = |e: std::io::Error| ClientError::Persist {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(persist_err)?;
    }

    let partial = partial_path(path);
    if let Err(e) = fs::write(&partial, payload).await {
        discard(&partial).await;
        return Err(persist_err(e));
    }
    if let Err(e) = fs::rename(&partial, path).await {
        discard(&partial).await;
        return Err(persist_err(e));
    }

    debug!(path = %path.display(), bytes = payload.len(), "Snapshot saved");
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

async fn discard(partial: &Path) {
    if let Err(e) = fs::remove_file(partial).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %partial.display(), error = %e, "Failed to remove partial file");
        }
    }
}
