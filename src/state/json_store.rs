//! Whole-file JSON persistence
//!
//! State files are small maps rewritten in full after every mutation. Writes
//! go to a sibling temp file that is then renamed over the target, so a
//! crash leaves either the old or the new version on disk.

use crate::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Current time as fractional Unix seconds
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Loads a JSON object map; a missing, unreadable, or corrupt file is empty
pub(crate) fn load_json_map<T: DeserializeOwned>(path: &Path) -> BTreeMap<String, T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!("Could not read {}: {}; starting empty", path.display(), e);
            return BTreeMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(map) => map,
        Err(e) => {
            warn!("Could not parse {}: {}; starting empty", path.display(), e);
            BTreeMap::new()
        }
    }
}

/// Serializes `value` as pretty JSON and atomically replaces `path`
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let io_err = |p: &Path, source| StorageError::Io {
        path: p.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path(path);
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Runs a state-file write on the blocking pool so async workers never
/// wait on the filesystem
pub(crate) async fn persist_blocking<T, F>(op: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op).await?
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
