use crate::crawler::RemoteMeta;
use crate::state::{load_json_map, unix_now, write_json_atomic};
use crate::url::url_hash;
use crate::StorageResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const REGISTRY_FILE: &str = ".file_registry.json";

/// What we know about one downloaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub url: String,
    /// Local path, or object-store locator when local storage is disabled
    pub local_path: String,
    /// Unix seconds
    pub download_time: f64,
    pub file_size: u64,
    /// SHA-256 of the stored bytes, hex encoded
    pub file_hash: String,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub total_files: usize,
    pub total_bytes: u64,
}

/// Persistent index of completed downloads, keyed by URL hash
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, RegistryEntry>>,
}

impl FileRegistry {
    /// Loads `{root}/.file_registry.json`; a missing or corrupt file is empty
    pub fn open(root: impl AsRef<Path>) -> Self {
        let path = root.as_ref().join(REGISTRY_FILE);
        let entries = load_json_map(&path);
        debug!("File registry {} holds {} entries", path.display(), entries.len());
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, url: &str) -> Option<RegistryEntry> {
        self.entries.lock().unwrap().get(&url_hash(url)).cloned()
    }

    /// Records a completed download and persists the registry
    pub fn record(
        &self,
        url: &str,
        stored_at: &str,
        content: &[u8],
        remote: Option<&RemoteMeta>,
    ) -> StorageResult<RegistryEntry> {
        let entry = RegistryEntry {
            url: url.to_string(),
            local_path: stored_at.to_string(),
            download_time: unix_now(),
            file_size: content.len() as u64,
            file_hash: content_hash(content),
            last_modified: remote.and_then(|m| m.last_modified.clone()),
            etag: remote.and_then(|m| m.etag.clone()),
            content_length: remote.and_then(|m| m.content_length),
        };

        let mut entries = self.entries.lock().unwrap();
        entries.insert(url_hash(url), entry.clone());
        write_json_atomic(&self.path, &*entries)?;
        Ok(entry)
    }

    /// URL of the download recorded at `stored_at`, if any
    pub fn owner_of(&self, stored_at: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .values()
            .find(|entry| entry.local_path == stored_at)
            .map(|entry| entry.url.clone())
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.lock().unwrap();
        RegistryStats {
            total_files: entries.len(),
            total_bytes: entries.values().map(|e| e.file_size).sum(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// SHA-256 hex digest of `content`
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
