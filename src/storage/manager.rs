use crate::config::{ObjectStoreKind, StorageConfig};
use crate::crawler::{probe, DocumentSink, RemoteMeta};
use crate::state::persist_blocking;
use crate::storage::filename::{department_slug, generate_filename};
use crate::storage::object_store::{HttpObjectStore, ObjectStore, S3ObjectStore};
use crate::storage::registry::{FileRegistry, RegistryStats};
use crate::url::url_hash;
use crate::{CrawlError, DownloadFailure, DownloadResult, StorageError};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Smallest byte count accepted as a PDF
const MIN_PDF_BYTES: usize = 100;

/// Window at the end of a file searched for the `%%EOF` trailer
const EOF_WINDOW: usize = 1024;

/// Hex digits of the URL hash appended to a filename already in use
const NAME_SUFFIX_LEN: usize = 8;

/// Whether `content` looks like a complete PDF
///
/// Requires the `%PDF-` signature and at least 100 bytes. A missing `%%EOF`
/// trailer is tolerated.
pub fn validate_pdf_content(content: &[u8]) -> bool {
    if !content.starts_with(b"%PDF-") || content.len() < MIN_PDF_BYTES {
        return false;
    }

    let tail = &content[content.len().saturating_sub(EOF_WINDOW)..];
    if !tail.windows(5).any(|w| w == b"%%EOF") {
        debug!("PDF content missing EOF marker at end, accepting anyway");
    }
    true
}

/// Validates, persists, and deduplicates downloaded PDFs
///
/// Files land under `{local-path}[/{department}]/{filename}` and, when an
/// object store is configured, under `{prefix}/{department}/{filename}`
/// remotely. Every stored file is recorded in the file registry so later
/// runs can skip unchanged documents.
pub struct StorageManager {
    client: Client,
    config: StorageConfig,
    registry: Arc<FileRegistry>,
    object_store: Option<Arc<dyn ObjectStore>>,
    object_prefix: Option<String>,
    /// Bypass the registry freshness check for every download
    force: bool,
    /// Stored location -> URL, for names handed out during this run
    claimed: Mutex<HashMap<String, String>>,
    uploads: Mutex<JoinSet<()>>,
}

impl StorageManager {
    /// Creates a manager for `config`, connecting the configured object store
    pub fn new(client: Client, config: StorageConfig) -> Self {
        let registry = Arc::new(FileRegistry::open(&config.local_path));
        let object_store = config.object_store.as_ref().map(|store| match store.kind {
            ObjectStoreKind::S3 => Arc::new(S3ObjectStore::from_config(store)) as Arc<dyn ObjectStore>,
            ObjectStoreKind::Http => {
                Arc::new(HttpObjectStore::from_config(client.clone(), store)) as Arc<dyn ObjectStore>
            }
        });
        let object_prefix = config
            .object_store
            .as_ref()
            .and_then(|store| store.prefix.clone());

        Self {
            client,
            config,
            registry,
            object_store,
            object_prefix,
            force: false,
            claimed: Mutex::new(HashMap::new()),
            uploads: Mutex::new(JoinSet::new()),
        }
    }

    /// Replaces the object store (or adds one) with a custom implementation
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn local_path_for(&self, filename: &str, department: &str) -> PathBuf {
        let root = Path::new(&self.config.local_path);
        if self.config.organize_by_department {
            root.join(department_slug(department)).join(filename)
        } else {
            root.join(filename)
        }
    }

    pub fn object_key_for(&self, filename: &str, department: &str) -> String {
        let mut parts = Vec::new();
        if let Some(prefix) = self.object_prefix.as_deref() {
            let prefix = prefix.trim_matches('/');
            if !prefix.is_empty() {
                parts.push(prefix.to_string());
            }
        }
        if self.config.organize_by_department {
            parts.push(department_slug(department));
        }
        parts.push(filename.to_string());
        parts.join("/")
    }

    /// Where `filename` is recorded in the registry: the local path, or the
    /// object-store locator when nothing is kept locally
    fn stored_location(&self, filename: &str, department: &str) -> String {
        if self.config.local_enabled {
            return self.local_path_for(filename, department).display().to_string();
        }
        let key = self.object_key_for(filename, department);
        match &self.object_store {
            Some(store) => store.locator(&key),
            None => key,
        }
    }

    /// Picks the filename `url` is stored under in `department`
    ///
    /// Normally the name derived from the URL. When that location already
    /// belongs to a different URL, in the registry or earlier in this run,
    /// the first hex digits of the URL hash are appended before `.pdf`.
    /// A URL keeps the name it was recorded under in earlier runs.
    pub fn filename_for(&self, url: &str, department: &str) -> String {
        let base = generate_filename(url, None);
        let suffixed = with_hash_suffix(&base, url);
        let key = url_hash(url);
        let other_owner = |owner: Option<String>| owner.map_or(false, |o| url_hash(&o) != key);

        let mut claimed = self.claimed.lock().unwrap();
        let recorded_suffixed = self
            .registry
            .get(url)
            .map_or(false, |entry| entry.local_path == self.stored_location(&suffixed, department));

        let filename = if recorded_suffixed {
            suffixed
        } else {
            let location = self.stored_location(&base, department);
            let taken = other_owner(claimed.get(&location).cloned())
                || other_owner(self.registry.owner_of(&location));
            if taken {
                debug!("{} already holds another document, using {}", base, suffixed);
                suffixed
            } else {
                base
            }
        };

        claimed.insert(self.stored_location(&filename, department), url.to_string());
        filename
    }

    /// Decides whether `url` must be fetched again
    ///
    /// True when forced, when there is no stored copy, when the copy has no
    /// registry entry, when the remote Last-Modified or ETag changed, or
    /// when the remote cannot be probed. With local storage disabled the
    /// object store is asked whether the copy exists.
    pub async fn should_download(&self, url: &str, filename: &str, department: &str, force: bool) -> bool {
        if force {
            return true;
        }

        let local_path = self.local_path_for(filename, department);
        let stored = if self.config.local_enabled {
            local_path.exists()
        } else {
            self.exists(&local_path, department).await
        };
        if !stored {
            return true;
        }

        let entry = match self.registry.get(url) {
            Some(entry) => entry,
            None => return true,
        };

        match probe(&self.client, url).await {
            Ok(remote) if remote.status == 200 => {
                let changed =
                    remote.last_modified != entry.last_modified || remote.etag != entry.etag;
                if changed {
                    info!("Remote file modified, will re-download: {}", url);
                } else {
                    debug!("File unchanged, skipping: {}", url);
                }
                changed
            }
            Ok(remote) => {
                debug!("Freshness probe for {} returned {}", url, remote.status);
                true
            }
            Err(e) => {
                debug!("Freshness probe for {} failed: {}", url, e);
                true
            }
        }
    }

    /// Downloads `url` unless the registry shows the stored copy is current
    pub async fn fetch_incremental(&self, url: &str, department: &str, force: bool) -> DownloadResult {
        let filename = self.filename_for(url, department);

        if !self.should_download(url, &filename, department, force).await {
            let (stored_at, size) = match self.registry.get(url) {
                Some(entry) => (entry.local_path, entry.file_size),
                None => (self.stored_location(&filename, department), 0),
            };
            info!("File up to date, skipping: {}", filename);
            return DownloadResult::skipped(url, stored_at, size);
        }

        self.store(url, &filename, department).await
    }

    /// Validates, downloads, and persists one PDF
    pub async fn fetch_and_store(&self, url: &str, department: &str) -> DownloadResult {
        let filename = self.filename_for(url, department);
        self.store(url, &filename, department).await
    }

    async fn store(&self, url: &str, filename: &str, department: &str) -> DownloadResult {
        match self.try_fetch_and_store(url, filename, department).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                DownloadResult::failure(url, DownloadFailure::from(&e))
            }
        }
    }

    async fn try_fetch_and_store(
        &self,
        url: &str,
        filename: &str,
        department: &str,
    ) -> crate::Result<DownloadResult> {
        let remote = self.validate_remote(url).await?;

        info!("Downloading PDF: {}", url);
        let content = self.download_body(url).await?;

        if !validate_pdf_content(&content) {
            return Err(validation(url, "Downloaded content is not a valid PDF file"));
        }

        let size = content.len() as u64;
        let key = self.object_key_for(filename, department);

        let stored_at = if self.config.local_enabled {
            let local_path = self.local_path_for(filename, department);
            save_locally(&local_path, &content).await?;
            if let Some(store) = &self.object_store {
                self.spawn_upload(Arc::clone(store), key, content.clone());
            }
            local_path.display().to_string()
        } else {
            let store = self.object_store.as_ref().ok_or_else(|| {
                CrawlError::Storage(StorageError::ObjectStore {
                    key: key.clone(),
                    message: "local storage disabled and no object store configured".to_string(),
                })
            })?;
            store.put(&key, content.clone()).await?;
            store.locator(&key)
        };

        let registry = Arc::clone(&self.registry);
        let (entry_url, entry_path) = (url.to_string(), stored_at.clone());
        let recorded = persist_blocking(move || {
            registry.record(&entry_url, &entry_path, &content, Some(&remote))
        })
        .await;
        if let Err(e) = recorded {
            warn!("Could not update file registry for {}: {}", url, e);
        }

        info!("Successfully downloaded: {} ({} bytes)", filename, size);
        Ok(DownloadResult::success(url, stored_at, size))
    }

    /// HEAD-checks `url` before any bytes are transferred
    async fn validate_remote(&self, url: &str) -> crate::Result<RemoteMeta> {
        let remote = probe(&self.client, url).await?;

        if remote.status != 200 {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: remote.status,
            });
        }

        if !remote.looks_like_pdf(url) {
            return Err(validation(
                url,
                format!(
                    "URL does not point to a PDF (content-type: {})",
                    remote.content_type.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        let cap = self.config.max_file_size_bytes();
        if let Some(length) = remote.content_length {
            if length > cap {
                return Err(validation(url, too_large(length)));
            }
        }

        Ok(remote)
    }

    /// Reads the body into memory, stopping as soon as it exceeds the size cap
    async fn download_body(&self, url: &str) -> crate::Result<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CrawlError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CrawlError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let cap = self.config.max_file_size_bytes();
        let mut content = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| CrawlError::from_reqwest(url, e))?
        {
            content.extend_from_slice(&chunk);
            if content.len() as u64 > cap {
                return Err(validation(url, too_large(content.len() as u64)));
            }
        }

        Ok(content)
    }

    fn spawn_upload(&self, store: Arc<dyn ObjectStore>, key: String, content: Vec<u8>) {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.spawn(async move {
            if let Err(e) = store.put(&key, content).await {
                warn!("Object store upload failed for {}, but local save succeeded: {}", key, e);
            }
        });
    }

    /// Waits for every background upload started so far
    pub async fn finish_uploads(&self) {
        let mut uploads = std::mem::take(&mut *self.uploads.lock().unwrap());
        if uploads.is_empty() {
            return;
        }
        info!("Waiting for {} object store uploads", uploads.len());
        while uploads.join_next().await.is_some() {}
    }

    /// Whether a stored copy exists locally (non-empty) or in the object store
    pub async fn exists(&self, local_path: &Path, department: &str) -> bool {
        if let Ok(meta) = tokio::fs::metadata(local_path).await {
            if meta.len() > 0 {
                return true;
            }
        }

        let (store, filename) = match (&self.object_store, local_path.file_name()) {
            (Some(store), Some(name)) => (store, name.to_string_lossy()),
            _ => return false,
        };

        let key = self.object_key_for(&filename, department);
        match store.exists(&key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Error checking object store for {}: {}", key, e);
                false
            }
        }
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.stats()
    }
}

#[async_trait]
impl DocumentSink for StorageManager {
    async fn fetch(&self, url: &str, department: &str) -> DownloadResult {
        self.fetch_incremental(url, department, self.force).await
    }
}

/// Writes `content` to `{path}.part` and renames it into place, so `path`
/// only ever holds a complete file
async fn save_locally(path: &Path, content: &[u8]) -> crate::Result<()> {
    let io_err = |at: &Path, source| {
        CrawlError::Storage(StorageError::Io {
            path: at.display().to_string(),
            source,
        })
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }

    let partial = partial_path(path);
    tokio::fs::write(&partial, content)
        .await
        .map_err(|e| io_err(&partial, e))?;
    if let Err(e) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(io_err(path, e));
    }

    debug!("Saved locally: {}", path.display());
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// `report.pdf` -> `report-1a2b3c4d.pdf`, using the hash of `url`
fn with_hash_suffix(filename: &str, url: &str) -> String {
    let stem = filename.strip_suffix(".pdf").unwrap_or(filename);
    let hash = url_hash(url);
    format!("{}-{}.pdf", stem, &hash[..NAME_SUFFIX_LEN.min(hash.len())])
}

fn validation(url: &str, reason: impl Into<String>) -> CrawlError {
    CrawlError::Validation {
        url: url.to_string(),
        reason: reason.into(),
    }
}

fn too_large(bytes: u64) -> String {
    format!(
        "File too large ({:.1}MB), skipping",
        bytes as f64 / (1024.0 * 1024.0)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf_bytes(len: usize) -> Vec<u8> {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.resize(len.saturating_sub(6), b'x');
        bytes.extend_from_slice(b"\n%%EOF");
        bytes
    }

    #[test]
    fn test_validate_pdf_content() {
        assert!(validate_pdf_content(&pdf_bytes(200)));
        assert!(!validate_pdf_content(&pdf_bytes(50)));
        assert!(!validate_pdf_content(b""));
        assert!(!validate_pdf_content(
            &[b"<html>".as_slice(), &[b' '; 200]].concat()
        ));
    }

    #[test]
    fn test_missing_trailer_tolerated() {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(300, b'x');
        assert!(validate_pdf_content(&bytes));
    }

    fn manager(organize: bool, prefix: Option<&str>) -> StorageManager {
        let mut config = StorageConfig {
            local_path: "/srv/pdfs".to_string(),
            organize_by_department: organize,
            ..StorageConfig::default()
        };
        config.object_store = prefix.map(|p| crate::config::ObjectStoreConfig {
            kind: ObjectStoreKind::Http,
            endpoint: Some("https://objects.example".to_string()),
            bucket: "pdfs".to_string(),
            region: None,
            prefix: Some(p.to_string()),
            token_env: None,
        });
        StorageManager::new(Client::new(), config)
    }

    #[test]
    fn test_layout_by_department() {
        let m = manager(true, Some("/run1/"));
        assert_eq!(
            m.local_path_for("a.pdf", "Labour Department"),
            PathBuf::from("/srv/pdfs/Labour-Department/a.pdf")
        );
        assert_eq!(
            m.object_key_for("a.pdf", "Labour Department"),
            "run1/Labour-Department/a.pdf"
        );
    }

    #[test]
    fn test_flat_layout() {
        let m = manager(false, None);
        assert_eq!(
            m.local_path_for("a.pdf", "Labour Department"),
            PathBuf::from("/srv/pdfs/a.pdf")
        );
        assert_eq!(m.object_key_for("a.pdf", "Labour Department"), "a.pdf");
    }

    #[test]
    fn test_same_basename_gets_distinct_names() {
        let m = manager(true, None);
        let en = "https://www.labour.gov.hk/en/doc/x.pdf";
        let tc = "https://www.labour.gov.hk/tc/doc/x.pdf";

        let first = m.filename_for(en, "Labour Department");
        let second = m.filename_for(tc, "Labour Department");

        assert_eq!(first, "x.pdf");
        assert_ne!(second, first);
        assert!(second.starts_with("x-") && second.ends_with(".pdf"));
        assert_eq!(m.filename_for(en, "Labour Department"), first);
        assert_eq!(m.filename_for(tc, "Labour Department"), second);
    }

    #[test]
    fn test_hash_suffix() {
        let url = "https://www.labour.gov.hk/tc/doc/x.pdf";
        assert_eq!(with_hash_suffix("x.pdf", url), format!("x-{}.pdf", &url_hash(url)[..8]));
    }

    #[tokio::test]
    async fn test_save_locally_replaces_whole_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Labour-Department").join("a.pdf");

        save_locally(&path, &pdf_bytes(400)).await.unwrap();
        save_locally(&path, &pdf_bytes(200)).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), pdf_bytes(200));
        assert!(!partial_path(&path).exists());
    }
}
