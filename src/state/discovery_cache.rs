use crate::state::{load_json_map, unix_now, write_json_atomic};
use crate::url::url_hash;
use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const PDF_CACHE_FILE: &str = "discovery_cache.json";
const PAGE_CACHE_FILE: &str = "url_discovery_cache.json";

const SECONDS_PER_HOUR: f64 = 3600.0;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// A page crawled in this or an earlier run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageCacheEntry {
    pub url: String,
    /// Unix seconds
    pub last_crawled: f64,
    pub pdf_count: usize,
    pub crawl_count: u64,
}

/// A PDF URL discovered in this or an earlier run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfCacheEntry {
    pub url: String,
    /// Unix seconds of first discovery; never changes once written
    pub discovered_time: f64,
    pub source_page: String,
    /// Unix seconds of the most recent rediscovery
    pub last_seen: f64,
}

/// Summary counts over the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub total_cached_pdfs: usize,
    /// PDFs seen within the last 24 hours
    pub recent_pdfs: usize,
    pub total_cached_pages: usize,
    /// Pages crawled within the last 24 hours
    pub recent_pages: usize,
    /// Hours since the oldest recorded discovery
    pub cache_age_hours: f64,
}

#[derive(Debug, Default)]
struct CacheMaps {
    pages: BTreeMap<String, PageCacheEntry>,
    pdfs: BTreeMap<String, PdfCacheEntry>,
}

/// Persistent record of previously seen pages and PDFs
///
/// Entries are keyed by [`url_hash`]. Every mutating call updates memory and
/// rewrites the affected file before returning, so a later process observes
/// the same decisions.
#[derive(Debug)]
pub struct DiscoveryCache {
    pdf_path: PathBuf,
    page_path: PathBuf,
    maps: Mutex<CacheMaps>,
}

impl DiscoveryCache {
    /// Opens (or creates) the cache stored in `dir`
    ///
    /// Missing files mean a cold start; corrupt files are logged and treated
    /// as empty.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        let pdf_path = dir.join(PDF_CACHE_FILE);
        let page_path = dir.join(PAGE_CACHE_FILE);
        let maps = CacheMaps {
            pdfs: load_json_map(&pdf_path),
            pages: load_json_map(&page_path),
        };

        info!(
            "Loaded discovery cache from {}: {} PDFs, {} pages",
            dir.display(),
            maps.pdfs.len(),
            maps.pages.len()
        );

        Ok(Self {
            pdf_path,
            page_path,
            maps: Mutex::new(maps),
        })
    }

    /// True iff `url` was crawled less than `max_age_hours` ago
    pub fn should_skip_page(&self, url: &str, max_age_hours: u64) -> bool {
        let maps = self.maps.lock().unwrap();
        match maps.pages.get(&url_hash(url)) {
            Some(entry) => {
                let age_hours = (unix_now() - entry.last_crawled) / SECONDS_PER_HOUR;
                age_hours < max_age_hours as f64
            }
            None => false,
        }
    }

    /// Records that `url` was crawled and yielded `pdf_count` candidates
    pub fn cache_page_crawl(&self, url: &str, pdf_count: usize) -> StorageResult<()> {
        let mut maps = self.maps.lock().unwrap();
        let key = url_hash(url);
        let crawl_count = maps.pages.get(&key).map_or(0, |e| e.crawl_count) + 1;

        maps.pages.insert(
            key,
            PageCacheEntry {
                url: url.to_string(),
                last_crawled: unix_now(),
                pdf_count,
                crawl_count,
            },
        );

        write_json_atomic(&self.page_path, &maps.pages)
    }

    /// Returns the URLs never seen before, in input order
    ///
    /// Duplicates within `urls` collapse to their first occurrence.
    /// Previously seen URLs are left out and their `last_seen` is refreshed.
    /// Call this before [`Self::cache_discovered`] for the same batch.
    pub fn filter_new(&self, urls: &[String]) -> StorageResult<Vec<String>> {
        let mut maps = self.maps.lock().unwrap();
        let now = unix_now();
        let mut batch = HashSet::new();
        let mut fresh = Vec::new();
        let mut refreshed = 0usize;

        for url in urls {
            let key = url_hash(url);
            if !batch.insert(key.clone()) {
                continue;
            }
            match maps.pdfs.get_mut(&key) {
                Some(entry) => {
                    entry.last_seen = now;
                    refreshed += 1;
                }
                None => fresh.push(url.clone()),
            }
        }

        if refreshed > 0 {
            write_json_atomic(&self.pdf_path, &maps.pdfs)?;
            debug!("{} PDFs already known, last_seen refreshed", refreshed);
        }

        Ok(fresh)
    }

    /// Records a batch of PDF URLs found on `source_page`
    ///
    /// Existing entries keep their discovery time and source; only
    /// `last_seen` moves forward.
    pub fn cache_discovered(&self, urls: &[String], source_page: &str) -> StorageResult<()> {
        if urls.is_empty() {
            return Ok(());
        }

        let mut maps = self.maps.lock().unwrap();
        let now = unix_now();

        for url in urls {
            maps.pdfs
                .entry(url_hash(url))
                .and_modify(|entry| entry.last_seen = now)
                .or_insert_with(|| PdfCacheEntry {
                    url: url.clone(),
                    discovered_time: now,
                    source_page: source_page.to_string(),
                    last_seen: now,
                });
        }

        write_json_atomic(&self.pdf_path, &maps.pdfs)
    }

    /// Whether `url` was discovered in this or an earlier run
    pub fn is_pdf_cached(&self, url: &str) -> bool {
        self.maps.lock().unwrap().pdfs.contains_key(&url_hash(url))
    }

    pub fn pdf_entry(&self, url: &str) -> Option<PdfCacheEntry> {
        self.maps.lock().unwrap().pdfs.get(&url_hash(url)).cloned()
    }

    pub fn page_entry(&self, url: &str) -> Option<PageCacheEntry> {
        self.maps.lock().unwrap().pages.get(&url_hash(url)).cloned()
    }

    /// Removes entries not seen (PDFs) or crawled (pages) within the window
    ///
    /// # Returns
    ///
    /// `(pdfs_removed, pages_removed)`
    pub fn cleanup(&self, max_age_days: u64) -> StorageResult<(usize, usize)> {
        let mut maps = self.maps.lock().unwrap();
        let cutoff = unix_now() - max_age_days as f64 * SECONDS_PER_DAY;

        let pdfs_before = maps.pdfs.len();
        maps.pdfs.retain(|_, entry| entry.last_seen >= cutoff);
        let pdfs_removed = pdfs_before - maps.pdfs.len();

        let pages_before = maps.pages.len();
        maps.pages.retain(|_, entry| entry.last_crawled >= cutoff);
        let pages_removed = pages_before - maps.pages.len();

        write_json_atomic(&self.pdf_path, &maps.pdfs)?;
        write_json_atomic(&self.page_path, &maps.pages)?;

        info!(
            "Cache cleanup removed {} PDFs and {} pages older than {} days",
            pdfs_removed, pages_removed, max_age_days
        );
        Ok((pdfs_removed, pages_removed))
    }

    pub fn stats(&self) -> CacheStats {
        let maps = self.maps.lock().unwrap();
        let now = unix_now();

        let oldest = maps
            .pdfs
            .values()
            .map(|e| e.discovered_time)
            .fold(now, f64::min);

        CacheStats {
            total_cached_pdfs: maps.pdfs.len(),
            recent_pdfs: maps
                .pdfs
                .values()
                .filter(|e| now - e.last_seen < SECONDS_PER_DAY)
                .count(),
            total_cached_pages: maps.pages.len(),
            recent_pages: maps
                .pages
                .values()
                .filter(|e| now - e.last_crawled < SECONDS_PER_DAY)
                .count(),
            cache_age_hours: (now - oldest) / SECONDS_PER_HOUR,
        }
    }
}
