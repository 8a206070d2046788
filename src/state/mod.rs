//! Persistent crawl state
//!
//! - `DiscoveryCache`: pages and PDFs seen in earlier runs, so each run only
//!   handles the delta
//! - `DomainRateState`: per-domain request timing for the downloader
//! - JSON file helpers shared with the storage registry

mod discovery_cache;
mod domain_state;
mod json_store;

pub use discovery_cache::{CacheStats, DiscoveryCache, PageCacheEntry, PdfCacheEntry};
pub use domain_state::DomainRateState;
pub(crate) use json_store::{load_json_map, persist_blocking, unix_now, write_json_atomic};
