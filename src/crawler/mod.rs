//! Crawler module: fetching, parsing, downloading, orchestration
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching and HEAD probes with classified errors
//! - HTML parsing into an owned page model
//! - Rate-limited concurrent downloads with retry
//! - Per-department crawl coordination

mod coordinator;
mod fetcher;
mod parser;
mod retry;
mod scheduler;

pub use coordinator::{
    count_js_indicators, Coordinator, CrawlResults, DepartmentAnalysis, DepartmentResults,
    DryRunReport,
};
pub use fetcher::{build_http_client, fetch_page, probe, FetchedPage, RemoteMeta};
pub use parser::{parse_html, resolve_link, Anchor, FormInput, FormSpec, ParsedPage};
pub use retry::{download_with_retry, RetryPolicy};
pub use scheduler::{DocumentSink, DownloadScheduler};
