//! Crawler coordinator - per-department orchestration
//!
//! This module sequences the pipeline for every configured department:
//! - Discovering pages and PDF candidates from each seed URL
//! - Skipping pages and PDFs the discovery cache already knows
//! - Handing the new PDFs to the rate-limited download scheduler
//! - Aggregating per-department and overall statistics
//!
//! It contains no discovery, caching, or rate-limiting logic of its own.

use crate::config::{Config, DepartmentConfig};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::scheduler::DownloadScheduler;
use crate::crawler::build_http_client;
use crate::discovery::{dedup_preserving_order, BrowserAutomation, DiscoveryEngine, SitemapIndex};
use crate::robots::PolicyGate;
use crate::state::{persist_blocking, DiscoveryCache};
use crate::storage::StorageManager;
use crate::{CrawlError, DownloadResult, Result, StorageResult};
use reqwest::Client;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Departments crawled at the same time
const MAX_PARALLEL_DEPARTMENTS: usize = 3;

/// Script markers counted when judging whether a page needs a browser
const JS_INDICATORS: [&str; 4] = ["<script", "javascript:", "onclick=", "onload="];

/// Script markers above which a PDF-less page is assumed to be script-rendered
const JS_HEAVY_THRESHOLD: usize = 10;

/// Rough per-document cost used for dry-run estimates
const ESTIMATED_SECONDS_PER_PDF: u64 = 2;

/// Statistics for one department's crawl
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepartmentResults {
    pub department: String,
    /// Pages returned by discovery across all seeds
    pub urls_crawled: usize,
    /// New PDF candidates handed to the downloader
    pub pdfs_found: usize,
    /// Successful results, including up-to-date copies that were skipped
    pub pdfs_downloaded: usize,
    pub pdfs_failed: usize,
    /// Successful results that needed no transfer
    pub pdfs_skipped: usize,
    /// Bytes transferred
    pub total_size: u64,
    pub duration: Duration,
    pub errors: Vec<String>,
}

impl DepartmentResults {
    /// A zero-count record carrying a single error
    pub fn failed(department: &str, error: String) -> Self {
        Self {
            department: department.to_string(),
            errors: vec![error],
            ..Self::default()
        }
    }

    fn record_downloads(&mut self, results: &[DownloadResult]) {
        for result in results {
            if result.success {
                self.pdfs_downloaded += 1;
                if result.skipped {
                    self.pdfs_skipped += 1;
                } else {
                    self.total_size += result.file_size;
                }
            } else {
                self.pdfs_failed += 1;
                if let Some(err) = &result.error {
                    self.errors
                        .push(format!("Download failed for {}: {}", result.url, err));
                }
            }
        }
    }
}

/// Aggregate statistics for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlResults {
    pub departments: Vec<DepartmentResults>,
    pub total_pdfs_found: usize,
    pub total_pdfs_downloaded: usize,
    pub total_duration: Duration,
    /// Downloaded over found, as a percentage; zero when nothing was found
    pub success_rate: f64,
}

impl CrawlResults {
    pub fn from_departments(departments: Vec<DepartmentResults>, total_duration: Duration) -> Self {
        let total_pdfs_found: usize = departments.iter().map(|d| d.pdfs_found).sum();
        let total_pdfs_downloaded: usize = departments.iter().map(|d| d.pdfs_downloaded).sum();
        let success_rate = if total_pdfs_found > 0 {
            total_pdfs_downloaded as f64 / total_pdfs_found as f64 * 100.0
        } else {
            0.0
        };

        Self {
            departments,
            total_pdfs_found,
            total_pdfs_downloaded,
            total_duration,
            success_rate,
        }
    }
}

/// What a dry run learned about one department
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentAnalysis {
    pub department: String,
    pub seed_urls_accessible: usize,
    pub seed_urls_total: usize,
    pub estimated_pdfs: usize,
    pub requires_browser: bool,
    pub rate_limit_detected: bool,
    pub issues: Vec<String>,
}

/// Outcome of [`Coordinator::dry_run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunReport {
    pub department_analyses: Vec<DepartmentAnalysis>,
    pub total_estimated_pdfs: usize,
    pub estimated_duration: Duration,
    pub issues_found: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Main crawler coordinator structure
///
/// Cloning is cheap; clones share the HTTP client, policy gate, sitemap
/// index, discovery cache, storage, and download scheduler.
#[derive(Clone)]
pub struct Coordinator {
    config: Arc<Config>,
    client: Client,
    gate: Arc<PolicyGate>,
    sitemaps: Arc<SitemapIndex>,
    cache: Arc<DiscoveryCache>,
    storage: Arc<StorageManager>,
    scheduler: DownloadScheduler,
    browser: Option<Arc<dyn BrowserAutomation>>,
    shutdown: Arc<AtomicBool>,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The validated crawler configuration
    /// * `force` - Re-download files even when the registry says they are current
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to crawl
    /// * `Err(CrawlError)` - The HTTP client or the discovery cache could not be set up
    pub fn new(config: Config, force: bool) -> Result<Self> {
        let client = build_http_client(&config.settings).map_err(|e| CrawlError::Http {
            url: String::new(),
            source: e,
        })?;
        let storage = StorageManager::new(client.clone(), config.storage.clone()).with_force(force);
        Self::with_storage(config, client, storage)
    }

    /// Creates a coordinator around an already configured storage manager
    pub fn with_storage(config: Config, client: Client, storage: StorageManager) -> Result<Self> {
        let settings = &config.settings;
        let cache = DiscoveryCache::open(&config.cache.dir)?;
        let storage = Arc::new(storage);
        let shutdown = Arc::new(AtomicBool::new(false));

        let scheduler = DownloadScheduler::new(
            storage.clone(),
            settings.max_concurrent_downloads,
            settings.min_domain_interval(),
            RetryPolicy::new(settings.max_retries, Duration::from_secs(1)),
        )
        .with_shutdown(shutdown.clone());

        Ok(Self {
            gate: Arc::new(PolicyGate::new(client.clone(), settings)),
            sitemaps: Arc::new(SitemapIndex::new(client.clone())),
            cache: Arc::new(cache),
            storage,
            scheduler,
            browser: None,
            shutdown,
            client,
            config: Arc::new(config),
        })
    }

    /// Installs the browser fallback; used only when enabled in settings
    pub fn with_browser(mut self, browser: Arc<dyn BrowserAutomation>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Flag that stops dispatch of new work when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// Runs a discovery-cache mutation, and the file rewrite that follows
    /// it, on the blocking pool
    async fn update_cache<T, F>(&self, op: F) -> StorageResult<T>
    where
        F: FnOnce(&DiscoveryCache) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        persist_blocking(move || op(cache.as_ref())).await
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Departments matching `filter` by table key or display name; all when empty
    pub fn selected_departments(&self, filter: &[String]) -> BTreeMap<String, DepartmentConfig> {
        self.config
            .departments
            .iter()
            .filter(|(key, dept)| {
                filter.is_empty() || filter.iter().any(|f| f == *key || *f == dept.name)
            })
            .map(|(key, dept)| (key.clone(), dept.clone()))
            .collect()
    }

    /// Crawls the selected departments, at most three at a time
    pub async fn crawl(&self, filter: &[String]) -> CrawlResults {
        let start = Instant::now();
        let departments = self.selected_departments(filter);

        if departments.is_empty() {
            warn!("No departments to crawl");
            return CrawlResults::default();
        }

        info!(
            "Crawling {} departments: {:?}",
            departments.len(),
            departments.keys().collect::<Vec<_>>()
        );

        let pool = Arc::new(Semaphore::new(MAX_PARALLEL_DEPARTMENTS));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<usize, String> = HashMap::new();
        let mut results = Vec::with_capacity(departments.len());

        for (index, (key, dept)) in departments.into_iter().enumerate() {
            let permit = match pool.clone().acquire_owned().await {
                Ok(permit) if !self.is_shutting_down() => permit,
                _ => {
                    results.push(DepartmentResults::failed(
                        &dept.name,
                        "Crawl cancelled before department started".to_string(),
                    ));
                    continue;
                }
            };

            pending.insert(index, dept.name.clone());
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                info!("Starting crawl for department: {}", dept.name);
                (index, this.crawl_department(&key, &dept).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    pending.remove(&index);
                    info!(
                        "Completed crawl for {}: {}/{} PDFs downloaded",
                        result.department, result.pdfs_downloaded, result.pdfs_found
                    );
                    results.push(result);
                }
                Err(e) => error!("Department task aborted: {}", e),
            }
        }

        for (_, name) in pending {
            let message = format!("Failed to crawl department {}: task aborted", name);
            error!("{}", message);
            results.push(DepartmentResults::failed(&name, message));
        }

        self.storage.finish_uploads().await;

        let results = CrawlResults::from_departments(results, start.elapsed());
        info!(
            "Crawling completed in {:.2} minutes. Downloaded {}/{} PDFs ({:.1}% success rate)",
            results.total_duration.as_secs_f64() / 60.0,
            results.total_pdfs_downloaded,
            results.total_pdfs_found,
            results.success_rate
        );
        results
    }

    /// Runs the full discovery and download pipeline for one department
    ///
    /// Never fails: every error is recorded in the returned `errors`.
    pub async fn crawl_department(&self, key: &str, dept: &DepartmentConfig) -> DepartmentResults {
        let start = Instant::now();
        let deadline = start + dept.time_limit();
        let settings = &self.config.settings;
        let mut results = DepartmentResults {
            department: dept.name.clone(),
            ..DepartmentResults::default()
        };

        info!("Starting department crawl: {} ({})", dept.name, key);

        let mut engine = DiscoveryEngine::new(
            self.client.clone(),
            self.gate.clone(),
            self.sitemaps.clone(),
            settings.page_delay(),
        );
        if settings.enable_browser_automation {
            if let Some(browser) = &self.browser {
                engine = engine.with_browser(browser.clone());
            }
        }
        engine.reset_visited();
        engine.set_deadline(Some(deadline));

        // (candidate URL, page it was found on)
        let mut candidates: Vec<(String, String)> = Vec::new();

        'seeds: for seed in &dept.seed_urls {
            if self.is_shutting_down() {
                results.errors.push("Crawl interrupted".to_string());
                break;
            }
            if Instant::now() >= deadline {
                results.errors.push(format!(
                    "Time limit of {}s reached for {}",
                    dept.time_limit, dept.name
                ));
                break;
            }
            if self.cache.should_skip_page(seed, settings.cache_max_age_hours) {
                info!("Skipping recently crawled seed: {}", seed);
                continue;
            }

            info!("Processing seed URL: {}", seed);
            let discovery = engine.discover_comprehensive(seed, dept.max_depth).await;
            if let Some(e) = &discovery.seed_error {
                results
                    .errors
                    .push(format!("Error processing seed {}: {}", seed, e));
            }
            results.urls_crawled += discovery.pages.len();
            candidates.extend(
                discovery
                    .pdf_candidates
                    .iter()
                    .map(|url| (url.clone(), seed.clone())),
            );

            for page in discovery.pages.iter().take(dept.max_pages) {
                if self.is_shutting_down() || Instant::now() >= deadline {
                    warn!("Stopping page scan for {} early", dept.name);
                    results.errors.push(format!(
                        "Page scan for {} stopped early (time limit or interrupt)",
                        seed
                    ));
                    break 'seeds;
                }
                if self.cache.should_skip_page(page, settings.cache_max_age_hours) {
                    continue;
                }

                match engine.find_pdf_links_with_fallback(page).await {
                    Ok(links) => {
                        let (crawled, count) = (page.clone(), links.len());
                        let cached = self
                            .update_cache(move |cache| cache.cache_page_crawl(&crawled, count))
                            .await;
                        if let Err(e) = cached {
                            warn!("Could not cache crawl of {}: {}", page, e);
                        }
                        candidates.extend(links.into_iter().map(|url| (url, page.clone())));
                    }
                    Err(e) => results
                        .errors
                        .push(format!("Error processing URL {}: {}", page, e)),
                }

                tokio::time::sleep(settings.page_delay()).await;
            }
        }

        let candidates = keep_document_types(dedup_candidates(candidates), dept);
        let urls: Vec<String> = candidates.iter().map(|(url, _)| url.clone()).collect();

        let batch = urls.clone();
        let new_urls = match self.update_cache(move |cache| cache.filter_new(&batch)).await {
            Ok(new_urls) => new_urls,
            Err(e) => {
                results
                    .errors
                    .push(format!("Discovery cache unavailable, downloading all: {}", e));
                urls.clone()
            }
        };

        let skipped = urls.len() - new_urls.len();
        if skipped > 0 {
            info!("Skipped {} previously discovered PDFs for {}", skipped, dept.name);
        }
        self.cache_new_candidates(&candidates, &new_urls, &mut results)
            .await;

        results.pdfs_found = new_urls.len();
        info!("Found {} new PDF URLs for {}", new_urls.len(), dept.name);

        if !new_urls.is_empty() {
            let downloads = self.scheduler.download_batch(&new_urls, &dept.name).await;
            results.record_downloads(&downloads);
        }

        results.duration = start.elapsed();
        info!(
            "Department crawl completed for {}: {} downloaded, {} failed, {:.2} MB in {:.2} minutes",
            dept.name,
            results.pdfs_downloaded,
            results.pdfs_failed,
            results.total_size as f64 / (1024.0 * 1024.0),
            results.duration.as_secs_f64() / 60.0
        );
        results
    }

    /// Records the new candidates in the discovery cache, grouped by source page
    async fn cache_new_candidates(
        &self,
        candidates: &[(String, String)],
        new_urls: &[String],
        results: &mut DepartmentResults,
    ) {
        let new_urls: HashSet<&str> = new_urls.iter().map(String::as_str).collect();
        let mut by_source: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (url, source) in candidates {
            if new_urls.contains(url.as_str()) {
                by_source.entry(source.clone()).or_default().push(url.clone());
            }
        }

        for (source, urls) in by_source {
            let page = source.clone();
            let cached = self
                .update_cache(move |cache| cache.cache_discovered(&urls, &page))
                .await;
            if let Err(e) = cached {
                results
                    .errors
                    .push(format!("Could not cache PDFs found on {}: {}", source, e));
            }
        }
    }

    /// Probes every seed of the selected departments without downloading
    pub async fn dry_run(&self, filter: &[String]) -> DryRunReport {
        info!("Starting dry-run analysis");

        let mut analyses = Vec::new();
        for dept in self.selected_departments(filter).values() {
            info!("Analyzing department: {}", dept.name);
            analyses.push(self.analyze_department(dept).await);
        }

        let total_estimated_pdfs: usize = analyses.iter().map(|a| a.estimated_pdfs).sum();
        let estimated_duration =
            Duration::from_secs(total_estimated_pdfs as u64 * ESTIMATED_SECONDS_PER_PDF);

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        for analysis in &analyses {
            issues.extend(analysis.issues.iter().cloned());

            if analysis.requires_browser {
                recommendations.push(format!(
                    "Enable browser automation for {}",
                    analysis.department
                ));
            }
            if analysis.rate_limit_detected {
                recommendations.push(format!(
                    "Increase delays for {} to avoid rate limiting",
                    analysis.department
                ));
            }
            if analysis.seed_urls_accessible < analysis.seed_urls_total {
                recommendations.push(format!(
                    "Check inaccessible URLs for {}",
                    analysis.department
                ));
            }
        }

        if total_estimated_pdfs > 1000 {
            recommendations.push(
                "Consider running crawl in smaller batches due to large number of PDFs".to_string(),
            );
        }
        if estimated_duration > Duration::from_secs(3600) {
            recommendations.push(
                "Estimated crawl time is over 1 hour - consider splitting the run".to_string(),
            );
        }

        let report = DryRunReport {
            department_analyses: analyses,
            total_estimated_pdfs,
            estimated_duration,
            issues_found: dedup_preserving_order(issues),
            recommendations: dedup_preserving_order(recommendations),
        };

        info!(
            "Dry-run analysis completed. Estimated {} PDFs, {:.1} minutes duration",
            report.total_estimated_pdfs,
            report.estimated_duration.as_secs_f64() / 60.0
        );
        report
    }

    async fn analyze_department(&self, dept: &DepartmentConfig) -> DepartmentAnalysis {
        let engine = DiscoveryEngine::new(
            self.client.clone(),
            self.gate.clone(),
            self.sitemaps.clone(),
            Duration::ZERO,
        );
        let mut analysis = DepartmentAnalysis {
            department: dept.name.clone(),
            seed_urls_total: dept.seed_urls.len(),
            ..DepartmentAnalysis::default()
        };

        for seed in &dept.seed_urls {
            let page = match crate::crawler::fetch_page(&self.client, seed).await {
                Ok(page) => page,
                Err(e) => {
                    if let CrawlError::Status { status: 429, .. } = e {
                        analysis.rate_limit_detected = true;
                    }
                    analysis.issues.push(describe_seed_failure(seed, &e));
                    continue;
                }
            };
            analysis.seed_urls_accessible += 1;

            let links = engine.pdf_links_in(&page);
            analysis.estimated_pdfs += links.len();

            if links.is_empty() && count_js_indicators(&page.body) > JS_HEAVY_THRESHOLD {
                analysis.requires_browser = true;
            }
        }

        analysis
    }
}

fn describe_seed_failure(seed: &str, err: &CrawlError) -> String {
    match err {
        CrawlError::Status { status: 429, .. } => format!("Rate limiting detected on {}", seed),
        CrawlError::Status { status, .. } => format!("HTTP {} error for {}", status, seed),
        CrawlError::Timeout { .. } => format!("Timeout accessing {}", seed),
        CrawlError::Connection { .. } => format!("Connection error for {}", seed),
        other => format!("Error accessing {}: {}", seed, other),
    }
}

/// Occurrences of script markers in `html`, case-insensitive
pub fn count_js_indicators(html: &str) -> usize {
    let lower = html.to_lowercase();
    JS_INDICATORS
        .iter()
        .map(|marker| lower.matches(marker).count())
        .sum()
}

/// First occurrence of each candidate URL wins
fn dedup_candidates(candidates: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|(url, _)| seen.insert(url.clone()))
        .collect()
}

/// Keeps candidates whose URL mentions one of the department's document types
fn keep_document_types(
    candidates: Vec<(String, String)>,
    dept: &DepartmentConfig,
) -> Vec<(String, String)> {
    let types = match &dept.document_types {
        Some(types) if !types.is_empty() => types,
        _ => return candidates,
    };

    let types: Vec<String> = types.iter().map(|t| t.to_lowercase()).collect();
    candidates
        .into_iter()
        .filter(|(url, _)| {
            let url = url.to_lowercase();
            types.iter().any(|t| url.contains(t.as_str()))
        })
        .collect()
}
