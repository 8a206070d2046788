use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for the crawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: CrawlSettings,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Departments keyed by a short identifier (the TOML table name)
    #[serde(default)]
    pub departments: BTreeMap<String, DepartmentConfig>,
}

/// A named crawl target with its own seeds and limits
#[derive(Debug, Clone, Deserialize)]
pub struct DepartmentConfig {
    /// Human-readable department name
    pub name: String,

    /// Starting points for discovery
    #[serde(rename = "seed-urls")]
    pub seed_urls: Vec<String>,

    /// Maximum link-hops from a seed URL
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of discovered pages scanned for PDF links per seed
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: usize,

    /// Wall-clock budget for the department (seconds)
    #[serde(rename = "time-limit", default = "default_time_limit")]
    pub time_limit: u64,

    /// Optional document-type keywords; candidates must mention one
    #[serde(rename = "document-types", default)]
    pub document_types: Option<Vec<String>>,
}

impl DepartmentConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit)
    }
}

/// Global crawl behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlSettings {
    /// Politeness delay between page fetches during discovery (seconds)
    #[serde(rename = "delay-between-requests", default = "default_delay")]
    pub delay_between_requests: f64,

    /// Size of the download worker pool
    #[serde(
        rename = "max-concurrent-downloads",
        default = "default_max_concurrent_downloads"
    )]
    pub max_concurrent_downloads: usize,

    #[serde(rename = "respect-robots-txt", default = "default_true")]
    pub respect_robots_txt: bool,

    /// Identifying User-Agent header
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "enable-browser-automation", default)]
    pub enable_browser_automation: bool,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout", default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Freshness window for cached page crawls (hours)
    #[serde(rename = "cache-max-age-hours", default = "default_cache_max_age")]
    pub cache_max_age_hours: u64,

    /// Minimum time between two downloads from the same domain (milliseconds)
    #[serde(
        rename = "min-domain-interval-ms",
        default = "default_min_domain_interval"
    )]
    pub min_domain_interval_ms: u64,

    /// Attempts per download before giving up
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Domains crawled regardless of robots.txt (supports "*." wildcards)
    #[serde(rename = "allow-list", default = "default_allow_list")]
    pub allow_list: Vec<String>,
}

impl CrawlSettings {
    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(self.delay_between_requests)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn min_domain_interval(&self) -> Duration {
        Duration::from_millis(self.min_domain_interval_ms)
    }
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            delay_between_requests: default_delay(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            respect_robots_txt: true,
            user_agent: default_user_agent(),
            enable_browser_automation: false,
            request_timeout: default_request_timeout(),
            cache_max_age_hours: default_cache_max_age(),
            min_domain_interval_ms: default_min_domain_interval(),
            max_retries: default_max_retries(),
            allow_list: default_allow_list(),
        }
    }
}

/// Where downloaded files go
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for downloaded PDFs and the file registry
    #[serde(rename = "local-path", default = "default_local_path")]
    pub local_path: String,

    #[serde(rename = "organize-by-department", default = "default_true")]
    pub organize_by_department: bool,

    /// Whether PDFs are written to `local_path`
    #[serde(rename = "local-enabled", default = "default_true")]
    pub local_enabled: bool,

    /// Largest PDF accepted (megabytes)
    #[serde(rename = "max-file-size-mb", default = "default_max_file_size")]
    pub max_file_size_mb: u64,

    /// Optional remote object store
    #[serde(rename = "object-store", default)]
    pub object_store: Option<ObjectStoreConfig>,
}

impl StorageConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            organize_by_department: true,
            local_enabled: true,
            max_file_size_mb: default_max_file_size(),
            object_store: None,
        }
    }
}

/// Which protocol the object store speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreKind {
    /// Amazon S3 or a compatible service, SigV4-signed through the AWS SDK
    #[default]
    S3,
    /// Plain HTTP PUT/HEAD with an optional bearer token
    Http,
}

/// Remote object store that receives a copy of every document
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub kind: ObjectStoreKind,
    /// Required for `http`; for `s3`, overrides the AWS endpoint (MinIO etc.)
    #[serde(default)]
    pub endpoint: Option<String>,
    pub bucket: String,
    /// AWS region; the SDK's default chain decides when unset
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Name of the environment variable holding a bearer token (`http` only)
    #[serde(rename = "token-env", default)]
    pub token_env: Option<String>,
}

/// Discovery cache location
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> usize {
    1000
}

fn default_time_limit() -> u64 {
    1800
}

fn default_delay() -> f64 {
    0.3
}

fn default_max_concurrent_downloads() -> usize {
    15
}

fn default_user_agent() -> String {
    "HK-PDF-Crawler/1.0".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_cache_max_age() -> u64 {
    24
}

fn default_min_domain_interval() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_allow_list() -> Vec<String> {
    vec!["*.gov.hk".to_string()]
}

fn default_local_path() -> String {
    "./downloads".to_string()
}

fn default_max_file_size() -> u64 {
    50
}

fn default_cache_dir() -> String {
    "./cache".to_string()
}
