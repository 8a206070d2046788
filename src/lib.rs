//! govdoc-crawler: incremental PDF harvesting for government websites
//!
//! This crate discovers PDF documents on government sites, remembers what it
//! has already seen across runs, and downloads only what is new or changed,
//! under per-domain rate limits.

pub mod config;
pub mod crawler;
pub mod discovery;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use std::fmt;
use thiserror::Error;

/// Main error type for crawler operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}")]
    Connection { url: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Content validation failed for {url}: {reason}")]
    Validation { url: String, reason: String },

    #[error("Browser automation failed for {url}: {message}")]
    Browser { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Builds a `CrawlError` from a reqwest failure, classifying it at the source
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            Self::Connection {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            Self::Http {
                url: url.to_string(),
                source: err,
            }
        }
    }

    /// Returns the closed classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Status { status, .. } => ErrorKind::from_status(*status),
            // Body/decode failures mid-transfer behave like a dropped connection
            Self::Http { source, .. } => {
                if source.is_body() || source.is_decode() || source.is_request() {
                    ErrorKind::Connection
                } else {
                    ErrorKind::ClientError
                }
            }
            Self::Storage(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Url(_) | Self::UrlParse(_) => ErrorKind::ClientError,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Browser { .. } => ErrorKind::ClientError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Closed classification of failures, assigned where the failure originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request timed out
    Timeout,
    /// Connection refused, reset, or dropped mid-body
    Connection,
    /// HTTP 5xx
    ServerError,
    /// HTTP 429
    RateLimited,
    /// HTTP 4xx other than 429, malformed URLs, DNS-level failures
    ClientError,
    /// Wrong content type, bad signature, too small or too large
    Validation,
    /// Filesystem or object-store failure
    Storage,
    /// Invalid configuration
    Config,
    /// Work was never dispatched because of shutdown
    Cancelled,
}

impl ErrorKind {
    /// Maps an HTTP status code onto an error kind
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            500..=599 => Self::ServerError,
            _ => Self::ClientError,
        }
    }

    /// Whether a failure of this kind may succeed if attempted again
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection | Self::ServerError | Self::RateLimited
        )
    }
}

/// A classified failure carried inside a [`DownloadResult`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl DownloadFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&CrawlError> for DownloadFailure {
    fn from(err: &CrawlError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Outcome of one attempted PDF download
///
/// Created once per attempt and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub url: String,
    pub success: bool,
    /// Local path, or an object-store locator when local storage is disabled
    pub file_path: Option<String>,
    pub error: Option<DownloadFailure>,
    pub file_size: u64,
    /// Succeeded without transferring because an up-to-date copy exists
    pub skipped: bool,
}

impl DownloadResult {
    pub fn success(url: &str, file_path: impl Into<String>, file_size: u64) -> Self {
        Self {
            url: url.to_string(),
            success: true,
            file_path: Some(file_path.into()),
            error: None,
            file_size,
            skipped: false,
        }
    }

    pub fn skipped(url: &str, file_path: impl Into<String>, file_size: u64) -> Self {
        Self {
            skipped: true,
            ..Self::success(url, file_path, file_size)
        }
    }

    pub fn failure(url: &str, failure: DownloadFailure) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            file_path: None,
            error: Some(failure),
            file_size: 0,
            skipped: false,
        }
    }

    /// Kind of the carried error, if this result is a failure
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Department '{department}': {message}")]
    Department { department: String, message: String },

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object store error for {key}: {message}")]
    ObjectStore { key: String, message: String },

    #[error("Background write did not complete: {0}")]
    Background(#[from] tokio::task::JoinError),
}

/// Result type alias for crawler operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Coordinator, CrawlResults, DepartmentResults};
pub use discovery::{BrowserAutomation, DiscoveryEngine};
pub use state::DiscoveryCache;
pub use storage::StorageManager;
pub use url::{extract_domain, normalize_url, url_hash};
