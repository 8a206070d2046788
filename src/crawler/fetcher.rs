//! HTTP fetcher implementation
//!
//! This module handles the plain HTTP plumbing shared by discovery and
//! storage:
//! - Building the HTTP client with the configured user agent and timeout
//! - GET requests for HTML pages
//! - HEAD probes that report type, size, and freshness headers
//! - Error classification at the point of failure

use crate::config::CrawlSettings;
use crate::{CrawlError, Result};
use reqwest::header::{
    HeaderMap, HeaderName, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED,
};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed for any request
const MAX_REDIRECTS: usize = 10;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects; relative links resolve against this
    pub final_url: Url,
    pub content_type: Option<String>,
    pub body: String,
}

/// Headers reported by a HEAD probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMeta {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub content_disposition: Option<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

impl RemoteMeta {
    pub fn from_headers(status: u16, headers: &HeaderMap) -> Self {
        Self {
            status,
            content_type: header_value(headers, CONTENT_TYPE),
            content_length: header_value(headers, CONTENT_LENGTH).and_then(|v| v.parse().ok()),
            content_disposition: header_value(headers, CONTENT_DISPOSITION),
            last_modified: header_value(headers, LAST_MODIFIED),
            etag: header_value(headers, ETAG),
        }
    }

    /// Whether the declared type or filename indicates a PDF
    ///
    /// A URL ending in `.pdf` is accepted as well, since many servers send
    /// `application/octet-stream` for documents.
    pub fn looks_like_pdf(&self, url: &str) -> bool {
        let by_type = self
            .content_type
            .as_deref()
            .map(|ct| ct.to_lowercase().contains("application/pdf"))
            .unwrap_or(false);

        let by_disposition = self
            .content_disposition
            .as_deref()
            .map(|cd| cd.to_lowercase().contains(".pdf"))
            .unwrap_or(false);

        let by_url = Url::parse(url)
            .map(|u| u.path().to_lowercase().ends_with(".pdf"))
            .unwrap_or_else(|_| url.to_lowercase().ends_with(".pdf"));

        by_type || by_disposition || by_url
    }
}

fn header_value(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `settings` - Global crawl settings (user agent and request timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use govdoc_crawler::config::CrawlSettings;
/// use govdoc_crawler::crawler::build_http_client;
///
/// let client = build_http_client(&CrawlSettings::default()).unwrap();
/// ```
pub fn build_http_client(settings: &CrawlSettings) -> std::result::Result<Client, reqwest::Error> {
    let timeout = settings.request_timeout();

    Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches an HTML page
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The URL to fetch
///
/// # Returns
///
/// * `Ok(FetchedPage)` - 2xx response with its decoded body
/// * `Err(CrawlError)` - Network failure or non-2xx status, already classified
pub async fn fetch_page(client: &Client, url: &str) -> Result<FetchedPage> {
    let response = client
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

    let final_url = response.url().clone();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let body = response
        .text()
        .await
        .map_err(|e| CrawlError::from_reqwest(url, e))?;

    Ok(FetchedPage {
        final_url,
        content_type,
        body,
    })
}

/// Sends a HEAD request and reports the response headers
///
/// Any status is returned inside [`RemoteMeta`]; only transport failures are
/// errors.
pub async fn probe(client: &Client, url: &str) -> Result<RemoteMeta> {
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| CrawlError::from_reqwest(url, e))?;

    Ok(RemoteMeta::from_headers(
        response.status().as_u16(),
        response.headers(),
    ))
}
