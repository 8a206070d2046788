//! Sitemap discovery
//!
//! Probes the conventional sitemap locations of a domain, follows sitemap
//! indexes to a bounded depth, and remembers the result per domain for the
//! life of the process. One index is shared by every department's engine.

use crate::url::domain_of;
use dashmap::DashMap;
use reqwest::Client;
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// How many levels of sitemap-index nesting are followed
const MAX_NESTING: usize = 3;

/// Upper bound on sitemap documents fetched per domain
const MAX_SITEMAP_DOCUMENTS: usize = 50;

/// Entries read from one sitemap document
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SitemapEntries {
    pub pages: Vec<String>,
    pub nested: Vec<String>,
}

/// Parses sitemap or sitemap-index XML
pub fn parse_sitemap(xml: &[u8]) -> SitemapEntries {
    let mut entries = SitemapEntries::default();

    for entity in SiteMapReader::new(Cursor::new(xml)) {
        match entity {
            SiteMapEntity::Url(url_entry) => {
                if let Some(url) = url_entry.loc.get_url() {
                    entries.pages.push(url.to_string());
                }
            }
            SiteMapEntity::SiteMap(sitemap_entry) => {
                if let Some(url) = sitemap_entry.loc.get_url() {
                    entries.nested.push(url.to_string());
                }
            }
            SiteMapEntity::Err(e) => debug!("Skipping malformed sitemap entry: {:?}", e),
        }
    }

    entries
}

/// Candidate sitemap locations, probed in order
pub fn sitemap_locations(domain: &str) -> [String; 4] {
    [
        format!("https://{}/sitemap.xml", domain),
        format!("https://{}/sitemap_index.xml", domain),
        format!("https://{}/sitemaps.xml", domain),
        format!("http://{}/sitemap.xml", domain),
    ]
}

/// Process-wide cache of sitemap results keyed by domain
pub struct SitemapIndex {
    client: Client,
    domains: DashMap<String, Arc<OnceCell<Vec<String>>>>,
}

impl SitemapIndex {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            domains: DashMap::new(),
        }
    }

    /// Same-domain page URLs listed in `domain`'s sitemap
    ///
    /// The first call for a domain does the network work; later calls (from
    /// any department) return the cached list. An absent or unreadable
    /// sitemap yields an empty list, which is cached too.
    pub async fn urls_for(&self, domain: &str) -> Vec<String> {
        let cell = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_init(|| self.collect(domain)).await.clone()
    }

    async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        match self.client.get(url).send().await {
            Ok(response) if response.status().as_u16() == 200 => {
                response.bytes().await.ok().map(|b| b.to_vec())
            }
            Ok(response) => {
                debug!("Sitemap {} returned HTTP {}", url, response.status());
                None
            }
            Err(e) => {
                debug!("Could not fetch sitemap {}: {}", url, e);
                None
            }
        }
    }

    async fn collect(&self, domain: &str) -> Vec<String> {
        let mut root = None;
        for location in sitemap_locations(domain) {
            debug!("Checking sitemap: {}", location);
            if let Some(body) = self.fetch(&location).await {
                root = Some((location, body));
                break;
            }
        }

        let Some((root_url, root_body)) = root else {
            debug!("No sitemap found for {}", domain);
            return Vec::new();
        };

        let mut pages = Vec::new();
        let mut seen_pages = HashSet::new();
        let mut seen_docs = HashSet::from([root_url.clone()]);
        let mut pending: VecDeque<(Vec<u8>, usize)> = VecDeque::from([(root_body, 0)]);
        let mut fetched = 1;

        while let Some((body, depth)) = pending.pop_front() {
            let entries = parse_sitemap(&body);

            for page in entries.pages {
                if domain_of(&page).as_deref() == Some(domain) && seen_pages.insert(page.clone())
                {
                    pages.push(page);
                }
            }

            if depth >= MAX_NESTING {
                continue;
            }

            for nested in entries.nested {
                if fetched >= MAX_SITEMAP_DOCUMENTS || !seen_docs.insert(nested.clone()) {
                    continue;
                }
                fetched += 1;
                if let Some(nested_body) = self.fetch(&nested).await {
                    pending.push_back((nested_body, depth + 1));
                }
            }
        }

        info!("Found {} URLs in sitemap {}", pages.len(), root_url);
        pages
    }
}
