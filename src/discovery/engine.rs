use crate::crawler::{fetch_page, parse_html, FetchedPage, FormSpec};
use crate::discovery::heuristics::{
    dedup_preserving_order, extract_archive_links, extract_pdf_links, find_search_input,
    has_pdf_extension,
};
use crate::discovery::{BrowserAutomation, SitemapIndex};
use crate::robots::PolicyGate;
use crate::url::{extract_domain, normalize_url, same_domain};
use crate::{CrawlError, Result};
use reqwest::Client;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Search terms submitted per search form
const MAX_SEARCH_TERMS: usize = 3;

/// Everything [`DiscoveryEngine::discover_comprehensive`] found for one seed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComprehensiveDiscovery {
    /// Pages to scan for PDF links: crawled, sitemap, then archive pages
    pub pages: Vec<String>,
    /// PDF candidates returned by on-site search forms
    pub pdf_candidates: Vec<String>,
    /// Why the seed page itself could not be crawled, if it could not
    pub seed_error: Option<String>,
}

impl ComprehensiveDiscovery {
    /// Ordered, de-duplicated union of pages and search candidates
    pub fn urls(&self) -> Vec<String> {
        dedup_preserving_order(
            self.pages
                .iter()
                .chain(self.pdf_candidates.iter())
                .cloned(),
        )
    }
}

/// Discovers pages and PDF candidates reachable from seed URLs
///
/// One engine serves one department at a time. Its visited set is private
/// to it; the policy gate and the sitemap index are shared process-wide.
pub struct DiscoveryEngine {
    client: Client,
    gate: Arc<PolicyGate>,
    sitemaps: Arc<SitemapIndex>,
    browser: Option<Arc<dyn BrowserAutomation>>,
    page_delay: Duration,
    deadline: Option<Instant>,
    visited: HashSet<String>,
}

impl DiscoveryEngine {
    pub fn new(
        client: Client,
        gate: Arc<PolicyGate>,
        sitemaps: Arc<SitemapIndex>,
        page_delay: Duration,
    ) -> Self {
        Self {
            client,
            gate,
            sitemaps,
            browser: None,
            page_delay,
            deadline: None,
            visited: HashSet::new(),
        }
    }

    /// Attaches the fallback used when a page yields no PDF links
    pub fn with_browser(mut self, browser: Arc<dyn BrowserAutomation>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Stops breadth-first traversal once `deadline` passes
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Forgets every visited page; called at the start of each department
    pub fn reset_visited(&mut self) {
        self.visited.clear();
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    fn past_deadline(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    async fn permitted(&self, url: &Url) -> bool {
        match extract_domain(url) {
            Some(domain) => self.gate.allowed(&domain, url.as_str()).await,
            None => false,
        }
    }

    /// Breadth-first crawl from `seed`, bounded by `max_depth`
    ///
    /// Only same-domain links are traversed and links to `.pdf` paths are
    /// never enqueued. Pages disallowed by the policy gate are skipped
    /// silently; pages that fail to fetch are logged and omitted.
    ///
    /// # Returns
    ///
    /// The pages fetched successfully, in the order they were crawled
    pub async fn discover(&mut self, seed: &str, max_depth: u32) -> Vec<String> {
        match self.try_discover(seed, max_depth).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!("Error crawling seed {}: {}", seed, e);
                Vec::new()
            }
        }
    }

    /// Like [`Self::discover`], but an invalid seed or a seed page that
    /// cannot be fetched is an error
    ///
    /// Failures below the seed are still logged and omitted.
    pub async fn try_discover(&mut self, seed: &str, max_depth: u32) -> Result<Vec<String>> {
        let seed_url = Url::parse(seed)?;

        let mut crawled = Vec::new();
        let mut enqueued = HashSet::from([visit_key(&seed_url)]);
        let mut queue = VecDeque::from([(seed_url.clone(), 0u32)]);
        let mut fetched_any = false;

        while let Some((url, depth)) = queue.pop_front() {
            if self.past_deadline() {
                info!("Time limit reached during discovery from {}", seed);
                break;
            }

            if depth > max_depth || !self.visited.insert(visit_key(&url)) {
                continue;
            }

            if !self.permitted(&url).await {
                debug!("Skipping disallowed page {}", url);
                continue;
            }

            if fetched_any && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
            fetched_any = true;

            let page = match fetch_page(&self.client, url.as_str()).await {
                Ok(page) => page,
                Err(e) if depth == 0 => return Err(e),
                Err(e) => {
                    warn!("Error crawling {}: {}", url, e);
                    continue;
                }
            };

            crawled.push(url.to_string());

            if depth == max_depth {
                continue;
            }

            for link in parse_html(&page.body).links(&page.final_url) {
                if !same_domain(&link, &seed_url) || has_pdf_extension(&link) {
                    continue;
                }
                let key = visit_key(&link);
                if self.visited.contains(&key) || !enqueued.insert(key) {
                    continue;
                }
                queue.push_back((link, depth + 1));
            }
        }

        info!("Discovered {} pages from {}", crawled.len(), seed);
        Ok(crawled)
    }

    /// Fetches one page and extracts its PDF candidates
    ///
    /// A page the policy gate disallows yields an empty list; a page that
    /// cannot be fetched is an error.
    pub async fn find_pdf_links(&self, url: &str) -> Result<Vec<String>> {
        let parsed_url = Url::parse(url)?;
        if !self.permitted(&parsed_url).await {
            debug!("Not scanning disallowed page {}", url);
            return Ok(Vec::new());
        }

        let page = fetch_page(&self.client, url).await?;
        Ok(self.pdf_links_in(&page))
    }

    /// PDF candidates on a page that has already been fetched
    pub fn pdf_links_in(&self, page: &FetchedPage) -> Vec<String> {
        let links = extract_pdf_links(&parse_html(&page.body), &page.final_url);
        info!("Found {} PDF links on {}", links.len(), page.final_url);
        links
    }

    /// Like [`Self::find_pdf_links`], falling back to browser automation
    /// when the page yields nothing
    pub async fn find_pdf_links_with_fallback(&self, url: &str) -> Result<Vec<String>> {
        let links = self.find_pdf_links(url).await?;
        if !links.is_empty() {
            return Ok(links);
        }

        let Some(browser) = &self.browser else {
            return Ok(links);
        };

        debug!("Trying browser automation for {}", url);
        match browser.reveal_pdf_links(url).await {
            Ok(revealed) => {
                if !revealed.is_empty() {
                    info!("Browser automation found {} PDF links on {}", revealed.len(), url);
                }
                Ok(dedup_preserving_order(revealed))
            }
            Err(e) => {
                warn!("Browser automation failed for {}: {}", url, e);
                Ok(Vec::new())
            }
        }
    }

    /// Same-domain page URLs from `domain`'s sitemap
    pub async fn discover_from_sitemap(&self, domain: &str) -> Vec<String> {
        self.sitemaps.urls_for(domain).await
    }

    /// Same-domain links on `base_url` that look like archive or
    /// year-indexed sections
    pub async fn discover_archive_sections(&self, base_url: &str) -> Vec<String> {
        let page = match self.fetch_permitted(base_url).await {
            Ok(Some(page)) => page,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Error discovering archive sections from {}: {}", base_url, e);
                return Vec::new();
            }
        };

        let links = extract_archive_links(&parse_html(&page.body), &page.final_url);
        debug!("Found {} archive sections on {}", links.len(), base_url);
        links
    }

    /// Submits on-site search forms and collects PDF candidates from results
    ///
    /// At most three terms are tried per search form. Every failure is
    /// logged at debug level and otherwise ignored.
    pub async fn search_for_pdfs(&self, base_url: &str, terms: &[&str]) -> Vec<String> {
        let page = match self.fetch_permitted(base_url).await {
            Ok(Some(page)) => page,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!("Search discovery could not load {}: {}", base_url, e);
                return Vec::new();
            }
        };

        let forms = parse_html(&page.body).forms;
        let mut found = Vec::new();
        let mut submitted = 0usize;

        for form in &forms {
            let Some(field) = find_search_input(form).and_then(|i| i.name.clone()) else {
                continue;
            };

            for term in terms.iter().take(MAX_SEARCH_TERMS) {
                if submitted > 0 && !self.page_delay.is_zero() {
                    tokio::time::sleep(self.page_delay).await;
                }
                submitted += 1;

                match self.submit_search(form, &field, term, &page.final_url).await {
                    Ok(links) => found.extend(links),
                    Err(e) => debug!("Search failed for term '{}': {}", term, e),
                }
            }
        }

        let found = dedup_preserving_order(found);
        if !found.is_empty() {
            info!("Search forms on {} yielded {} PDF candidates", base_url, found.len());
        }
        found
    }

    /// Runs every discovery strategy for one seed
    pub async fn discover_comprehensive(
        &mut self,
        seed: &str,
        max_depth: u32,
    ) -> ComprehensiveDiscovery {
        let domain = Url::parse(seed).ok().as_ref().and_then(extract_domain);

        info!("Starting regular URL discovery for {}", seed);
        let (mut pages, seed_error) = match self.try_discover(seed, max_depth).await {
            Ok(pages) => (pages, None),
            Err(e) => {
                warn!("Error crawling seed {}: {}", seed, e);
                (Vec::new(), Some(e.to_string()))
            }
        };

        if let Some(domain) = &domain {
            debug!("Checking sitemaps for {}", domain);
            pages.extend(self.discover_from_sitemap(domain).await);
        }

        // Archive and search discovery both start from the seed page
        let mut pdf_candidates = Vec::new();
        if seed_error.is_none() {
            debug!("Discovering archive sections for {}", seed);
            pages.extend(self.discover_archive_sections(seed).await);

            pdf_candidates = self
                .search_for_pdfs(seed, crate::discovery::DEFAULT_SEARCH_TERMS)
                .await;
        }

        let discovery = ComprehensiveDiscovery {
            pages: dedup_preserving_order(pages),
            pdf_candidates,
            seed_error,
        };

        info!(
            "Comprehensive discovery found {} pages and {} search candidates for {}",
            discovery.pages.len(),
            discovery.pdf_candidates.len(),
            seed
        );
        discovery
    }

    async fn fetch_permitted(&self, url: &str) -> Result<Option<FetchedPage>> {
        let parsed = Url::parse(url)?;
        if !self.permitted(&parsed).await {
            return Ok(None);
        }
        fetch_page(&self.client, url).await.map(Some)
    }

    async fn submit_search(
        &self,
        form: &FormSpec,
        field: &str,
        term: &str,
        base_url: &Url,
    ) -> Result<Vec<String>> {
        let action = match &form.action {
            Some(action) => base_url.join(action)?,
            None => base_url.clone(),
        };

        let mut data: Vec<(String, String)> = form
            .hidden
            .iter()
            .filter(|(name, _)| name != field)
            .cloned()
            .collect();
        data.push((field.to_string(), term.to_string()));

        let request = if form.method == "post" {
            self.client.post(action.as_str()).form(&data)
        } else {
            self.client.get(action.as_str()).query(&data)
        };

        let response = request
            .send()
            .await
            .map_err(|e| CrawlError::from_reqwest(action.as_str(), e))?;

        if !response.status().is_success() {
            return Err(CrawlError::Status {
                url: action.to_string(),
                status: response.status().as_u16(),
            });
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::from_reqwest(action.as_str(), e))?;

        Ok(extract_pdf_links(&parse_html(&body), &final_url))
    }
}

fn visit_key(url: &Url) -> String {
    normalize_url(url.as_str())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}
