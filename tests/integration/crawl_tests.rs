//! Integration tests for discovery and department crawls
//!
//! These tests use wiremock to stand in for a government site and run the
//! discovery engine and the coordinator against it end-to-end.

use govdoc_crawler::config::{parse_config, Config, CrawlSettings};
use govdoc_crawler::discovery::{DiscoveryEngine, SitemapIndex};
use govdoc_crawler::robots::PolicyGate;
use govdoc_crawler::url::domain_of;
use govdoc_crawler::Coordinator;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A small but structurally valid PDF body
fn pdf_body(tag: &str) -> Vec<u8> {
    let mut body = format!("%PDF-1.4\n% {}\n", tag).into_bytes();
    body.extend(std::iter::repeat(b'x').take(256));
    body.extend_from_slice(b"\n%%EOF\n");
    body
}

async fn html_page(server: &MockServer, at: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

async fn pdf_document(server: &MockServer, at: &str) {
    Mock::given(method("HEAD"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .insert_header("etag", "\"v1\""),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(pdf_body(at))
                .insert_header("content-type", "application/pdf"),
        )
        .mount(server)
        .await;
}

async fn robots(server: &MockServer, content: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(content))
        .mount(server)
        .await;
}

/// Discovery engine that consults robots.txt for every domain
fn engine(client: &Client) -> DiscoveryEngine {
    let settings = CrawlSettings {
        allow_list: vec![],
        ..CrawlSettings::default()
    };
    DiscoveryEngine::new(
        client.clone(),
        Arc::new(PolicyGate::new(client.clone(), &settings)),
        Arc::new(SitemapIndex::new(client.clone())),
        Duration::ZERO,
    )
}

/// Configuration for one department rooted at `seed`, storing under `dir`
fn site_config(seed: &str, dir: &Path, extra_department_lines: &str) -> Config {
    let toml = format!(
        r#"
[settings]
delay-between-requests = 0.0
max-concurrent-downloads = 4
request-timeout = 5
min-domain-interval-ms = 10
max-retries = 1
allow-list = []

[storage]
local-path = "{downloads}"

[cache]
dir = "{cache}"

[departments.test]
name = "Test Department"
seed-urls = ["{seed}"]
max-depth = 1
{extra}
"#,
        downloads = dir.join("downloads").display(),
        cache = dir.join("cache").display(),
        seed = seed,
        extra = extra_department_lines,
    );
    parse_config(&toml).expect("test config should be valid")
}

/// Index links a relative PDF, an absolute off-site PDF, and a second page
/// holding one more PDF.
async fn two_page_site(server: &MockServer) {
    robots(server, "User-agent: *\nAllow: /").await;
    html_page(
        server,
        "/",
        r#"<html><body>
            <a href="docs/a.pdf">Annual report</a>
            <a href="http://127.0.0.1:1/files/b.pdf">Budget</a>
            <a href="/page2">More publications</a>
        </body></html>"#,
    )
    .await;
    html_page(
        server,
        "/page2",
        r#"<html><body><a href="/docs/c.pdf">Circular</a></body></html>"#,
    )
    .await;
}

#[tokio::test]
async fn test_discover_and_extract_candidates() {
    let server = MockServer::start().await;
    let base = server.uri();
    two_page_site(&server).await;

    let client = Client::new();
    let mut engine = engine(&client);

    let pages = engine.discover(&format!("{}/", base), 1).await;
    assert_eq!(pages, vec![format!("{}/", base), format!("{}/page2", base)]);

    let mut candidates = Vec::new();
    for page in &pages {
        candidates.extend(engine.find_pdf_links(page).await.unwrap());
    }

    assert_eq!(
        candidates,
        vec![
            format!("{}/docs/a.pdf", base),
            "http://127.0.0.1:1/files/b.pdf".to_string(),
            format!("{}/docs/c.pdf", base),
        ]
    );
}

#[tokio::test]
async fn test_robots_disallow_blocks_pages() {
    let server = MockServer::start().await;
    let base = server.uri();

    robots(&server, "User-agent: *\nDisallow: /private/").await;
    html_page(
        &server,
        "/",
        r#"<a href="/private/secret">Secret</a><a href="/public">Public</a>"#,
    )
    .await;
    html_page(&server, "/public", "<p>nothing here</p>").await;
    html_page(&server, "/private/secret", r#"<a href="/x.pdf">x</a>"#).await;

    let client = Client::new();
    let mut engine = engine(&client);
    let pages = engine.discover(&format!("{}/", base), 2).await;

    assert!(pages.contains(&format!("{}/public", base)));
    assert!(!pages.iter().any(|p| p.contains("/private/")));

    let links = engine
        .find_pdf_links(&format!("{}/private/secret", base))
        .await
        .unwrap();
    assert!(links.is_empty());

    let requests = server.received_requests().await.unwrap();
    assert!(!requests.iter().any(|r| r.url.path().starts_with("/private/")));
    assert_eq!(
        requests
            .iter()
            .filter(|r| r.url.path() == "/robots.txt")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_sitemap_follows_index_and_keeps_same_domain() {
    let server = MockServer::start().await;
    let base = server.uri();
    let domain = domain_of(&base).unwrap();

    html_page(
        &server,
        "/sitemap.xml",
        &format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{}/pages.xml</loc></sitemap>
</sitemapindex>"#,
            base
        ),
    )
    .await;
    html_page(
        &server,
        "/pages.xml",
        &format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/publications</loc></url>
  <url><loc>https://elsewhere.invalid/page</loc></url>
  <url><loc>{base}/notices</loc></url>
</urlset>"#,
            base = base
        ),
    )
    .await;

    let sitemaps = SitemapIndex::new(Client::new());
    let urls = sitemaps.urls_for(&domain).await;
    assert_eq!(
        urls,
        vec![format!("{}/publications", base), format!("{}/notices", base)]
    );

    // Second lookup is served from memory
    let before = server.received_requests().await.unwrap().len();
    assert_eq!(sitemaps.urls_for(&domain).await, urls);
    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

#[tokio::test]
async fn test_department_crawl_downloads_new_pdfs() {
    let server = MockServer::start().await;
    let base = server.uri();
    two_page_site(&server).await;
    pdf_document(&server, "/docs/a.pdf").await;
    pdf_document(&server, "/docs/c.pdf").await;

    let dir = TempDir::new().unwrap();
    let config = site_config(&format!("{}/", base), dir.path(), "");
    let dept = config.departments["test"].clone();

    let coordinator = Coordinator::new(config, false).unwrap();
    let results = coordinator.crawl_department("test", &dept).await;

    assert_eq!(results.department, "Test Department");
    assert_eq!(results.urls_crawled, 2);
    // a.pdf, c.pdf, and the off-site b.pdf whose host refuses connections
    assert_eq!(results.pdfs_found, 3);
    assert_eq!(results.pdfs_downloaded, 2);
    assert_eq!(results.pdfs_failed, 1);
    assert_eq!(results.pdfs_skipped, 0);
    assert!(results.total_size > 0);

    let storage = coordinator.storage();
    for name in ["a.pdf", "c.pdf"] {
        let stored = storage.local_path_for(name, "Test Department");
        let bytes = std::fs::read(&stored).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }
    assert_eq!(storage.registry_stats().total_files, 2);

    let cache = coordinator.cache();
    let entry = cache.pdf_entry(&format!("{}/docs/c.pdf", base)).unwrap();
    assert_eq!(entry.source_page, format!("{}/page2", base));
    assert!(cache.page_entry(&format!("{}/", base)).is_some());
}

#[tokio::test]
async fn test_second_run_finds_nothing_new() {
    let server = MockServer::start().await;
    let base = server.uri();
    robots(&server, "User-agent: *\nAllow: /").await;
    html_page(&server, "/", r#"<a href="/docs/a.pdf">Report</a>"#).await;
    pdf_document(&server, "/docs/a.pdf").await;

    let dir = TempDir::new().unwrap();

    let first = {
        let config = site_config(&format!("{}/", base), dir.path(), "");
        let dept = config.departments["test"].clone();
        Coordinator::new(config, false)
            .unwrap()
            .crawl_department("test", &dept)
            .await
    };
    assert_eq!(first.pdfs_found, 1);
    assert_eq!(first.pdfs_downloaded, 1);

    // Fresh process, same state directories
    let config = site_config(&format!("{}/", base), dir.path(), "");
    let dept = config.departments["test"].clone();
    let second = Coordinator::new(config, false)
        .unwrap()
        .crawl_department("test", &dept)
        .await;

    assert_eq!(second.pdfs_found, 0);
    assert_eq!(second.pdfs_downloaded, 0);
    assert_eq!(second.urls_crawled, 0);
}

#[tokio::test]
async fn test_stale_pages_rescanned_but_known_pdfs_not_refetched() {
    let server = MockServer::start().await;
    let base = server.uri();
    robots(&server, "User-agent: *\nAllow: /").await;
    html_page(&server, "/", r#"<a href="/docs/a.pdf">Report</a>"#).await;
    pdf_document(&server, "/docs/a.pdf").await;

    let dir = TempDir::new().unwrap();
    let mut config = site_config(&format!("{}/", base), dir.path(), "");
    config.settings.cache_max_age_hours = 0;
    let dept = config.departments["test"].clone();

    let coordinator = Coordinator::new(config, false).unwrap();
    let first = coordinator.crawl_department("test", &dept).await;
    assert_eq!(first.pdfs_downloaded, 1);

    let second = coordinator.crawl_department("test", &dept).await;
    assert!(second.urls_crawled > 0);
    assert_eq!(second.pdfs_found, 0);

    let pdf_gets = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.to_string() == "GET" && r.url.path() == "/docs/a.pdf")
        .count();
    assert_eq!(pdf_gets, 1);
}

#[tokio::test]
async fn test_document_types_filter_candidates() {
    let server = MockServer::start().await;
    let base = server.uri();
    robots(&server, "User-agent: *\nAllow: /").await;
    html_page(
        &server,
        "/",
        r#"<a href="/docs/annual-report-2023.pdf">A</a><a href="/docs/menu.pdf">B</a>"#,
    )
    .await;
    pdf_document(&server, "/docs/annual-report-2023.pdf").await;
    pdf_document(&server, "/docs/menu.pdf").await;

    let dir = TempDir::new().unwrap();
    let config = site_config(
        &format!("{}/", base),
        dir.path(),
        r#"document-types = ["report"]"#,
    );
    let dept = config.departments["test"].clone();

    let coordinator = Coordinator::new(config, false).unwrap();
    let results = coordinator.crawl_department("test", &dept).await;

    assert_eq!(results.pdfs_found, 1);
    assert_eq!(results.pdfs_downloaded, 1);
    assert!(!coordinator
        .cache()
        .is_pdf_cached(&format!("{}/docs/menu.pdf", base)));
}

#[tokio::test]
async fn test_failed_seeds_recorded_not_fatal() {
    let server = MockServer::start().await;
    let base = server.uri();
    robots(&server, "User-agent: *\nAllow: /").await;

    let dir = TempDir::new().unwrap();
    let mut config = site_config(&format!("{}/missing", base), dir.path(), "");
    config
        .departments
        .get_mut("test")
        .unwrap()
        .seed_urls
        .push("http://127.0.0.1:1/".to_string());

    let coordinator = Coordinator::new(config, false).unwrap();
    let results = coordinator.crawl(&[]).await;

    assert_eq!(results.departments.len(), 1);
    let dept = &results.departments[0];
    assert_eq!(dept.pdfs_found, 0);
    assert_eq!(dept.pdfs_downloaded, 0);
    assert_eq!(results.success_rate, 0.0);

    assert_eq!(dept.errors.len(), 2, "{:?}", dept.errors);
    assert!(dept.errors[0].contains(&format!("{}/missing", base)));
    assert!(dept.errors[0].contains("404"));
    assert!(dept.errors[1].contains("127.0.0.1:1"));

    // A failed seed is not remembered as crawled
    assert!(coordinator
        .cache()
        .page_entry(&format!("{}/missing", base))
        .is_none());
}

#[tokio::test]
async fn test_crawl_filters_departments() {
    let dir = TempDir::new().unwrap();
    let config = site_config("http://127.0.0.1:9/", dir.path(), "");
    let coordinator = Coordinator::new(config, false).unwrap();

    let results = coordinator.crawl(&["no-such-department".to_string()]).await;
    assert!(results.departments.is_empty());
    assert_eq!(results.total_pdfs_found, 0);

    assert_eq!(coordinator.selected_departments(&["Test Department".to_string()]).len(), 1);
    assert_eq!(coordinator.selected_departments(&["test".to_string()]).len(), 1);
}

#[tokio::test]
async fn test_dry_run_reports_without_downloading() {
    let server = MockServer::start().await;
    let base = server.uri();
    two_page_site(&server).await;

    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = site_config(&format!("{}/", base), dir.path(), "");
    config
        .departments
        .get_mut("test")
        .unwrap()
        .seed_urls
        .push(format!("{}/limited", base));

    let coordinator = Coordinator::new(config, false).unwrap();
    let report = coordinator.dry_run(&[]).await;

    assert_eq!(report.department_analyses.len(), 1);
    let analysis = &report.department_analyses[0];
    assert_eq!(analysis.seed_urls_total, 2);
    assert_eq!(analysis.seed_urls_accessible, 1);
    assert_eq!(analysis.estimated_pdfs, 2);
    assert!(analysis.rate_limit_detected);
    assert_eq!(report.total_estimated_pdfs, 2);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("Increase delays")));

    let requests = server.received_requests().await.unwrap();
    assert!(!requests.iter().any(|r| r.url.path().ends_with(".pdf")));
    assert!(!dir.path().join("downloads").join("Test-Department").exists());
}
