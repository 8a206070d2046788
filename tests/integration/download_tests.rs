//! Integration tests for the download path
//!
//! These tests drive the storage manager through the download scheduler
//! against wiremock servers.

use govdoc_crawler::config::{ObjectStoreConfig, ObjectStoreKind, StorageConfig};
use govdoc_crawler::crawler::{DownloadScheduler, RetryPolicy};
use govdoc_crawler::{ErrorKind, StorageManager};
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DEPARTMENT: &str = "Labour Department";

fn pdf_body(len: usize) -> Vec<u8> {
    let mut body = b"%PDF-1.7\n".to_vec();
    body.resize(len.saturating_sub(7), b'0');
    body.extend_from_slice(b"\n%%EOF\n");
    body
}

fn storage_config(root: &Path) -> StorageConfig {
    StorageConfig {
        local_path: root.display().to_string(),
        ..StorageConfig::default()
    }
}

fn scheduler(storage: Arc<StorageManager>, min_interval: Duration) -> DownloadScheduler {
    DownloadScheduler::new(
        storage,
        5,
        min_interval,
        RetryPolicy::new(3, Duration::from_millis(1)),
    )
}

async fn serve_pdf(server: &MockServer, at: &str, etag: &str, body: Vec<u8>) {
    Mock::given(method("HEAD"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .insert_header("etag", etag),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .insert_header("content-type", "application/pdf"),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_same_domain_downloads_are_spaced() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path_regex(r"^/docs/r\d\.pdf$"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/docs/r\d\.pdf$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body(512)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = Arc::new(StorageManager::new(Client::new(), storage_config(dir.path())));
    let scheduler = scheduler(storage, Duration::from_millis(100));

    let urls: Vec<String> = (1..=5)
        .map(|i| format!("{}/docs/r{}.pdf", server.uri(), i))
        .collect();

    let start = Instant::now();
    let results = scheduler.download_batch(&urls, DEPARTMENT).await;
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.success), "{:?}", results);
    assert!(
        elapsed >= Duration::from_millis(400),
        "five downloads finished in {:?}",
        elapsed
    );
    assert_eq!(scheduler.tracked_domains(), 1);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/busy.pdf"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = Arc::new(StorageManager::new(Client::new(), storage_config(dir.path())));
    let scheduler = scheduler(storage, Duration::ZERO);

    let url = format!("{}/busy.pdf", server.uri());
    let result = scheduler.download_with_rate_limit(&url, DEPARTMENT).await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::ServerError));
    assert!(result
        .error
        .as_ref()
        .unwrap()
        .message
        .starts_with("Failed after 3 attempts"));
}

#[tokio::test]
async fn test_recovers_on_third_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/flaky.pdf"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    serve_pdf(&server, "/flaky.pdf", "\"f1\"", pdf_body(400)).await;

    let dir = TempDir::new().unwrap();
    let storage = Arc::new(StorageManager::new(Client::new(), storage_config(dir.path())));
    let scheduler = scheduler(storage, Duration::ZERO);

    let url = format!("{}/flaky.pdf", server.uri());
    let result = scheduler.download_with_rate_limit(&url, DEPARTMENT).await;

    assert!(result.success, "{:?}", result);
    assert_eq!(result.file_size, 400);
    let heads = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.to_string() == "HEAD")
        .count();
    assert_eq!(heads, 3);
}

#[tokio::test]
async fn test_missing_document_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/gone.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = Arc::new(StorageManager::new(Client::new(), storage_config(dir.path())));
    let scheduler = scheduler(storage, Duration::ZERO);

    let url = format!("{}/gone.pdf", server.uri());
    let result = scheduler.download_with_rate_limit(&url, DEPARTMENT).await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::ClientError));
}

#[tokio::test]
async fn test_html_served_as_pdf_is_rejected() {
    let server = MockServer::start().await;
    serve_pdf(
        &server,
        "/fake.pdf",
        "\"x\"",
        b"<html>not a pdf</html>".to_vec(),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let storage = StorageManager::new(Client::new(), storage_config(dir.path()));

    let url = format!("{}/fake.pdf", server.uri());
    let result = storage.fetch_and_store(&url, DEPARTMENT).await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
    assert!(!storage.local_path_for("fake.pdf", DEPARTMENT).exists());
    assert_eq!(storage.registry_stats().total_files, 0);
}

#[tokio::test]
async fn test_non_pdf_content_type_rejected_before_transfer() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body(512)))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let storage = StorageManager::new(Client::new(), storage_config(dir.path()));

    let result = storage
        .fetch_and_store(&format!("{}/download", server.uri()), DEPARTMENT)
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let server = MockServer::start().await;
    serve_pdf(&server, "/huge.pdf", "\"big\"", pdf_body(2 * 1024 * 1024)).await;

    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        max_file_size_mb: 1,
        ..storage_config(dir.path())
    };
    let storage = StorageManager::new(Client::new(), config);

    let result = storage
        .fetch_and_store(&format!("{}/huge.pdf", server.uri()), DEPARTMENT)
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
    assert!(!storage.local_path_for("huge.pdf", DEPARTMENT).exists());
}

#[tokio::test]
async fn test_unchanged_file_skipped_and_changed_file_refetched() {
    let server = MockServer::start().await;
    let url = format!("{}/reports/annual.pdf", server.uri());

    // Initial download plus the next freshness probe see v1; later probes see v2
    Mock::given(method("HEAD"))
        .and(path("/reports/annual.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .insert_header("etag", "\"v1\""),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/reports/annual.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .insert_header("etag", "\"v2\""),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/reports/annual.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body(1024)))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();

    let first = StorageManager::new(Client::new(), storage_config(dir.path()))
        .fetch_incremental(&url, DEPARTMENT, false)
        .await;
    assert!(first.success && !first.skipped, "{:?}", first);
    assert_eq!(first.file_size, 1024);

    // A later run reloads the registry from disk
    let storage = StorageManager::new(Client::new(), storage_config(dir.path()));
    assert_eq!(
        storage.registry().get(&url).unwrap().etag.as_deref(),
        Some("\"v1\"")
    );

    let second = storage.fetch_incremental(&url, DEPARTMENT, false).await;
    assert!(second.success && second.skipped, "{:?}", second);
    assert_eq!(second.file_path, first.file_path);

    let third = storage.fetch_incremental(&url, DEPARTMENT, false).await;
    assert!(third.success && !third.skipped, "{:?}", third);
    assert_eq!(
        storage.registry().get(&url).unwrap().etag.as_deref(),
        Some("\"v2\"")
    );
}

#[tokio::test]
async fn test_force_bypasses_registry() {
    let server = MockServer::start().await;
    serve_pdf(&server, "/notice.pdf", "\"same\"", pdf_body(300)).await;

    let dir = TempDir::new().unwrap();
    let storage = StorageManager::new(Client::new(), storage_config(dir.path()));
    let url = format!("{}/notice.pdf", server.uri());

    assert!(!storage.fetch_incremental(&url, DEPARTMENT, false).await.skipped);
    assert!(storage.fetch_incremental(&url, DEPARTMENT, false).await.skipped);
    assert!(!storage.fetch_incremental(&url, DEPARTMENT, true).await.skipped);
}

#[tokio::test]
async fn test_object_store_only_when_local_disabled() {
    let origin = MockServer::start().await;
    serve_pdf(&origin, "/circular.pdf", "\"c1\"", pdf_body(600)).await;

    let objects = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/gov-pdfs/run1/Labour-Department/circular.pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&objects)
        .await;

    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        local_enabled: false,
        object_store: Some(ObjectStoreConfig {
            kind: ObjectStoreKind::Http,
            endpoint: Some(objects.uri()),
            region: None,
            bucket: "gov-pdfs".to_string(),
            prefix: Some("run1".to_string()),
            token_env: None,
        }),
        ..storage_config(dir.path())
    };
    let storage = StorageManager::new(Client::new(), config);

    let result = storage
        .fetch_and_store(&format!("{}/circular.pdf", origin.uri()), DEPARTMENT)
        .await;

    assert!(result.success, "{:?}", result);
    assert_eq!(
        result.file_path.as_deref(),
        Some(format!("{}/gov-pdfs/run1/Labour-Department/circular.pdf", objects.uri()).as_str())
    );
    assert!(!storage.local_path_for("circular.pdf", DEPARTMENT).exists());
}

#[tokio::test]
async fn test_local_save_also_uploads_in_background() {
    let origin = MockServer::start().await;
    serve_pdf(&origin, "/guide.pdf", "\"g1\"", pdf_body(600)).await;

    let objects = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/gov-pdfs/Labour-Department/guide.pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&objects)
        .await;

    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        object_store: Some(ObjectStoreConfig {
            kind: ObjectStoreKind::Http,
            endpoint: Some(objects.uri()),
            region: None,
            bucket: "gov-pdfs".to_string(),
            prefix: None,
            token_env: None,
        }),
        ..storage_config(dir.path())
    };
    let storage = StorageManager::new(Client::new(), config);

    let result = storage
        .fetch_and_store(&format!("{}/guide.pdf", origin.uri()), DEPARTMENT)
        .await;
    storage.finish_uploads().await;

    assert!(result.success, "{:?}", result);
    let local = storage.local_path_for("guide.pdf", DEPARTMENT);
    assert_eq!(result.file_path.as_deref(), Some(local.display().to_string().as_str()));
    assert_eq!(std::fs::read(&local).unwrap().len(), 600);
}

#[tokio::test]
async fn test_failed_upload_keeps_local_copy() {
    let origin = MockServer::start().await;
    serve_pdf(&origin, "/memo.pdf", "\"m1\"", pdf_body(600)).await;

    let objects = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&objects)
        .await;

    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        object_store: Some(ObjectStoreConfig {
            kind: ObjectStoreKind::Http,
            endpoint: Some(objects.uri()),
            region: None,
            bucket: "gov-pdfs".to_string(),
            prefix: None,
            token_env: None,
        }),
        ..storage_config(dir.path())
    };
    let storage = StorageManager::new(Client::new(), config);

    let result = storage
        .fetch_and_store(&format!("{}/memo.pdf", origin.uri()), DEPARTMENT)
        .await;
    storage.finish_uploads().await;

    assert!(result.success);
    assert!(storage.local_path_for("memo.pdf", DEPARTMENT).exists());
}

#[tokio::test]
async fn test_same_basename_urls_keep_separate_files() {
    let server = MockServer::start().await;
    let english = pdf_body(500);
    let mut chinese = pdf_body(700);
    chinese[20] = b'T';
    serve_pdf(&server, "/en/doc/x.pdf", "\"en\"", english.clone()).await;
    serve_pdf(&server, "/tc/doc/x.pdf", "\"tc\"", chinese.clone()).await;

    let dir = TempDir::new().unwrap();
    let en_url = format!("{}/en/doc/x.pdf", server.uri());
    let tc_url = format!("{}/tc/doc/x.pdf", server.uri());

    let (en, tc) = {
        let storage = StorageManager::new(Client::new(), storage_config(dir.path()));
        let en = storage.fetch_incremental(&en_url, DEPARTMENT, false).await;
        let tc = storage.fetch_incremental(&tc_url, DEPARTMENT, false).await;
        (en, tc)
    };
    assert!(en.success && tc.success);

    let en_path = en.file_path.clone().unwrap();
    let tc_path = tc.file_path.clone().unwrap();
    assert_ne!(en_path, tc_path);
    assert_eq!(std::fs::read(&en_path).unwrap(), english);
    assert_eq!(std::fs::read(&tc_path).unwrap(), chinese);

    let leftovers = std::fs::read_dir(Path::new(&en_path).parent().unwrap())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".part"))
        .count();
    assert_eq!(leftovers, 0);

    // Next run, opposite order: both stay where they were and are current
    let storage = StorageManager::new(Client::new(), storage_config(dir.path()));
    let tc_again = storage.fetch_incremental(&tc_url, DEPARTMENT, false).await;
    let en_again = storage.fetch_incremental(&en_url, DEPARTMENT, false).await;
    assert!(tc_again.skipped && en_again.skipped);
    assert_eq!(tc_again.file_path.as_deref(), Some(tc_path.as_str()));
    assert_eq!(en_again.file_path.as_deref(), Some(en_path.as_str()));
    assert_eq!(std::fs::read(&en_path).unwrap(), english);
    assert_eq!(storage.registry_stats().total_files, 2);
}

#[tokio::test]
async fn test_object_store_only_rerun_skips_unchanged() {
    let origin = MockServer::start().await;
    serve_pdf(&origin, "/circular.pdf", "\"c1\"", pdf_body(600)).await;

    let objects = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/gov-pdfs/Labour-Department/circular.pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&objects)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/gov-pdfs/Labour-Department/circular.pdf"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&objects)
        .await;

    let dir = TempDir::new().unwrap();
    let config = StorageConfig {
        local_enabled: false,
        object_store: Some(ObjectStoreConfig {
            kind: ObjectStoreKind::Http,
            endpoint: Some(objects.uri()),
            region: None,
            bucket: "gov-pdfs".to_string(),
            prefix: None,
            token_env: None,
        }),
        ..storage_config(dir.path())
    };
    let url = format!("{}/circular.pdf", origin.uri());

    let first = StorageManager::new(Client::new(), config.clone())
        .fetch_incremental(&url, DEPARTMENT, false)
        .await;
    assert!(first.success && !first.skipped, "{:?}", first);

    let second = StorageManager::new(Client::new(), config)
        .fetch_incremental(&url, DEPARTMENT, false)
        .await;
    assert!(second.success && second.skipped, "{:?}", second);
    assert_eq!(second.file_path, first.file_path);
}
