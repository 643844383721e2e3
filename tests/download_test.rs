//! Integration tests for the download cache.

use std::sync::Arc;
use std::time::Duration;

use attachment_harvester::config::Config;
use attachment_harvester::download::{DownloadCache, DownloadJob};
use attachment_harvester::queue::{QueueDriver, QueueItem, QueueStatus};
use attachment_harvester::rate_limiter::RateLimiter;
use attachment_harvester::upstream::build_http_client;
use attachment_harvester::Error;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF_BYTES: &[u8] = b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF\n";

fn create_cache(server: &MockServer, dir: &TempDir) -> DownloadCache {
    let config = Config::for_testing().with_upstream(&server.uri());
    let http = build_http_client(&config).expect("Failed to build client");
    let limiter = Arc::new(RateLimiter::new("download", 1, Duration::ZERO));
    DownloadCache::new(dir.path(), http, limiter)
}

fn job(server: &MockServer, file: &str, filename: &str) -> DownloadJob {
    DownloadJob {
        url: format!("{}/data/{file}", server.uri()),
        filename: filename.to_string(),
    }
}

/// Names in `dir`, sorted, hidden files included.
fn dir_entries(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_download_is_idempotent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/data/x/a.pdf"))
        .and(header("sec-fetch-mode", "navigate"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
        .expect(1)
        .mount(&server)
        .await;

    let cache = create_cache(&server, &dir);
    let job = job(&server, "x/a.pdf", "a.pdf");

    let first = cache.fetch(&job).await.unwrap();
    assert!(first.fetched);
    assert_eq!(first.message(), "File downloaded successfully");
    assert_eq!(std::fs::read(dir.path().join("a.pdf")).unwrap(), PDF_BYTES);

    let second = cache.fetch(&job).await.unwrap();
    assert!(!second.fetched);
    assert_eq!(second.message(), "File already exists");
    assert_eq!(second.path, first.path);
}

#[tokio::test]
async fn test_concurrent_requests_fetch_once() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/data/same.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PDF_BYTES)
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = create_cache(&server, &dir);
    let job = job(&server, "same.pdf", "same.pdf");

    let (a, b) = tokio::join!(cache.fetch(&job), cache.fetch(&job));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(u8::from(a.fetched) + u8::from(b.fetched), 1);
    assert_eq!(dir_entries(&dir), ["same.pdf"]);
}

#[tokio::test]
async fn test_traversal_stays_inside_directory() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/data/passwd"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not really"))
        .mount(&server)
        .await;

    let cache = create_cache(&server, &dir);
    let stored = cache
        .fetch(&job(&server, "passwd", "../../etc/passwd"))
        .await
        .unwrap();

    assert_eq!(stored.filename, "passwd");
    assert_eq!(stored.path, dir.path().join("passwd"));
    assert_eq!(dir_entries(&dir), ["passwd"]);
}

#[tokio::test]
async fn test_error_status_leaves_no_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/data/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cache = create_cache(&server, &dir);
    let err = cache
        .fetch(&job(&server, "missing.pdf", "missing.pdf"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpstreamStatus { status, .. } if status.as_u16() == 404));
    assert!(dir_entries(&dir).is_empty());
}

#[tokio::test]
async fn test_unreachable_host_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let server = MockServer::start().await;
    let cache = create_cache(&server, &dir);

    let job = DownloadJob {
        url: "http://127.0.0.1:9/data/a.pdf".to_string(),
        filename: "a.pdf".to_string(),
    };
    let err = cache.fetch(&job).await.unwrap_err();

    assert!(matches!(err, Error::Transport { .. }));
    assert!(dir_entries(&dir).is_empty());
}

/// Serve one response that promises more bytes than it sends, then hang up.
async fn truncating_server(body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len() * 100);
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body).await.unwrap();
        socket.flush().await.unwrap();
    });

    format!("http://{addr}/data/truncated.pdf")
}

#[tokio::test]
async fn test_truncated_body_leaves_no_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache = create_cache(&server, &dir);

    let job = DownloadJob {
        url: truncating_server(PDF_BYTES).await,
        filename: "truncated.pdf".to_string(),
    };
    let err = cache.fetch(&job).await.unwrap_err();

    assert!(matches!(err, Error::Transport { .. }), "unexpected error: {err:?}");
    assert!(dir_entries(&dir).is_empty());

    // A later attempt is not mistaken for a cache hit
    let err = cache.fetch(&job).await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
}

#[tokio::test]
async fn test_dropped_caller_does_not_abort_download() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/data/slow.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PDF_BYTES)
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = create_cache(&server, &dir);
    let job = job(&server, "slow.pdf", "slow.pdf");

    let waited = tokio::time::timeout(Duration::from_millis(50), cache.fetch(&job)).await;
    assert!(waited.is_err(), "download finished before the caller gave up");

    let target = dir.path().join("slow.pdf");
    for _ in 0..40 {
        if target.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(std::fs::read(&target).unwrap(), PDF_BYTES);
    assert_eq!(dir_entries(&dir), ["slow.pdf"]);

    // The finished file now satisfies the next request without a fetch
    let stored = cache.fetch(&job).await.unwrap();
    assert!(!stored.fetched);
}

#[tokio::test]
async fn test_invalid_jobs_make_no_request() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache = create_cache(&server, &dir);

    let no_name = job(&server, "a.pdf", "../");
    assert!(matches!(
        cache.fetch(&no_name).await,
        Err(Error::Validation { field: "filename", .. })
    ));

    let bad_scheme = DownloadJob {
        url: "ftp://example.com/a.pdf".to_string(),
        filename: "a.pdf".to_string(),
    };
    assert!(matches!(
        cache.fetch(&bad_scheme).await,
        Err(Error::Validation { field: "url", .. })
    ));

    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_stored_path() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("kept.pdf"), PDF_BYTES).unwrap();

    let cache = create_cache(&server, &dir);

    assert_eq!(
        cache.stored_path("kept.pdf").await.unwrap(),
        dir.path().join("kept.pdf")
    );
    assert!(matches!(
        cache.stored_path("absent.pdf").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        cache.stored_path("../kept.pdf").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_queue_run_against_cache() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/data/1.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/2.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/3.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PDF_BYTES))
        .mount(&server)
        .await;

    let cache = Arc::new(create_cache(&server, &dir));
    let driver = QueueDriver::new(cache, Duration::ZERO);
    let items = ["1.pdf", "2.pdf", "3.pdf"]
        .into_iter()
        .map(|name| QueueItem {
            name: name.to_string(),
            url: format!("{}/data/{name}", server.uri()),
            post_id: Some("42".to_string()),
            post_title: None,
        })
        .collect();

    let summary = driver.enqueue_all(items).await.unwrap().await.unwrap();

    assert_eq!(summary.status, QueueStatus::Done);
    assert_eq!(summary.succeeded, vec!["1.pdf", "3.pdf"]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].name, "2.pdf");
    assert_eq!(dir_entries(&dir), ["1.pdf", "3.pdf"]);
}
