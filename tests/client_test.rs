//! Integration tests for the harvester API client.

use std::sync::Arc;
use std::time::Duration;

use attachment_harvester::client::ApiClient;
use attachment_harvester::queue::{QueueDriver, QueueItem, QueueStatus};
use attachment_harvester::Error;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn post(id: u32) -> serde_json::Value {
    json!({"id": id.to_string(), "title": format!("Post {id}"), "published_at": null})
}

#[tokio::test]
async fn test_all_posts_stops_at_empty_page() {
    let server = MockServer::start().await;

    for (offset, ids) in [("0", vec![1, 2]), ("2", vec![3, 4]), ("4", vec![5])] {
        Mock::given(method("GET"))
            .and(path("/api/posts"))
            .and(query_param("offset", offset))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ids.into_iter().map(post).collect::<Vec<_>>()),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .and(query_param("offset", "6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let posts = client.all_posts(2).await.unwrap();

    let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn test_server_error_message_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "Failed to fetch posts"})),
        )
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let err = client.posts(0).await.unwrap_err();

    match err {
        Error::Server { status, message } => {
            assert_eq!(status.as_u16(), 500);
            assert_eq!(message, "Failed to fetch posts");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_scan_isolates_failing_post() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/post/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "1",
            "title": "One",
            "content": "",
            "files": [{"name": "one.pdf", "url": "https://example.com/one.pdf"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/post/2"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({"error": "Failed to fetch post details"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/post/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "3",
            "title": "Three",
            "content": "",
            "files": [
                {"name": "three-a.pdf", "url": "https://example.com/3a.pdf"},
                {"name": "three-b.pdf", "url": "https://example.com/3b.pdf"}
            ]
        })))
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let report = client.scan(["1", "2", "3"]).await;

    let names: Vec<&str> = report.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["one.pdf", "three-a.pdf", "three-b.pdf"]);
    assert_eq!(report.files[1].post_id.as_deref(), Some("3"));
    assert_eq!(report.files[1].post_title.as_deref(), Some("Three"));

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "2");
    assert!(report.failures[0].error.contains("Failed to fetch post details"));
}

#[tokio::test]
async fn test_queue_drives_remote_downloads() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/download"))
        .and(body_json(json!({"url": "https://example.com/a.pdf", "filename": "a.pdf"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "File downloaded successfully",
            "path": "a.pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/download"))
        .and(body_json(json!({"url": "https://example.com/b.pdf", "filename": "b.pdf"})))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"error": "Failed to download file"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&server.uri()).unwrap();
    let items = ["a.pdf", "b.pdf"]
        .into_iter()
        .map(|name| QueueItem {
            name: name.to_string(),
            url: format!("https://example.com/{name}"),
            post_id: None,
            post_title: None,
        })
        .collect();

    let driver = QueueDriver::new(Arc::new(client), Duration::from_millis(10));
    let summary = driver
        .enqueue_all(items)
        .await
        .unwrap()
        .await
        .unwrap();

    assert_eq!(summary.status, QueueStatus::Done);
    assert_eq!(summary.succeeded, vec!["a.pdf"]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].name, "b.pdf");
}

#[tokio::test]
async fn test_rejects_malformed_post_id() {
    let server = MockServer::start().await;
    let client = ApiClient::new(&server.uri()).unwrap();

    let err = client.post_detail("1/../../etc").await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
