use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`

use crowdcount::api::{AppState, router};
use crowdcount::client::{ApiClient, ClientError};
use crowdcount::config::{ByteSize, Config};
use crowdcount::detector::{BoundingBox, Detection, Detector, DetectorError};
use crowdcount::fetch::{self, FetchError, ImageFetcher};
use crowdcount::observability::Metrics;
use crowdcount::queue::Broker;
use crowdcount::storage::ObjectResultStore;
use crowdcount::task::TaskEnvelope;
use image::{DynamicImage, ImageFormat};
use std::time::Duration;

/// Every URL is reachable unless its path mentions "missing"
struct StubFetcher;

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn probe(&self, url: &str) -> fetch::Result<()> {
        if url.contains("missing") {
            return Err(FetchError::Status {
                status: 404,
                reason: "Not Found".to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(&self, _url: &str) -> fetch::Result<Bytes> {
        Ok(Bytes::from(png_bytes()))
    }
}

struct StubDetector;

#[async_trait]
impl Detector for StubDetector {
    async fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, DetectorError> {
        let bbox = BoundingBox {
            x0: 0.1,
            y0: 0.1,
            x1: 0.5,
            y1: 0.9,
        };
        Ok(vec![
            Detection { class_index: 15, confidence: 0.5, bbox },
            Detection { class_index: 2, confidence: 0.9, bbox },
            Detection { class_index: 15, confidence: 0.2, bbox },
        ])
    }
}

fn png_bytes() -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    DynamicImage::new_rgb8(24, 24)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

/// Creates a config with small limits so they are easy to exceed in tests
fn create_test_config() -> Config {
    let config_toml = r#"
[server]
max_body_bytes = "64KB"
max_urls_per_submission = 3

[storage]
provider = "memory"
    "#;

    toml::from_str(config_toml).expect("Failed to parse test config")
}

struct TestApp {
    app: Router,
    broker: Arc<Broker>,
    _dir: TempDir,
}

/// Builds a test app with isolated dependencies
fn build_test_app() -> TestApp {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let broker = Arc::new(
        Broker::open(dir.path().join("queue"), "person_detection")
            .expect("Failed to open test broker"),
    );

    let state = AppState::new(
        create_test_config(),
        broker.clone(),
        Arc::new(StubFetcher),
        Arc::new(StubDetector),
        Arc::new(ObjectResultStore::in_memory()),
        Arc::new(Metrics::new()),
    );

    TestApp {
        app: router(state),
        broker,
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn json_submission(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/submissions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_json_submission_isolates_unreachable_url() {
    let test = build_test_app();

    let (status, body) = send(
        &test.app,
        json_submission(json!({
            "urls": [
                "http://example.com/a.png",
                "http://example.com/missing.png",
                "example.com/c.jpg"
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 2);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["status"], "accepted");
    assert_eq!(results[1]["status"], "rejected");
    assert_eq!(results[1]["code"], "UNREACHABLE");
    assert_eq!(results[2]["status"], "accepted");
    assert_eq!(results[2]["url"], "http://example.com/c.jpg");

    assert_eq!(test.broker.stats().unwrap().ready, 2);
}

#[tokio::test]
async fn test_text_submission_normalizes_url() {
    let test = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/submissions")
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("  example.com/pic.JPG\n"))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["results"][0]["url"], "http://example.com/pic.JPG");

    let task_id = body["results"][0]["task_id"].as_str().unwrap().to_string();

    let consumer = test.broker.consume(1);
    let delivery = consumer.next().await.unwrap().unwrap();
    let envelope = TaskEnvelope::decode(delivery.body()).unwrap();
    assert_eq!(envelope.task_id, task_id);
    assert_eq!(envelope.source_url, "http://example.com/pic.JPG");
    assert_eq!(envelope.file_extension, "JPG");
    delivery.ack().unwrap();
}

#[tokio::test]
async fn test_malformed_url_is_rejected_not_published() {
    let test = build_test_app();

    let (status, body) = send(
        &test.app,
        json_submission(json!({"urls": ["ftp://example.com/a.png"]})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 0);
    assert_eq!(body["results"][0]["code"], "UNSUPPORTED_SCHEME");
    assert_eq!(test.broker.stats().unwrap().ready, 0);
}

#[tokio::test]
async fn test_empty_submission() {
    let test = build_test_app();

    let (status, body) = send(&test.app, json_submission(json!({"urls": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_too_many_urls() {
    let test = build_test_app();

    let urls: Vec<String> = (0..4).map(|i| format!("http://example.com/{i}.png")).collect();
    let (status, body) = send(&test.app, json_submission(json!({ "urls": urls }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("limit is 3"));
    assert_eq!(test.broker.stats().unwrap().ready, 0);
}

#[tokio::test]
async fn test_invalid_json() {
    let test = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/submissions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"urls\": "))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_unsupported_content_type() {
    let test = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/submissions")
        .header(header::CONTENT_TYPE, "text/html")
        .body(Body::from("<a href=\"x\">x</a>"))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn test_submission_body_too_large() {
    let test = build_test_app();
    let limit: ByteSize = "64KB".parse().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/submissions")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("a".repeat(limit.as_u64() as usize + 1)))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn test_direct_detection_upload() {
    let test = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/detections")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(png_bytes()))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["people"], 1);

    let output = body["output_path"].as_str().unwrap();
    assert!(output.starts_with("marked/marked_"));
    assert!(output.ends_with(".png"));

    // Direct uploads bypass the queue
    assert_eq!(test.broker.stats().unwrap().ready, 0);
}

#[tokio::test]
async fn test_direct_detection_rejects_undecodable_image() {
    let test = build_test_app();

    let request = Request::builder()
        .method("POST")
        .uri("/detections")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from("definitely not a png"))
        .unwrap();

    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "UNDECODABLE_IMAGE");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let test = build_test_app();

    send(
        &test.app,
        json_submission(json!({"urls": ["http://example.com/a.png", "http://example.com/missing.png"]})),
    )
    .await;

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue"]["queue"], "person_detection");
    assert_eq!(body["queue"]["ready"], 1);

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["submissions_accepted"], 1);
    assert_eq!(body["submissions_rejected"], 1);
}

#[tokio::test]
async fn test_health_after_broker_closed() {
    let test = build_test_app();
    test.broker.close().unwrap();

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_dead_letters_endpoint() {
    let test = build_test_app();

    test.broker.publish(b"{not json").unwrap();
    let consumer = test.broker.consume(1);
    let delivery = consumer.next().await.unwrap().unwrap();
    delivery
        .record_dead_letter("POISON_MESSAGE", "expected value")
        .unwrap();
    delivery.ack().unwrap();

    let request = Request::builder()
        .uri("/dead-letters?limit=5")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);

    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["failure_code"], "POISON_MESSAGE");
    assert_eq!(records[0]["body"], "{not json");

    let request = Request::builder()
        .uri("/dead-letters")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_client_submits_through_running_server() {
    let test = build_test_app();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = test.app.clone();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let client = ApiClient::new(&format!("http://{address}"), Duration::from_secs(5)).unwrap();

    let report = client
        .submit(&[
            "example.com/a.png".to_string(),
            "http://example.com/missing.png".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(report["accepted"], 1);
    assert_eq!(report["results"][0]["url"], "http://example.com/a.png");
    assert_eq!(report["results"][1]["code"], "UNREACHABLE");

    // Published by the server's own broker handle
    assert_eq!(test.broker.stats().unwrap().ready, 1);

    let dead = client.dead_letters(10).await.unwrap();
    assert_eq!(dead, json!([]));

    let err = client.submit(&[]).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 400, .. }));
}
