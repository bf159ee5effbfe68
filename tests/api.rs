//! HTTP integration tests.
//!
//! Starts the service on an ephemeral port next to a mock plant health API
//! and exercises both with reqwest.

use std::{
    io::Cursor,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use agro_service_rs::{
    classifier::{ClassificationClient, ClassifierError},
    config::{Config, ScorerCommand},
    router, AppState,
};
use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};

/// Stand-in for the external API. Accepts exactly one key and records every key it sees.
struct MockUpstream {
    accepted_key: String,
    response: Value,
    seen: Mutex<Vec<String>>,
}

impl MockUpstream {
    fn new(accepted_key: &str, response: Value) -> Arc<Self> {
        Arc::new(Self {
            accepted_key: accepted_key.into(),
            response,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

async fn mock_assess(
    State(mock): State<Arc<MockUpstream>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let key = headers
        .get("api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    mock.seen.lock().unwrap().push(key.clone());

    let image = body["images"][0].as_str().unwrap_or_default();
    if !image.starts_with("data:image/jpeg;base64,") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad image" })));
    }
    if key != mock.accepted_key {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid api key" })));
    }
    (StatusCode::OK, Json(mock.response.clone()))
}

/// Bind to port 0 and return the base URL.
async fn serve(app: Router) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

async fn start_upstream(mock: Arc<MockUpstream>) -> String {
    let app = Router::new()
        .route("/v3/health_assessment", post(mock_assess))
        .with_state(mock);
    format!("{}/v3/health_assessment", serve(app).await)
}

async fn start_service(config: Config) -> String {
    let state = Arc::new(AppState::new(config).unwrap());
    serve(router(state)).await
}

fn config(upload_dir: &Path, endpoint: &str, keys: &[&str]) -> Config {
    Config {
        upload_dir: upload_dir.to_path_buf(),
        classifier_endpoint: endpoint.into(),
        classifier_credentials: keys.iter().map(|k| k.to_string()).collect(),
        classifier_timeout: Duration::from_secs(10),
        ..Config::default()
    }
}

fn disease_response(probability: f64) -> Value {
    json!({
        "result": {
            "is_plant": { "binary": true, "probability": 0.99 },
            "is_healthy": { "binary": false, "probability": 0.04 },
            "disease": { "suggestions": [
                { "id": "a1", "name": "Early blight", "probability": probability }
            ]}
        },
        "status": "COMPLETED"
    })
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let buffer = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, 120, (y % 256) as u8]));
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(buffer)
        .write_to(&mut bytes, ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

fn image_form(bytes: Vec<u8>) -> Form {
    Form::new().part(
        "image",
        Part::bytes(bytes)
            .file_name("leaf.png")
            .mime_str("image/png")
            .unwrap(),
    )
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

fn shell_scorer(script: &str) -> Option<ScorerCommand> {
    Some(ScorerCommand {
        program: "sh".into(),
        args: vec!["-c".into(), script.into(), "scorer".into()],
    })
}

fn soil() -> Value {
    json!({
        "nitrogen": 90,
        "phosphorus": 42,
        "potassium": 43,
        "temperature": 20.8,
        "humidity": 82.0,
        "ph": 6.5,
        "rainfall": 202.9
    })
}

#[tokio::test]
async fn fallback_tries_credentials_in_order_until_one_succeeds() {
    let mock = MockUpstream::new("good", disease_response(0.5));
    let endpoint = start_upstream(mock.clone()).await;
    let client = ClassificationClient::new(
        endpoint,
        vec!["first".into(), "second".into(), "good".into()],
        Duration::from_secs(5),
    )
    .unwrap();

    let body = client.assess(b"jpeg bytes").await.unwrap();

    assert_eq!(body["status"], "COMPLETED");
    assert_eq!(mock.seen(), vec!["first", "second", "good"]);
}

#[tokio::test]
async fn fallback_stops_at_first_success() {
    let mock = MockUpstream::new("good", disease_response(0.5));
    let endpoint = start_upstream(mock.clone()).await;
    let client = ClassificationClient::new(
        endpoint,
        vec!["good".into(), "spare".into()],
        Duration::from_secs(5),
    )
    .unwrap();

    client.assess(b"jpeg bytes").await.unwrap();
    assert_eq!(mock.seen(), vec!["good"]);
}

#[tokio::test]
async fn exhausted_credentials_surface_upstream_error() {
    let mock = MockUpstream::new("nobody-has-this", disease_response(0.5));
    let endpoint = start_upstream(mock.clone()).await;
    let client = ClassificationClient::new(
        endpoint,
        vec!["a".into(), "b".into(), "c".into()],
        Duration::from_secs(5),
    )
    .unwrap();

    match client.assess(b"jpeg bytes").await.unwrap_err() {
        ClassifierError::Upstream { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(last.contains("401"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(mock.seen().len(), 3);
}

#[tokio::test]
async fn large_png_is_diagnosed_stored_and_cleaned_up() {
    let scratch = tempfile::tempdir().unwrap();
    let mock = MockUpstream::new("key-2", disease_response(0.92));
    let endpoint = start_upstream(mock.clone()).await;
    let base = start_service(config(scratch.path(), &endpoint, &["key-1", "key-2"])).await;
    let client = reqwest::Client::new();

    let upload = png(2000, 2000);
    assert!(upload.len() < 10 * 1024 * 1024);

    let resp = client
        .post(format!("{base}/api/detect-disease"))
        .multipart(image_form(upload))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["diseaseName"], "Early blight");
    assert_eq!(body["confidence"], 92);
    assert_eq!(body["treatments"].as_array().unwrap().len(), 5);
    assert_eq!(body["preventionMethods"].as_array().unwrap().len(), 5);
    assert_eq!(mock.seen(), vec!["key-1", "key-2"]);
    assert_eq!(file_count(scratch.path()), 0);

    let id = body["id"].as_u64().unwrap();
    let resp = client
        .get(format!("{base}/api/disease-analysis/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let stored: Value = resp.json().await.unwrap();
    assert_eq!(stored["id"], id);
    assert_eq!(stored["diseaseName"], body["diseaseName"]);
    assert_eq!(stored["confidence"], body["confidence"]);
    assert_eq!(stored["treatments"], body["treatments"]);
    assert!(stored["createdAt"].is_string());
    assert!(stored["imagePath"].as_str().unwrap().ends_with(".jpg"));
}

#[tokio::test]
async fn healthy_plant_is_reported() {
    let scratch = tempfile::tempdir().unwrap();
    let mock = MockUpstream::new(
        "key",
        json!({ "result": { "is_healthy": { "binary": true, "probability": 0.85 } } }),
    );
    let endpoint = start_upstream(mock).await;
    let base = start_service(config(scratch.path(), &endpoint, &["key"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/detect-disease"))
        .multipart(image_form(png(64, 48)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["diseaseName"], "Healthy Plant");
    assert_eq!(body["confidence"], 85);
    assert_eq!(body["id"], 1);
}

#[tokio::test]
async fn upstream_failure_returns_500_and_removes_scratch_files() {
    let scratch = tempfile::tempdir().unwrap();
    let mock = MockUpstream::new("valid", disease_response(0.9));
    let endpoint = start_upstream(mock.clone()).await;
    let base = start_service(config(scratch.path(), &endpoint, &["stale", "revoked"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/detect-disease"))
        .multipart(image_form(png(32, 32)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("clear image"));
    assert!(body["details"].as_str().unwrap().contains("401"));
    assert_eq!(mock.seen().len(), 2);
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn missing_credentials_are_a_configuration_error() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &[])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/detect-disease"))
        .multipart(image_form(png(16, 16)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Plant disease detection is not configured");
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn missing_image_field_is_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &["k"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/detect-disease"))
        .multipart(Form::new().text("note", "no file here"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "No image file uploaded");
}

#[tokio::test]
async fn unsupported_and_corrupt_uploads_are_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &["k"])).await;
    let client = reqwest::Client::new();

    let gif = Form::new().part(
        "image",
        Part::bytes(b"GIF89a....".to_vec())
            .file_name("leaf.gif")
            .mime_str("image/gif")
            .unwrap(),
    );
    let resp = client
        .post(format!("{base}/api/detect-disease"))
        .multipart(gif)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Only JPG and PNG files are allowed");

    let resp = client
        .post(format!("{base}/api/detect-disease"))
        .multipart(image_form(b"\x89PNG but truncated".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn upload_declared_png_must_decode_as_png() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &["k"])).await;

    // 1x1 GIF
    let gif = b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00!\xf9\x04\x01\x00\x00\x00\x00,\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02D\x01\x00;";
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/detect-disease"))
        .multipart(image_form(gif.to_vec()))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["details"].as_str().unwrap().contains("not a decodable image"));
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn uploads_over_the_size_limit_are_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let config = config(scratch.path(), "http://127.0.0.1:9/unused", &["k"]);
    let limit = config.body_limit_bytes;
    assert_eq!(limit, 10 * 1024 * 1024);
    let base = start_service(config).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/detect-disease"))
        .multipart(image_form(vec![0u8; limit + 10]))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["error"],
        format!("Image too large. Max size is {limit} bytes")
    );
    assert_eq!(file_count(scratch.path()), 0);
}

#[tokio::test]
async fn unknown_records_are_404() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &[])).await;
    let client = reqwest::Client::new();

    for path in [
        "/api/disease-analysis/1",
        "/api/disease-analysis/not-a-number",
        "/api/crop-recommendation/99",
    ] {
        let resp = client.get(format!("{base}{path}")).send().await.unwrap();
        assert_eq!(resp.status(), 404, "{path}");
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().ends_with("not found"));
    }
}

#[tokio::test]
async fn crop_recommendation_is_scored_and_stored() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(Config {
        scorer: shell_scorer(
            r#"echo '{"success": true, "predicted_crop": "rice", "confidence": 0.87, "top_predictions": [["rice", 0.87], ["jute", 0.08], ["coffee", 0.02]], "crop_info": {"description": "Rice is a staple food crop.", "climate": "Tropical"}, "feature_importance": [["rainfall", 0.23], ["humidity", 0.21]]}'"#,
        ),
        ..config(scratch.path(), "http://127.0.0.1:9/unused", &[])
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/crop-recommendations"))
        .json(&soil())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], 1);
    assert_eq!(body["predicted_crop"], "rice");
    assert_eq!(body["confidence"], 0.87);
    assert_eq!(body["top_predictions"][1], json!(["jute", 0.08]));
    assert_eq!(body["feature_importance"][0], json!(["rainfall", 0.23]));
    assert_eq!(body["crop_info"]["climate"], "Tropical");

    let resp = client
        .get(format!("{base}/api/crop-recommendation/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let stored: Value = resp.json().await.unwrap();
    assert_eq!(stored["nitrogen"], 90.0);
    assert_eq!(stored["ph"], 6.5);
    assert_eq!(stored["predicted_crop"], "rice");
    assert!(stored["createdAt"].is_string());
}

#[tokio::test]
async fn out_of_range_readings_are_rejected_before_scoring() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(Config {
        scorer: shell_scorer("echo should-not-run; exit 3"),
        ..config(scratch.path(), "http://127.0.0.1:9/unused", &[])
    })
    .await;

    let mut readings = soil();
    readings["ph"] = json!(15);
    readings["rainfall"] = json!(900);

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/crop-recommendations"))
        .json(&readings)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    let details = body["details"].as_str().unwrap();
    assert!(details.contains("ph must be between 0 and 14"));
    assert!(details.contains("rainfall must be between 0 mm and 500 mm"));
}

#[tokio::test]
async fn malformed_readings_are_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &[])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/crop-recommendations"))
        .json(&json!({ "nitrogen": "lots" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Invalid input");
}

#[tokio::test]
async fn scorer_failures_are_500() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(Config {
        scorer: shell_scorer(r#"echo '{"success": false, "error": "Required model files not found"}'; exit 1"#),
        ..config(scratch.path(), "http://127.0.0.1:9/unused", &[])
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/crop-recommendations"))
        .json(&soil())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert!(body["details"].as_str().unwrap().contains("Required model files not found"));

    let resp = client
        .get(format!("{base}/api/crop-recommendation/1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn disabled_scorer_returns_501() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &[])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/crop-recommendations"))
        .json(&soil())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 501);
}

#[tokio::test]
async fn health_check() {
    let scratch = tempfile::tempdir().unwrap();
    let base = start_service(config(scratch.path(), "http://127.0.0.1:9/unused", &[])).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "OK");
}
