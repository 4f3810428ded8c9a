//! End-to-end routing tests against HTTP backends
//!
//! Each test stands up wiremock servers as tool backends, writes a registry
//! document pointing at them and drives requests through the HTTP host.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;
use toolroute::config::Config;
use toolroute::handlers::{AppState, app};
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _dir: TempDir,
    state: AppState,
}

fn files_backend(id: &str, base_address: &str) -> Value {
    json!({
        "id": id,
        "name": "Files",
        "category": "file_operations",
        "base_address": base_address,
        "timeout_ms": 2000,
        "operations": [
            {
                "name": "read_file",
                "description": "Read a file",
                "parameters": [{"name": "path", "type": "string", "required": true}]
            },
            {
                "name": "write_file",
                "description": "Write a file",
                "parameters": [
                    {"name": "path", "type": "string", "required": true},
                    {"name": "content", "type": "string", "required": true}
                ]
            }
        ]
    })
}

async fn harness(backends: Vec<Value>, extra: &str) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let registry_path = dir.path().join("backends.json");
    std::fs::write(&registry_path, json!({ "backends": backends }).to_string())
        .expect("Failed to write registry");

    let config = Config::from_str(&format!(
        r#"
[server]
host = "127.0.0.1"
port = 3000

[registry]
path = "{}"
{}
"#,
        registry_path.display(),
        extra
    ))
    .expect("test config should be valid");

    let state = AppState::from_config(Arc::new(config))
        .await
        .expect("state should build");
    Harness { _dir: dir, state }
}

async fn process(state: &AppState, body: Value) -> (StatusCode, Value) {
    let response = app(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/process")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"success": true, "data": data}))
}

const FAST_RETRY: &str = r#"
[retry]
max_attempts = 3
base_delay_ms = 1
max_delay_ms = 5
"#;

#[tokio::test]
async fn test_text_request_reaches_backend_with_extracted_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .and(body_partial_json(json!({
            "operation": "read_file",
            "parameters": {"path": "notes.txt"}
        })))
        .respond_with(ok(json!("file body")))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(vec![files_backend("files-1", &server.uri())], FAST_RETRY).await;
    let (status, body) = process(&h.state, json!({"text": "Read the file notes.txt"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["operation"], "read_file");
    assert_eq!(body["data"], "file body");
}

#[tokio::test]
async fn test_repeated_idempotent_call_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ok(json!({"content": "hello"})))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(vec![files_backend("files-1", &server.uri())], FAST_RETRY).await;
    let request = json!({"operation": "read_file", "parameters": {"path": "a.txt"}});

    let (_, first) = process(&h.state, request.clone()).await;
    let (status, second) = process(&h.state, request).await;

    assert_eq!(first["cache_hit"], false);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["data"], first["data"]);
}

#[tokio::test]
async fn test_non_idempotent_call_is_never_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ok(json!({"written": 5})))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(vec![files_backend("files-1", &server.uri())], FAST_RETRY).await;
    let request = json!({
        "operation": "write_file",
        "parameters": {"path": "a.txt", "content": "hello"}
    });

    let (_, first) = process(&h.state, request.clone()).await;
    let (_, second) = process(&h.state, request).await;

    assert_eq!(first["cache_hit"], false);
    assert_eq!(second["cache_hit"], false);
    assert_eq!(h.state.orchestrator().cache().stats().primary_entries, 0);
}

#[tokio::test]
async fn test_transient_failure_is_retried_on_same_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ok(json!("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(vec![files_backend("files-1", &server.uri())], FAST_RETRY).await;
    let (status, body) = process(
        &h.state,
        json!({"operation": "read_file", "parameters": {"path": "a.txt"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "recovered");
}

#[tokio::test]
async fn test_declared_backend_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": "no such file"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(vec![files_backend("files-1", &server.uri())], FAST_RETRY).await;
    let (status, body) = process(
        &h.state,
        json!({"operation": "read_file", "parameters": {"path": "missing.txt"}}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "backend_error");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no such file")
    );
}

#[tokio::test]
async fn test_circuit_opens_after_threshold_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(
        vec![files_backend("files-1", &server.uri())],
        r#"
[circuit_breaker]
failure_threshold = 2
reset_timeout_ms = 60000

[retry]
max_attempts = 1
base_delay_ms = 1
max_delay_ms = 5
"#,
    )
    .await;
    let request = json!({"operation": "read_file", "parameters": {"path": "a.txt"}});

    for _ in 0..2 {
        let (status, body) = process(&h.state, request.clone()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["kind"], "retries_exhausted");
    }

    let (status, body) = process(&h.state, request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["kind"], "circuit_open");
    assert_eq!(body["error"]["backend_id"], "files-1");
}

#[tokio::test]
async fn test_open_circuit_routes_to_remaining_backend() {
    let failing = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&failing)
        .await;
    let healthy = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ok(json!("from healthy")))
        .expect(1)
        .mount(&healthy)
        .await;

    let h = harness(
        vec![
            files_backend("files-a", &failing.uri()),
            files_backend("files-b", &healthy.uri()),
        ],
        r#"
[circuit_breaker]
failure_threshold = 1
reset_timeout_ms = 60000

[retry]
max_attempts = 1
base_delay_ms = 1
max_delay_ms = 5
"#,
    )
    .await;

    let (_, pinned) = process(
        &h.state,
        json!({"backend_id": "files-a", "operation": "write_file",
               "parameters": {"path": "a.txt", "content": "x"}}),
    )
    .await;
    assert_eq!(pinned["success"], false);

    let (status, body) = process(
        &h.state,
        json!({"operation": "read_file", "parameters": {"path": "a.txt"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend_id"], "files-b");
    assert_eq!(body["data"], "from healthy");
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ok(json!("unexpected")))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(vec![files_backend("files-1", &server.uri())], FAST_RETRY).await;
    let (status, body) = process(
        &h.state,
        json!({"operation": "read_file", "parameters": {"path": 42}}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "validation");
}
