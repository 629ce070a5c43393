use apiview_cli::{router, ApiState, AuthToken};
use apiview_prompt::ScriptedLlm;
use apiview_search::{local_indices, HashEmbedder, HybridFusion};
use apiview_service::{CopilotConfig, LlmMode, ServiceContext};
use apiview_store::DocumentStore;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const TARGET: &str = "class Client:\n    def GetThing(self): pass\n";

async fn spawn_server(auth: Option<&str>) -> String {
    let mut config = CopilotConfig::default();
    config.paths.prompts_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../prompts");
    config.paths.metadata_dir = None;
    config.llm.mode = LlmMode::Stub;
    let ctx = ServiceContext::build(
        config,
        DocumentStore::in_memory(),
        local_indices(HybridFusion::default()),
        Arc::new(HashEmbedder::new(64)),
        Arc::new(ScriptedLlm::new()),
    )
    .await
    .unwrap();
    let auth = AuthToken::parse(auth).unwrap();
    let app = router(ApiState { ctx, auth });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn review_returns_the_result_envelope() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/api-review"))
        .json(&json!({"target": TARGET, "language": "python"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["comments"], json!([]));
    assert!(body["result"]["stats"].is_object());
}

#[tokio::test]
async fn bad_requests_are_input_errors() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();

    let malformed = client
        .post(format!("{base}/api-review"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);
    let body: Value = malformed.json().await.unwrap();
    assert_eq!(body["details"]["code"], json!("input_error"));

    let unknown_language = client
        .post(format!("{base}/api-review"))
        .json(&json!({"target": TARGET, "language": "cobol"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_language.status(), 400);
    let body: Value = unknown_language.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("cobol"));
}

#[tokio::test]
async fn started_jobs_can_be_polled_to_completion() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();
    let started = client
        .post(format!("{base}/api-review/start"))
        .json(&json!({"target": TARGET, "language": "python"}))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), 202);
    let started: Value = started.json().await.unwrap();
    let status_url = started["status_url"].as_str().unwrap().to_string();
    assert_eq!(status_url, format!("/job/{}", started["job_id"].as_str().unwrap()));

    let mut job = Value::Null;
    for _ in 0..200 {
        job = client
            .get(format!("{base}{status_url}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if job["state"] == json!("succeeded") || job["state"] == json!("failed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(job["state"], json!("succeeded"));
    assert!(job["result"]["comments"].is_array());

    let cancel: Value = client
        .post(format!("{base}{status_url}/cancel"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cancel["cancelled"], json!(false));
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let base = spawn_server(None).await;
    let response = reqwest::get(format!("{base}/job/does-not-exist")).await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn token_guards_everything_but_health() {
    let base = spawn_server(Some("s3cret")).await;
    let client = reqwest::Client::new();

    let denied = client.get(format!("{base}/metrics")).send().await.unwrap();
    assert_eq!(denied.status(), 401);
    assert_eq!(denied.headers()["www-authenticate"], "Bearer");

    let wrong = client
        .get(format!("{base}/metrics"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let allowed = client
        .get(format!("{base}/metrics"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);

    let health = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn metrics_count_finished_reviews() {
    let base = spawn_server(None).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/api-review"))
        .json(&json!({"target": TARGET, "language": "python"}))
        .send()
        .await
        .unwrap();

    let text = client
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("apiview_reviews_total{outcome=\"succeeded\"} 1"));
}

#[tokio::test]
async fn mentions_without_an_action_are_reported() {
    let base = spawn_server(None).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/mention"))
        .json(&json!({"comments": ["@copilot thanks!"], "language": "python"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["outcome"], json!("no_action"));
}
