//! Fallback Integration Tests
//!
//! The fallback orchestrator over the real transport and a wiremock
//! gateway: credential rotation on quota errors, exhaustion after repeated
//! failures, and the single busy error when everything is rate limited.

use std::sync::Arc;
use std::time::Duration;

use codeforge_llm::{
    Credential, FallbackConfig, FallbackOrchestrator, HealthTracker, LlmError, LlmRequestOptions,
    Message, ModelRoster, ModelTier, OpenRouterTransport, TransportConfig,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn orchestrator(server: &MockServer, keys: &[&str]) -> FallbackOrchestrator {
    let transport = OpenRouterTransport::new(TransportConfig {
        base_url: format!("{}/api/v1/chat/completions", server.uri()),
        completion_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap();
    let credentials: Vec<Credential> = keys.iter().map(|k| Credential::new(*k)).collect();
    let health = Arc::new(HealthTracker::new(credentials.len()));
    FallbackOrchestrator::new(Arc::new(transport), credentials, health).with_config(
        FallbackConfig {
            delay_between_attempts_ms: 0,
        },
    )
}

fn roster(models: &[&str]) -> ModelRoster {
    ModelRoster::new(
        ModelTier::Code,
        models.iter().map(|m| m.to_string()).collect(),
    )
}

fn ok_body(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "choices": [{"message": {"content": text}}]
    }))
}

async fn requests_with_key(server: &MockServer, key: &str) -> usize {
    let expected = format!("Bearer {}", key);
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| {
            r.headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some(expected.as_str())
        })
        .count()
}

#[tokio::test]
async fn test_quota_error_rotates_to_next_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer sk-one"))
        .respond_with(ResponseTemplate::new(402).set_body_string("Insufficient credits"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer sk-two"))
        .respond_with(ok_body("from key two"))
        .mount(&server)
        .await;

    let llm = orchestrator(&server, &["sk-one", "sk-two"]);
    let (text, log) = llm
        .complete_with_log(
            &[Message::user("hi")],
            &roster(&["m/one"]),
            &LlmRequestOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(text, "from key two");
    assert_eq!(log.failed_attempts_count(), 1);
    let snapshot = llm.health().snapshot();
    assert_eq!(snapshot.credentials[0].fail_streak, 1);
    assert_eq!(snapshot.credentials[1].fail_streak, 0);
}

#[tokio::test]
async fn test_repeatedly_limited_credential_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer sk-one"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit exceeded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(header("Authorization", "Bearer sk-two"))
        .respond_with(ok_body("ok"))
        .mount(&server)
        .await;

    let llm = orchestrator(&server, &["sk-one", "sk-two"]);
    for _ in 0..4 {
        let text = llm
            .complete(
                &[Message::user("hi")],
                &roster(&["m/one"]),
                &LlmRequestOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    // Three strikes exhaust key one; the fourth call goes straight to key two.
    assert_eq!(requests_with_key(&server, "sk-one").await, 3);
    assert_eq!(requests_with_key(&server, "sk-two").await, 4);
    assert!(llm.health().snapshot().credentials[0].exhausted);
}

#[tokio::test]
async fn test_all_combos_rate_limited_is_busy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit exceeded"))
        .mount(&server)
        .await;

    let llm = orchestrator(&server, &["sk-one", "sk-two"]);
    let err = llm
        .complete(
            &[Message::user("hi")],
            &roster(&["m/one", "m/two"]),
            &LlmRequestOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, LlmError::Busy);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    let mut combos: Vec<(String, String)> = requests
        .iter()
        .map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
            let key = r
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            (body["model"].as_str().unwrap_or("").to_string(), key)
        })
        .collect();
    combos.sort();
    combos.dedup();
    assert_eq!(combos.len(), 4);
}

#[tokio::test]
async fn test_model_errors_move_to_next_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({"model": "m/one"})))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({"model": "m/two"})))
        .respond_with(ok_body("from model two"))
        .mount(&server)
        .await;

    let llm = orchestrator(&server, &["sk-one"]);
    let text = llm
        .complete(
            &[Message::user("hi")],
            &roster(&["m/one", "m/two"]),
            &LlmRequestOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(text, "from model two");
    // A server error counts against the model, not the key.
    let snapshot = llm.health().snapshot();
    let failed = snapshot
        .models
        .iter()
        .find(|m| m.model == "m/one")
        .expect("m/one tracked");
    assert_eq!(failed.consecutive_fails, 1);
    assert!(!snapshot.credentials[0].exhausted);
}
