//! Transport Integration Tests
//!
//! `OpenRouterTransport` against a wiremock gateway: streamed deltas,
//! status classification, the first-byte ceiling and empty streams.

use std::time::Duration;

use codeforge_llm::{
    CompletionTransport, LlmError, LlmRequestOptions, Message, OpenRouterTransport,
    TimeoutStage, TransportConfig,
};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COMPLETIONS: &str = "/api/v1/chat/completions";

fn transport(server: &MockServer) -> OpenRouterTransport {
    OpenRouterTransport::new(TransportConfig {
        base_url: format!("{}{}", server.uri(), COMPLETIONS),
        first_byte_timeout: Duration::from_millis(300),
        stream_timeout: Duration::from_secs(5),
        completion_timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .unwrap()
}

fn messages() -> Vec<Message> {
    vec![Message::system("be brief"), Message::user("hello")]
}

fn sse(lines: &[&str]) -> ResponseTemplate {
    let body: String = lines.iter().map(|l| format!("data: {}\n\n", l)).collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_stream_forwards_deltas_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(COMPLETIONS))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"model": "m/one", "stream": true})))
        .respond_with(sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            "[DONE]",
        ]))
        .mount(&server)
        .await;

    let stream = transport(&server)
        .stream("sk-test", "m/one", &messages(), &LlmRequestOptions::default())
        .await
        .unwrap();
    assert_eq!(stream.collect_text().await.unwrap(), "Hello");
}

#[tokio::test]
async fn test_stream_rate_limit_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Rate limit exceeded"))
        .mount(&server)
        .await;

    let mut stream = transport(&server)
        .stream("sk-test", "m/one", &messages(), &LlmRequestOptions::default())
        .await
        .unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, LlmError::RateLimited { status: Some(429), .. }));
    assert!(err.exhausts_credential());
}

#[tokio::test]
async fn test_stream_server_error_is_not_credential_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let mut stream = transport(&server)
        .stream("sk-test", "m/one", &messages(), &LlmRequestOptions::default())
        .await
        .unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.status(), Some(502));
    assert!(!err.exhausts_credential());
}

#[tokio::test]
async fn test_stream_first_byte_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&["[DONE]"]).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let mut stream = transport(&server)
        .stream("sk-test", "m/one", &messages(), &LlmRequestOptions::default())
        .await
        .unwrap();
    let err = stream.next().await.unwrap().unwrap_err();

    assert_eq!(
        err,
        LlmError::Timeout {
            stage: TimeoutStage::FirstByte
        }
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_stream_without_deltas_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&["[DONE]"]))
        .mount(&server)
        .await;

    let mut stream = transport(&server)
        .stream("sk-test", "m/one", &messages(), &LlmRequestOptions::default())
        .await
        .unwrap();
    assert_eq!(stream.next().await, Some(Err(LlmError::EmptyResponse)));
}

#[tokio::test]
async fn test_stream_inline_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse(&[
            r#"{"error":{"message":"Insufficient credits","code":402}}"#,
        ]))
        .mount(&server)
        .await;

    let mut stream = transport(&server)
        .stream("sk-test", "m/one", &messages(), &LlmRequestOptions::default())
        .await
        .unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(err.exhausts_credential());
}

#[tokio::test]
async fn test_complete_reads_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({"max_tokens": 64})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]
        })))
        .mount(&server)
        .await;

    let options = LlmRequestOptions::default().with_max_tokens(64);
    let text = transport(&server)
        .complete("sk-test", "m/one", &messages(), &options)
        .await
        .unwrap();
    assert_eq!(text, "{\"ok\":true}");
}

#[tokio::test]
async fn test_complete_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"choices": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let options = LlmRequestOptions::default().with_timeout(Duration::from_millis(200));
    let err = transport(&server)
        .complete("sk-test", "m/one", &messages(), &options)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LlmError::Timeout {
            stage: TimeoutStage::Total
        }
    );
}

#[tokio::test]
async fn test_complete_blank_content_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{"message": {"content": "   "}}]
        })))
        .mount(&server)
        .await;

    let err = transport(&server)
        .complete("sk-test", "m/one", &messages(), &LlmRequestOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, LlmError::EmptyResponse);
}
