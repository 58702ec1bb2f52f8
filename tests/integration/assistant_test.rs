//! Assistant Integration Tests
//!
//! Chat replies and prompt enhancement over the scripted transport: chunk
//! forwarding, terminal event shapes, sanitized failures and the reply
//! ceiling.

use std::sync::Arc;

use codeforge::services::assistant::{AssistantTask, ReplyEvent};
use codeforge::utils::error::{sanitize, AppError};
use codeforge_llm::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::support::{config_with_keys, server_error, state_for, ScriptedTransport};

const CHAT_ANSWER: &str = "Sure, I added a dark mode toggle to the header.";

async fn collect(mut rx: mpsc::Receiver<ReplyEvent>) -> Vec<ReplyEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn chunks(events: &[ReplyEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            ReplyEvent::Chunk { chunk } => Some(chunk.as_str()),
            _ => None,
        })
        .collect()
}

fn chat_task() -> AssistantTask {
    AssistantTask::Chat(vec![
        Message::user("build a todo app"),
        Message::assistant("Done, here is your todo app."),
        Message::user("add dark mode"),
    ])
}

#[tokio::test(start_paused = true)]
async fn test_chat_streams_chunks_then_result() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(CHAT_ANSWER.to_string())));
    let state = state_for(&config_with_keys(&["sk-one"]), transport.clone());

    let events = collect(state.assistant.spawn(chat_task(), CancellationToken::new())).await;

    assert!(events.len() >= 2);
    assert_eq!(chunks(&events), CHAT_ANSWER);
    let last = events.last().unwrap();
    assert!(last.is_terminal());
    assert_eq!(
        last,
        &ReplyEvent::Chat {
            result: CHAT_ANSWER.to_string(),
            done: true,
        }
    );
    assert!(events[..events.len() - 1].iter().all(|e| !e.is_terminal()));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_enhance_strips_label_and_quotes() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| {
        Ok("<think>make it concrete</think>Enhanced prompt: \"A bakery site with a menu and a contact form.\"".to_string())
    }));
    let state = state_for(&config_with_keys(&["sk-one"]), transport);

    let events = collect(state.assistant.spawn(
        AssistantTask::Enhance("bakery site".to_string()),
        CancellationToken::new(),
    ))
    .await;

    let last = events.last().unwrap();
    assert_eq!(
        last,
        &ReplyEvent::Enhanced {
            enhanced_prompt: "A bakery site with a menu and a contact form.".to_string(),
            done: true,
        }
    );
    let wire: serde_json::Value = serde_json::from_str(&last.to_json()).unwrap();
    assert_eq!(
        wire["enhancedPrompt"],
        "A bakery site with a menu and a contact form."
    );
    assert_eq!(wire["done"], true);
}

#[tokio::test(start_paused = true)]
async fn test_enhance_failure_is_sanitized() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Err(server_error())));
    let config = config_with_keys(&["sk-one", "sk-two"]);
    let state = state_for(&config, transport.clone());

    let events = collect(state.assistant.spawn(
        AssistantTask::Enhance("bakery site".to_string()),
        CancellationToken::new(),
    ))
    .await;

    assert_eq!(events.len(), 1);
    let wire: serde_json::Value = serde_json::from_str(&events[0].to_json()).unwrap();
    let message = wire["error"].as_str().unwrap();
    assert!(!message.is_empty());
    assert!(!message.contains("exploded"));
    assert_eq!(wire["success"], false);
    assert_eq!(wire["done"], true);
    // Every fast model was tried on every key.
    assert_eq!(transport.calls().len(), 2 * config.fast_models.len());
}

#[tokio::test(start_paused = true)]
async fn test_chat_failure_has_no_success_flag() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Err(server_error())));
    let state = state_for(&config_with_keys(&["sk-one"]), transport);

    let events = collect(state.assistant.spawn(chat_task(), CancellationToken::new())).await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        ReplyEvent::Error {
            error,
            success,
            done,
        } => {
            assert!(!error.contains("exploded"));
            assert_eq!(*success, None);
            assert!(*done);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_reply_times_out() {
    let transport =
        Arc::new(ScriptedTransport::new(|_, _| Ok("Working on".to_string())).stalling());
    let state = state_for(&config_with_keys(&["sk-one"]), transport);

    let started = tokio::time::Instant::now();
    let events = collect(state.assistant.spawn(chat_task(), CancellationToken::new())).await;

    let timeout_secs = state.assistant.config().reply_timeout_seconds;
    assert!(started.elapsed() >= std::time::Duration::from_secs(timeout_secs));
    assert_eq!(chunks(&events), "Working on");
    assert_eq!(
        events.last().unwrap(),
        &ReplyEvent::Error {
            error: sanitize("Generation error: reply timed out"),
            success: None,
            done: true,
        }
    );

    let (tx, _rx) = mpsc::channel(64);
    let err = state
        .assistant
        .reply(chat_task(), &tx, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Generation(ref msg) if msg == "reply timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_reply_sends_no_terminal_event() {
    let transport =
        Arc::new(ScriptedTransport::new(|_, _| Ok("Partial".to_string())).stalling());
    let state = state_for(&config_with_keys(&["sk-one"]), transport);

    let cancel = CancellationToken::new();
    let mut rx = state.assistant.spawn(chat_task(), cancel.clone());
    let first = rx.recv().await.unwrap();
    assert!(!first.is_terminal());

    cancel.cancel();
    let rest = collect(rx).await;
    assert!(rest.iter().all(|e| !e.is_terminal()));
}

#[tokio::test]
async fn test_empty_inputs_are_rejected() {
    let transport = Arc::new(ScriptedTransport::new(|_, _| Ok(CHAT_ANSWER.to_string())));
    let state = state_for(&config_with_keys(&["sk-one"]), transport.clone());
    let (tx, _rx) = mpsc::channel(64);

    let err = state
        .assistant
        .reply(
            AssistantTask::Enhance("   ".to_string()),
            &tx,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = state
        .assistant
        .reply(AssistantTask::Chat(Vec::new()), &tx, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(transport.calls().is_empty());
}
