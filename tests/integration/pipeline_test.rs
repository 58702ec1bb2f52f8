//! Pipeline Integration Tests
//!
//! Runs whole generations through `PipelineRunner` over the scripted
//! transport and checks the emitted event sequence.

use std::sync::Arc;

use codeforge::models::artifact::{GenerationRequest, PLACEHOLDER_MARKER};
use codeforge::models::events::StreamEvent;
use codeforge::GenerationPhase;
use codeforge_llm::LlmError;
use tokio_util::sync::CancellationToken;

use super::support::{
    config_with_keys, drain, file_body, server_error, state_for, ScriptedTransport, Step,
    TODO_PATHS, TODO_PLAN,
};

fn phases(events: &[StreamEvent]) -> Vec<GenerationPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Phase { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

fn final_artifact(events: &[StreamEvent]) -> &codeforge::ProjectArtifact {
    match events.last() {
        Some(StreamEvent::Final { artifact, done }) => {
            assert!(*done);
            artifact
        }
        other => panic!("expected a final event, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_todo_app_end_to_end() {
    let transport = Arc::new(ScriptedTransport::new(|step, _model| match step {
        Step::Plan => Ok(TODO_PLAN.to_string()),
        Step::File(path) => Ok(file_body(path)),
        _ => Err(server_error()),
    }));
    let state = state_for(&config_with_keys(&["sk-1"]), transport.clone());

    let events = drain(
        state
            .runner
            .spawn(GenerationRequest::from_prompt("build a todo app"), CancellationToken::new()),
    )
    .await;

    let planned = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::Phase {
                phase: GenerationPhase::Planned,
                plan: Some(plan),
                total,
                ..
            } => Some((plan.clone(), *total)),
            _ => None,
        })
        .expect("planned event");
    let plan_paths: Vec<&str> = planned.0.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(plan_paths, TODO_PATHS.to_vec());
    assert_eq!(planned.1, Some(3));

    let artifact = final_artifact(&events);
    assert_eq!(artifact.project_title, "Todo App");
    assert_eq!(artifact.paths(), {
        let mut sorted = TODO_PATHS.to_vec();
        sorted.sort();
        sorted
    });
    assert!(artifact.files["/App.js"]
        .code
        .starts_with("// /App.js\nexport default function"));
    assert!(artifact.files.values().all(|f| !f.code.contains(PLACEHOLDER_MARKER)));

    assert_eq!(
        phases(&events),
        vec![
            GenerationPhase::Planning,
            GenerationPhase::Planned,
            GenerationPhase::Generating,
            GenerationPhase::Generating,
            GenerationPhase::Generating,
            GenerationPhase::Done,
        ]
    );

    let progress: Vec<(String, usize)> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Phase {
                current_file: Some(file),
                progress: Some(p),
                ..
            } => Some((file.clone(), *p)),
            _ => None,
        })
        .collect();
    assert_eq!(
        progress,
        vec![
            ("/App.js".to_string(), 1),
            ("/components/TodoList.js".to_string(), 2),
            ("/index.css".to_string(), 3),
        ]
    );

    // Files are generated strictly in plan order.
    let file_calls: Vec<String> = transport
        .calls()
        .into_iter()
        .filter_map(|(step, _)| match step {
            Step::File(path) => Some(path),
            _ => None,
        })
        .collect();
    assert_eq!(file_calls, TODO_PATHS.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_file_becomes_placeholder() {
    let transport = Arc::new(ScriptedTransport::new(|step, _model| match step {
        Step::Plan => Ok(TODO_PLAN.to_string()),
        Step::File(path) if path == "/components/TodoList.js" => Err(server_error()),
        Step::File(path) => Ok(file_body(path)),
        _ => Err(server_error()),
    }));
    let state = state_for(&config_with_keys(&["sk-1"]), transport.clone());

    let events = drain(
        state
            .runner
            .spawn(GenerationRequest::from_prompt("build a todo app"), CancellationToken::new()),
    )
    .await;

    let artifact = final_artifact(&events);
    assert_eq!(artifact.files.len(), 3);
    let placeholder = &artifact.files["/components/TodoList.js"].code;
    assert!(placeholder.contains(PLACEHOLDER_MARKER));
    assert!(!placeholder.contains("upstream exploded"));
    assert!(!artifact.files["/App.js"].code.contains(PLACEHOLDER_MARKER));
    assert!(!artifact.files["/index.css"].code.contains(PLACEHOLDER_MARKER));

    // No single-request fallback while real files exist.
    assert!(!phases(&events).contains(&GenerationPhase::Fallback));
    assert!(transport
        .calls()
        .iter()
        .all(|(step, _)| *step != Step::Legacy));
}

#[tokio::test(start_paused = true)]
async fn test_no_real_files_switches_to_single_request() {
    let project = r#"{"projectTitle": "Landing", "explanation": "One page.", "files": {"/App.js": {"code": "export default function App() { return null; }"}}}"#;
    let transport = Arc::new(ScriptedTransport::new(move |step, _model| match step {
        Step::Plan => Ok(TODO_PLAN.to_string()),
        Step::File(_) => Err(server_error()),
        Step::Legacy => Ok(project.to_string()),
        Step::Other => Err(server_error()),
    }));
    let state = state_for(&config_with_keys(&["sk-1"]), transport);

    let events = drain(
        state
            .runner
            .spawn(GenerationRequest::from_prompt("landing page"), CancellationToken::new()),
    )
    .await;

    let artifact = final_artifact(&events);
    assert_eq!(artifact.project_title, "Landing");
    assert_eq!(artifact.paths(), vec!["/App.js"]);

    let seen = phases(&events);
    assert!(seen.contains(&GenerationPhase::Fallback));
    assert_eq!(seen.last(), Some(&GenerationPhase::Done));

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { chunk } => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, project);
}

#[tokio::test(start_paused = true)]
async fn test_total_failure_ends_with_sanitized_error() {
    let transport = Arc::new(ScriptedTransport::new(|_step, _model| Err(server_error())));
    let state = state_for(&config_with_keys(&["sk-1"]), transport);

    let events = drain(
        state
            .runner
            .spawn(GenerationRequest::from_prompt("anything"), CancellationToken::new()),
    )
    .await;

    match events.last() {
        Some(StreamEvent::Error {
            error,
            raw_error,
            done,
        }) => {
            assert!(*done);
            let raw = raw_error.as_deref().unwrap_or("");
            assert!(raw.contains("no files produced"));
            assert!(!error.contains("no files produced"));
            assert!(!error.contains("upstream exploded"));
        }
        other => panic!("expected an error event, got {:?}", other),
    }

    // The default plan still drove per-file generation first.
    let seen = phases(&events);
    assert!(seen.contains(&GenerationPhase::Generating));
    assert!(seen.contains(&GenerationPhase::Fallback));
}

#[tokio::test(start_paused = true)]
async fn test_missing_credentials_is_misconfiguration() {
    let transport = Arc::new(ScriptedTransport::new(|_step, _model| {
        Ok("unreachable".to_string())
    }));
    let state = state_for(&config_with_keys(&[]), transport.clone());

    let events = drain(
        state
            .runner
            .spawn(GenerationRequest::from_prompt("anything"), CancellationToken::new()),
    )
    .await;

    match events.last() {
        Some(StreamEvent::Error { error, .. }) => assert_eq!(
            error,
            "The AI service is not configured correctly. Please contact the site owner."
        ),
        other => panic!("expected an error event, got {:?}", other),
    }
    assert!(transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_emits_no_terminal_event() {
    let transport = Arc::new(ScriptedTransport::new(|step, _model| match step {
        Step::Plan => Ok(TODO_PLAN.to_string()),
        Step::File(path) => Ok(file_body(path)),
        _ => Err(LlmError::EmptyResponse),
    }));
    let state = state_for(&config_with_keys(&["sk-1"]), transport);
    let cancel = CancellationToken::new();
    let mut stream = state
        .runner
        .spawn(GenerationRequest::from_prompt("build a todo app"), cancel.clone());

    // Wait for the first per-file event, then cancel.
    loop {
        match stream.next().await {
            Some(StreamEvent::Phase {
                phase: GenerationPhase::Generating,
                ..
            }) => break,
            Some(_) => continue,
            None => panic!("stream ended before generation started"),
        }
    }
    cancel.cancel();

    let rest = drain(stream).await;
    assert!(rest.iter().all(|e| !e.is_terminal()));
}
