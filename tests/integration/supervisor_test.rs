//! Supervisor Integration Tests
//!
//! Drives `RetrySupervisor` over scripted sources (and, at the end, the
//! in-process pipeline) under a paused clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codeforge::models::artifact::{GeneratedFile, GenerationRequest, ProjectArtifact};
use codeforge::models::events::StreamEvent;
use codeforge::services::supervisor::{
    LocalSource, PipelineSource, RetrySupervisor, SupervisorConfig, SupervisorError,
};
use codeforge::EventStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::support::{config_with_keys, file_body, state_for, ScriptedTransport, Step, TODO_PLAN};

/// What one attempt does
#[derive(Clone)]
enum Script {
    /// Send these events, then close
    Events(Vec<StreamEvent>),
    /// Keep the stream open without sending anything
    Silent,
    /// Refuse to open
    Refuse(SupervisorError),
}

/// Plays one script per attempt; the last script repeats.
struct ScriptedSource {
    attempts: Mutex<Vec<Script>>,
    opened: Arc<AtomicU32>,
}

impl ScriptedSource {
    fn new(attempts: Vec<Script>) -> Self {
        Self {
            attempts: Mutex::new(attempts),
            opened: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared count of `open` calls
    fn counter(&self) -> Arc<AtomicU32> {
        self.opened.clone()
    }
}

fn opened(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::SeqCst)
}

#[async_trait]
impl PipelineSource for ScriptedSource {
    async fn open(
        &self,
        _request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, SupervisorError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let script = {
            let mut attempts = self.attempts.lock().unwrap();
            if attempts.len() > 1 {
                attempts.remove(0)
            } else {
                attempts[0].clone()
            }
        };

        let (sink, stream) = EventStream::channel(8, cancel);
        match script {
            Script::Events(events) => {
                tokio::spawn(async move {
                    for event in events {
                        sink.emit(event).await;
                    }
                });
            }
            Script::Silent => {
                tokio::spawn(async move {
                    sink.cancellation_token().cancelled().await;
                });
            }
            Script::Refuse(err) => return Err(err),
        }
        Ok(stream)
    }
}

fn artifact() -> ProjectArtifact {
    ProjectArtifact::from_files("Todo", "", &[GeneratedFile::new("/App.js", "x")])
}

fn success() -> Script {
    Script::Events(vec![
        StreamEvent::chunk("{"),
        StreamEvent::final_result(artifact()),
    ])
}

fn failure(raw: &str) -> Script {
    Script::Events(vec![StreamEvent::error(
        "Something went wrong. Please try again.",
        Some(raw.to_string()),
    )])
}

fn request() -> GenerationRequest {
    GenerationRequest::from_prompt("build a todo app")
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failure_then_success() {
    let source = ScriptedSource::new(vec![
        failure("HTTP 503: Service Unavailable"),
        success(),
    ]);
    let count = source.counter();
    let supervisor = RetrySupervisor::new(source);

    let started = Instant::now();
    let mut seen = 0;
    let result = supervisor
        .run_with(&request(), &CancellationToken::new(), |_| seen += 1)
        .await;

    assert_eq!(result.unwrap(), artifact());
    assert_eq!(opened(&count), 2);
    assert_eq!(seen, 3);
    // One backoff of 2s between the attempts.
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_busy_error_is_terminal() {
    let source = ScriptedSource::new(vec![
        failure("All models are busy, try again shortly"),
        success(),
    ]);
    let count = source.counter();
    let supervisor = RetrySupervisor::new(source);

    let err = supervisor
        .run(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SupervisorError::Pipeline { .. }));
    assert_eq!(opened(&count), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_files_retried_until_attempts_run_out() {
    let empty = Script::Events(vec![StreamEvent::final_result(ProjectArtifact::new(
        "Empty", "",
    ))]);
    let source = ScriptedSource::new(vec![empty]);
    let count = source.counter();
    let supervisor = RetrySupervisor::new(source);

    let started = Instant::now();
    let err = supervisor
        .run(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, SupervisorError::NoFiles);
    assert_eq!(opened(&count), 3);
    // Backoffs of 2s and 5s.
    assert!(started.elapsed() >= Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_server_status_classification() {
    let source = ScriptedSource::new(vec![
        Script::Refuse(SupervisorError::Http {
            status: 502,
            body: "bad gateway".to_string(),
        }),
        success(),
    ]);
    let count = source.counter();
    let result = RetrySupervisor::new(source)
        .run(&request(), &CancellationToken::new())
        .await;
    assert!(result.is_ok());
    assert_eq!(opened(&count), 2);

    let source = ScriptedSource::new(vec![
        Script::Refuse(SupervisorError::Http {
            status: 400,
            body: "bad request".to_string(),
        }),
        success(),
    ]);
    let count = source.counter();
    let err = RetrySupervisor::new(source)
        .run(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Http { status: 400, .. }));
    assert_eq!(opened(&count), 1);
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_timeout() {
    let source = ScriptedSource::new(vec![Script::Silent]);
    let count = source.counter();
    let supervisor = RetrySupervisor::new(source).with_config(SupervisorConfig {
        max_attempts: 1,
        ..Default::default()
    });

    let started = Instant::now();
    let err = supervisor
        .run(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, SupervisorError::Inactivity(120));
    assert_eq!(opened(&count), 1);
    assert!(started.elapsed() >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_stream_closed_early_is_incomplete() {
    let source = ScriptedSource::new(vec![Script::Events(vec![
        StreamEvent::chunk("partial"),
    ])]);
    let count = source.counter();
    let supervisor = RetrySupervisor::new(source).with_config(SupervisorConfig {
        max_attempts: 2,
        ..Default::default()
    });

    let err = supervisor
        .run(&request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err, SupervisorError::Incomplete);
    assert_eq!(opened(&count), 2);
}

#[tokio::test(start_paused = true)]
async fn test_total_ceiling_spans_attempts() {
    let source = ScriptedSource::new(vec![Script::Silent]);
    let count = source.counter();
    let supervisor = RetrySupervisor::new(source).with_config(SupervisorConfig {
        max_attempts: 3,
        backoff_seconds: vec![2, 5, 10],
        inactivity_timeout_seconds: 120,
        total_timeout_seconds: 200,
    });

    let started = Instant::now();
    let err = supervisor
        .run(&request(), &CancellationToken::new())
        .await
        .unwrap_err();

    // First attempt idles out at 120s, the second hits the 200s ceiling.
    assert_eq!(err, SupervisorError::Deadline(200));
    assert_eq!(opened(&count), 2);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(200));
    assert!(elapsed < Duration::from_secs(201));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_supervisor() {
    let supervisor = RetrySupervisor::new(ScriptedSource::new(vec![Script::Silent]));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = supervisor.run(&request(), &cancel).await.unwrap_err();
    assert_eq!(err, SupervisorError::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_local_source_runs_pipeline() {
    let transport = Arc::new(ScriptedTransport::new(|step, _model| match step {
        Step::Plan => Ok(TODO_PLAN.to_string()),
        Step::File(path) => Ok(file_body(path)),
        _ => Ok(String::new()),
    }));
    let state = state_for(&config_with_keys(&["sk-1"]), transport);
    let supervisor = RetrySupervisor::new(LocalSource::new(state.runner.clone()));

    let artifact = supervisor
        .run(&request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(artifact.project_title, "Todo App");
    assert_eq!(artifact.files.len(), 3);
}

// ============================================================================
// Remote source against a mock server
// ============================================================================

mod remote {
    use super::*;
    use codeforge::services::supervisor::RemoteSource;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(events: &[StreamEvent]) -> String {
        events.iter().map(StreamEvent::to_sse).collect()
    }

    fn quick_retries() -> SupervisorConfig {
        SupervisorConfig {
            backoff_seconds: vec![0],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_remote_stream_yields_artifact() {
        let server = MockServer::start().await;
        let body = sse_body(&[
            StreamEvent::ping(),
            StreamEvent::chunk("{\"files\""),
            StreamEvent::final_result(artifact()),
        ]);
        Mock::given(method("POST"))
            .and(path("/api/gen-ai-code"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let source = RemoteSource::new(format!("{}/api/gen-ai-code", server.uri())).unwrap();
        let mut kinds = Vec::new();
        let result = RetrySupervisor::new(source)
            .with_config(quick_retries())
            .run_with(&request(), &CancellationToken::new(), |event| {
                kinds.push(matches!(event, StreamEvent::Ping { .. }))
            })
            .await;

        assert_eq!(result.unwrap(), artifact());
        assert_eq!(kinds, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_remote_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse_body(&[StreamEvent::final_result(artifact())])),
            )
            .mount(&server)
            .await;

        let source = RemoteSource::new(server.uri()).unwrap();
        let result = RetrySupervisor::new(source)
            .with_config(quick_retries())
            .run(&request(), &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap(), artifact());
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_client_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad body"))
            .mount(&server)
            .await;

        let source = RemoteSource::new(server.uri()).unwrap();
        let err = RetrySupervisor::new(source)
            .with_config(quick_retries())
            .run(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SupervisorError::Http {
                status: 422,
                body: "bad body".to_string()
            }
        );
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
