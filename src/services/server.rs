//! HTTP Surface
//!
//! axum routes in front of the pipeline and the assistant. Every streaming
//! route answers with Server-Sent Events; a client that disconnects drops
//! the response stream, which cancels the work behind it.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use codeforge_llm::Message;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::artifact::GenerationRequest;
use crate::services::assistant::AssistantTask;
use crate::state::AppState;
use crate::utils::error::{AppError, ErrorCategory};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/gen-ai-code", post(generate_code))
        .route("/api/ai-chat", post(chat))
        .route("/api/enhance-prompt", post(enhance_prompt))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process stops
pub async fn serve(state: AppState, addr: &str) -> Result<(), AppError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Codeforge listening on http://{}", addr);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => match self.category() {
                ErrorCategory::Busy => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        let message = match &self {
            AppError::Validation(msg) => msg.clone(),
            other => other.user_message(),
        };
        (status, Json(json!({ "error": message, "done": true }))).into_response()
    }
}

type EventResult = Result<Event, Infallible>;

async fn generate_code(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Sse<impl Stream<Item = EventResult> + Send>, AppError> {
    if request.latest_user_prompt().trim().is_empty() {
        return Err(AppError::validation("messages must include a user prompt"));
    }
    let events = state
        .runner
        .spawn(request, CancellationToken::new())
        .into_stream()
        .map(|event| Ok(Event::default().data(event.to_json())));
    Ok(Sse::new(events))
}

/// A chat request carries the transcript, or a bare prompt
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatPrompt {
    Transcript(Vec<Message>),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct ChatBody {
    prompt: ChatPrompt,
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = EventResult> + Send>, AppError> {
    let history = match body.prompt {
        ChatPrompt::Transcript(messages) => messages,
        ChatPrompt::Text(text) => vec![Message::user(text)],
    };
    if history.is_empty() {
        return Err(AppError::validation("prompt must not be empty"));
    }
    Ok(reply_stream(&state, AssistantTask::Chat(history)))
}

#[derive(Debug, Deserialize)]
struct EnhanceBody {
    prompt: String,
}

async fn enhance_prompt(
    State(state): State<AppState>,
    Json(body): Json<EnhanceBody>,
) -> Result<Sse<impl Stream<Item = EventResult> + Send>, AppError> {
    if body.prompt.trim().is_empty() {
        return Err(AppError::validation("prompt must not be empty"));
    }
    Ok(reply_stream(&state, AssistantTask::Enhance(body.prompt)))
}

fn reply_stream(
    state: &AppState,
    task: AssistantTask,
) -> Sse<impl Stream<Item = EventResult> + Send> {
    let cancel = CancellationToken::new();
    let rx = state.assistant.spawn(task, cancel.clone());
    // The guard rides along with the receiver and cancels the reply on disconnect.
    let events = stream::unfold((rx, cancel.drop_guard()), |(mut rx, guard)| async move {
        rx.recv().await.map(|event| {
            let sse = Event::default().data(event.to_json());
            (Ok(sse), (rx, guard))
        })
    });
    Sse::new(events)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "credentials": state.health.credential_count(),
        "health": state.health.snapshot(),
    }))
}
