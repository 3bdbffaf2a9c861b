//! Router for the chat API

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, sse::Event, sse::KeepAlive, sse::Sse},
    routing::{get, post},
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::public::{self, ChatEvent};
use crate::ai::chat::models::{DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE};
use crate::ai::chat::{GenerationSettings, answer};
use crate::api::public::ApiError;
use crate::api::state::AppState;

type SharedState = Arc<RwLock<AppState>>;

fn sse_event(event: ChatEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(&event)
}

/// Get the transcript of a chat session
async fn chat_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let transcript = state
        .read()
        .map_err(|_| anyhow!("Unable to read shared state"))?
        .sessions
        .get(&id)
        .map(|session| session.transcript.snapshot())
        .ok_or_else(|| ApiError::NotFound(format!("Chat session {} not found", id)))?;

    Ok(Json(public::ChatTranscriptResponse { transcript }))
}

/// End the session. The next question starts a fresh conversation.
async fn chat_clear(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let ended = state
        .write()
        .map_err(|_| anyhow!("Unable to write shared state"))?
        .end_session(&id);
    if ended {
        tracing::info!("Cleared chat session {}", id);
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Ask a question in a chat session and stream the answer
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let question = payload.message.trim().to_string();
    if question.is_empty() {
        return Err(ApiError::BadRequest(String::from(
            "Message must not be empty",
        )));
    }

    let (default_model, window) = {
        let shared_state = state
            .read()
            .map_err(|_| anyhow!("Unable to read shared state"))?;
        (
            shared_state.config.default_model,
            shared_state.config.history_window,
        )
    };
    let settings = GenerationSettings::new(
        payload.model.unwrap_or(default_model),
        payload.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        payload.temperature.unwrap_or(DEFAULT_TEMPERATURE),
    );
    settings
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session_id = payload.session_id;
    let (client, epoch, history) = {
        let mut shared_state = state
            .write()
            .map_err(|_| anyhow!("Unable to write shared state"))?;
        let Some(epoch) = shared_state.begin_turn(&session_id) else {
            return Err(ApiError::Conflict(format!(
                "Chat session {} is still answering the previous question",
                session_id
            )));
        };
        let history = shared_state.sessions[&session_id]
            .transcript
            .window(window)
            .to_vec();
        (shared_state.client.clone(), epoch, history)
    };

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let (done_tx, done_rx) = mpsc::unbounded_channel::<ChatEvent>();

    // Fragments first, then the event that ends the turn once the
    // fragment sender is dropped
    let sse_stream = UnboundedReceiverStream::new(rx)
        .map(|text| ChatEvent::Fragment { text })
        .chain(UnboundedReceiverStream::new(done_rx))
        .map(sse_event);

    tokio::spawn(async move {
        let result = answer(&client, &settings, &history, &question, Some(tx)).await;
        let turn = result.as_ref().ok().cloned().flatten();

        // Always settle the turn so the session accepts new questions
        let recorded = match state.write() {
            Ok(mut shared_state) => shared_state.finish_turn(&session_id, epoch, turn.clone()),
            Err(_) => {
                tracing::error!("Unable to write shared state");
                false
            }
        };

        let event = match (result, turn) {
            (Err(e), _) => {
                tracing::error!("Chat handler error: {}. Root cause: {}", e, e.root_cause());
                ChatEvent::Error {
                    message: format!("An error occurred while calling the Gemini API: {}", e),
                }
            }
            (Ok(_), Some(turn)) if recorded => ChatEvent::Turn { turn },
            (Ok(_), Some(_)) => {
                tracing::info!("Discarded answer for cleared chat session {}", session_id);
                ChatEvent::Done
            }
            (Ok(_), None) => ChatEvent::Done,
        };
        // The client may have gone away, the transcript is already
        // up to date
        let _ = done_tx.send(event);
    });

    let resp = Sse::new(sse_stream).keep_alive(
        KeepAlive::default()
            .text("keep-alive")
            .interval(Duration::from_secs(15)),
    );

    Ok(resp)
}

/// Create the chat router
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(chat_handler))
        .route("/{id}", get(chat_session).delete(chat_clear))
}
