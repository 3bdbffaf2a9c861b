//! Public types for the chat API
use serde::{Deserialize, Serialize};

use crate::ai::chat::Turn;
use crate::gemini::Model;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    // Any setting left out falls back to the default
    pub model: Option<Model>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Events streamed back while answering a question. The SSE event name
/// matches `type`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A piece of the answer as it arrives
    Fragment { text: String },
    /// The completed turn, now part of the transcript
    Turn { turn: Turn },
    /// The question could not be answered. Nothing was recorded.
    Error { message: String },
    /// The model returned an empty answer. Nothing was recorded.
    Done,
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Fragment { .. } => "fragment",
            ChatEvent::Turn { .. } => "turn",
            ChatEvent::Error { .. } => "error",
            ChatEvent::Done => "done",
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ChatTranscriptResponse {
    pub transcript: Vec<Turn>,
}
