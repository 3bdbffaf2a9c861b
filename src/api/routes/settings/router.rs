//! Router for the settings API

use std::sync::{Arc, RwLock};

use axum::{Json, Router, extract::State, routing::get};

use super::public::{Range, SettingsResponse};
use crate::ai::chat::models::{
    DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_TEMPERATURE, MAX_OUTPUT_TOKENS_RANGE,
    MAX_OUTPUT_TOKENS_STEP, TEMPERATURE_RANGE, TEMPERATURE_STEP,
};
use crate::api::state::AppState;
use crate::gemini::Model;

type SharedState = Arc<RwLock<AppState>>;

/// The models and setting ranges the UI should offer
async fn settings(State(state): State<SharedState>) -> Json<SettingsResponse> {
    let default_model = state
        .read()
        .expect("Unable to read share state")
        .config
        .default_model;

    Json(SettingsResponse {
        models: Model::ALL.to_vec(),
        default_model,
        max_tokens: Range {
            min: *MAX_OUTPUT_TOKENS_RANGE.start(),
            max: *MAX_OUTPUT_TOKENS_RANGE.end(),
            step: MAX_OUTPUT_TOKENS_STEP,
            default: DEFAULT_MAX_OUTPUT_TOKENS,
        },
        temperature: Range {
            min: *TEMPERATURE_RANGE.start(),
            max: *TEMPERATURE_RANGE.end(),
            step: TEMPERATURE_STEP,
            default: DEFAULT_TEMPERATURE,
        },
    })
}

/// Create the settings router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(settings))
}
