//! API routes module

pub mod chat;
pub mod settings;

use std::sync::{Arc, RwLock};

use crate::api::state::AppState;
use axum::Router;

type SharedState = Arc<RwLock<AppState>>;

/// Create the combined API router
pub fn router() -> Router<SharedState> {
    Router::new()
        // Chat routes
        .nest("/chat", chat::router())
        // Generation settings offered to the UI
        .nest("/settings", settings::router())
}
