//! Public API types

use axum::response::{IntoResponse, Response};
use http::StatusCode;

// Errors

pub enum ApiError {
    /// The request can't be answered as sent
    BadRequest(String),
    NotFound(String),
    /// The session is busy answering another question
    Conflict(String),
    Internal(anyhow::Error),
}

/// Convert `ApiError` into an Axum compatible response.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::Internal(err) => {
                // Always log the error
                tracing::error!("{}", err);

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Something went wrong: {}", err),
                )
                    .into_response()
            }
        }
    }
}

/// Enables using `?` on functions that return `Result<_,
/// anyhow::Error>` to turn them into `Result<_, ApiError>`
impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

// Re-export public types from each route

pub mod chat {
    pub use crate::api::routes::chat::public::*;
}

pub mod settings {
    pub use crate::api::routes::settings::public::*;
}
