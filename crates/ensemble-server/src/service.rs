//! Shared application state and API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ensemble_contract::CheckpointStore;
use ensemble_engine::{AnyCoordinator, CoordinatorError};
use serde_json::json;
use std::sync::Arc;

/// State shared by all routes.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<AnyCoordinator>,
    pub store: Arc<dyn CheckpointStore>,
}

/// API-level errors rendered as JSON problem bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::ThreadNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::debug!(status = %status, error = %self, "api error");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
