//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use importer_engine::Error as ImportError;
use serde::Serialize;
use serde_json::Value;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Import session not found: {0}")]
    SessionNotFound(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Import(e) => match e {
                ImportError::ValidationFailed(_) | ImportError::InvalidInputDocument(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                ImportError::CollisionDetection(_) | ImportError::PartialCommitFailure { .. } => {
                    StatusCode::BAD_GATEWAY
                }
                ImportError::InvalidTransition { .. } => StatusCode::CONFLICT,
                ImportError::ActionDisabled(_) => StatusCode::FORBIDDEN,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_message, details) = match self {
            AppError::Import(ImportError::PartialCommitFailure { failed, total }) => {
                tracing::warn!(failed = failed.len(), total, "Import finished with failures");
                let message = format!("{} of {} commits failed", failed.len(), total);
                (message, serde_json::to_value(&failed).ok())
            }
            AppError::Import(e) => {
                tracing::warn!("Import error: {}", e);
                (e.to_string(), None)
            }
            AppError::BadRequest(msg) => (msg, None),
            AppError::SessionNotFound(id) => (format!("Import session not found: {}", id), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
