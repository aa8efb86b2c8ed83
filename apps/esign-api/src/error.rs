//! Error taxonomy for the e-signature API.
//!
//! Every variant maps to a stable `kind` string in the JSON body so clients
//! can branch on it without parsing messages. Nothing is retried server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use esign_core::CoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("operation not allowed while document is {0}")]
    InvalidState(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("link or token has expired")]
    Expired,

    #[error("no recipients are assigned to any signature field")]
    NoRecipients,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::Expired => "expired",
            Self::NoRecipients => "no_recipients",
            Self::Validation(_) => "validation_error",
            Self::Database(_) => "upstream_failure",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidState { status } => Self::InvalidState(status.to_string()),
            CoreError::NoRecipients => Self::NoRecipients,
            CoreError::NotAssigned { .. } => Self::Forbidden,
            CoreError::AssignmentSigned { .. } | CoreError::SignatureConflict { .. } => {
                Self::Conflict(err.to_string())
            }
            CoreError::ToolFrozen { .. } => Self::Conflict(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "missing or invalid credentials".to_string(),
            ),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            ApiError::InvalidState(state) => (
                StatusCode::CONFLICT,
                format!("operation not allowed while document is {state}"),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Expired => (StatusCode::GONE, "link or token has expired".to_string()),
            ApiError::NoRecipients => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "no recipients are assigned to any signature field".to_string(),
            ),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database error".to_string(),
                )
            }
            ApiError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "kind": self.kind(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
