use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("unsupported backend `{0}`")]
    UnknownBackend(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::UnknownBackend(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Backend(error) => match error {
                BackendError::CredentialMissing { .. } | BackendError::Configuration(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                BackendError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                BackendError::Upstream { status, .. } => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                BackendError::ContentBlocked { .. } => StatusCode::BAD_REQUEST,
                BackendError::Stream { .. } => StatusCode::BAD_GATEWAY,
            },
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::Backend(BackendError::Upstream { detail, .. }) => Some(detail.clone()),
            AppError::Backend(BackendError::ContentBlocked {
                reason,
                safety_ratings,
                ..
            }) => Some(json!({
                "message": format!("Blocked due to: {reason}"),
                "blockReason": reason,
                "safetyRatings": safety_ratings.clone().unwrap_or_else(|| Value::from("N/A")),
            })),
            _ => None,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::UnknownBackend(_) => "unknown_backend",
            AppError::Internal(_) => "server_error",
            AppError::Backend(error) => match error {
                BackendError::CredentialMissing { .. } | BackendError::Configuration(_) => {
                    "configuration_error"
                }
                BackendError::Unavailable { .. } => "backend_unavailable",
                BackendError::Upstream { .. } => "upstream_error",
                BackendError::ContentBlocked { .. } => "content_blocked",
                BackendError::Stream { .. } => "backend_error",
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_type = self.error_type().to_owned();
        let message = self.to_string();
        let details = self.details();

        let payload = ErrorEnvelope {
            error: ErrorBody {
                message,
                error_type,
                details,
            },
        };

        (status, Json(payload)).into_response()
    }
}
