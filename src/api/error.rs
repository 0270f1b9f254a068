use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::errors::BackupError;

/// Errors surfaced to HTTP callers. Bodies carry generic messages only; the
/// underlying cause is logged by the manager.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid backup filename")]
    InvalidFilename,
    #[error("unknown backup type: {0}")]
    UnknownBackupType(String),
    #[error("restore already in progress")]
    RestoreInProgress,
    #[error("{0}")]
    OperationFailed(&'static str),
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::InvalidFilename(_) => ApiError::InvalidFilename,
            BackupError::UnknownBackupType(kind) => ApiError::UnknownBackupType(kind),
            _ => ApiError::OperationFailed("Backup operation failed"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Missing or invalid bearer token.".to_string(),
            ),
            ApiError::InvalidFilename => (
                StatusCode::BAD_REQUEST,
                "INVALID_FILENAME",
                "Invalid backup filename".to_string(),
            ),
            ApiError::UnknownBackupType(kind) => (
                StatusCode::BAD_REQUEST,
                "INVALID_BACKUP_TYPE",
                format!("Unknown backup type '{kind}', expected 'auto' or 'manual'"),
            ),
            ApiError::RestoreInProgress => (
                StatusCode::CONFLICT,
                "RESTORE_IN_PROGRESS",
                "Another restore is already running".to_string(),
            ),
            ApiError::OperationFailed(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                message.to_string(),
            ),
        };

        let body = ApiErrorResponse {
            error: ApiErrorBody {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
