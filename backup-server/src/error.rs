use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use backup_engine::EngineError;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let msg = e.to_string();
        match e {
            EngineError::NotConfigured(_) | EngineError::RestoreDisabled => {
                AppError::ServiceUnavailable(msg)
            }
            EngineError::MalformedBackup(_)
            | EngineError::InvalidFilename(_)
            | EngineError::InvalidInput(_)
            | EngineError::InvalidTeamPayload(_) => AppError::BadRequest(msg),
            EngineError::MissingEncryptionParams(_)
            | EngineError::Decryption
            | EngineError::IntegrityMismatch { .. }
            | EngineError::KeyVersionMismatch { .. } => AppError::Unprocessable(msg),
            EngineError::WrongTeamPassword => AppError::Unauthorized(msg),
            EngineError::ArchiveNotFound(_)
            | EngineError::TeamNotEnrolled(_)
            | EngineError::ReportNotFound(_) => AppError::NotFound(msg),
            EngineError::AlreadyExists(_)
            | EngineError::TeamAlreadyEnrolled(_)
            | EngineError::StaleKeyVersion { .. } => AppError::Conflict(msg),
            EngineError::Store { .. }
            | EngineError::Crypto(_)
            | EngineError::Io(_)
            | EngineError::Serialization(_) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Unprocessable(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            AppError::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "error": msg }))).into_response()
    }
}
