use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("No slots available (max {0} sessions)")]
    NoSlotsAvailable(usize),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already done: {0}")]
    SessionAlreadyDone(String),

    #[error("{0}")]
    ContainerError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    pub fn error_code(&self) -> &'static str {
        match self {
            DaemonError::NoSlotsAvailable(_) => "NO_SLOTS_AVAILABLE",
            DaemonError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            DaemonError::SessionAlreadyDone(_) => "SESSION_ALREADY_DONE",
            DaemonError::ContainerError(_) => "CONTAINER_ERROR",
            DaemonError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            DaemonError::NoSlotsAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DaemonError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            DaemonError::SessionAlreadyDone(_) => StatusCode::CONFLICT,
            DaemonError::ContainerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DaemonError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bollard::errors::Error> for DaemonError {
    fn from(e: bollard::errors::Error) -> Self {
        DaemonError::ContainerError(e.to_string())
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        if matches!(self, DaemonError::Internal(_) | DaemonError::ContainerError(_)) {
            tracing::error!("{}", self);
        }

        let body = Json(json!({
            "detail": self.to_string(),
            "error_code": self.error_code(),
        }));

        (self.status(), body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
