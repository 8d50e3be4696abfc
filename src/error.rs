use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store rejected write: {0}")]
    StoreRejected(String),

    #[error("Query error: {0}")]
    QuerySyntax(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<duckdb::Error> for TelemetryError {
    fn from(err: duckdb::Error) -> Self {
        TelemetryError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

impl TelemetryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            TelemetryError::Validation(_)
            | TelemetryError::BadRequest(_)
            | TelemetryError::Serialization(_) => StatusCode::BAD_REQUEST,
            TelemetryError::NotFound(_) => StatusCode::NOT_FOUND,
            TelemetryError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TelemetryError::StoreRejected(_)
            | TelemetryError::QuerySyntax(_)
            | TelemetryError::Submission(_) => StatusCode::BAD_GATEWAY,
            TelemetryError::Database(_)
            | TelemetryError::Config(_)
            | TelemetryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(%status, "{}", self);
        }

        let body = Json(json!({
            "detail": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
