use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use marquee_reservation::{ErrorKind, ReservationError};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    NotFoundError(String),
    ConflictError {
        message: String,
        reason: &'static str,
    },
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError { message, reason } => {
                (StatusCode::CONFLICT, json!({ "error": message, "reason": reason }))
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        match err.kind() {
            ErrorKind::Conflict => AppError::ConflictError {
                message: err.to_string(),
                reason: err.reason().unwrap_or("conflict"),
            },
            ErrorKind::NotFound => AppError::NotFoundError(err.to_string()),
            ErrorKind::Internal => AppError::InternalServerError(format!("{:#}", anyhow::Error::new(err))),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        Self::Anyhow(err.into())
    }
}
