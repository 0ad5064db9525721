//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gatepass_core::GateError;
use gatepass_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Token already used")]
    AlreadyUsed,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Token expired, please reapply")]
    Expired,

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            AppError::AlreadyUsed => (StatusCode::CONFLICT, "already_used"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::Expired => (StatusCode::GONE, "expired"),
            AppError::NotEligible(_) => (StatusCode::UNPROCESSABLE_ENTITY, "not_eligible"),
            AppError::Internal(detail) => {
                error!(%detail, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };
        let message = match &self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
        });
        (status, body).into_response()
    }
}

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Forbidden(msg) => AppError::Forbidden(msg),
            GateError::InvalidState(msg) => AppError::InvalidState(msg),
            GateError::NotEligible(msg) => AppError::NotEligible(msg),
            GateError::NotFound(msg) => AppError::NotFound(msg),
            GateError::Expired => AppError::Expired,
            GateError::AlreadyUsed => AppError::AlreadyUsed,
            GateError::Conflict(msg) => AppError::Conflict(msg),
            GateError::Validation(msg) => AppError::Validation(msg),
            GateError::Invariant(_) | GateError::Store(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::TokenError(msg) => AppError::Unauthorized(msg),
            AuthError::UnknownRole(role) => AppError::Forbidden(format!("unknown role {role}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (GateError::Expired, StatusCode::GONE),
            (GateError::AlreadyUsed, StatusCode::CONFLICT),
            (GateError::NotEligible("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (GateError::InvalidState("x".into()), StatusCode::CONFLICT),
            (GateError::Invariant("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (GateError::Validation("x".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
