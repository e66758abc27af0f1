// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Tier required: {0}")]
    TierRequired(&'static str),

    #[error("Daily quota exceeded: {0}")]
    QuotaExceeded(&'static str),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Platform API error: {0}")]
    PlatformApi(String),

    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Sentinel message for platform 429 responses.
    pub const PLATFORM_RATE_LIMIT: &'static str = "Rate limited by platform";
    /// Sentinel message for platform 401 responses (expired/revoked token).
    pub const PLATFORM_TOKEN_ERROR: &'static str = "Token expired or invalid";

    /// Whether this error represents an expired or revoked platform token.
    pub fn is_platform_token_error(&self) -> bool {
        matches!(self, AppError::PlatformApi(msg)
            if msg.contains(Self::PLATFORM_TOKEN_ERROR) || msg.contains("invalid_grant"))
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::TierRequired(tier) => (
                StatusCode::FORBIDDEN,
                "tier_required",
                Some(tier.to_string()),
            ),
            AppError::QuotaExceeded(kind) => (
                StatusCode::TOO_MANY_REQUESTS,
                "quota_exceeded",
                Some(kind.to_string()),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::PlatformApi(msg) => {
                (StatusCode::BAD_GATEWAY, "platform_error", Some(msg.clone()))
            }
            AppError::Upstream(msg) => {
                (StatusCode::BAD_GATEWAY, "upstream_error", Some(msg.clone()))
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
