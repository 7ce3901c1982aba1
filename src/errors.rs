use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::client::ClientError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
        details: Value,
    },
    #[error("invalid request: {message}")]
    InvalidRequest {
        code: &'static str,
        message: &'static str,
    },
    #[error("not found: {message}")]
    NotFound {
        code: &'static str,
        message: &'static str,
        details: Value,
    },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    Upstream(#[from] ClientError),
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
            details: json!({}),
        }
    }

    pub fn bad_request_with_details(
        code: &'static str,
        message: impl Into<String>,
        details: Value,
    ) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
            details,
        }
    }

    pub fn invalid_request(code: &'static str, message: &'static str) -> Self {
        Self::InvalidRequest { code, message }
    }

    pub fn not_found(code: &'static str, message: &'static str, details: Value) -> Self {
        Self::NotFound {
            code,
            message,
            details,
        }
    }

    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Upstream(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            Self::BadRequest {
                code,
                message,
                details,
            } => (StatusCode::BAD_REQUEST, code, message, details),
            Self::InvalidRequest { code, message } => {
                (StatusCode::BAD_REQUEST, code, message.to_string(), json!({}))
            }
            Self::NotFound {
                code,
                message,
                details,
            } => (StatusCode::NOT_FOUND, code, message.to_string(), details),
            Self::Unauthorized { code, message } => (
                StatusCode::UNAUTHORIZED,
                code,
                message.to_string(),
                json!({}),
            ),
            Self::Cancelled => (
                StatusCode::CONFLICT,
                "request_cancelled",
                "request cancelled".to_string(),
                json!({}),
            ),
            Self::Upstream(err) => {
                tracing::warn!(error = %err, "upstream call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_unavailable",
                    err.to_string(),
                    json!({}),
                )
            }
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                    json!({}),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details,
            }),
        )
            .into_response()
    }
}
