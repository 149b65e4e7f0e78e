//! Error handling module
//!
//! Every failure below the transport layer is recovered into the uniform
//! response envelope. Each error kind carries a stable string code, a
//! user-facing message, and an optional developer message that is only
//! surfaced when debug mode is enabled.

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

/// Generic message for every authentication failure kind. The caller must
/// never be able to tell which check rejected the credential.
pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication required";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Covers NoCredential, InvalidFormat, InvalidCredential and
    /// AccountDisabled. The distinction lives only in audit events.
    #[error("{AUTH_REQUIRED_MESSAGE}")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Too many failed authentication attempts, try again later")]
    TooManyFailedAttempts,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Unknown operation: {name}")]
    UnknownOperation { name: String },

    #[error("Insufficient permissions for this operation")]
    Forbidden,

    #[error("This operation requires confirm=true")]
    ConfirmationRequired,

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("An internal error occurred")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl GatewayError {
    pub fn internal(source: anyhow::Error) -> Self {
        Self::Internal { source }
    }

    /// Stable machine-readable code surfaced in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::TooManyFailedAttempts => "TOO_MANY_FAILED_ATTEMPTS",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::UnknownOperation { .. } => "UNKNOWN_OPERATION",
            Self::Forbidden => "FORBIDDEN",
            Self::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited | Self::TooManyFailedAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::UnknownOperation { .. } | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ConfirmationRequired | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the failure envelope. Internal error detail is gated behind
    /// the debug flag; everything else already carries a safe message.
    pub fn envelope(&self, debug: bool) -> Envelope {
        let message = match self {
            Self::Internal { source } if debug => format!("internal error: {source:#}"),
            other => other.to_string(),
        };
        Envelope::failure(self.code(), message)
    }
}

/// Uniform response envelope for every operation, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}
