//! Structured API error responses with error codes
//!
//! Every rejection produced by the admission layer renders through
//! [`ApiError`] so clients see one body shape.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors (1xxx)
    /// No authentication credentials provided
    AuthRequired,
    /// Invalid API key format or value
    InvalidApiKey,
    /// Invalid session token
    InvalidToken,
    /// Session token has expired
    TokenExpired,
    /// Insufficient scope for this operation
    InsufficientPermissions,

    // Rate limiting errors (2xxx)
    /// Too many requests, rate limit exceeded
    RateLimitExceeded,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            ErrorCode::AuthRequired => 1001,
            ErrorCode::InvalidApiKey => 1002,
            ErrorCode::InvalidToken => 1003,
            ErrorCode::TokenExpired => 1004,
            ErrorCode::InsufficientPermissions => 1005,
            ErrorCode::RateLimitExceeded => 2001,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::AuthRequired
            | ErrorCode::InvalidApiKey
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired => StatusCode::UNAUTHORIZED,
            ErrorCode::InsufficientPermissions => StatusCode::FORBIDDEN,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidApiKey => "INVALID_API_KEY",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
        };
        write!(f, "{}", code_str)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error details
    pub error: ErrorDetails,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Seconds until a throttled caller may retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    /// Create a new API error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                retry_after: None,
            },
        }
    }

    /// Set additional details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    /// Set retry-after seconds (for rate limiting)
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.error.retry_after = Some(seconds);
        self
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let retry_after = self.error.retry_after;
        let mut response = (status, Json(self)).into_response();

        // Add error code header for easier debugging
        if let Ok(code_value) = HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }

        response
    }
}

// ============================================================================
// Conversion from AuthError
// ============================================================================

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth => ApiError::new(ErrorCode::AuthRequired, "API key required"),
            // Format and lookup failures are indistinguishable to the client
            AuthError::InvalidFormat | AuthError::InvalidApiKey => {
                ApiError::new(ErrorCode::InvalidApiKey, "Invalid API key")
            }
            AuthError::MissingSession => {
                ApiError::new(ErrorCode::AuthRequired, "Session token required")
            }
            AuthError::InvalidSession(_) => {
                ApiError::new(ErrorCode::InvalidToken, "Invalid session token")
            }
            AuthError::SessionExpired => {
                ApiError::new(ErrorCode::TokenExpired, "Session token expired")
            }
            AuthError::InsufficientScope {
                required,
                available,
            } => ApiError::new(ErrorCode::InsufficientPermissions, "Insufficient scope")
                .with_details(serde_json::json!({
                    "required": required,
                    "available": available,
                })),
            AuthError::RateLimited {
                retry_after,
                message,
            } => ApiError::new(ErrorCode::RateLimitExceeded, message).with_retry_after(retry_after),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
