/// Unified error types for Padlock Cloud
use crate::{config::ConfigError, storage::StorageError};
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum PadlockError {
    /// Credentials absent, malformed or not matching any stored token
    #[error("Invalid auth token for {}", .email.as_deref().unwrap_or("unknown account"))]
    InvalidAuthToken {
        email: Option<String>,
        token: Option<String>,
    },

    /// Token matched but its validity window has elapsed
    #[error("Expired auth token for {email}")]
    ExpiredAuthToken { email: String, token: String },

    /// CSRF token missing or not matching the session
    #[error("Invalid CSRF token")]
    InvalidCsrfToken,

    /// Client api version older than the endpoint requires
    #[error("Api version {version} is not supported (required: {required})")]
    UnsupportedApiVersion { version: u32, required: u32 },

    /// No handler registered for the request method
    #[error("Method {method} not allowed")]
    MethodNotAllowed { method: Method, allowed: Vec<Method> },

    /// Requested entity is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed or incomplete request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Uploaded data exceeds the configured size limit
    #[error("Payload larger than {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Request throttle exhausted
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Any other unanticipated failure
    #[error("Server error: {0}")]
    Server(String),
}

/// How loudly an error gets logged by the error translation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Ordinary client mistakes; logged with a one-line request summary
    Info,
    /// Server faults and forgery signals; logged with the full request dump
    Error,
}

impl PadlockError {
    /// HTTP status code for this error
    pub fn status(&self) -> StatusCode {
        match self {
            PadlockError::InvalidAuthToken { .. } | PadlockError::ExpiredAuthToken { .. } => {
                StatusCode::UNAUTHORIZED
            }
            PadlockError::InvalidCsrfToken => StatusCode::FORBIDDEN,
            PadlockError::UnsupportedApiVersion { .. } | PadlockError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            PadlockError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            PadlockError::NotFound(_) | PadlockError::Storage(StorageError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            PadlockError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PadlockError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            PadlockError::Storage(_)
            | PadlockError::Io(_)
            | PadlockError::Config(_)
            | PadlockError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine readable error kind used in json responses
    pub fn kind(&self) -> &'static str {
        match self {
            PadlockError::InvalidAuthToken { .. } => "invalid_auth_token",
            PadlockError::ExpiredAuthToken { .. } => "expired_auth_token",
            PadlockError::InvalidCsrfToken => "invalid_csrf_token",
            PadlockError::UnsupportedApiVersion { .. } => "unsupported_api_version",
            PadlockError::MethodNotAllowed { .. } => "method_not_allowed",
            PadlockError::NotFound(_) | PadlockError::Storage(StorageError::NotFound) => {
                "not_found"
            }
            PadlockError::BadRequest(_) => "bad_request",
            PadlockError::PayloadTooLarge { .. } => "payload_too_large",
            PadlockError::RateLimitExceeded => "rate_limit_exceeded",
            PadlockError::Storage(_)
            | PadlockError::Io(_)
            | PadlockError::Config(_)
            | PadlockError::Server(_) => {
                "server_error"
            }
        }
    }

    /// Human readable message shown to clients. Server faults never leak details.
    pub fn message(&self) -> String {
        match self {
            PadlockError::InvalidAuthToken { .. } => {
                "The provided authentication credentials are invalid".to_string()
            }
            PadlockError::ExpiredAuthToken { .. } => {
                "The provided auth token has expired. Please request a new one".to_string()
            }
            PadlockError::InvalidCsrfToken => "Invalid or missing CSRF token".to_string(),
            PadlockError::UnsupportedApiVersion { .. } => {
                "The api version you are using is not supported. Please update your client"
                    .to_string()
            }
            PadlockError::MethodNotAllowed { method, .. } => {
                format!("Method {} not allowed for this endpoint", method)
            }
            PadlockError::NotFound(what) => format!("Not found: {}", what),
            PadlockError::Storage(StorageError::NotFound) => "Not found".to_string(),
            PadlockError::BadRequest(reason) => format!("Bad request: {}", reason),
            PadlockError::PayloadTooLarge { limit } => {
                format!("Data must not be larger than {} bytes", limit)
            }
            PadlockError::RateLimitExceeded => "Too many requests".to_string(),
            PadlockError::Storage(_)
            | PadlockError::Io(_)
            | PadlockError::Config(_)
            | PadlockError::Server(_) => {
                "Internal server error".to_string()
            }
        }
    }

    pub fn severity(&self) -> Severity {
        match self.status() {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::FORBIDDEN => Severity::Error,
            _ => Severity::Info,
        }
    }

    /// Snapshot of this error that can travel through response extensions
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            status: self.status(),
            kind: self.kind(),
            message: self.message(),
            detail: self.to_string(),
            severity: self.severity(),
        }
    }
}

/// Error body format: `{"status": 401, "error": "invalid_auth_token", "message": "..."}`
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    pub message: String,
}

/// Cloneable summary of a `PadlockError`, attached to error responses so the
/// error translation layer can log it and render it for the client.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
    pub detail: String,
    pub severity: Severity,
}

impl ErrorReport {
    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            status: self.status.as_u16(),
            error: self.kind.to_string(),
            message: self.message.clone(),
        }
    }
}

/// Convert PadlockError to HTTP response
impl IntoResponse for PadlockError {
    fn into_response(self) -> Response {
        let report = self.report();
        let mut response = (report.status, Json(report.body())).into_response();

        if let PadlockError::MethodNotAllowed { allowed, .. } = &self {
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }

        response.extensions_mut().insert(report);
        response
    }
}

/// Result type alias for service operations
pub type PadlockResult<T> = Result<T, PadlockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let invalid = PadlockError::InvalidAuthToken {
            email: Some("u@example.com".to_string()),
            token: None,
        };
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(invalid.kind(), "invalid_auth_token");

        let expired = PadlockError::ExpiredAuthToken {
            email: "u@example.com".to_string(),
            token: "t".to_string(),
        };
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(invalid.message(), expired.message());

        assert_eq!(PadlockError::InvalidCsrfToken.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            PadlockError::UnsupportedApiVersion { version: 0, required: 1 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PadlockError::Storage(StorageError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PadlockError::Server("boom".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let too_large = PadlockError::PayloadTooLarge { limit: 16 };
        assert_eq!(too_large.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(too_large.severity(), Severity::Info);
        assert!(too_large.message().contains("16"));
    }

    #[test]
    fn test_csrf_and_server_errors_are_escalated() {
        assert_eq!(PadlockError::InvalidCsrfToken.severity(), Severity::Error);
        assert_eq!(PadlockError::Server("x".into()).severity(), Severity::Error);
        assert_eq!(PadlockError::NotFound("x".into()).severity(), Severity::Info);
    }

    #[test]
    fn test_server_error_message_does_not_leak() {
        let err = PadlockError::Server("database exploded at /var/db".to_string());
        assert_eq!(err.message(), "Internal server error");
        assert!(err.report().detail.contains("/var/db"));
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let response = PadlockError::MethodNotAllowed {
            method: Method::PATCH,
            allowed: vec![Method::GET, Method::PUT],
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(header::ALLOW).unwrap(), "GET, PUT");
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }
}
