//! Piece error types
//!
//! Every action, trigger and options lookup fails with a [`PieceError`]. The
//! variants mirror what can go wrong when proxying a vendor API so that the
//! runtime can decide whether a failed poll is worth retrying and which HTTP
//! status to surface to the host.

use axum::http::StatusCode;

use crate::framework::property::PropertyError;
use crate::webhook_verification::VerificationError;

#[derive(Debug, thiserror::Error)]
pub enum PieceError {
    /// Non-success status from the vendor that has no more specific variant
    #[error("HTTP error {status}: {}", body.as_deref().unwrap_or("No body"))]
    Http { status: u16, body: Option<String> },

    #[error("Authentication error: {details}")]
    Unauthorized { details: String },

    #[error("Rate limit exceeded{}", retry_after.map(|s| format!(" (retry after: {}s)", s)).unwrap_or_default())]
    RateLimited { retry_after: Option<u64> },

    #[error("Network error: {details}")]
    Network { details: String, retryable: bool },

    #[error("Malformed response: {details}")]
    MalformedResponse { details: String },

    #[error("Invalid properties: {0}")]
    InvalidProps(#[from] PropertyError),

    #[error("Invalid auth: {details}")]
    InvalidAuth { details: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Configuration error: {details}")]
    Configuration { details: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Webhook verification failed: {0}")]
    Verification(#[from] VerificationError),
}

impl PieceError {
    pub fn malformed<S: Into<String>>(details: S) -> Self {
        PieceError::MalformedResponse {
            details: details.into(),
        }
    }

    pub fn invalid_auth<S: Into<String>>(details: S) -> Self {
        PieceError::InvalidAuth {
            details: details.into(),
        }
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        PieceError::NotFound { what: what.into() }
    }

    /// Whether running the same operation again later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            PieceError::Http { status, .. } => *status >= 500,
            PieceError::RateLimited { .. } | PieceError::MalformedResponse { .. } => true,
            PieceError::Network { retryable, .. } => *retryable,
            PieceError::Store(_) => true,
            _ => false,
        }
    }

    /// Status code used when the error is surfaced through the API
    pub fn status_code(&self) -> StatusCode {
        match self {
            PieceError::Http { status, .. } if *status >= 500 => StatusCode::BAD_GATEWAY,
            PieceError::Http { status, .. } if *status == 404 => StatusCode::NOT_FOUND,
            PieceError::Http { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PieceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            PieceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            PieceError::Network { .. } | PieceError::MalformedResponse { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PieceError::InvalidProps(_) | PieceError::InvalidAuth { .. } => {
                StatusCode::BAD_REQUEST
            }
            PieceError::NotFound { .. } => StatusCode::NOT_FOUND,
            PieceError::Configuration { .. } | PieceError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PieceError::Verification(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Machine readable code, SCREAMING_SNAKE_CASE
    pub fn error_code(&self) -> &'static str {
        match self {
            PieceError::Http { .. } | PieceError::MalformedResponse { .. } => "PROVIDER_ERROR",
            PieceError::Unauthorized { .. } => "UNAUTHORIZED",
            PieceError::RateLimited { .. } => "RATE_LIMITED",
            PieceError::Network { .. } => "PROVIDER_UNAVAILABLE",
            PieceError::InvalidProps(_) | PieceError::InvalidAuth { .. } => "VALIDATION_FAILED",
            PieceError::NotFound { .. } => "NOT_FOUND",
            PieceError::Configuration { .. } | PieceError::Store(_) => "INTERNAL_SERVER_ERROR",
            PieceError::Verification(_) => "INVALID_SIGNATURE",
        }
    }

    /// Serializable summary persisted as a trigger's `last_error`
    pub fn to_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "code": self.error_code(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        if let PieceError::RateLimited {
            retry_after: Some(seconds),
        } = self
        {
            value["retry_after_secs"] = serde_json::json!(seconds);
        }
        value
    }
}

impl From<sea_orm::DbErr> for PieceError {
    fn from(err: sea_orm::DbErr) -> Self {
        PieceError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(PieceError::Http { status: 503, body: None }.is_retryable());
        assert!(!PieceError::Http { status: 400, body: None }.is_retryable());
        assert!(PieceError::RateLimited { retry_after: Some(3) }.is_retryable());
        assert!(!PieceError::Unauthorized { details: "x".into() }.is_retryable());
        assert!(
            PieceError::Network {
                details: "timeout".into(),
                retryable: true
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            PieceError::Http { status: 502, body: None }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            PieceError::Http { status: 404, body: None }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PieceError::Http { status: 422, body: None }.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            PieceError::from(PropertyError::Missing { name: "a".into() }).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_display_and_json() {
        let err = PieceError::RateLimited {
            retry_after: Some(30),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded (retry after: 30s)");
        let json = err.to_json();
        assert_eq!(json["code"], "RATE_LIMITED");
        assert_eq!(json["retry_after_secs"], 30);

        let err = PieceError::Http {
            status: 400,
            body: None,
        };
        assert_eq!(err.to_string(), "HTTP error 400: No body");
    }
}
