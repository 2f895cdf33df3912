use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::gateway::access::AccessDenial;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors produced by the gateway itself (as opposed to backend responses,
/// which are passed through untouched)
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Policy =====
    #[error("Access denied: {0}")]
    Forbidden(AccessDenial),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Circuit breaker is open - service is unavailable")]
    CircuitOpen,

    // ===== Authentication =====
    #[error("Authentication error: {0}")]
    Unauthorized(String),

    // ===== Routing & Upstream =====
    #[error("No endpoint available for route '{0}'")]
    RouteNotFound(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ===== Internal =====
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// User-facing message. Token failures surface their reason in the body
    /// rather than in a header.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Forbidden(denial) => format!("Forbidden: {}", denial),
            GatewayError::RateLimited => "Too many requests".to_string(),
            GatewayError::CircuitOpen => "Service unavailable".to_string(),
            GatewayError::Unauthorized(msg) => msg.clone(),
            GatewayError::RouteNotFound(_) => "Not found".to_string(),
            GatewayError::Upstream(_) => "Bad gateway".to_string(),
            GatewayError::InvalidRequest(msg) => msg.clone(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Forbidden(denial) => denial.error_code(),
            GatewayError::RateLimited => "RATE_LIMITED",
            GatewayError::CircuitOpen => "CIRCUIT_OPEN",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::RouteNotFound(_) => "ROUTE_NOT_FOUND",
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        match self {
            GatewayError::Upstream(_) | GatewayError::Internal(_) => {
                tracing::error!(
                    error = %self,
                    error_code = %code,
                    status = %status.as_u16(),
                    "Gateway error occurred"
                );
            }
            GatewayError::Unauthorized(_) => {
                tracing::warn!(error = %self, error_code = %code, "Authentication failed");
            }
            _ => {
                tracing::debug!(error = %self, error_code = %code, "Request rejected");
            }
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let body = json!({
            "error": self.user_message(),
            "error_code": self.error_code(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GatewayError::Forbidden(AccessDenial::Blacklisted).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(GatewayError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(GatewayError::CircuitOpen.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::unauthorized("missing").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::RouteNotFound("order".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::Upstream("refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = GatewayError::internal("db password is hunter2");
        assert_eq!(err.user_message(), "Internal server error");

        let err = GatewayError::Upstream("connect to 10.1.2.3:9000 refused".into());
        assert!(!err.user_message().contains("10.1.2.3"));
    }

    #[test]
    fn test_unauthorized_reason_is_in_message() {
        let err = GatewayError::unauthorized("Invalid token: ExpiredSignature");
        assert!(err.user_message().contains("ExpiredSignature"));
    }
}
