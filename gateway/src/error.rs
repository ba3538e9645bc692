//! Error types for the VAHTI gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::token::TokenError;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Main error type for the discovery protocol
///
/// Authentication failures deliberately render with a single uniform
/// message: the caller must not be able to tell which token check failed.
/// The underlying [`TokenError`] is retained as the source for logging.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Malformed identifiers, URIs, blank required fields, or a callback
    /// mismatch on token refresh
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Realm mismatch on refresh, or a builtin plugin attempting
    /// deregistration
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Token validation failure, surfaced uniformly
    #[error("authentication failed")]
    Authentication(#[from] TokenError),

    /// Unknown plugin or node id
    #[error("not found: {0}")]
    NotFound(String),

    /// Tree structural violation or connect URL uniqueness violation
    #[error("conflict: {0}")]
    Conflict(String),

    /// Job scheduling/cancellation failure; reported but does not roll
    /// back the triggering registration
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl DiscoveryError {
    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            DiscoveryError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DiscoveryError::Authentication(_) => StatusCode::UNAUTHORIZED,
            DiscoveryError::Forbidden(_) => StatusCode::FORBIDDEN,
            DiscoveryError::NotFound(_) => StatusCode::NOT_FOUND,
            DiscoveryError::Conflict(_) => StatusCode::CONFLICT,
            DiscoveryError::Scheduling(_) | DiscoveryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DiscoveryError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Display for Authentication is already the uniform message, so the
        // specific failed check never reaches the wire.
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DiscoveryError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DiscoveryError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            DiscoveryError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DiscoveryError::Conflict("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            DiscoveryError::Scheduling("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_authentication_failures_render_identically() {
        let expired = DiscoveryError::from(TokenError::Expired);
        let signature = DiscoveryError::from(TokenError::BadSignature);
        let audience = DiscoveryError::from(TokenError::AudienceMismatch);
        let origin = DiscoveryError::from(TokenError::OriginMismatch);

        let messages: Vec<String> = [expired, signature, audience, origin]
            .iter()
            .map(ToString::to_string)
            .collect();

        assert!(messages.iter().all(|m| m == "authentication failed"));
    }

    #[test]
    fn test_authentication_maps_to_unauthorized() {
        let err = DiscoveryError::from(TokenError::Expired);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
