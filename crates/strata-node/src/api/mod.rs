//! HTTP and WebSocket handlers.

pub mod health;
pub mod intents;
pub mod keys;
pub mod ws;

use axum::http::StatusCode;
use strata_core::StrataError;

/// Map a host error onto an HTTP error response.
pub fn error_response(err: StrataError) -> (StatusCode, String) {
    let status = match &err {
        StrataError::MissingIntentId { .. }
        | StrataError::InvalidIntent(_)
        | StrataError::Serialization(_) => StatusCode::BAD_REQUEST,
        StrataError::InvalidSchema(_) | StrataError::InvalidSnapshot(_) => StatusCode::CONFLICT,
        StrataError::UnknownIntent { .. } => StatusCode::NOT_FOUND,
        StrataError::LivenessViolation { .. } => StatusCode::TOO_MANY_REQUESTS,
        StrataError::Configuration(_) | StrataError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
