//! Error types shared by every layer of the store.
//!
//! Handlers keep the actix-web signature `Result<HttpResponse, Error>` and
//! use `?` on `StoreError`, which maps itself onto a status code and a JSON
//! body through `ResponseError`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors raised by placement, proxying, health tracking and capability tokens
#[derive(Debug, Error)]
pub enum StoreError {
    /// No active and healthy node is registered
    #[error("no storage available: master is full and no active healthy node is registered")]
    NoStorageAvailable,

    /// The master and the selected node cannot hold the object
    #[error("no storage space available: {0}")]
    CapacityExhausted(String),

    /// The node is inactive, unhealthy or could not be reached
    #[error("storage node unavailable: {0}")]
    NodeUnavailable(String),

    /// The node answered with a non-success status
    #[error("storage node rejected the request with status {status}")]
    NodeRejected { status: u16 },

    /// Timeout or connection failure while talking to a node
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("signature not found")]
    TokenNotFound,

    #[error("signature has expired")]
    TokenExpired,

    #[error("single-use signature has already been used")]
    TokenAlreadyUsed,

    /// Signature exists but no longer matches the HMAC of its bucket/object
    #[error("signature integrity check failed")]
    IntegrityFailure,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// True for the errors a caller sees as "link expired/used"
    pub fn is_expiry_or_replay(&self) -> bool {
        matches!(self, StoreError::TokenExpired | StoreError::TokenAlreadyUsed)
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Transport(format!("timed out: {}", err))
        } else if err.is_connect() {
            StoreError::NodeUnavailable(format!("connection failed: {}", err))
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

impl ResponseError for StoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            StoreError::NoStorageAvailable | StoreError::CapacityExhausted(_) => {
                StatusCode::INSUFFICIENT_STORAGE
            }
            StoreError::NodeUnavailable(_) | StoreError::NodeRejected { .. } => StatusCode::BAD_GATEWAY,
            StoreError::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
            StoreError::TokenNotFound | StoreError::IntegrityFailure | StoreError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            StoreError::TokenExpired | StoreError::TokenAlreadyUsed => StatusCode::GONE,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::Conflict(_) => StatusCode::CONFLICT,
            StoreError::Database(_)
            | StoreError::Io(_)
            | StoreError::Serialization(_)
            | StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StoreError::NoStorageAvailable.status_code(), StatusCode::INSUFFICIENT_STORAGE);
        assert_eq!(StoreError::NodeRejected { status: 500 }.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(StoreError::TokenExpired.status_code(), StatusCode::GONE);
        assert_eq!(StoreError::TokenAlreadyUsed.status_code(), StatusCode::GONE);
        assert_eq!(StoreError::IntegrityFailure.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(StoreError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_expiry_or_replay() {
        assert!(StoreError::TokenExpired.is_expiry_or_replay());
        assert!(StoreError::TokenAlreadyUsed.is_expiry_or_replay());
        assert!(!StoreError::TokenNotFound.is_expiry_or_replay());
    }
}
