//! Request-level errors
//!
//! Every variant is recovered into an HTTP error response; none of them ends
//! the connection or the process.

use hyper::{Method, StatusCode};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },

    #[error("request body of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("internal handler failure: {0}")]
    Internal(String),
}

impl HandlerError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Raised when a route table registers the same (method, path) twice
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("duplicate route {method} {path}")]
pub struct DuplicateRoute {
    pub method: Method,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = HandlerError::NotFound {
            method: Method::GET,
            path: "/x".to_string(),
        };
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            HandlerError::PayloadTooLarge { size: 10, limit: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            HandlerError::Malformed("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HandlerError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
