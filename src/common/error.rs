//! # Error Taxonomy
//!
//! Every coordinator operation fails with one of the [`CoordError`] kinds.
//! Each kind maps onto exactly one HTTP status so the transport layer never
//! has to inspect messages to pick a response code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::common::messages::ErrorResponse;

pub type CoordResult<T> = Result<T, CoordError>;

#[derive(Debug, Error)]
pub enum CoordError {
    /// Malformed or missing request fields
    #[error("{0}")]
    Validation(String),

    /// `register` was called with a role that is neither actuator nor capture
    #[error("Invalid device role: {0}")]
    InvalidRole(String),

    /// Missing token, or a token that does not match the expected role
    #[error("Unauthorized")]
    Unauthorized,

    /// Scan already running, or nothing running to act on
    #[error("{0}")]
    Conflict(String),

    /// A required device is unregistered or not alive
    #[error("{0}")]
    Unavailable(String),

    /// An outbound device RPC failed or timed out
    #[error("{0}")]
    Upstream(String),

    /// Photo or status persistence failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoordError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordError::Validation(_) | CoordError::InvalidRole(_) => StatusCode::BAD_REQUEST,
            CoordError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoordError::Conflict(_) => StatusCode::CONFLICT,
            CoordError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoordError::Upstream(_) => StatusCode::BAD_GATEWAY,
            CoordError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for CoordError {
    fn from(err: std::io::Error) -> Self {
        CoordError::Storage(err.to_string())
    }
}

impl IntoResponse for CoordError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (self.status_code(), body).into_response()
    }
}
