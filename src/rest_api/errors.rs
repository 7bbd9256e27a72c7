//! # REST API Errors
//!
//! Error types for the REST API module.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::compiler::ValidationError;
use crate::schema::SchemaError;
use crate::store::StoreError;

/// Result type for REST operations
pub type RestResult<T> = Result<T, RestError>;

/// REST API errors
#[derive(Debug, Clone, Error)]
pub enum RestError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// Query compilation failed in strict mode
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Invalid query parameter
    #[error("Invalid query parameter: {0}")]
    InvalidQueryParam(String),

    /// Page number out of range or unparsable
    #[error("Invalid page: {0}")]
    InvalidPage(String),

    /// Record not found
    #[error("Not found")]
    NotFound,

    /// No resource registered under this name
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    // ==================
    // Server Errors (5xx)
    // ==================
    /// Resource definition does not match the schema
    #[error("Resource configuration error: {0}")]
    Config(String),

    /// Store failure while executing a compiled plan
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Internal error during request handling
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RestError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RestError::Validation(_) => StatusCode::BAD_REQUEST,
            RestError::InvalidQueryParam(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            RestError::InvalidPage(_) => StatusCode::NOT_FOUND,
            RestError::NotFound => StatusCode::NOT_FOUND,
            RestError::ResourceNotFound(_) => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            RestError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RestError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SchemaError> for RestError {
    fn from(err: SchemaError) -> Self {
        RestError::Internal(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl From<RestError> for ErrorResponse {
    fn from(err: RestError) -> Self {
        Self {
            code: err.status_code().as_u16(),
            error: err.to_string(),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse::from(self));
        (status, body).into_response()
    }
}
