//! Store error types
//!
//! Error codes:
//! - RP_STORE_SCHEMA (field/model resolution, record validation)
//! - RP_INVALID_LOOKUP
//! - RP_INVALID_VALUE
//! - RP_EMPTY_RESULT_SET
//! - RP_INVALID_AGGREGATE
//! - RP_INVALID_ORDERING
//! - RP_INVALID_DISTINCT
//! - RP_DUPLICATE_KEY
//! - RP_STORE_INTERNAL

use thiserror::Error;

use crate::schema::SchemaError;

/// Store error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("unsupported lookup '{lookup}' for field '{field}'")]
    InvalidLookup { field: String, lookup: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// The filter can never match (e.g. `in` with an empty list)
    #[error("empty result set")]
    EmptyResultSet,

    #[error("invalid aggregate '{alias}': {reason}")]
    InvalidAggregate { alias: String, reason: String },

    #[error("cannot order by '{term}': {reason}")]
    InvalidOrdering { term: String, reason: String },

    #[error("invalid distinct: {0}")]
    InvalidDistinct(String),

    #[error("duplicate primary key {pk} for '{model}'")]
    DuplicateKey { model: String, pk: String },

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn lock_poisoned() -> Self {
        StoreError::Internal("Lock poisoned".into())
    }

    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Schema(_) => "RP_STORE_SCHEMA",
            StoreError::InvalidLookup { .. } => "RP_INVALID_LOOKUP",
            StoreError::InvalidValue { .. } => "RP_INVALID_VALUE",
            StoreError::EmptyResultSet => "RP_EMPTY_RESULT_SET",
            StoreError::InvalidAggregate { .. } => "RP_INVALID_AGGREGATE",
            StoreError::InvalidOrdering { .. } => "RP_INVALID_ORDERING",
            StoreError::InvalidDistinct(_) => "RP_INVALID_DISTINCT",
            StoreError::DuplicateKey { .. } => "RP_DUPLICATE_KEY",
            StoreError::Internal(_) => "RP_STORE_INTERNAL",
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
