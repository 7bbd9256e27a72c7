//! Query compilation errors
//!
//! Every failure is tagged with the [`Stage`] that produced it so the REST
//! layer can render `"<stage>: <message>"` and silent mode can record it
//! under `options.<stage>`.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::expr::ParseError;
use crate::store::StoreError;

/// Compilation stage that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fields,
    Filters,
    Aggregates,
    OrderBy,
    Distinct,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fields => "fields",
            Stage::Filters => "filters",
            Stage::Aggregates => "aggregates",
            Stage::OrderBy => "order_by",
            Stage::Distinct => "distinct",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure inside one compilation stage
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("{0}")]
    FieldResolution(String),

    #[error("invalid value '{value}' for '{key}': {reason}")]
    Coercion {
        key: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{0}")]
    AggregateSpec(String),

    #[error("{0}")]
    Ordering(String),

    #[error("{0}")]
    Distinct(String),

    #[error("{0}")]
    Internal(String),
}

impl QueryError {
    pub fn coercion(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        QueryError::Coercion {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Error code (RP_QUERY_*)
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::FieldResolution(_) => "RP_QUERY_FIELD_RESOLUTION",
            QueryError::Coercion { .. } => "RP_QUERY_COERCION",
            QueryError::Parse(_) => "RP_QUERY_PARSE",
            QueryError::AggregateSpec(_) => "RP_QUERY_AGGREGATE_SPEC",
            QueryError::Ordering(_) => "RP_QUERY_ORDERING",
            QueryError::Distinct(_) => "RP_QUERY_DISTINCT",
            QueryError::Internal(_) => "RP_QUERY_INTERNAL",
        }
    }

    /// Maps a store failure raised while running `stage`.
    ///
    /// Resolution failures stay resolution failures; failures specific to a
    /// stage take that stage's kind.
    pub fn from_store(stage: Stage, err: StoreError) -> Self {
        match err {
            StoreError::Schema(e) => QueryError::FieldResolution(e.to_string()),
            StoreError::InvalidLookup { .. } => QueryError::FieldResolution(err.to_string()),
            StoreError::InvalidValue { field, reason } => QueryError::Coercion {
                key: field,
                value: String::new(),
                reason,
            },
            StoreError::InvalidAggregate { .. } => QueryError::AggregateSpec(err.to_string()),
            StoreError::InvalidOrdering { .. } => QueryError::Ordering(err.to_string()),
            StoreError::InvalidDistinct(_) => QueryError::Distinct(err.to_string()),
            other => match stage {
                Stage::OrderBy => QueryError::Ordering(other.to_string()),
                Stage::Distinct => QueryError::Distinct(other.to_string()),
                Stage::Aggregates => QueryError::AggregateSpec(other.to_string()),
                _ => QueryError::Internal(other.to_string()),
            },
        }
    }
}

impl From<crate::schema::SchemaError> for QueryError {
    fn from(err: crate::schema::SchemaError) -> Self {
        QueryError::FieldResolution(err.to_string())
    }
}

/// A stage failure surfaced to the caller in strict mode
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{stage}: {source}")]
pub struct ValidationError {
    pub stage: Stage,
    pub source: QueryError,
}

impl ValidationError {
    pub fn new(stage: Stage, source: QueryError) -> Self {
        Self { stage, source }
    }
}
