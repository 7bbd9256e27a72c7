//! Schema error types
//!
//! Error codes:
//! - RP_SCHEMA_MALFORMED
//! - RP_UNKNOWN_MODEL
//! - RP_UNKNOWN_FIELD
//! - RP_NOT_A_RELATION
//! - RP_RECORD_INVALID

use thiserror::Error;

/// Schema-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaErrorCode {
    /// Schema file or model definition is unusable
    Malformed,
    /// Model name not registered
    UnknownModel,
    /// Field path segment does not exist
    UnknownField,
    /// Field path crosses a scalar field
    NotARelation,
    /// Record does not match its model
    RecordInvalid,
}

impl SchemaErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaErrorCode::Malformed => "RP_SCHEMA_MALFORMED",
            SchemaErrorCode::UnknownModel => "RP_UNKNOWN_MODEL",
            SchemaErrorCode::UnknownField => "RP_UNKNOWN_FIELD",
            SchemaErrorCode::NotARelation => "RP_NOT_A_RELATION",
            SchemaErrorCode::RecordInvalid => "RP_RECORD_INVALID",
        }
    }
}

/// Schema error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("malformed schema at {location}: {reason}")]
    Malformed { location: String, reason: String },

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("cannot resolve keyword '{field}' into field of '{model}'. Choices are: {choices}")]
    UnknownField {
        model: String,
        field: String,
        choices: String,
    },

    #[error("'{field}' on '{model}' is not a relation and cannot be traversed")]
    NotARelation { model: String, field: String },

    #[error("invalid record for '{model}': {reason}")]
    RecordInvalid { model: String, reason: String },
}

impl SchemaError {
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn record_invalid(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RecordInvalid {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> SchemaErrorCode {
        match self {
            SchemaError::Malformed { .. } => SchemaErrorCode::Malformed,
            SchemaError::UnknownModel(_) => SchemaErrorCode::UnknownModel,
            SchemaError::UnknownField { .. } => SchemaErrorCode::UnknownField,
            SchemaError::NotARelation { .. } => SchemaErrorCode::NotARelation,
            SchemaError::RecordInvalid { .. } => SchemaErrorCode::RecordInvalid,
        }
    }
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SchemaError::UnknownModel("x".into()).code().code(),
            "RP_UNKNOWN_MODEL"
        );
        let err = SchemaError::UnknownField {
            model: "invoice".into(),
            field: "amout".into(),
            choices: "amount, id".into(),
        };
        assert_eq!(err.code(), SchemaErrorCode::UnknownField);
        assert!(err.to_string().contains("amout"));
    }
}
