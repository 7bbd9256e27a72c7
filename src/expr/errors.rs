//! Expression parser errors

use thiserror::Error;

/// Failure to parse a `filters` expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expression is {length} characters long, the limit is {limit}")]
    TooLong { length: usize, limit: usize },

    #[error("expression nests deeper than {limit} levels at position {position}")]
    TooDeep { limit: usize, position: usize },

    #[error("unbalanced parenthesis at position {position}")]
    Unbalanced { position: usize },

    #[error("empty expression")]
    Empty,

    #[error("syntax error at position {position} near '{fragment}': {message}")]
    Syntax {
        position: usize,
        fragment: String,
        message: String,
    },
}

impl ParseError {
    /// Builds a syntax error quoting up to 24 characters from `position`
    pub fn syntax(text: &str, position: usize, message: impl Into<String>) -> Self {
        let fragment: String = text
            .get(position..)
            .unwrap_or_default()
            .chars()
            .take(24)
            .collect();
        ParseError::Syntax {
            position,
            fragment,
            message: message.into(),
        }
    }
}
