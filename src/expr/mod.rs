//! Filter expression language
//!
//! Parses the free-text `filters` parameter with a pest grammar into an
//! [`Expr`] tree, then translates it into a store [`Predicate`] through the
//! value coercer.
//!
//! [`Predicate`]: crate::store::Predicate

mod ast;
mod errors;
mod parser;

pub use ast::{CompareOp, Expr, ExprValue};
pub use errors::ParseError;
pub use parser::{parse_filters, ExprLimits};
