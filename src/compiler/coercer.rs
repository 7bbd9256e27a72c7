//! Value coercion
//!
//! Converts a raw parameter value into a typed operand using the declared
//! kind of the field the key resolves to. Coercion is pure: it reads the
//! schema registry and nothing else.

use chrono::{DateTime, NaiveDate};
use serde_json::{Number, Value};

use super::errors::QueryError;
use super::params::str_to_bool;
use crate::schema::{FieldKind, ResolvedPath, SchemaRegistry, LOOKUP_SEP};
use crate::store::{resolve_lookup, Lookup, Operand, Predicate, StoreError};

/// Raw right-hand side before coercion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOperand {
    /// Query-string value; `null`, comma lists and `[field]` are interpreted
    Text(String),
    /// Quoted literal; taken as text with no further interpretation
    Literal(String),
    /// Reference to another field of the same record
    FieldRef(String),
    /// Explicit list
    List(Vec<RawOperand>),
}

/// A coerced (path, lookup, operand) triple
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub path: ResolvedPath,
    pub lookup: Lookup,
    pub operand: Operand,
}

impl Coerced {
    pub fn into_predicate(self) -> Predicate {
        Predicate::condition(self.path.joined(), self.lookup, self.operand)
    }
}

/// Coerces a query-string value for `key` on `model`.
///
/// A value wrapped in brackets (`[end_date]`) is a field reference.
pub fn coerce(
    registry: &SchemaRegistry,
    model: &str,
    key: &str,
    raw: &str,
) -> Result<Operand, QueryError> {
    coerce_operand(registry, model, key, RawOperand::from_param(raw)).map(|c| c.operand)
}

impl RawOperand {
    /// Interprets a query-string value
    pub fn from_param(raw: &str) -> Self {
        match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            Some(inner) if !inner.is_empty() => RawOperand::FieldRef(inner.to_string()),
            _ => RawOperand::Text(raw.to_string()),
        }
    }

    fn text(&self) -> String {
        match self {
            RawOperand::Text(s) | RawOperand::Literal(s) => s.clone(),
            RawOperand::FieldRef(s) => format!("[{}]", s),
            RawOperand::List(items) => items
                .iter()
                .map(RawOperand::text)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Resolves `key` and coerces `raw` against the resolved field
pub fn coerce_operand(
    registry: &SchemaRegistry,
    model: &str,
    key: &str,
    raw: RawOperand,
) -> Result<Coerced, QueryError> {
    let (path, mut lookup) = resolve_lookup(registry, model, key).map_err(resolution)?;
    let kind = scalar_kind(registry, &path);

    let operand = match raw {
        RawOperand::FieldRef(other) => {
            if lookup.takes_list() || lookup == Lookup::IsNull {
                return Err(QueryError::coercion(
                    key,
                    format!("[{}]", other),
                    format!("'{}' does not accept a field reference", lookup),
                ));
            }
            let other = other.replace('.', LOOKUP_SEP);
            let resolved = registry.walk_exact(model, &other)?;
            Operand::FieldRef(resolved.joined())
        }
        RawOperand::List(items) => {
            if lookup == Lookup::Exact {
                lookup = Lookup::In;
            }
            if !lookup.takes_list() {
                return Err(QueryError::coercion(
                    key,
                    RawOperand::List(items).text(),
                    format!("'{}' does not accept a list", lookup),
                ));
            }
            let values = items
                .iter()
                .map(|item| match item {
                    RawOperand::Text(s) | RawOperand::Literal(s) => scalar(key, &kind, lookup, s),
                    other => Err(QueryError::coercion(
                        key,
                        other.text(),
                        "list items must be plain values",
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
            list_operand(key, lookup, values)?
        }
        RawOperand::Text(text) => {
            if lookup == Lookup::IsNull {
                Operand::Value(Value::Bool(boolean(key, &text)?))
            } else if lookup.accepts_null()
                && matches!(text.to_lowercase().as_str(), "null" | "none")
            {
                Operand::Null
            } else {
                if lookup == Lookup::Exact && path.is_multi_valued() && text.contains(',') {
                    lookup = Lookup::In;
                }
                if lookup.takes_list() {
                    let values = split_list(&text)
                        .map(|item| scalar(key, &kind, lookup, item))
                        .collect::<Result<Vec<_>, _>>()?;
                    list_operand(key, lookup, values)?
                } else {
                    Operand::Value(scalar(key, &kind, lookup, &text)?)
                }
            }
        }
        RawOperand::Literal(text) => {
            if lookup == Lookup::IsNull {
                Operand::Value(Value::Bool(boolean(key, &text)?))
            } else if lookup.takes_list() {
                let values = split_list(&text)
                    .map(|item| scalar(key, &kind, lookup, item))
                    .collect::<Result<Vec<_>, _>>()?;
                list_operand(key, lookup, values)?
            } else {
                Operand::Value(scalar(key, &kind, lookup, &text)?)
            }
        }
    };

    Ok(Coerced {
        path,
        lookup,
        operand,
    })
}

fn resolution(err: StoreError) -> QueryError {
    match err {
        StoreError::Schema(e) => QueryError::FieldResolution(e.to_string()),
        other => QueryError::FieldResolution(other.to_string()),
    }
}

fn split_list(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn list_operand(key: &str, lookup: Lookup, values: Vec<Value>) -> Result<Operand, QueryError> {
    if lookup == Lookup::Range && values.len() != 2 {
        return Err(QueryError::coercion(
            key,
            Value::Array(values.clone()).to_string(),
            format!("range takes exactly two bounds, got {}", values.len()),
        ));
    }
    Ok(Operand::List(values))
}

fn boolean(key: &str, text: &str) -> Result<bool, QueryError> {
    str_to_bool(text).ok_or_else(|| QueryError::coercion(key, text, "expected a boolean"))
}

/// Kind values are coerced to: the terminal kind, or the target primary key
/// kind when the path ends on a relation
fn scalar_kind(registry: &SchemaRegistry, path: &ResolvedPath) -> FieldKind {
    let terminal = &path.terminal().def.kind;
    if !terminal.is_relation() {
        return terminal.clone();
    }
    registry
        .target_of(path)
        .and_then(|target| target.primary_key_def())
        .map(|pk| pk.kind.clone())
        .unwrap_or(FieldKind::String)
}

fn scalar(key: &str, kind: &FieldKind, lookup: Lookup, text: &str) -> Result<Value, QueryError> {
    if lookup.is_textual() {
        return Ok(Value::String(text.to_string()));
    }
    let fail = |reason: &str| QueryError::coercion(key, text, reason);

    match kind {
        FieldKind::Int => {
            let trimmed = text.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            // `1.0` is accepted when it is integral
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(fail("expected an integer")),
            }
        }
        FieldKind::Float | FieldKind::Decimal => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| fail("expected a number")),
        FieldKind::Bool => str_to_bool(text)
            .map(Value::Bool)
            .ok_or_else(|| fail("expected a boolean")),
        FieldKind::Date => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .map_err(|_| fail("expected a date (YYYY-MM-DD)")),
        FieldKind::Datetime => DateTime::parse_from_rfc3339(text.trim())
            .map(|dt| Value::String(dt.to_rfc3339()))
            .map_err(|_| fail("expected an RFC 3339 datetime")),
        FieldKind::Json => Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))),
        FieldKind::String | FieldKind::Text => Ok(Value::String(text.to_string())),
        // relation kinds are replaced by the target key kind before this point
        FieldKind::ForeignKey { .. } | FieldKind::ManyToMany { .. } | FieldKind::Reverse { .. } => {
            Ok(Value::String(text.to_string()))
        }
    }
}
