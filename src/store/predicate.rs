//! Filter predicates
//!
//! A predicate is a boolean tree over conditions. A condition compares the
//! value(s) reached by a field path with an operand through a lookup:
//!
//! - `exact`, `iexact`: equality (case-insensitive for strings)
//! - `contains`, `icontains`, `startswith`, `istartswith`, `endswith`, `iendswith`
//! - `gt`, `gte`, `lt`, `lte`: ordering within numbers or within strings
//! - `in`: membership in a list; `range`: inclusive two-element bound
//! - `isnull`: no non-null value reached
//! - `regex`, `iregex`
//!
//! A null stored value never satisfies a comparison. `exact` against
//! [`Operand::Null`] behaves like `isnull=true`.

use std::fmt;

use serde_json::Value;

use super::errors::{StoreError, StoreResult};
use crate::schema::{ResolvedPath, SchemaRegistry};

/// Comparison applied by a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Range,
    IsNull,
    Regex,
    IRegex,
}

impl Lookup {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "exact" => Lookup::Exact,
            "iexact" => Lookup::IExact,
            "contains" => Lookup::Contains,
            "icontains" => Lookup::IContains,
            "in" => Lookup::In,
            "gt" => Lookup::Gt,
            "gte" => Lookup::Gte,
            "lt" => Lookup::Lt,
            "lte" => Lookup::Lte,
            "startswith" => Lookup::StartsWith,
            "istartswith" => Lookup::IStartsWith,
            "endswith" => Lookup::EndsWith,
            "iendswith" => Lookup::IEndsWith,
            "range" => Lookup::Range,
            "isnull" => Lookup::IsNull,
            "regex" => Lookup::Regex,
            "iregex" => Lookup::IRegex,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::IExact => "iexact",
            Lookup::Contains => "contains",
            Lookup::IContains => "icontains",
            Lookup::In => "in",
            Lookup::Gt => "gt",
            Lookup::Gte => "gte",
            Lookup::Lt => "lt",
            Lookup::Lte => "lte",
            Lookup::StartsWith => "startswith",
            Lookup::IStartsWith => "istartswith",
            Lookup::EndsWith => "endswith",
            Lookup::IEndsWith => "iendswith",
            Lookup::Range => "range",
            Lookup::IsNull => "isnull",
            Lookup::Regex => "regex",
            Lookup::IRegex => "iregex",
        }
    }

    /// Lookups whose operand is a list
    pub fn takes_list(&self) -> bool {
        matches!(self, Lookup::In | Lookup::Range)
    }

    /// Lookups whose operand is matched as text regardless of the field kind
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Lookup::Contains
                | Lookup::IContains
                | Lookup::StartsWith
                | Lookup::IStartsWith
                | Lookup::EndsWith
                | Lookup::IEndsWith
                | Lookup::Regex
                | Lookup::IRegex
        )
    }

    /// Lookups for which a null operand means "is null"
    pub fn accepts_null(&self) -> bool {
        matches!(self, Lookup::Exact | Lookup::IExact)
    }

    fn sql(&self) -> &'static str {
        match self {
            Lookup::Exact => "=",
            Lookup::IExact => "ILIKE",
            Lookup::Contains | Lookup::StartsWith | Lookup::EndsWith => "LIKE",
            Lookup::IContains | Lookup::IStartsWith | Lookup::IEndsWith => "ILIKE",
            Lookup::In => "IN",
            Lookup::Gt => ">",
            Lookup::Gte => ">=",
            Lookup::Lt => "<",
            Lookup::Lte => "<=",
            Lookup::Range => "BETWEEN",
            Lookup::IsNull => "IS NULL",
            Lookup::Regex => "~",
            Lookup::IRegex => "~*",
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a condition
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    List(Vec<Value>),
    Null,
    /// Another field of the same record, as a canonical `__` path
    FieldRef(String),
}

/// A single (path, lookup, operand) comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Canonical `__`-joined field path
    pub path: String,
    pub lookup: Lookup,
    pub operand: Operand,
}

impl Condition {
    pub fn new(path: impl Into<String>, lookup: Lookup, operand: Operand) -> Self {
        Self {
            path: path.into(),
            lookup,
            operand,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lookup, &self.operand) {
            (Lookup::IsNull, Operand::Value(Value::Bool(false))) => {
                write!(f, "{} IS NOT NULL", self.path)
            }
            (Lookup::IsNull, _) | (_, Operand::Null) => write!(f, "{} IS NULL", self.path),
            (Lookup::Range, Operand::List(bounds)) if bounds.len() == 2 => write!(
                f,
                "{} BETWEEN {} AND {}",
                self.path, bounds[0], bounds[1]
            ),
            (lookup, Operand::List(items)) => {
                let items: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{} {} ({})", self.path, lookup.sql(), items.join(", "))
            }
            (lookup, Operand::FieldRef(other)) => {
                write!(f, "{} {} {}", self.path, lookup.sql(), other)
            }
            (lookup, Operand::Value(v)) => {
                let rendered = match lookup {
                    Lookup::Contains | Lookup::IContains => format!("'%{}%'", text_of(v)),
                    Lookup::StartsWith | Lookup::IStartsWith => format!("'{}%'", text_of(v)),
                    Lookup::EndsWith | Lookup::IEndsWith => format!("'%{}'", text_of(v)),
                    _ => v.to_string(),
                };
                write!(f, "{} {} {}", self.path, lookup.sql(), rendered)
            }
        }
    }
}

/// Boolean predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Condition(Condition),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn condition(path: impl Into<String>, lookup: Lookup, operand: Operand) -> Self {
        Predicate::Condition(Condition::new(path, lookup, operand))
    }

    /// Conjunction, flattening nested conjunctions
    pub fn and<I: IntoIterator<Item = Predicate>>(preds: I) -> Self {
        let mut out = Vec::new();
        for p in preds {
            match p {
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        if out.len() == 1 {
            out.remove(0)
        } else {
            Predicate::And(out)
        }
    }

    /// Disjunction, flattening nested disjunctions
    pub fn or<I: IntoIterator<Item = Predicate>>(preds: I) -> Self {
        let mut out = Vec::new();
        for p in preds {
            match p {
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        if out.len() == 1 {
            out.remove(0)
        } else {
            Predicate::Or(out)
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    /// Whether the predicate can never match any record
    pub fn is_empty_result(&self) -> bool {
        match self {
            Predicate::Condition(c) => {
                c.lookup == Lookup::In && matches!(&c.operand, Operand::List(items) if items.is_empty())
            }
            Predicate::And(preds) => preds.iter().any(Predicate::is_empty_result),
            Predicate::Or(preds) => !preds.is_empty() && preds.iter().all(Predicate::is_empty_result),
            Predicate::Not(_) => false,
        }
    }

    /// Every condition in the tree
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Predicate::Condition(c) => out.push(c),
            Predicate::And(ps) | Predicate::Or(ps) => ps.iter().for_each(|p| p.collect(out)),
            Predicate::Not(p) => p.collect(out),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Condition(c) => write!(f, "{}", c),
            Predicate::And(ps) if ps.is_empty() => f.write_str("TRUE"),
            Predicate::Or(ps) if ps.is_empty() => f.write_str("FALSE"),
            Predicate::And(ps) | Predicate::Or(ps) => {
                let sep = if matches!(self, Predicate::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts: Vec<String> = ps.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
            Predicate::Not(p) => write!(f, "NOT ({})", p),
        }
    }
}

/// Splits a filter key into its resolved field path and lookup.
///
/// `amount__gte` → (`amount`, `gte`); `customer__name` → (`customer__name`,
/// `exact`). A trailing segment that is neither a field nor a lookup is a
/// resolution error.
pub fn resolve_lookup(
    registry: &SchemaRegistry,
    model: &str,
    key: &str,
) -> StoreResult<(ResolvedPath, Lookup)> {
    let resolved = registry.walk(model, key)?;
    match resolved.rest.as_slice() {
        [] => Ok((resolved, Lookup::Exact)),
        [name] => match Lookup::parse(name) {
            Some(lookup) => Ok((resolved, lookup)),
            None => match registry.target_of(&resolved) {
                Some(target) => Err(registry.unknown_field(target, name).into()),
                None => Err(StoreError::InvalidLookup {
                    field: resolved.joined(),
                    lookup: name.clone(),
                }),
            },
        },
        [first, ..] => match registry.target_of(&resolved) {
            Some(target) => Err(registry.unknown_field(target, first).into()),
            None => Err(StoreError::InvalidLookup {
                field: resolved.joined(),
                lookup: resolved.rest.join("__"),
            }),
        },
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
