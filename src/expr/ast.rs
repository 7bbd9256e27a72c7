//! Expression tree and its translation to store predicates

use crate::compiler::coercer::{coerce_operand, RawOperand};
use crate::compiler::QueryError;
use crate::schema::{SchemaRegistry, LOOKUP_SEP};
use crate::store::Predicate;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-insensitive containment
    Contains,
}

impl CompareOp {
    /// Lookup suffix appended to the path
    fn suffix(&self) -> Option<&'static str> {
        match self {
            CompareOp::Eq | CompareOp::Ne => None,
            CompareOp::Gt => Some("gt"),
            CompareOp::Gte => Some("gte"),
            CompareOp::Lt => Some("lt"),
            CompareOp::Lte => Some("lte"),
            CompareOp::Contains => Some("icontains"),
        }
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprValue {
    Quoted(String),
    Bare(String),
    List(Vec<ExprValue>),
    FieldRef(String),
}

impl ExprValue {
    fn into_raw(self) -> RawOperand {
        match self {
            ExprValue::Quoted(s) => RawOperand::Literal(s),
            ExprValue::Bare(s) => RawOperand::Text(s),
            ExprValue::FieldRef(s) => RawOperand::FieldRef(s),
            ExprValue::List(items) => {
                RawOperand::List(items.into_iter().map(ExprValue::into_raw).collect())
            }
        }
    }
}

/// Parsed `filters` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Compare {
        path: String,
        op: CompareOp,
        value: ExprValue,
        /// Byte offset of the comparison in the source text
        position: usize,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Conjunction; a single operand is returned as is
    pub fn and(mut parts: Vec<Expr>) -> Expr {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::And(parts)
        }
    }

    /// Disjunction; a single operand is returned as is
    pub fn or(mut parts: Vec<Expr>) -> Expr {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Expr::Or(parts)
        }
    }

    /// Same tree with every position set to zero
    pub fn without_positions(self) -> Expr {
        match self {
            Expr::Compare {
                path, op, value, ..
            } => Expr::Compare {
                path,
                op,
                value,
                position: 0,
            },
            Expr::And(parts) => Expr::And(parts.into_iter().map(Expr::without_positions).collect()),
            Expr::Or(parts) => Expr::Or(parts.into_iter().map(Expr::without_positions).collect()),
            Expr::Not(inner) => Expr::Not(Box::new(inner.without_positions())),
        }
    }

    /// Number of comparisons in the tree
    pub fn comparisons(&self) -> usize {
        match self {
            Expr::Compare { .. } => 1,
            Expr::And(parts) | Expr::Or(parts) => parts.iter().map(Expr::comparisons).sum(),
            Expr::Not(inner) => inner.comparisons(),
        }
    }

    /// Resolves and coerces every comparison against `model`
    pub fn to_predicate(&self, registry: &SchemaRegistry, model: &str) -> Result<Predicate, QueryError> {
        match self {
            Expr::Compare {
                path, op, value, ..
            } => {
                let mut key = path.replace('.', LOOKUP_SEP);
                if let Some(suffix) = op.suffix() {
                    key.push_str(LOOKUP_SEP);
                    key.push_str(suffix);
                }
                let predicate =
                    coerce_operand(registry, model, &key, value.clone().into_raw())?.into_predicate();
                Ok(if *op == CompareOp::Ne {
                    predicate.not()
                } else {
                    predicate
                })
            }
            Expr::And(parts) => parts
                .iter()
                .map(|p| p.to_predicate(registry, model))
                .collect::<Result<Vec<_>, _>>()
                .map(Predicate::and),
            Expr::Or(parts) => parts
                .iter()
                .map(|p| p.to_predicate(registry, model))
                .collect::<Result<Vec<_>, _>>()
                .map(Predicate::or),
            Expr::Not(inner) => Ok(inner.to_predicate(registry, model)?.not()),
        }
    }
}
