//! `filters` expression parser
//!
//! Length and nesting depth are checked on the raw text before the grammar
//! runs, so pathological inputs are rejected without recursing.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};

use super::ast::{CompareOp, Expr, ExprValue};
use super::errors::ParseError;

#[derive(Parser)]
#[grammar = "expr/filters.pest"]
struct FiltersParser;

fn default_max_length() -> usize {
    2048
}

fn default_max_depth() -> usize {
    16
}

/// Bounds applied to every expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExprLimits {
    /// Maximum length in characters
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Maximum parenthesis nesting
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ExprLimits {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            max_depth: default_max_depth(),
        }
    }
}

/// Parses a `filters` expression into an [`Expr`] tree.
pub fn parse_filters(text: &str, limits: &ExprLimits) -> Result<Expr, ParseError> {
    let length = text.chars().count();
    if length > limits.max_length {
        return Err(ParseError::TooLong {
            length,
            limit: limits.max_length,
        });
    }
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    check_depth(text, limits.max_depth)?;

    let mut pairs = FiltersParser::parse(Rule::filters, text).map_err(|e| {
        let position = match e.location {
            pest::error::InputLocation::Pos(p) => p,
            pest::error::InputLocation::Span((start, _)) => start,
        };
        ParseError::syntax(text, position, e.variant.message().to_string())
    })?;

    let filters = pairs
        .next()
        .ok_or_else(|| ParseError::syntax(text, 0, "no expression"))?;
    let expr = filters
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| ParseError::syntax(text, 0, "no expression"))?;

    build_or(text, expr)
}

/// Rejects unbalanced or overly nested parentheses outside quotes
fn check_depth(text: &str, max_depth: usize) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (position, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => {
                depth += 1;
                if depth > max_depth {
                    return Err(ParseError::TooDeep {
                        limit: max_depth,
                        position,
                    });
                }
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(ParseError::Unbalanced { position })?;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(ParseError::Unbalanced {
            position: text.len(),
        });
    }
    Ok(())
}

fn unexpected(text: &str, pair: &Pair<'_, Rule>) -> ParseError {
    ParseError::syntax(
        text,
        pair.as_span().start(),
        format!("unexpected {:?}", pair.as_rule()),
    )
}

fn build_or(text: &str, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let mut parts = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::and_expr => parts.push(build_and(text, inner)?),
            Rule::or_op => {}
            _ => return Err(unexpected(text, &inner)),
        }
    }
    Ok(Expr::or(parts))
}

fn build_and(text: &str, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let mut parts = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::unary => parts.push(build_unary(text, inner)?),
            Rule::and_op => {}
            _ => return Err(unexpected(text, &inner)),
        }
    }
    Ok(Expr::and(parts))
}

fn build_unary(text: &str, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let start = pair.as_span().start();
    let mut negations = 0usize;
    let mut operand = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::not_op => negations += 1,
            Rule::expr => operand = Some(build_or(text, inner)?),
            Rule::comparison => operand = Some(build_comparison(text, inner)?),
            _ => return Err(unexpected(text, &inner)),
        }
    }

    let operand = operand.ok_or_else(|| ParseError::syntax(text, start, "missing operand"))?;
    Ok(if negations % 2 == 1 {
        Expr::Not(Box::new(operand))
    } else {
        operand
    })
}

fn build_comparison(text: &str, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
    let position = pair.as_span().start();
    let mut inner = pair.into_inner();

    let path = inner
        .next()
        .filter(|p| p.as_rule() == Rule::path)
        .ok_or_else(|| ParseError::syntax(text, position, "expected field path"))?;
    let op = inner
        .next()
        .filter(|p| p.as_rule() == Rule::compare_op)
        .ok_or_else(|| ParseError::syntax(text, position, "expected comparison operator"))?;
    let value = inner
        .next()
        .ok_or_else(|| ParseError::syntax(text, position, "expected value"))?;

    let op = match op.as_str() {
        "=" | "==" => CompareOp::Eq,
        "!=" => CompareOp::Ne,
        ">" => CompareOp::Gt,
        ">=" => CompareOp::Gte,
        "<" => CompareOp::Lt,
        "<=" => CompareOp::Lte,
        "~" => CompareOp::Contains,
        other => {
            return Err(ParseError::syntax(
                text,
                op.as_span().start(),
                format!("unknown operator '{}'", other),
            ))
        }
    };

    Ok(Expr::Compare {
        path: path.as_str().to_string(),
        op,
        value: build_value(text, value)?,
        position,
    })
}

fn build_value(text: &str, pair: Pair<'_, Rule>) -> Result<ExprValue, ParseError> {
    match pair.as_rule() {
        Rule::bare => Ok(ExprValue::Bare(pair.as_str().to_string())),
        Rule::quoted => {
            let inner = pair
                .into_inner()
                .next()
                .map(|p| unescape(p.as_str()))
                .unwrap_or_default();
            Ok(ExprValue::Quoted(inner))
        }
        Rule::field_ref => {
            let start = pair.as_span().start();
            let path = pair
                .into_inner()
                .next()
                .ok_or_else(|| ParseError::syntax(text, start, "expected field path"))?;
            Ok(ExprValue::FieldRef(path.as_str().to_string()))
        }
        Rule::list => pair
            .into_inner()
            .map(|item| build_value(text, item))
            .collect::<Result<Vec<_>, _>>()
            .map(ExprValue::List),
        _ => Err(unexpected(text, &pair)),
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Expr, ParseError> {
        parse_filters(text, &ExprLimits::default())
    }

    fn cmp(path: &str, op: CompareOp, value: ExprValue) -> Expr {
        Expr::Compare {
            path: path.into(),
            op,
            value,
            position: 0,
        }
    }

    #[test]
    fn test_precedence_and_binds_tighter() {
        let expr = parse("a = 1 or b = 2 and c = 3").unwrap().without_positions();
        assert_eq!(
            expr,
            Expr::Or(vec![
                cmp("a", CompareOp::Eq, ExprValue::Bare("1".into())),
                Expr::And(vec![
                    cmp("b", CompareOp::Eq, ExprValue::Bare("2".into())),
                    cmp("c", CompareOp::Eq, ExprValue::Bare("3".into())),
                ]),
            ])
        );
    }

    #[test]
    fn test_symbols_and_keywords_are_equivalent() {
        let a = parse("(a>1|b<2)&!c~x").unwrap().without_positions();
        let b = parse("(a > 1 OR b < 2) and not c ~ x").unwrap().without_positions();
        assert_eq!(a, b);
    }

    #[test]
    fn test_values() {
        let expr = parse(r#"name = "O'Brien \"jr\"" & d = [other.field] & k = (1, 'two', 3)"#)
            .unwrap()
            .without_positions();
        let Expr::And(parts) = expr else {
            panic!("expected conjunction");
        };
        assert_eq!(
            parts[0],
            cmp("name", CompareOp::Eq, ExprValue::Quoted("O'Brien \"jr\"".into()))
        );
        assert_eq!(
            parts[1],
            cmp("d", CompareOp::Eq, ExprValue::FieldRef("other.field".into()))
        );
        assert_eq!(
            parts[2],
            cmp(
                "k",
                CompareOp::Eq,
                ExprValue::List(vec![
                    ExprValue::Bare("1".into()),
                    ExprValue::Quoted("two".into()),
                    ExprValue::Bare("3".into()),
                ])
            )
        );
    }

    #[test]
    fn test_keyword_prefix_is_a_path() {
        let expr = parse("notes = x and order = y").unwrap().without_positions();
        assert_eq!(
            expr,
            Expr::And(vec![
                cmp("notes", CompareOp::Eq, ExprValue::Bare("x".into())),
                cmp("order", CompareOp::Eq, ExprValue::Bare("y".into())),
            ])
        );
    }

    #[test]
    fn test_double_negation_cancels() {
        let expr = parse("not not a = 1").unwrap().without_positions();
        assert_eq!(expr, cmp("a", CompareOp::Eq, ExprValue::Bare("1".into())));
    }

    #[test]
    fn test_syntax_error_reports_position() {
        match parse("a = 1 and").unwrap_err() {
            ParseError::Syntax { position, .. } => assert!(position >= 6),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(parse("a = "), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse("a 1"), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse("   "), Err(ParseError::Empty)));
    }

    #[test]
    fn test_limits() {
        let limits = ExprLimits {
            max_length: 10,
            max_depth: 2,
        };
        assert!(matches!(
            parse_filters("aaaaaaaaaa = 1", &limits),
            Err(ParseError::TooLong { .. })
        ));
        assert!(matches!(
            parse_filters("(((a=1)))", &limits),
            Err(ParseError::TooDeep { .. })
        ));
        assert!(matches!(parse("(a = 1"), Err(ParseError::Unbalanced { .. })));
        assert!(matches!(parse("a = 1)"), Err(ParseError::Unbalanced { .. })));
        // parentheses inside quotes do not count
        assert!(parse("a = '((('").is_ok());
    }

    #[test]
    fn test_deep_nesting_is_rejected_without_recursion() {
        let text = format!("{}a=1{}", "(".repeat(5000), ")".repeat(5000));
        let limits = ExprLimits {
            max_length: 20_000,
            max_depth: 16,
        };
        assert!(matches!(
            parse_filters(&text, &limits),
            Err(ParseError::TooDeep { .. })
        ));
    }
}
