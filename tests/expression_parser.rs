//! Expression Parser Tests
//!
//! The `filters` language end to end:
//! - Text parses into the expected tree
//! - Trees translate into predicates against the invoice schema
//! - Translated predicates select the expected rows

mod common;

use restplan::expr::{parse_filters, CompareOp, Expr, ExprLimits, ExprValue, ParseError};

// =============================================================================
// Helper Functions
// =============================================================================

fn parse(text: &str) -> Result<Expr, ParseError> {
    parse_filters(text, &ExprLimits::default())
}

/// Invoice ids selected by `text`
fn select(text: &str) -> Vec<i64> {
    let db = common::database();
    let expr = parse(text).unwrap();
    let predicate = expr.to_predicate(db.registry(), "invoice").unwrap();
    let mut ids: Vec<i64> = db
        .queryset("invoice")
        .unwrap()
        .filter(predicate)
        .fetch()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    ids
}

// =============================================================================
// Parsing
// =============================================================================

#[test]
fn test_positions_point_at_comparisons() {
    let expr = parse("a = 1 or  b = 2").unwrap();
    let Expr::Or(parts) = expr else {
        panic!("expected disjunction");
    };
    let positions: Vec<usize> = parts
        .iter()
        .map(|p| match p {
            Expr::Compare { position, .. } => *position,
            other => panic!("unexpected node {other:?}"),
        })
        .collect();
    assert_eq!(positions, vec![0, 10]);
}

#[test]
fn test_grouping_overrides_precedence() {
    let expr = parse("(a = 1 or b = 2) and c != 3").unwrap().without_positions();
    let Expr::And(parts) = &expr else {
        panic!("expected conjunction");
    };
    assert!(matches!(parts[0], Expr::Or(_)));
    assert_eq!(
        parts[1],
        Expr::Compare {
            path: "c".into(),
            op: CompareOp::Ne,
            value: ExprValue::Bare("3".into()),
            position: 0,
        }
    );
    assert_eq!(expr.comparisons(), 3);
}

#[test]
fn test_dotted_paths_and_operators() {
    let expr = parse("customer.name ~ acme and amount <= 10")
        .unwrap()
        .without_positions();
    let Expr::And(parts) = expr else {
        panic!("expected conjunction");
    };
    assert!(matches!(
        &parts[0],
        Expr::Compare { path, op: CompareOp::Contains, .. } if path == "customer.name"
    ));
    assert!(matches!(&parts[1], Expr::Compare { op: CompareOp::Lte, .. }));
}

#[test]
fn test_malformed_expressions() {
    assert!(matches!(parse(""), Err(ParseError::Empty)));
    assert!(matches!(parse("amount >"), Err(ParseError::Syntax { .. })));
    assert!(matches!(parse("= 1"), Err(ParseError::Syntax { .. })));
    assert!(matches!(parse("a = 1 or or b = 2"), Err(ParseError::Syntax { .. })));
    assert!(matches!(parse("((a = 1)"), Err(ParseError::Unbalanced { .. })));
}

#[test]
fn test_syntax_error_quotes_fragment() {
    match parse("amount = 1 and ?").unwrap_err() {
        ParseError::Syntax { fragment, .. } => assert!(fragment.contains('?')),
        other => panic!("unexpected error: {other}"),
    }
}

// =============================================================================
// Translation
// =============================================================================

#[test]
fn test_comparisons_select_rows() {
    assert_eq!(select("amount >= 20"), vec![2, 3]);
    assert_eq!(select("amount > 10 and status = paid"), vec![3]);
    assert_eq!(select("status = 'open' or amount < 20"), vec![1, 2]);
    assert_eq!(select("not status = paid"), vec![2]);
}

#[test]
fn test_inequality_keeps_nulls() {
    // null never equals 5, so the negation keeps it
    assert_eq!(select("discount != 5"), vec![1, 3]);
}

#[test]
fn test_related_path_contains() {
    assert_eq!(select("customer.name ~ ACM"), vec![1, 2]);
}

#[test]
fn test_list_and_field_reference_values() {
    assert_eq!(select("amount = (10, 30)"), vec![1, 3]);
    assert_eq!(select("start_date = [end_date]"), vec![2]);
}

#[test]
fn test_translation_errors() {
    let db = common::database();
    let registry = db.registry();

    let unknown = parse("nope = 1").unwrap();
    assert!(unknown.to_predicate(registry, "invoice").is_err());

    let bad_value = parse("amount = abc").unwrap();
    assert!(bad_value.to_predicate(registry, "invoice").is_err());

    let bad_ref = parse("amount = [missing]").unwrap();
    assert!(bad_ref.to_predicate(registry, "invoice").is_err());
}
