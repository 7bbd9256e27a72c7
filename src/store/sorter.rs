//! Value comparison and result ordering
//!
//! Ordering rules:
//! - null < bool < number < string < array < object
//! - same type: natural ordering (RFC 3339 strings compare as instants)
//! - sort is stable; `?` shuffles before the remaining keys are applied

use std::cmp::Ordering;

use rand::seq::SliceRandom;
use serde_json::Value;

/// Direction of one ordering key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A row paired with its precomputed sort keys
pub struct Keyed<T> {
    pub keys: Vec<Value>,
    pub item: T,
}

/// Sorts result rows
pub struct ResultSorter;

impl ResultSorter {
    /// Stable sort by the precomputed keys, one direction per key.
    pub fn sort<T>(rows: &mut [Keyed<T>], directions: &[SortDirection]) {
        rows.sort_by(|a, b| {
            for (idx, direction) in directions.iter().enumerate() {
                let ordering = Self::compare_values(
                    a.keys.get(idx).unwrap_or(&Value::Null),
                    b.keys.get(idx).unwrap_or(&Value::Null),
                );
                let ordering = match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    /// Random permutation
    pub fn shuffle<T>(rows: &mut [T]) {
        rows.shuffle(&mut rand::thread_rng());
    }

    /// Total order over JSON values
    pub fn compare_values(a: &Value, b: &Value) -> Ordering {
        let type_order = |v: &Value| -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::String(_) => 3,
                Value::Array(_) => 4,
                Value::Object(_) => 5,
            }
        };

        let (a_type, b_type) = (type_order(a), type_order(b));
        if a_type != b_type {
            return a_type.cmp(&b_type);
        }

        match (a, b) {
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            (Value::Number(_), Value::Number(_)) => compare_numbers(a, b),
            (Value::String(x), Value::String(y)) => compare_strings(x, y),
            (Value::Array(x), Value::Array(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    let ordering = Self::compare_values(l, r);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Comparison restricted to values of the same class; `None` across classes
    /// or when either side is null.
    pub fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Number(_), Value::Number(_)) => Some(compare_numbers(a, b)),
            (Value::String(x), Value::String(y)) => Some(compare_strings(x, y)),
            (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
            _ => None,
        }
    }

    /// Equality with numeric normalisation (`10 == 10.0`) and RFC 3339
    /// instants compared across offsets
    pub fn values_equal(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(_), Value::Number(_)) => compare_numbers(a, b) == Ordering::Equal,
            (Value::String(x), Value::String(y)) => compare_strings(x, y) == Ordering::Equal,
            _ => a == b,
        }
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    let x = a.as_f64().unwrap_or(0.0);
    let y = b.as_f64().unwrap_or(0.0);
    x.partial_cmp(&y).unwrap_or(Ordering::Equal)
}

fn compare_strings(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (
        chrono::DateTime::parse_from_rfc3339(a),
        chrono::DateTime::parse_from_rfc3339(b),
    ) {
        return x.cmp(&y);
    }
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keyed(id: &str, age: Value) -> Keyed<String> {
        Keyed {
            keys: vec![age],
            item: id.to_string(),
        }
    }

    fn ids(rows: &[Keyed<String>]) -> Vec<&str> {
        rows.iter().map(|r| r.item.as_str()).collect()
    }

    #[test]
    fn test_sort_ascending_and_descending() {
        let mut rows = vec![keyed("c", json!(30)), keyed("a", json!(20)), keyed("b", json!(25))];
        ResultSorter::sort(&mut rows, &[SortDirection::Asc]);
        assert_eq!(ids(&rows), vec!["a", "b", "c"]);

        ResultSorter::sort(&mut rows, &[SortDirection::Desc]);
        assert_eq!(ids(&rows), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_sort_stable() {
        let mut rows = vec![keyed("a", json!(25)), keyed("b", json!(25)), keyed("c", json!(25))];
        ResultSorter::sort(&mut rows, &[SortDirection::Asc]);
        assert_eq!(ids(&rows), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_nulls_sort_first() {
        let mut rows = vec![keyed("x", json!(1)), keyed("n", Value::Null)];
        ResultSorter::sort(&mut rows, &[SortDirection::Asc]);
        assert_eq!(ids(&rows), vec!["n", "x"]);
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        assert!(ResultSorter::values_equal(&json!(10), &json!(10.0)));
        assert!(!ResultSorter::values_equal(&json!(10), &json!("10")));
    }

    #[test]
    fn test_datetimes_compare_as_instants() {
        let a = json!("2024-01-01T10:00:00+02:00");
        let b = json!("2024-01-01T09:00:00Z");
        assert_eq!(ResultSorter::compare_values(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_partial_compare_rejects_mixed_classes() {
        assert_eq!(ResultSorter::partial_compare(&json!(1), &json!("1")), None);
        assert_eq!(
            ResultSorter::partial_compare(&json!("b"), &json!("a")),
            Some(Ordering::Greater)
        );
    }
}
