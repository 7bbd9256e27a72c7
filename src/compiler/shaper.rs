//! Result shaper
//!
//! Turns a `fields` list into the minimal set of relations to eager-load,
//! the columns to load, and an ordered output descriptor used to render
//! each row.

use serde_json::{Map, Value};

use super::errors::QueryError;
use crate::schema::{Choice, FieldKind, SchemaRegistry, LOOKUP_SEP};
use crate::store::ResultSorter;

/// Per-column value transform
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Raw,
    /// Replace stored values by their display label
    Display(Vec<Choice>),
}

/// One output column
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    /// Key in the rendered row, spelled as requested
    pub key: String,
    /// Canonical path segments into the executed record
    pub source: Vec<String>,
    pub transform: Transform,
}

/// Projection computed from a `fields` list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    /// Foreign-key chains to eager-load
    pub relations: Vec<String>,
    /// Paths crossing a multi-valued relation, fetched separately
    pub prefetch: Vec<String>,
    /// Columns to load
    pub columns: Vec<String>,
    pub columns_out: Vec<OutputColumn>,
}

pub struct Shaper;

impl Shaper {
    /// Plans the projection of `fields` on `model`.
    ///
    /// Fields may use `.` or `__` between segments. With `display`, fields
    /// declaring choices get a `<field>_display` column before the raw one.
    pub fn plan(
        registry: &SchemaRegistry,
        model: &str,
        fields: &[String],
        display: bool,
    ) -> Result<Projection, QueryError> {
        let mut projection = Projection::default();
        let mut relations = Vec::new();
        let mut prefetch = Vec::new();

        for field in fields {
            let canonical = field.replace('.', LOOKUP_SEP);
            let resolved = registry.walk_exact(model, &canonical)?;
            let segments = resolved.segments();
            let terminal = resolved.terminal();

            // relations crossed on the way to the terminal column
            let crossed = if matches!(terminal.def.kind, FieldKind::Reverse { .. }) {
                resolved.hops.len()
            } else {
                resolved.hops.len() - 1
            };
            if crossed > 0 {
                let prefix = segments[..crossed].join(LOOKUP_SEP);
                let single = resolved.hops[..crossed]
                    .iter()
                    .all(|h| matches!(h.def.kind, FieldKind::ForeignKey { .. }));
                if single {
                    relations.push(prefix);
                } else {
                    prefetch.push(prefix);
                }
            }

            let joined = resolved.joined();
            if !projection.columns.contains(&joined) {
                projection.columns.push(joined);
            }

            if display && !terminal.def.choices.is_empty() {
                projection.columns_out.push(OutputColumn {
                    key: format!("{}_display", field),
                    source: segments.clone(),
                    transform: Transform::Display(terminal.def.choices.clone()),
                });
            }
            projection.columns_out.push(OutputColumn {
                key: field.clone(),
                source: segments,
                transform: Transform::Raw,
            });
        }

        projection.relations = minimal(relations);
        projection.prefetch = minimal(prefetch);
        Ok(projection)
    }
}

/// Drops paths that are a prefix of another path in the set
fn minimal(mut paths: Vec<String>) -> Vec<String> {
    paths.sort();
    paths.dedup();
    let covered = |p: &String, all: &[String]| {
        all.iter()
            .any(|other| other != p && other.starts_with(&format!("{}{}", p, LOOKUP_SEP)))
    };
    let snapshot = paths.clone();
    paths.retain(|p| !covered(p, &snapshot));
    paths
}

impl Projection {
    /// Renders one executed record through the output descriptor
    pub fn apply(&self, record: &Value) -> Value {
        let mut out = Map::new();
        for column in &self.columns_out {
            let value = extract(record, &column.source);
            let value = match &column.transform {
                Transform::Raw => value,
                Transform::Display(choices) => label(value, choices),
            };
            out.insert(column.key.clone(), value);
        }
        Value::Object(out)
    }
}

fn extract(value: &Value, path: &[String]) -> Value {
    let Some((first, rest)) = path.split_first() else {
        return value.clone();
    };
    match value {
        Value::Object(map) => map
            .get(first)
            .map_or(Value::Null, |inner| extract(inner, rest)),
        Value::Array(items) => Value::Array(items.iter().map(|item| extract(item, path)).collect()),
        _ => Value::Null,
    }
}

fn label(value: Value, choices: &[Choice]) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(|v| label(v, choices)).collect()),
        Value::Null => Value::Null,
        other => choices
            .iter()
            .find(|Choice(stored, _)| ResultSorter::values_equal(stored, &other))
            .map_or(other, |Choice(_, display)| Value::String(display.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, ModelDef};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let reg = SchemaRegistry::new()
            .with(ModelDef::new("region").field("code", FieldDef::string()))
            .unwrap()
            .with(
                ModelDef::new("customer")
                    .field("name", FieldDef::string())
                    .field("region", FieldDef::foreign_key("region")),
            )
            .unwrap()
            .with(ModelDef::new("tag").field("label", FieldDef::string()))
            .unwrap()
            .with(
                ModelDef::new("invoice")
                    .field(
                        "status",
                        FieldDef::string().with_choices([("P", "Paid"), ("D", "Draft")]),
                    )
                    .field("customer", FieldDef::foreign_key("customer"))
                    .field("tags", FieldDef::many_to_many("tag")),
            )
            .unwrap();
        reg.validate().unwrap();
        reg
    }

    fn fields(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_minimal_relations_and_columns() {
        let p = Shaper::plan(
            &registry(),
            "invoice",
            &fields(&["customer.name", "customer__region__code", "tags.label", "status"]),
            false,
        )
        .unwrap();
        assert_eq!(p.relations, vec!["customer__region"]);
        assert_eq!(p.prefetch, vec!["tags"]);
        assert_eq!(
            p.columns,
            vec!["customer__name", "customer__region__code", "tags__label", "status"]
        );
        let keys: Vec<&str> = p.columns_out.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["customer.name", "customer__region__code", "tags.label", "status"]
        );
    }

    #[test]
    fn test_display_companion_precedes_raw_column() {
        let p = Shaper::plan(&registry(), "invoice", &fields(&["status"]), true).unwrap();
        let keys: Vec<&str> = p.columns_out.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["status_display", "status"]);

        let row = p.apply(&json!({"id": 1, "status": "P"}));
        assert_eq!(row, json!({"status_display": "Paid", "status": "P"}));
    }

    #[test]
    fn test_apply_walks_nested_objects_and_arrays() {
        let p = Shaper::plan(
            &registry(),
            "invoice",
            &fields(&["customer.name", "tags.label"]),
            false,
        )
        .unwrap();
        let row = p.apply(&json!({
            "id": 1,
            "customer": {"id": 4, "name": "Acme"},
            "tags": [{"id": 1, "label": "urgent"}, {"id": 2, "label": "late"}]
        }));
        assert_eq!(
            row,
            json!({"customer.name": "Acme", "tags.label": ["urgent", "late"]})
        );
    }

    #[test]
    fn test_unknown_field_fails() {
        assert!(matches!(
            Shaper::plan(&registry(), "invoice", &fields(&["customer.nope"]), false),
            Err(QueryError::FieldResolution(_))
        ));
    }
}
