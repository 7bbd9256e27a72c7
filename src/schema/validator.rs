//! Record validation against a model
//!
//! - record is a JSON object
//! - primary key is present and non-null
//! - no undeclared fields
//! - stored values match the declared kind
//! - nulls only where declared nullable (a missing field counts as null)
//! - reverse relations are computed and never stored

use serde_json::{Map, Value};

use super::errors::{SchemaError, SchemaResult};
use super::registry::SchemaRegistry;
use super::types::{FieldKind, ModelDef};

/// Validates records before they enter the store
pub struct RecordValidator<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> RecordValidator<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Validates `record` against `model`, returning it normalised
    /// (missing nullable fields set to null, missing many-to-many set to `[]`).
    pub fn validate(&self, model: &str, record: Value) -> SchemaResult<Map<String, Value>> {
        let def = self.registry.model(model)?;

        let mut obj = match record {
            Value::Object(obj) => obj,
            other => {
                return Err(SchemaError::record_invalid(
                    model,
                    format!("expected object, got {}", json_type_name(&other)),
                ))
            }
        };

        for key in obj.keys() {
            match def.fields.get(key) {
                None => {
                    return Err(SchemaError::record_invalid(
                        model,
                        format!("undeclared field '{}'", key),
                    ))
                }
                Some(f) if !f.kind.is_stored() => {
                    return Err(SchemaError::record_invalid(
                        model,
                        format!("'{}' is a reverse relation and cannot be stored", key),
                    ))
                }
                Some(_) => {}
            }
        }

        match obj.get(&def.primary_key) {
            None | Some(Value::Null) => {
                return Err(SchemaError::record_invalid(
                    model,
                    format!("primary key '{}' is missing", def.primary_key),
                ))
            }
            Some(_) => {}
        }

        for (name, field) in &def.fields {
            if !field.kind.is_stored() {
                continue;
            }
            let value = obj.entry(name.clone()).or_insert_with(|| match field.kind {
                FieldKind::ManyToMany { .. } => Value::Array(Vec::new()),
                _ => Value::Null,
            });

            if value.is_null() {
                if !field.null {
                    return Err(SchemaError::record_invalid(
                        model,
                        format!("'{}' is not nullable", name),
                    ));
                }
                continue;
            }

            self.check_kind(def, name, &field.kind, value)?;
        }

        Ok(obj)
    }

    fn check_kind(
        &self,
        model: &ModelDef,
        name: &str,
        kind: &FieldKind,
        value: &Value,
    ) -> SchemaResult<()> {
        let ok = match kind {
            FieldKind::String | FieldKind::Text => value.is_string(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Float | FieldKind::Decimal => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Date => value
                .as_str()
                .map_or(false, |s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
            FieldKind::Datetime => value
                .as_str()
                .map_or(false, |s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
            FieldKind::Json => true,
            FieldKind::ForeignKey { target } => self.is_key_of(target, value)?,
            FieldKind::ManyToMany { target } => match value.as_array() {
                Some(items) => {
                    let mut all = true;
                    for item in items {
                        all &= self.is_key_of(target, item)?;
                    }
                    all
                }
                None => false,
            },
            FieldKind::Reverse { .. } => false,
        };

        if ok {
            Ok(())
        } else {
            Err(SchemaError::record_invalid(
                &model.name,
                format!(
                    "'{}' expected {}, got {}",
                    name,
                    kind.type_name(),
                    json_type_name(value)
                ),
            ))
        }
    }

    /// Whether `value` has the shape of the target model's primary key
    fn is_key_of(&self, target: &str, value: &Value) -> SchemaResult<bool> {
        let target = self.registry.model(target)?;
        Ok(match target.primary_key_def().map(|d| &d.kind) {
            Some(FieldKind::Int) => value.is_i64() || value.is_u64(),
            Some(FieldKind::Float) | Some(FieldKind::Decimal) => value.is_number(),
            Some(FieldKind::Bool) => value.is_boolean(),
            Some(FieldKind::Json) => true,
            _ => value.is_string(),
        })
    }
}

/// JSON type name for error messages
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
