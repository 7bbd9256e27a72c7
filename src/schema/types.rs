//! Schema type definitions
//!
//! Supported field kinds:
//! - string / text: UTF-8 string
//! - int: 64-bit signed integer
//! - float / decimal: numeric
//! - bool: Boolean
//! - date: `YYYY-MM-DD` string
//! - datetime: RFC 3339 string
//! - json: any JSON value
//! - foreign_key: primary key of a record in `target`
//! - many_to_many: array of primary keys of records in `target`
//! - reverse: records of `target` whose `field` points back at this record

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared kind of a model field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Text,
    Int,
    Float,
    Decimal,
    Bool,
    Date,
    Datetime,
    Json,
    /// Single-valued relation, stored as the target's primary key
    ForeignKey { target: String },
    /// Multi-valued relation, stored as an array of the target's primary keys
    ManyToMany { target: String },
    /// Multi-valued relation computed from a foreign key on `target`
    Reverse { target: String, field: String },
}

impl FieldKind {
    /// Returns the kind name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Text => "text",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Decimal => "decimal",
            FieldKind::Bool => "bool",
            FieldKind::Date => "date",
            FieldKind::Datetime => "datetime",
            FieldKind::Json => "json",
            FieldKind::ForeignKey { .. } => "foreign_key",
            FieldKind::ManyToMany { .. } => "many_to_many",
            FieldKind::Reverse { .. } => "reverse",
        }
    }

    /// Target model of a relation
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::ForeignKey { target }
            | FieldKind::ManyToMany { target }
            | FieldKind::Reverse { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.target().is_some()
    }

    /// Relations that reach more than one record
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, FieldKind::ManyToMany { .. } | FieldKind::Reverse { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Int | FieldKind::Float | FieldKind::Decimal)
    }

    /// Whether the kind is physically stored on the record
    pub fn is_stored(&self) -> bool {
        !matches!(self, FieldKind::Reverse { .. })
    }
}

/// A (stored value, display label) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice(pub Value, pub String);

/// Field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field kind
    #[serde(flatten)]
    pub kind: FieldKind,
    /// Whether nulls are accepted
    #[serde(default)]
    pub null: bool,
    /// Enumerated values with their display labels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
}

impl FieldDef {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            null: false,
            choices: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn int() -> Self {
        Self::new(FieldKind::Int)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn bool() -> Self {
        Self::new(FieldKind::Bool)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn datetime() -> Self {
        Self::new(FieldKind::Datetime)
    }

    pub fn foreign_key(target: impl Into<String>) -> Self {
        Self::new(FieldKind::ForeignKey {
            target: target.into(),
        })
    }

    pub fn many_to_many(target: impl Into<String>) -> Self {
        Self::new(FieldKind::ManyToMany {
            target: target.into(),
        })
    }

    pub fn reverse(target: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(FieldKind::Reverse {
            target: target.into(),
            field: field.into(),
        })
    }

    /// Marks the field as nullable
    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Attaches enumerated choices
    pub fn with_choices<I, V, L>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = (V, L)>,
        V: Into<Value>,
        L: Into<String>,
    {
        self.choices = choices
            .into_iter()
            .map(|(v, l)| Choice(v.into(), l.into()))
            .collect();
        self
    }

    /// Display label for a stored value, if the field declares choices
    pub fn display(&self, value: &Value) -> Option<&str> {
        self.choices
            .iter()
            .find(|Choice(v, _)| v == value)
            .map(|Choice(_, label)| label.as_str())
    }
}

fn default_primary_key() -> String {
    "id".to_string()
}

/// Model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// Model name (filled from the registry key when loaded from a file)
    #[serde(default)]
    pub name: String,
    /// Primary key field name
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Field definitions
    pub fields: BTreeMap<String, FieldDef>,
    /// Relations prefetched when a request asks for metadata
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<String>,
}

impl ModelDef {
    /// Create a model with an integer `id` primary key
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), FieldDef::int());
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            fields,
            metadata: Vec::new(),
        }
    }

    /// Adds a field
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Declares metadata relations
    pub fn with_metadata<I, S>(mut self, relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata = relations.into_iter().map(Into::into).collect();
        self
    }

    /// Looks up a field, accepting `pk` as an alias for the primary key
    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        if name == "pk" {
            return self.fields.get(&self.primary_key);
        }
        self.fields.get(name)
    }

    /// Canonical field name (`pk` resolved to the primary key)
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        if name == "pk" {
            &self.primary_key
        } else {
            name
        }
    }

    /// Primary key definition
    pub fn primary_key_def(&self) -> Option<&FieldDef> {
        self.fields.get(&self.primary_key)
    }

    /// Validates the model structure on its own
    pub fn validate_structure(&self) -> Result<(), String> {
        let pk = self
            .primary_key_def()
            .ok_or_else(|| format!("primary key '{}' is not a declared field", self.primary_key))?;

        if pk.kind.is_relation() || pk.null {
            return Err(format!(
                "primary key '{}' must be a non-null scalar",
                self.primary_key
            ));
        }

        if self.fields.contains_key("pk") {
            return Err("'pk' is reserved as the primary key alias".into());
        }

        for (name, def) in &self.fields {
            if name.contains("__") || name.contains('.') {
                return Err(format!("field name '{}' may not contain '__' or '.'", name));
            }
            if !def.choices.is_empty() && def.kind.is_relation() {
                return Err(format!("relation '{}' cannot declare choices", name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_def_deserializes_relation() {
        let def: FieldDef =
            serde_json::from_value(json!({"type": "foreign_key", "target": "customer", "null": true}))
                .unwrap();
        assert_eq!(
            def.kind,
            FieldKind::ForeignKey {
                target: "customer".into()
            }
        );
        assert!(def.null);
        assert!(def.kind.is_relation());
        assert!(!def.kind.is_multi_valued());
    }

    #[test]
    fn test_choices_display() {
        let def = FieldDef::string().with_choices([("d", "Draft"), ("p", "Paid")]);
        assert_eq!(def.display(&json!("p")), Some("Paid"));
        assert_eq!(def.display(&json!("x")), None);
    }

    #[test]
    fn test_model_requires_scalar_pk() {
        let model = ModelDef::new("invoice").field("id", FieldDef::foreign_key("x"));
        assert!(model.validate_structure().is_err());

        let model = ModelDef::new("invoice").field("amount", FieldDef::float());
        assert!(model.validate_structure().is_ok());
        assert_eq!(model.canonical("pk"), "id");
    }
}
