//! In-memory record store
//!
//! One table per registered model. Records are validated on insert and kept
//! in insertion order; a primary-key index serves relation lookups.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use serde_json::{Map, Value};
use tracing::info;

use super::aggregate::AggregateRegistry;
use super::errors::{StoreError, StoreResult};
use super::queryset::QuerySet;
use crate::schema::{RecordValidator, SchemaError, SchemaRegistry};

/// Rows of one model
#[derive(Debug, Default)]
pub struct Table {
    rows: Vec<Map<String, Value>>,
    index: HashMap<String, usize>,
}

impl Table {
    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn get(&self, pk: &Value) -> Option<&Map<String, Value>> {
        self.index.get(&pk_key(pk)).map(|&idx| &self.rows[idx])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Index key for a primary key value; `1` and `1.0` share a key
fn pk_key(pk: &Value) -> String {
    match pk {
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9e15 => (f as i64).to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Store shared by every request
#[derive(Debug)]
pub struct Database {
    registry: Arc<SchemaRegistry>,
    aggregates: Arc<AggregateRegistry>,
    tables: RwLock<HashMap<String, Table>>,
}

impl Database {
    pub fn new(registry: Arc<SchemaRegistry>, aggregates: Arc<AggregateRegistry>) -> Self {
        let tables = registry
            .models()
            .map(|m| (m.name.clone(), Table::default()))
            .collect();
        Self {
            registry,
            aggregates,
            tables: RwLock::new(tables),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn aggregates(&self) -> &AggregateRegistry {
        &self.aggregates
    }

    /// Base query over every record of `model`
    pub fn queryset(self: &Arc<Self>, model: &str) -> StoreResult<QuerySet> {
        QuerySet::new(Arc::clone(self), model)
    }

    /// Validates and inserts one record
    pub fn insert(&self, model: &str, record: Value) -> StoreResult<()> {
        let record = RecordValidator::new(&self.registry).validate(model, record)?;
        let def = self.registry.model(model)?;
        let pk = record.get(&def.primary_key).cloned().unwrap_or(Value::Null);
        let key = pk_key(&pk);

        let mut tables = self.tables.write().map_err(|_| StoreError::lock_poisoned())?;
        let table = tables.entry(model.to_string()).or_default();
        if table.index.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                model: model.to_string(),
                pk: key,
            });
        }
        table.index.insert(key, table.rows.len());
        table.rows.push(record);
        Ok(())
    }

    /// Inserts records from a JSON fixture value `{"model": [record, ..], ..}`.
    pub fn load_fixtures(&self, fixtures: Value) -> StoreResult<usize> {
        let Value::Object(models) = fixtures else {
            return Err(SchemaError::malformed("<fixtures>", "expected an object keyed by model").into());
        };

        let mut inserted = 0;
        for (model, records) in models {
            let Value::Array(records) = records else {
                return Err(SchemaError::malformed(
                    format!("<fixtures>.{}", model),
                    "expected an array of records",
                )
                .into());
            };
            for record in records {
                self.insert(&model, record)?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    /// Reads fixtures from a JSON file
    pub fn load_fixtures_file(&self, path: &Path) -> StoreResult<usize> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::malformed(path.display().to_string(), format!("Failed to read file: {}", e))
        })?;
        let value: Value = serde_json::from_str(&content).map_err(|e| {
            SchemaError::malformed(path.display().to_string(), format!("Invalid JSON: {}", e))
        })?;
        let count = self.load_fixtures(value)?;
        info!(path = %path.display(), records = count, "fixtures loaded");
        Ok(count)
    }

    /// Number of records stored for `model`
    pub fn count(&self, model: &str) -> StoreResult<usize> {
        self.registry.model(model)?;
        let tables = self.read()?;
        Ok(tables.get(model).map_or(0, Table::len))
    }

    pub(crate) fn read(&self) -> StoreResult<RwLockReadGuard<'_, HashMap<String, Table>>> {
        self.tables.read().map_err(|_| StoreError::lock_poisoned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, ModelDef};
    use serde_json::json;

    fn database() -> Database {
        let registry = SchemaRegistry::new()
            .with(ModelDef::new("customer").field("name", FieldDef::string()))
            .unwrap();
        Database::new(Arc::new(registry), Arc::new(AggregateRegistry::with_defaults()))
    }

    #[test]
    fn test_insert_and_lookup() {
        let db = database();
        db.insert("customer", json!({"id": 1, "name": "Acme"})).unwrap();

        let tables = db.read().unwrap();
        let row = tables["customer"].get(&json!(1)).unwrap();
        assert_eq!(row["name"], json!("Acme"));
        assert!(tables["customer"].get(&json!(1.0)).is_some());
    }

    #[test]
    fn test_duplicate_primary_key() {
        let db = database();
        db.insert("customer", json!({"id": 1, "name": "Acme"})).unwrap();
        let err = db.insert("customer", json!({"id": 1, "name": "Other"})).unwrap_err();
        assert_eq!(err.code(), "RP_DUPLICATE_KEY");
    }

    #[test]
    fn test_load_fixtures_counts_records() {
        let db = database();
        let count = db
            .load_fixtures(json!({"customer": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]}))
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(db.count("customer").unwrap(), 2);
        assert!(db.load_fixtures(json!({"ghost": [{"id": 1}]})).is_err());
    }
}
