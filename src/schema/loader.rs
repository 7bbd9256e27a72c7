//! Schema loader
//!
//! A schema file is a JSON object keyed by model name:
//!
//! ```json
//! {
//!   "models": {
//!     "invoice": {
//!       "primary_key": "id",
//!       "fields": {
//!         "id": {"type": "int"},
//!         "status": {"type": "string", "choices": [["d", "Draft"], ["p", "Paid"]]},
//!         "customer": {"type": "foreign_key", "target": "customer"}
//!       },
//!       "metadata": ["notes"]
//!     }
//!   }
//! }
//! ```
//!
//! Missing or malformed schema files are fatal at startup.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::errors::{SchemaError, SchemaResult};
use super::registry::SchemaRegistry;
use super::types::ModelDef;

#[derive(Debug, Deserialize)]
struct SchemaFile {
    models: BTreeMap<String, ModelDef>,
}

/// Reads schema files into a [`SchemaRegistry`]
pub struct SchemaLoader;

impl SchemaLoader {
    /// Loads and validates a schema file.
    pub fn load_file(path: &Path) -> SchemaResult<SchemaRegistry> {
        let content = fs::read_to_string(path).map_err(|e| {
            SchemaError::malformed(
                path.display().to_string(),
                format!("Failed to read file: {}", e),
            )
        })?;
        Self::load_str(&content).map_err(|e| match e {
            SchemaError::Malformed { location, reason } => SchemaError::Malformed {
                location: format!("{}: {}", path.display(), location),
                reason,
            },
            other => other,
        })
    }

    /// Parses and validates schema JSON.
    pub fn load_str(content: &str) -> SchemaResult<SchemaRegistry> {
        let file: SchemaFile = serde_json::from_str(content)
            .map_err(|e| SchemaError::malformed("<schema>", format!("Invalid JSON: {}", e)))?;

        let mut registry = SchemaRegistry::new();
        for (name, mut model) in file.models {
            model.name = name;
            registry.register(model)?;
        }
        registry.validate()?;

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCHEMA: &str = r#"{
        "models": {
            "customer": {"fields": {"id": {"type": "int"}, "name": {"type": "string"}}},
            "invoice": {
                "fields": {
                    "id": {"type": "int"},
                    "status": {"type": "string", "choices": [["d", "Draft"]]},
                    "customer": {"type": "foreign_key", "target": "customer", "null": true}
                }
            }
        }
    }"#;

    #[test]
    fn test_load_str_fills_model_names() {
        let reg = SchemaLoader::load_str(SCHEMA).unwrap();
        assert_eq!(reg.len(), 2);
        let invoice = reg.model("invoice").unwrap();
        assert_eq!(invoice.name, "invoice");
        assert_eq!(invoice.primary_key, "id");
        assert_eq!(invoice.fields["status"].choices.len(), 1);
    }

    #[test]
    fn test_load_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"models\": 3}}").unwrap();

        let err = SchemaLoader::load_file(file.path()).unwrap_err();
        match err {
            SchemaError::Malformed { location, .. } => {
                assert!(location.contains(&file.path().display().to_string()))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_rejects_unknown_target() {
        let json = r#"{"models": {"a": {"fields": {"id": {"type": "int"},
            "b": {"type": "foreign_key", "target": "b"}}}}}"#;
        assert!(SchemaLoader::load_str(json).is_err());
    }
}
