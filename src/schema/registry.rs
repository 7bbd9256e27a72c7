//! Explicit schema registry
//!
//! Maps model name → field name → (kind, relation target). Built once at
//! startup and consulted by the coercer, the shaper and the store instead of
//! walking record shapes at request time.

use std::collections::BTreeMap;

use super::errors::{SchemaError, SchemaResult};
use super::types::{FieldDef, FieldKind, ModelDef};

/// Separator used between field path segments
pub const LOOKUP_SEP: &str = "__";

/// One resolved segment of a field path
#[derive(Debug, Clone, PartialEq)]
pub struct FieldHop {
    /// Model owning the field
    pub model: String,
    /// Canonical field name (`pk` already resolved)
    pub field: String,
    /// Field definition
    pub def: FieldDef,
}

/// A field path resolved against the registry.
///
/// `hops` holds every segment that named a field; `rest` holds the trailing
/// segments that did not (lookup names such as `gte`).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub hops: Vec<FieldHop>,
    pub rest: Vec<String>,
}

impl ResolvedPath {
    /// Last resolved field
    pub fn terminal(&self) -> &FieldHop {
        // walk() never returns an empty hop list
        &self.hops[self.hops.len() - 1]
    }

    /// Canonical storage path segments
    pub fn segments(&self) -> Vec<String> {
        self.hops.iter().map(|h| h.field.clone()).collect()
    }

    /// Canonical storage path joined with `__`
    pub fn joined(&self) -> String {
        self.segments().join(LOOKUP_SEP)
    }

    /// Whether any hop reaches more than one record
    pub fn is_multi_valued(&self) -> bool {
        self.hops.iter().any(|h| h.def.kind.is_multi_valued())
    }
}

/// Registry of models
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: BTreeMap<String, ModelDef>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model, replacing any model of the same name.
    ///
    /// Relation targets are checked by [`SchemaRegistry::validate`] once every
    /// model is registered.
    pub fn register(&mut self, model: ModelDef) -> SchemaResult<()> {
        if model.name.is_empty() {
            return Err(SchemaError::malformed("<in-memory>", "model name is empty"));
        }
        model
            .validate_structure()
            .map_err(|e| SchemaError::malformed(model.name.clone(), e))?;
        self.models.insert(model.name.clone(), model);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, model: ModelDef) -> SchemaResult<Self> {
        self.register(model)?;
        Ok(self)
    }

    /// Cross-model checks
    ///
    /// - every relation target is registered
    /// - a reverse relation names a foreign key on its target pointing back
    /// - metadata relations are relations of the same model
    pub fn validate(&self) -> SchemaResult<()> {
        for model in self.models.values() {
            for (name, def) in &model.fields {
                let Some(target) = def.kind.target() else {
                    continue;
                };
                let target_model = self.models.get(target).ok_or_else(|| {
                    SchemaError::malformed(
                        format!("{}.{}", model.name, name),
                        format!("relation target '{}' is not registered", target),
                    )
                })?;

                if let FieldKind::Reverse { field, .. } = &def.kind {
                    match target_model.fields.get(field).map(|d| &d.kind) {
                        Some(FieldKind::ForeignKey { target }) if target == &model.name => {}
                        _ => {
                            return Err(SchemaError::malformed(
                                format!("{}.{}", model.name, name),
                                format!(
                                    "'{}.{}' is not a foreign key to '{}'",
                                    target_model.name, field, model.name
                                ),
                            ))
                        }
                    }
                }
            }

            for relation in &model.metadata {
                match model.fields.get(relation) {
                    Some(def) if def.kind.is_relation() => {}
                    _ => {
                        return Err(SchemaError::malformed(
                            model.name.clone(),
                            format!("metadata relation '{}' is not a relation", relation),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks a model up by name
    pub fn model(&self, name: &str) -> SchemaResult<&ModelDef> {
        self.models
            .get(name)
            .ok_or_else(|| SchemaError::UnknownModel(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Resolves a `__`-delimited path starting at `model`.
    ///
    /// The first segment must name a field. Resolution follows relations and
    /// stops at the first segment that is not a field of the current model or
    /// after a scalar field; the remaining segments are returned in `rest`.
    pub fn walk(&self, model: &str, path: &str) -> SchemaResult<ResolvedPath> {
        let segments: Vec<&str> = path.split(LOOKUP_SEP).collect();
        let mut current = self.model(model)?;
        let mut hops = Vec::new();
        let mut idx = 0;

        while idx < segments.len() {
            let segment = segments[idx];
            let Some(def) = current.get(segment) else {
                break;
            };
            hops.push(FieldHop {
                model: current.name.clone(),
                field: current.canonical(segment).to_string(),
                def: def.clone(),
            });
            idx += 1;

            match def.kind.target() {
                Some(target) => current = self.model(target)?,
                None => break,
            }
        }

        if hops.is_empty() {
            return Err(self.unknown_field(current, segments[0]));
        }

        Ok(ResolvedPath {
            hops,
            rest: segments[idx..].iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Resolves a path that must name fields only (no lookup suffix)
    pub fn walk_exact(&self, model: &str, path: &str) -> SchemaResult<ResolvedPath> {
        let resolved = self.walk(model, path)?;
        if let Some(first) = resolved.rest.first() {
            let last = resolved.terminal();
            return Err(match last.def.kind.target() {
                Some(target) => self.unknown_field(self.model(target)?, first),
                None => SchemaError::NotARelation {
                    model: last.model.clone(),
                    field: last.field.clone(),
                },
            });
        }
        Ok(resolved)
    }

    /// Model reached at the end of a resolved path, if it ends on a relation
    pub fn target_of(&self, resolved: &ResolvedPath) -> Option<&ModelDef> {
        resolved
            .terminal()
            .def
            .kind
            .target()
            .and_then(|t| self.models.get(t))
    }

    pub(crate) fn unknown_field(&self, model: &ModelDef, field: &str) -> SchemaError {
        let mut choices: Vec<&str> = model.fields.keys().map(String::as_str).collect();
        choices.push("pk");
        choices.sort_unstable();
        SchemaError::UnknownField {
            model: model.name.clone(),
            field: field.to_string(),
            choices: choices.join(", "),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        let reg = SchemaRegistry::new()
            .with(ModelDef::new("customer").field("name", FieldDef::string()))
            .unwrap()
            .with(
                ModelDef::new("invoice")
                    .field("amount", FieldDef::float())
                    .field("customer", FieldDef::foreign_key("customer"))
                    .field("tags", FieldDef::many_to_many("tag")),
            )
            .unwrap()
            .with(ModelDef::new("tag").field("label", FieldDef::string()))
            .unwrap();
        reg.validate().unwrap();
        reg
    }

    #[test]
    fn test_walk_crosses_relations() {
        let reg = registry();
        let path = reg.walk("invoice", "customer__name__icontains").unwrap();
        assert_eq!(path.joined(), "customer__name");
        assert_eq!(path.rest, vec!["icontains".to_string()]);
        assert_eq!(path.terminal().model, "customer");
    }

    #[test]
    fn test_walk_resolves_pk_alias() {
        let reg = registry();
        let path = reg.walk("invoice", "customer__pk").unwrap();
        assert_eq!(path.joined(), "customer__id");
        assert!(path.rest.is_empty());
    }

    #[test]
    fn test_walk_unknown_first_segment() {
        let reg = registry();
        let err = reg.walk("invoice", "nope").unwrap_err();
        assert!(matches!(err, SchemaError::UnknownField { .. }));
    }

    #[test]
    fn test_walk_exact_rejects_suffix() {
        let reg = registry();
        assert!(matches!(
            reg.walk_exact("invoice", "amount__foo").unwrap_err(),
            SchemaError::NotARelation { .. }
        ));
        assert!(matches!(
            reg.walk_exact("invoice", "customer__nmae").unwrap_err(),
            SchemaError::UnknownField { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_dangling_target() {
        let reg = SchemaRegistry::new()
            .with(ModelDef::new("invoice").field("customer", FieldDef::foreign_key("ghost")))
            .unwrap();
        assert!(reg.validate().is_err());
    }

    #[test]
    fn test_multi_valued_detection() {
        let reg = registry();
        assert!(reg.walk("invoice", "tags__label").unwrap().is_multi_valued());
        assert!(!reg.walk("invoice", "customer__name").unwrap().is_multi_valued());
    }
}
