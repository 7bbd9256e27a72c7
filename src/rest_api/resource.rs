//! REST resources
//!
//! A resource maps a URL segment onto a schema model (or a static payload)
//! together with the permission scope injected into every request. Scope and
//! metadata validity filters are written like query parameters and compiled
//! once at startup against the schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::errors::{RestError, RestResult};
use crate::compiler::{coerce_operand, RawOperand, RequestContext, Source};
use crate::schema::SchemaRegistry;
use crate::store::{Database, Predicate};

/// Resource definition as written in the configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Schema model backing the resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Static payload served as-is instead of a model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Filters applied before any request parameter, e.g. `{"status__in": "paid,open"}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scope: BTreeMap<String, String>,

    /// Per metadata relation, filters its prefetched rows must satisfy
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata_validity: BTreeMap<String, BTreeMap<String, String>>,

    /// Page size overriding the pagination default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,
}

impl ResourceConfig {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.scope.insert(key.into(), value.into());
        self
    }
}

/// What a compiled resource serves
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceKind {
    Model {
        model: String,
        scope: Vec<Predicate>,
        validity: BTreeMap<String, Predicate>,
    },
    Static(Value),
}

/// A resource ready to serve requests
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub page_size: Option<usize>,
}

impl Resource {
    /// Compiles a resource definition against the schema
    pub fn compile(
        name: &str,
        config: &ResourceConfig,
        registry: &SchemaRegistry,
    ) -> RestResult<Self> {
        let fail = |msg: String| RestError::Config(format!("resource '{}': {}", name, msg));

        let kind = match (&config.model, &config.data) {
            (Some(_), Some(_)) => return Err(fail("'model' and 'data' are exclusive".into())),
            (None, None) => return Err(fail("one of 'model' or 'data' is required".into())),
            (None, Some(data)) => {
                if !config.scope.is_empty() || !config.metadata_validity.is_empty() {
                    return Err(fail("a static resource cannot declare filters".into()));
                }
                ResourceKind::Static(data.clone())
            }
            (Some(model), None) => {
                let def = registry.model(model).map_err(|e| fail(e.to_string()))?;
                let scope = compile_filters(registry, model, &config.scope)
                    .map_err(|e| fail(format!("scope: {}", e)))?;

                let mut validity = BTreeMap::new();
                for (relation, filters) in &config.metadata_validity {
                    if !def.metadata.contains(relation) {
                        return Err(fail(format!(
                            "'{}' is not a metadata relation of '{}'",
                            relation, model
                        )));
                    }
                    let resolved = registry
                        .walk_exact(model, relation)
                        .map_err(|e| fail(e.to_string()))?;
                    let target = registry
                        .target_of(&resolved)
                        .ok_or_else(|| fail(format!("'{}' is not a relation", relation)))?;
                    let predicates = compile_filters(registry, &target.name, filters)
                        .map_err(|e| fail(format!("metadata_validity.{}: {}", relation, e)))?;
                    validity.insert(relation.clone(), Predicate::and(predicates));
                }

                ResourceKind::Model {
                    model: model.clone(),
                    scope,
                    validity,
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            kind,
            page_size: config.page_size,
        })
    }

    /// Request context carrying this resource's scope and validity filters
    pub fn context(&self, base_url: impl Into<String>) -> RequestContext {
        let mut ctx = RequestContext::new(base_url);
        if let ResourceKind::Model { scope, validity, .. } = &self.kind {
            for predicate in scope {
                ctx = ctx.with_scope(predicate.clone());
            }
            for (relation, predicate) in validity {
                ctx = ctx.with_metadata_validity(relation.clone(), predicate.clone());
            }
        }
        ctx
    }

    /// Compiler source for this resource
    pub fn source(&self, db: &Arc<Database>) -> RestResult<Source> {
        match &self.kind {
            ResourceKind::Model { model, .. } => Ok(Source::Collection(db.queryset(model)?)),
            ResourceKind::Static(data) => Ok(Source::Raw(data.clone())),
        }
    }

    pub fn model(&self) -> Option<&str> {
        match &self.kind {
            ResourceKind::Model { model, .. } => Some(model),
            ResourceKind::Static(_) => None,
        }
    }
}

fn compile_filters(
    registry: &SchemaRegistry,
    model: &str,
    filters: &BTreeMap<String, String>,
) -> Result<Vec<Predicate>, crate::compiler::QueryError> {
    filters
        .iter()
        .map(|(key, raw)| {
            coerce_operand(registry, model, key, RawOperand::from_param(raw))
                .map(|c| c.into_predicate())
        })
        .collect()
}

/// Resources by URL segment
#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, Resource>,
}

impl ResourceRegistry {
    /// Compiles every configured resource.
    ///
    /// With no resource configured, every schema model is exposed under its
    /// own name with no scope.
    pub fn build(
        configs: &BTreeMap<String, ResourceConfig>,
        registry: &SchemaRegistry,
    ) -> RestResult<Self> {
        let mut resources = BTreeMap::new();
        if configs.is_empty() {
            for model in registry.models() {
                let resource =
                    Resource::compile(&model.name, &ResourceConfig::model(&model.name), registry)?;
                resources.insert(model.name.clone(), resource);
            }
        } else {
            for (name, config) in configs {
                resources.insert(name.clone(), Resource::compile(name, config, registry)?);
            }
        }
        debug!(resources = resources.len(), "Resources compiled");
        Ok(Self { resources })
    }

    pub fn get(&self, name: &str) -> RestResult<&Resource> {
        self.resources
            .get(name)
            .ok_or_else(|| RestError::ResourceNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
