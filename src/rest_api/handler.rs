//! # REST API Handler
//!
//! Compiles request parameters into a plan, executes it against the store
//! and renders the response body.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::errors::{RestError, RestResult};
use super::pagination::{PageRequest, PaginationConfig};
use super::resource::{Resource, ResourceRegistry};
use super::response::ListResponse;
use crate::compiler::{
    coerce, CompiledPlan, ParameterBundle, PlanResult, Projection, QueryCompiler, Source,
};
use crate::store::{Database, Operand, QuerySet};

/// REST handler trait for resource operations
pub trait RestHandler: Send + Sync {
    /// List a resource.
    ///
    /// `base_url` is the absolute collection URL without query string.
    fn list(&self, resource: &str, params: &ParameterBundle, base_url: &str) -> RestResult<Value>;

    /// Get a single record by primary key
    fn retrieve(
        &self,
        resource: &str,
        id: &str,
        params: &ParameterBundle,
        base_url: &str,
    ) -> RestResult<Value>;

    /// Names of the served resources
    fn resources(&self) -> Vec<String>;
}

/// Handler backed by the query compiler and the in-memory store
pub struct QueryHandler {
    db: Arc<Database>,
    compiler: QueryCompiler,
    resources: ResourceRegistry,
    pagination: PaginationConfig,
    debug: bool,
}

impl QueryHandler {
    pub fn new(
        db: Arc<Database>,
        compiler: QueryCompiler,
        resources: ResourceRegistry,
        pagination: PaginationConfig,
    ) -> Self {
        Self {
            db,
            compiler,
            resources,
            pagination,
            debug: false,
        }
    }

    /// Reports silent stage failures in `options.<stage>_error`
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Compiles `params` for `resource` without executing the plan
    pub fn compile(
        &self,
        resource: &str,
        params: &ParameterBundle,
        base_url: &str,
    ) -> RestResult<CompiledPlan> {
        let resource = self.resources.get(resource)?;
        let paginated = !params.flag("all");
        self.compile_for(resource, resource.source(&self.db)?, params, base_url, paginated)
    }

    fn compile_for(
        &self,
        resource: &Resource,
        source: Source,
        params: &ParameterBundle,
        base_url: &str,
        paginated: bool,
    ) -> RestResult<CompiledPlan> {
        let mut ctx = resource
            .context(base_url)
            .with_pagination(paginated)
            .with_debug(self.debug);
        let plan = self.compiler.compile(source, params, &mut ctx)?;
        debug!(
            request_id = %ctx.request_id,
            resource = %resource.name,
            elapsed_ms = ctx.elapsed_ms() as u64,
            "Request compiled"
        );
        Ok(plan)
    }
}

impl RestHandler for QueryHandler {
    fn list(&self, resource: &str, params: &ParameterBundle, base_url: &str) -> RestResult<Value> {
        let resource = self.resources.get(resource)?;
        let all = params.flag("all");
        let plan =
            self.compile_for(resource, resource.source(&self.db)?, params, base_url, !all)?;

        let qs = match plan.result {
            PlanResult::Raw(payload) => return Ok(payload),
            PlanResult::Aggregate(map) => return Ok(Value::Object(map)),
            PlanResult::Plan(qs) => qs,
        };

        if all {
            let rows = qs.fetch()?;
            info!(resource = %resource.name, rows = rows.len(), "Listed without pagination");
            return Ok(Value::Array(render(&qs, plan.projection.as_ref(), rows)));
        }

        let page = PageRequest::from_params(params, &self.pagination, resource.page_size)?
            .resolve(qs.count()?)?;
        let window = qs.slice(page.offset(), page.size);
        let rows = render(&window, plan.projection.as_ref(), window.fetch()?);
        info!(
            resource = %resource.name,
            page = page.number,
            rows = rows.len(),
            count = page.count,
            "Listed page"
        );

        let key = &self.pagination.page_key;
        let envelope = ListResponse::new(
            rows,
            &page,
            page.next_url(base_url, params, key),
            page.previous_url(base_url, params, key),
            plan.options,
        );
        serde_json::to_value(envelope).map_err(|e| RestError::Internal(e.to_string()))
    }

    fn retrieve(
        &self,
        resource: &str,
        id: &str,
        params: &ParameterBundle,
        base_url: &str,
    ) -> RestResult<Value> {
        let resource = self.resources.get(resource)?;
        let Some(model) = resource.model() else {
            return Err(RestError::NotFound);
        };

        // an id that cannot be a primary key matches nothing
        let registry = self.db.registry();
        let pk = registry.model(model).map(|m| m.primary_key.clone())?;
        let pk = match coerce(registry, model, &pk, id) {
            Ok(Operand::Value(value)) => value,
            _ => return Err(RestError::NotFound),
        };
        let qs = self.db.queryset(model)?.with_pk(pk)?;

        let plan = self.compile_for(
            resource,
            Source::Collection(qs),
            params,
            base_url,
            false,
        )?;
        let PlanResult::Plan(qs) = plan.result else {
            return Err(RestError::InvalidQueryParam(
                "aggregation is not available on a single record".into(),
            ));
        };

        let row = qs.first()?.ok_or(RestError::NotFound)?;
        let mut rows = render(&qs, plan.projection.as_ref(), vec![row]);
        rows.pop().ok_or(RestError::NotFound)
    }

    fn resources(&self) -> Vec<String> {
        self.resources.names().map(str::to_string).collect()
    }
}

/// Applies the row projection; grouped rows are already shaped
fn render(qs: &QuerySet, projection: Option<&Projection>, rows: Vec<Value>) -> Vec<Value> {
    match projection {
        Some(projection) if qs.fields().is_none() => {
            rows.iter().map(|row| projection.apply(row)).collect()
        }
        _ => rows,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::cache::CacheDirectory;
    use crate::schema::{FieldDef, ModelDef, SchemaRegistry};
    use crate::store::AggregateRegistry;
    use serde_json::json;

    fn handler() -> QueryHandler {
        let registry = SchemaRegistry::new()
            .with(
                ModelDef::new("invoice")
                    .field("amount", FieldDef::int())
                    .field(
                        "status",
                        FieldDef::string().with_choices([("paid", "Paid"), ("open", "Open")]),
                    ),
            )
            .unwrap();
        registry.validate().unwrap();
        let db = Arc::new(Database::new(
            Arc::new(registry),
            Arc::new(AggregateRegistry::with_defaults()),
        ));
        db.load_fixtures(json!({
            "invoice": [
                {"id": 1, "amount": 10, "status": "paid"},
                {"id": 2, "amount": 20, "status": "open"},
                {"id": 3, "amount": 30, "status": "paid"}
            ]
        }))
        .unwrap();
        let resources = ResourceRegistry::build(&BTreeMap::new(), db.registry()).unwrap();
        QueryHandler::new(
            db,
            QueryCompiler::new(Arc::new(CacheDirectory::default())),
            resources,
            PaginationConfig {
                default_page_size: 2,
                ..PaginationConfig::default()
            },
        )
    }

    const BASE: &str = "http://localhost/api/invoice";

    #[test]
    fn test_list_envelope() {
        let body = handler()
            .list("invoice", &ParameterBundle::new(), BASE)
            .unwrap();
        assert_eq!(body["count"], 3);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(body["next"], "http://localhost/api/invoice?page=2");
        assert!(body["previous"].is_null());
    }

    #[test]
    fn test_all_disables_pagination() {
        let body = handler()
            .list("invoice", &ParameterBundle::from_query("all=true"), BASE)
            .unwrap();
        assert_eq!(body.as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_aggregate_returns_bare_map() {
        let body = handler()
            .list("invoice", &ParameterBundle::from_query("sum=amount"), BASE)
            .unwrap();
        assert_eq!(body, json!({"amount_sum": 60}));
    }

    #[test]
    fn test_retrieve_with_projection() {
        let h = handler();
        let params = ParameterBundle::from_query("fields=status&display=1");
        let body = h.retrieve("invoice", "2", &params, BASE).unwrap();
        assert_eq!(body, json!({"status_display": "Open", "status": "open"}));

        assert!(matches!(
            h.retrieve("invoice", "9", &ParameterBundle::new(), BASE),
            Err(RestError::NotFound)
        ));
        assert!(matches!(
            h.retrieve("invoice", "abc", &ParameterBundle::new(), BASE),
            Err(RestError::NotFound)
        ));
    }

    #[test]
    fn test_strict_failure_is_validation_error() {
        let err = handler()
            .list("invoice", &ParameterBundle::from_query("order_by=nope"), BASE)
            .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 400);
        assert!(err.to_string().starts_with("order_by: "));
    }
}
