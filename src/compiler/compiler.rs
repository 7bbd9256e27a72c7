//! Query compiler
//!
//! Turns a parameter bundle into a plan over a collection. Stages run in a
//! fixed order:
//!
//! 1. cache resolution (`cache`, `timeout`)
//! 2. projection (`simple`, `fields`, `display`)
//! 3. metadata prefetch (`meta`), only without a projection
//! 4. aggregation (`group_by`, one key per aggregate function)
//! 5. filters (implicit keys, `-key` excludes, `filters` expression)
//! 6. ordering (`order_by`)
//! 7. distinct (`distinct`)
//! 8. pagination ordering safety net
//!
//! Filters are applied before grouping or scalar aggregation. In strict mode
//! the first stage failure aborts; with `silent` every failure is recorded in
//! [`Options`] and the stage is skipped.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::aggregation::{AggregationPlanner, GroupedResult};
use super::coercer::{coerce_operand, RawOperand};
use super::context::RequestContext;
use super::errors::{QueryError, Stage, ValidationError};
use super::options::Options;
use super::params::{str_to_bool, ParameterBundle, ReservedKeys, PAGE_KEY, PAGE_SIZE_KEY};
use super::shaper::{Projection, Shaper};
use crate::cache::CacheDirectory;
use crate::expr::{parse_filters, ExprLimits};
use crate::schema::LOOKUP_SEP;
use crate::store::{Distinct, Predicate, Prefetch, QuerySet, StoreError};

/// What the compiler runs against
#[derive(Debug, Clone)]
pub enum Source {
    /// A queryable collection
    Collection(QuerySet),
    /// A precomputed payload, passed through untouched
    Raw(Value),
}

/// Compiled result
#[derive(Debug, Clone, PartialEq)]
pub enum PlanResult {
    /// Filtered, ordered handle (grouped when the handle has `values`)
    Plan(QuerySet),
    /// Scalar aggregates over the filtered collection
    Aggregate(Map<String, Value>),
    /// Non-queryable payload
    Raw(Value),
}

impl PlanResult {
    /// Whether the result can be paginated
    pub fn is_paginable(&self) -> bool {
        matches!(self, PlanResult::Plan(_))
    }
}

/// Plan plus its options and row projection
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPlan {
    pub result: PlanResult,
    pub options: Options,
    /// Row renderer for `fields`; absent for grouped plans
    pub projection: Option<Projection>,
}

/// Compiler shared by every request
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    cache: Arc<CacheDirectory>,
    limits: ExprLimits,
    page_key: String,
    page_size_key: String,
}

/// Mutable state threaded through the stages of one compilation
struct Run<'c> {
    ctx: &'c mut RequestContext,
    options: Options,
    silent: bool,
}

impl Run<'_> {
    /// Records a stage failure, or aborts in strict mode
    fn fail(&mut self, stage: Stage, err: QueryError) -> Result<(), ValidationError> {
        if self.silent {
            debug!(
                request_id = %self.ctx.request_id,
                stage = %stage,
                error = %err,
                "Stage failed, skipped in silent mode"
            );
            self.options.record_failure(stage, &err, self.ctx.debug);
            return Ok(());
        }
        warn!(
            request_id = %self.ctx.request_id,
            stage = %stage,
            code = err.code(),
            error = %err,
            "Compilation failed"
        );
        let failure = ValidationError::new(stage, err);
        self.ctx.record_failure(failure.clone());
        Err(failure)
    }
}

impl QueryCompiler {
    pub fn new(cache: Arc<CacheDirectory>) -> Self {
        Self {
            cache,
            limits: ExprLimits::default(),
            page_key: PAGE_KEY.to_string(),
            page_size_key: PAGE_SIZE_KEY.to_string(),
        }
    }

    pub fn with_limits(mut self, limits: ExprLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Overrides the pagination parameter names treated as reserved
    pub fn with_page_keys(mut self, page: impl Into<String>, page_size: impl Into<String>) -> Self {
        self.page_key = page.into();
        self.page_size_key = page_size.into();
        self
    }

    pub fn cache(&self) -> &Arc<CacheDirectory> {
        &self.cache
    }

    pub fn limits(&self) -> &ExprLimits {
        &self.limits
    }

    /// Compiles `params` against `source`.
    ///
    /// A request whose compilation already failed gets the same failure back
    /// without running any stage again.
    pub fn compile(
        &self,
        source: Source,
        params: &ParameterBundle,
        ctx: &mut RequestContext,
    ) -> Result<CompiledPlan, ValidationError> {
        if let Some(failure) = ctx.failure() {
            debug!(request_id = %ctx.request_id, "Compilation already failed for this request");
            return Err(failure.clone());
        }

        let qs = match source {
            Source::Raw(payload) => {
                return Ok(CompiledPlan {
                    result: PlanResult::Raw(payload),
                    options: Options::default(),
                    projection: None,
                })
            }
            Source::Collection(qs) => qs,
        };
        let qs = ctx
            .scope
            .iter()
            .fold(qs, |qs, predicate| qs.filter(predicate.clone()));

        let reserved = ReservedKeys::new(qs.database().aggregates(), &self.page_key, &self.page_size_key);
        let silent = params.flag("silent");
        let mut run = Run {
            ctx,
            options: Options::default(),
            silent,
        };

        let params = self.resolve_cache(params, &reserved, &mut run);
        let fields = field_list(&params);
        let projecting = params.flag("simple") || !fields.is_empty();
        let (qs, projection) = if projecting {
            self.project(qs, &fields, params.flag("display"), &mut run)?
        } else {
            (self.attach_metadata(qs, &params, run.ctx), None)
        };

        let specs = AggregationPlanner::detect(&params, qs.database().aggregates());
        let group_by = params
            .get("group_by")
            .map(AggregationPlanner::group_fields)
            .unwrap_or_default();

        let mut qs = self.filter(qs, &params, &reserved, &mut run)?;
        let mut projection = projection;

        if !specs.is_empty() || !group_by.is_empty() {
            match AggregationPlanner::plan(&qs, &specs, &group_by) {
                Ok(GroupedResult::Scalar(map)) => {
                    run.options.set(Stage::Aggregates, true);
                    info!(
                        request_id = %run.ctx.request_id,
                        model = %qs.model(),
                        aggregates = specs.len(),
                        "Compiled scalar aggregate"
                    );
                    return Ok(CompiledPlan {
                        result: PlanResult::Aggregate(map),
                        options: run.options,
                        projection: None,
                    });
                }
                Ok(GroupedResult::Grouped(grouped)) => {
                    run.options.set(Stage::Aggregates, true);
                    qs = grouped;
                    projection = None;
                }
                Err(e) => run.fail(Stage::Aggregates, e)?,
            }
        }

        let qs = self.order(qs, &params, &mut run)?;
        let qs = self.distinct(qs, &params, &mut run)?;
        let qs = self.pagination_ordering(qs, run.ctx.paginated);

        debug!(
            request_id = %run.ctx.request_id,
            model = %qs.model(),
            plan = %qs.compile().unwrap_or_else(|e| e.to_string()),
            elapsed_ms = run.ctx.elapsed_ms() as u64,
            "Compiled plan"
        );

        Ok(CompiledPlan {
            result: PlanResult::Plan(qs),
            options: run.options,
            projection,
        })
    }

    // ==================
    // 1. Cache
    // ==================

    fn resolve_cache(
        &self,
        params: &ParameterBundle,
        reserved: &ReservedKeys,
        run: &mut Run<'_>,
    ) -> ParameterBundle {
        let mut params = params.clone();
        let Some(token) = params.remove("cache") else {
            return params;
        };
        let timeout = params.remove("timeout");
        // a blank token would share one entry between all callers
        let token = token.trim();
        if token.is_empty() {
            return params;
        }

        let resolved = match self.cache.resolve(token, &params, reserved, &run.ctx.base_url) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(request_id = %run.ctx.request_id, error = %e, "Cache unavailable");
                return params;
            }
        };

        let subset = resolved.params.without(reserved);
        if !subset.is_empty() {
            let ttl = self.cache.ttl(timeout.as_deref());
            match self.cache.store(token, &subset, ttl) {
                Ok(expires) => {
                    run.options.cache_expires = Some(expires);
                    run.options.cache_url = Some(resolved.cache_url.clone());
                    run.options.raw_url = Some(resolved.raw_url.clone());
                    run.options.cache_data = Some(subset);
                }
                Err(e) => warn!(request_id = %run.ctx.request_id, error = %e, "Cache store failed"),
            }
        }
        resolved.params
    }

    // ==================
    // 2. Projection
    // ==================

    /// Runs for `simple` or a non-empty `fields`; metadata is never attached
    /// afterwards, even when the shaper fails silently.
    fn project(
        &self,
        qs: QuerySet,
        fields: &[String],
        display: bool,
        run: &mut Run<'_>,
    ) -> Result<(QuerySet, Option<Projection>), ValidationError> {
        let qs = qs.clear_select_related().clear_prefetch_related();
        if fields.is_empty() {
            return Ok((qs, None));
        }

        let registry = qs.database().registry();
        match Shaper::plan(registry, qs.model(), fields, display) {
            Ok(projection) => {
                run.options.set(Stage::Fields, true);
                let qs = qs
                    .select_related(projection.relations.iter().cloned())
                    .prefetch_related(projection.prefetch.iter().map(Prefetch::new))
                    .only(projection.columns.iter().cloned());
                Ok((qs, Some(projection)))
            }
            Err(e) => {
                run.fail(Stage::Fields, e)?;
                Ok((qs, None))
            }
        }
    }

    // ==================
    // 3. Metadata
    // ==================

    fn attach_metadata(
        &self,
        qs: QuerySet,
        params: &ParameterBundle,
        ctx: &RequestContext,
    ) -> QuerySet {
        if !params.flag("meta") {
            return qs;
        }
        let Ok(model) = qs.database().registry().model(qs.model()) else {
            return qs;
        };
        if model.metadata.is_empty() {
            return qs;
        }
        let lookups: Vec<Prefetch> = model
            .metadata
            .iter()
            .map(|relation| match ctx.metadata_validity.get(relation) {
                Some(valid) => Prefetch::filtered(relation.clone(), valid.clone()),
                None => Prefetch::new(relation.clone()),
            })
            .collect();
        qs.prefetch_related(lookups)
    }

    // ==================
    // 5. Filters
    // ==================

    fn filter(
        &self,
        qs: QuerySet,
        params: &ParameterBundle,
        reserved: &ReservedKeys,
        run: &mut Run<'_>,
    ) -> Result<QuerySet, ValidationError> {
        match self.build_filters(&qs, params, reserved) {
            Ok(None) => Ok(qs),
            Ok(Some(filtered)) => {
                run.options.set(Stage::Filters, true);
                Ok(filtered)
            }
            Err(e) => {
                run.fail(Stage::Filters, e)?;
                Ok(qs)
            }
        }
    }

    fn build_filters(
        &self,
        qs: &QuerySet,
        params: &ParameterBundle,
        reserved: &ReservedKeys,
    ) -> Result<Option<QuerySet>, QueryError> {
        let registry = qs.database().registry();
        let mut include = Vec::new();
        let mut exclude = Vec::new();

        for (raw_key, value) in params.iter() {
            if reserved.contains(raw_key) {
                continue;
            }
            let key = raw_key.strip_prefix('@').unwrap_or(raw_key);
            let (key, negated) = match key.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (key, false),
            };
            let predicate =
                coerce_operand(registry, qs.model(), key, RawOperand::from_param(value))?
                    .into_predicate();
            if negated {
                exclude.push(predicate);
            } else {
                include.push(predicate);
            }
        }

        let expression = match params.get("filters") {
            Some(text) => Some(parse_filters(text, &self.limits)?.to_predicate(registry, qs.model())?),
            None => None,
        };

        if include.is_empty() && exclude.is_empty() && expression.is_none() {
            return Ok(None);
        }

        let mut filtered = qs.clone();
        if !include.is_empty() {
            filtered = filtered.filter(Predicate::and(include));
        }
        for predicate in exclude {
            filtered = filtered.exclude(predicate);
        }
        if let Some(expression) = expression {
            filtered = filtered.filter(expression);
        }

        match filtered.compile() {
            Ok(_) | Err(StoreError::EmptyResultSet) => Ok(Some(filtered)),
            Err(e) => Err(QueryError::from_store(Stage::Filters, e)),
        }
    }

    // ==================
    // 6. Ordering
    // ==================

    fn order(
        &self,
        qs: QuerySet,
        params: &ParameterBundle,
        run: &mut Run<'_>,
    ) -> Result<QuerySet, ValidationError> {
        let Some(value) = params.get("order_by") else {
            return Ok(qs);
        };
        let terms: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.replace('.', LOOKUP_SEP))
            .collect();
        let ordered = qs.order_by(terms);
        self.checked(Stage::OrderBy, qs, ordered, run)
    }

    // ==================
    // 7. Distinct
    // ==================

    fn distinct(
        &self,
        qs: QuerySet,
        params: &ParameterBundle,
        run: &mut Run<'_>,
    ) -> Result<QuerySet, ValidationError> {
        let Some(value) = params.get("distinct") else {
            return Ok(qs);
        };
        let candidate = match str_to_bool(value) {
            Some(true) => qs.distinct(),
            Some(false) => return Ok(qs),
            None => qs.distinct_on(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.replace('.', LOOKUP_SEP)),
            ),
        };
        self.checked(Stage::Distinct, qs, candidate, run)
    }

    /// Keeps `candidate` when it compiles. An empty result set skips the
    /// stage without recording anything.
    fn checked(
        &self,
        stage: Stage,
        before: QuerySet,
        candidate: QuerySet,
        run: &mut Run<'_>,
    ) -> Result<QuerySet, ValidationError> {
        match candidate.compile() {
            Ok(_) => {
                run.options.set(stage, true);
                Ok(candidate)
            }
            Err(StoreError::EmptyResultSet) => Ok(before),
            Err(e) => {
                run.fail(stage, QueryError::from_store(stage, e))?;
                Ok(before)
            }
        }
    }

    // ==================
    // 8. Pagination safety net
    // ==================

    /// Orders an unordered paginated plan by its grouping keys, its
    /// DISTINCT ON fields, or the primary key
    fn pagination_ordering(&self, qs: QuerySet, paginated: bool) -> QuerySet {
        if !paginated || qs.is_ordered() {
            return qs;
        }
        if let Some(fields) = qs.fields() {
            let fields = fields.to_vec();
            return qs.order_by(fields);
        }
        if let Some(Distinct::On(fields)) = qs.distinct_spec() {
            let fields = fields.clone();
            return qs.order_by(fields);
        }
        match qs.database().registry().model(qs.model()) {
            Ok(model) => {
                let pk = model.primary_key.clone();
                qs.order_by([pk])
            }
            Err(_) => qs,
        }
    }
}

/// Entries of `fields`; blank entries are dropped, so `fields=` is no restriction
fn field_list(params: &ParameterBundle) -> Vec<String> {
    params
        .get("fields")
        .map(|fields| {
            fields
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, ModelDef, SchemaRegistry};
    use crate::store::{AggregateRegistry, Database};
    use serde_json::json;

    fn db() -> Arc<Database> {
        let registry = SchemaRegistry::new()
            .with(ModelDef::new("customer").field("name", FieldDef::string()))
            .unwrap()
            .with(
                ModelDef::new("invoice")
                    .field("amount", FieldDef::int())
                    .field("status", FieldDef::string())
                    .field("customer", FieldDef::foreign_key("customer")),
            )
            .unwrap();
        registry.validate().unwrap();
        let db = Arc::new(Database::new(
            Arc::new(registry),
            Arc::new(AggregateRegistry::with_defaults()),
        ));
        db.load_fixtures(json!({
            "customer": [{"id": 1, "name": "Acme"}, {"id": 2, "name": "Globex"}],
            "invoice": [
                {"id": 1, "amount": 10, "status": "paid", "customer": 1},
                {"id": 2, "amount": 20, "status": "open", "customer": 1},
                {"id": 3, "amount": 30, "status": "paid", "customer": 2}
            ]
        }))
        .unwrap();
        db
    }

    fn compile(query: &str) -> Result<CompiledPlan, ValidationError> {
        let compiler = QueryCompiler::new(Arc::new(CacheDirectory::default()));
        let source = Source::Collection(db().queryset("invoice").unwrap());
        let mut ctx = RequestContext::new("http://localhost/api/invoice");
        compiler.compile(source, &ParameterBundle::from_query(query), &mut ctx)
    }

    fn rows(plan: &CompiledPlan) -> Vec<Value> {
        match &plan.result {
            PlanResult::Plan(qs) => qs.fetch().unwrap(),
            other => panic!("expected a plan, got {other:?}"),
        }
    }

    fn ids(plan: &CompiledPlan) -> Vec<i64> {
        rows(plan)
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_reserved_only_bundle_is_noop() {
        let plan = compile("page=2&page_size=10&format=json").unwrap();
        assert_eq!(plan.options, Options::default());
        assert_eq!(ids(&plan), vec![1, 2, 3]);
    }

    #[test]
    fn test_filters_and_excludes() {
        let plan = compile("status=paid&-customer__name=Globex").unwrap();
        assert_eq!(plan.options.filters, Some(true));
        assert_eq!(ids(&plan), vec![1]);
    }

    #[test]
    fn test_at_prefix_allows_reserved_names() {
        let err = compile("@fields=1").unwrap_err();
        assert_eq!(err.stage, Stage::Filters);
    }

    #[test]
    fn test_strict_and_silent_ordering() {
        let err = compile("order_by=nope").unwrap_err();
        assert_eq!(err.stage, Stage::OrderBy);
        assert!(err.to_string().starts_with("order_by: "));

        let plan = compile("order_by=nope&silent=true").unwrap();
        assert_eq!(plan.options.order_by, Some(false));
        assert_eq!(ids(&plan), vec![1, 2, 3]);

        let plan = compile("order_by=-amount").unwrap();
        assert_eq!(plan.options.order_by, Some(true));
        assert_eq!(ids(&plan), vec![3, 2, 1]);
    }

    #[test]
    fn test_scalar_aggregate_applies_filters() {
        let plan = compile("sum=amount&status=paid").unwrap();
        let mut expected = Map::new();
        expected.insert("amount_sum".into(), json!(40));
        assert_eq!(plan.result, PlanResult::Aggregate(expected));
        assert_eq!(plan.options.aggregates, Some(true));
        assert_eq!(plan.options.filters, Some(true));
    }

    #[test]
    fn test_group_by_orders_by_grouping_keys() {
        let plan = compile("group_by=status&count=id").unwrap();
        let PlanResult::Plan(qs) = &plan.result else {
            panic!("expected grouped plan");
        };
        assert_eq!(qs.ordering(), ["status"]);
        assert!(plan.projection.is_none());
        assert_eq!(
            rows(&plan),
            vec![
                json!({"status": "open", "id_count": 1}),
                json!({"status": "paid", "id_count": 2}),
            ]
        );
    }

    #[test]
    fn test_empty_in_skips_order_stage() {
        let plan = compile("id__in=&order_by=amount").unwrap();
        assert_eq!(plan.options.filters, Some(true));
        assert_eq!(plan.options.order_by, None);
        assert!(rows(&plan).is_empty());
    }

    #[test]
    fn test_failed_compilation_is_not_reentered() {
        let compiler = QueryCompiler::new(Arc::new(CacheDirectory::default()));
        let qs = db().queryset("invoice").unwrap();
        let mut ctx = RequestContext::default();
        let params = ParameterBundle::from_query("cache=tok&status=paid&order_by=nope");

        let first = compiler
            .compile(Source::Collection(qs.clone()), &params, &mut ctx)
            .unwrap_err();
        assert_eq!(compiler.cache().len(), 1);

        // a different bundle still gets the recorded failure
        let again = compiler
            .compile(
                Source::Collection(qs),
                &ParameterBundle::from_query("cache=other&status=open"),
                &mut ctx,
            )
            .unwrap_err();
        assert_eq!(first, again);
        assert_eq!(compiler.cache().len(), 1);
    }

    #[test]
    fn test_raw_source_passes_through() {
        let compiler = QueryCompiler::new(Arc::new(CacheDirectory::default()));
        let mut ctx = RequestContext::default();
        let plan = compiler
            .compile(
                Source::Raw(json!([1, 2])),
                &ParameterBundle::from_query("order_by=nope"),
                &mut ctx,
            )
            .unwrap();
        assert_eq!(plan.result, PlanResult::Raw(json!([1, 2])));
        assert!(!plan.result.is_paginable());
    }
}
