//! Lazy query builder
//!
//! A `QuerySet` describes a retrieval over one model without executing it.
//! Builder methods return a new handle. Filters and projections are resolved
//! when applied; ordering, distinct and eager-load paths are only checked by
//! [`QuerySet::compile`], which every execution runs first.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::aggregate::AggregateSpec;
use super::database::Database;
use super::errors::{StoreError, StoreResult};
use super::executor::Executor;
use super::predicate::{Lookup, Operand, Predicate};
use crate::schema::FieldKind;

/// Distinct reduction
#[derive(Debug, Clone, PartialEq)]
pub enum Distinct {
    /// Whole-row distinct
    All,
    /// First row per combination of the listed fields
    On(Vec<String>),
}

/// Relation fetched as a separate batch, optionally filtered
#[derive(Debug, Clone, PartialEq)]
pub struct Prefetch {
    pub relation: String,
    pub filter: Option<Predicate>,
}

impl Prefetch {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            filter: None,
        }
    }

    pub fn filtered(relation: impl Into<String>, filter: Predicate) -> Self {
        Self {
            relation: relation.into(),
            filter: Some(filter),
        }
    }
}

/// Offset/limit slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

/// Query handle over one model
#[derive(Debug, Clone)]
pub struct QuerySet {
    pub(crate) db: Arc<Database>,
    pub(crate) model: String,
    pub(crate) filter: Option<Predicate>,
    pub(crate) ordering: Vec<String>,
    pub(crate) distinct: Option<Distinct>,
    pub(crate) values: Option<Vec<String>>,
    pub(crate) annotations: Vec<AggregateSpec>,
    pub(crate) select_related: Vec<String>,
    pub(crate) prefetch: Vec<Prefetch>,
    pub(crate) only: Option<Vec<String>>,
    pub(crate) window: Option<Window>,
}

impl PartialEq for QuerySet {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.db, &other.db)
            && self.model == other.model
            && self.filter == other.filter
            && self.ordering == other.ordering
            && self.distinct == other.distinct
            && self.values == other.values
            && self.annotations == other.annotations
            && self.select_related == other.select_related
            && self.prefetch == other.prefetch
            && self.only == other.only
            && self.window == other.window
    }
}

impl QuerySet {
    pub(crate) fn new(db: Arc<Database>, model: &str) -> StoreResult<Self> {
        db.registry().model(model)?;
        Ok(Self {
            db,
            model: model.to_string(),
            filter: None,
            ordering: Vec::new(),
            distinct: None,
            values: None,
            annotations: Vec::new(),
            select_related: Vec::new(),
            prefetch: Vec::new(),
            only: None,
            window: None,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    // ==================
    // Filtering
    // ==================

    /// ANDs a predicate into the filter
    pub fn filter(&self, predicate: Predicate) -> Self {
        let mut next = self.clone();
        next.filter = Some(match next.filter.take() {
            Some(existing) => Predicate::and([existing, predicate]),
            None => predicate,
        });
        next
    }

    /// ANDs the negation of a predicate into the filter
    pub fn exclude(&self, predicate: Predicate) -> Self {
        self.filter(predicate.not())
    }

    /// Restricts to the record with the given primary key
    pub fn with_pk(&self, pk: Value) -> StoreResult<Self> {
        let model = self.db.registry().model(&self.model)?;
        Ok(self.filter(Predicate::condition(
            model.primary_key.clone(),
            Lookup::Exact,
            Operand::Value(pk),
        )))
    }

    // ==================
    // Ordering & distinct
    // ==================

    /// Replaces the ordering; `-field` descends, `?` is random
    pub fn order_by<I, S>(&self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.ordering = terms.into_iter().map(Into::into).collect();
        next
    }

    pub fn ordering(&self) -> &[String] {
        &self.ordering
    }

    pub fn is_ordered(&self) -> bool {
        !self.ordering.is_empty()
    }

    pub fn distinct(&self) -> Self {
        let mut next = self.clone();
        next.distinct = Some(Distinct::All);
        next
    }

    pub fn distinct_on<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.distinct = Some(Distinct::On(fields.into_iter().map(Into::into).collect()));
        next
    }

    pub fn distinct_spec(&self) -> Option<&Distinct> {
        self.distinct.as_ref()
    }

    // ==================
    // Grouping
    // ==================

    /// Projects rows to the given fields (grouping key when annotated)
    pub fn values<I, S>(&self, fields: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        for field in &fields {
            self.db.registry().walk_exact(&self.model, field)?;
        }
        let mut next = self.clone();
        next.values = Some(fields);
        Ok(next)
    }

    /// Grouping key fields, when the handle is a `values` projection
    pub fn fields(&self) -> Option<&[String]> {
        self.values.as_deref()
    }

    /// Adds aggregate columns computed per group
    pub fn annotate(&self, specs: &[AggregateSpec]) -> StoreResult<Self> {
        let Some(fields) = &self.values else {
            return Err(StoreError::InvalidAggregate {
                alias: specs.first().map(|s| s.alias.clone()).unwrap_or_default(),
                reason: "annotate requires a values() projection".into(),
            });
        };
        for spec in specs {
            self.db
                .aggregates()
                .validate(self.db.registry(), &self.model, spec)?;
            if fields.contains(&spec.alias)
                || self.annotations.iter().any(|a| a.alias == spec.alias)
            {
                return Err(StoreError::InvalidAggregate {
                    alias: spec.alias.clone(),
                    reason: "alias conflicts with an existing column".into(),
                });
            }
        }
        let mut next = self.clone();
        next.annotations.extend(specs.iter().cloned());
        Ok(next)
    }

    pub fn annotations(&self) -> &[AggregateSpec] {
        &self.annotations
    }

    /// Computes aggregates over the filtered records
    pub fn aggregate(&self, specs: &[AggregateSpec]) -> StoreResult<Map<String, Value>> {
        for spec in specs {
            self.db
                .aggregates()
                .validate(self.db.registry(), &self.model, spec)?;
        }
        Executor::aggregate(self, specs)
    }

    // ==================
    // Loading
    // ==================

    /// Eager-loads single-valued relations
    pub fn select_related<I, S>(&self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        for path in paths {
            let path = path.into();
            if !next.select_related.contains(&path) {
                next.select_related.push(path);
            }
        }
        next
    }

    pub fn clear_select_related(&self) -> Self {
        let mut next = self.clone();
        next.select_related.clear();
        next
    }

    pub fn select_related_paths(&self) -> &[String] {
        &self.select_related
    }

    /// Fetches relations in a separate batch; a relation already prefetched
    /// is kept as is
    pub fn prefetch_related<I>(&self, lookups: I) -> Self
    where
        I: IntoIterator<Item = Prefetch>,
    {
        let mut next = self.clone();
        for lookup in lookups {
            if !next.prefetch.iter().any(|p| p.relation == lookup.relation) {
                next.prefetch.push(lookup);
            }
        }
        next
    }

    pub fn clear_prefetch_related(&self) -> Self {
        let mut next = self.clone();
        next.prefetch.clear();
        next
    }

    pub fn prefetch_lookups(&self) -> &[Prefetch] {
        &self.prefetch
    }

    /// Restricts loaded columns (primary keys are always loaded)
    pub fn only<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.clone();
        next.only = Some(fields.into_iter().map(Into::into).collect());
        next
    }

    pub fn only_fields(&self) -> Option<&[String]> {
        self.only.as_deref()
    }

    pub fn slice(&self, offset: usize, limit: usize) -> Self {
        let mut next = self.clone();
        next.window = Some(Window { offset, limit });
        next
    }

    // ==================
    // Compilation & execution
    // ==================

    /// Checks the whole query and renders it as SQL-like text.
    ///
    /// Returns [`StoreError::EmptyResultSet`] when the filter can never match.
    pub fn compile(&self) -> StoreResult<String> {
        self.check()?;
        if self.filter.as_ref().map_or(false, Predicate::is_empty_result) {
            return Err(StoreError::EmptyResultSet);
        }
        Ok(self.render())
    }

    /// Executes and renders rows
    pub fn fetch(&self) -> StoreResult<Vec<Value>> {
        Executor::fetch(self)
    }

    /// Number of rows the query yields, ignoring any slice
    pub fn count(&self) -> StoreResult<usize> {
        Executor::count(self)
    }

    /// First row, if any
    pub fn first(&self) -> StoreResult<Option<Value>> {
        Ok(self.slice(0, 1).fetch()?.into_iter().next())
    }

    fn check(&self) -> StoreResult<()> {
        let registry = self.db.registry();

        if let Some(filter) = &self.filter {
            for condition in filter.conditions() {
                registry.walk_exact(&self.model, &condition.path)?;
                if let Operand::FieldRef(other) = &condition.operand {
                    registry.walk_exact(&self.model, other)?;
                }
                if matches!(condition.lookup, Lookup::Regex | Lookup::IRegex) {
                    if let Operand::Value(Value::String(pattern)) = &condition.operand {
                        regex::Regex::new(pattern).map_err(|e| StoreError::InvalidValue {
                            field: condition.path.clone(),
                            reason: e.to_string(),
                        })?;
                    }
                }
            }
        }

        let ordering = self.check_ordering()?;
        self.check_distinct(&ordering)?;

        for path in &self.select_related {
            let resolved = registry.walk_exact(&self.model, path).map_err(|e| {
                StoreError::InvalidValue {
                    field: path.clone(),
                    reason: format!("invalid field given in select_related: {}", e),
                }
            })?;
            let single_valued = resolved
                .hops
                .iter()
                .all(|h| matches!(h.def.kind, FieldKind::ForeignKey { .. }));
            if !single_valued {
                return Err(StoreError::InvalidValue {
                    field: path.clone(),
                    reason: "select_related only follows foreign keys".into(),
                });
            }
        }

        for lookup in &self.prefetch {
            let resolved = registry.walk_exact(&self.model, &lookup.relation)?;
            if !resolved.terminal().def.kind.is_relation() {
                return Err(StoreError::InvalidValue {
                    field: lookup.relation.clone(),
                    reason: "prefetch_related requires a relation".into(),
                });
            }
        }

        if let Some(only) = &self.only {
            for field in only {
                registry.walk_exact(&self.model, field)?;
            }
        }

        Ok(())
    }

    /// Validates ordering terms, returning their canonical keys
    /// (`None` for random)
    fn check_ordering(&self) -> StoreResult<Vec<Option<String>>> {
        let mut keys = Vec::with_capacity(self.ordering.len());
        for term in &self.ordering {
            if term == "?" {
                keys.push(None);
                continue;
            }
            let field = term.strip_prefix('-').unwrap_or(term);
            if field.is_empty() {
                return Err(StoreError::InvalidOrdering {
                    term: term.clone(),
                    reason: "empty field name".into(),
                });
            }
            keys.push(Some(self.canonical_column(field).map_err(|e| {
                StoreError::InvalidOrdering {
                    term: term.clone(),
                    reason: e.to_string(),
                }
            })?));
        }
        Ok(keys)
    }

    fn check_distinct(&self, ordering: &[Option<String>]) -> StoreResult<()> {
        let Some(Distinct::On(fields)) = &self.distinct else {
            return Ok(());
        };
        let mut columns = BTreeSet::new();
        for field in fields {
            let column = self
                .canonical_column(field)
                .map_err(|e| StoreError::InvalidDistinct(e.to_string()))?;
            columns.insert(column);
        }
        let leading = ordering.len().min(columns.len());
        let matches = ordering[..leading]
            .iter()
            .all(|key| key.as_ref().map_or(false, |k| columns.contains(k)));
        if !matches {
            return Err(StoreError::InvalidDistinct(
                "SELECT DISTINCT ON expressions must match initial ORDER BY expressions".into(),
            ));
        }
        Ok(())
    }

    /// Canonical name of a column usable for ordering or distinct
    fn canonical_column(&self, field: &str) -> StoreResult<String> {
        match &self.values {
            Some(values) => {
                if values.iter().any(|v| v == field)
                    || self.annotations.iter().any(|a| a.alias == field)
                {
                    Ok(field.to_string())
                } else {
                    let mut choices: Vec<&str> = values.iter().map(String::as_str).collect();
                    choices.extend(self.annotations.iter().map(|a| a.alias.as_str()));
                    Err(StoreError::InvalidValue {
                        field: field.to_string(),
                        reason: format!(
                            "not a grouped column. Choices are: {}",
                            choices.join(", ")
                        ),
                    })
                }
            }
            None => Ok(self.db.registry().walk_exact(&self.model, field)?.joined()),
        }
    }

    fn render(&self) -> String {
        let mut sql = String::from("SELECT ");

        match &self.distinct {
            Some(Distinct::All) => sql.push_str("DISTINCT "),
            Some(Distinct::On(fields)) => {
                sql.push_str(&format!("DISTINCT ON ({}) ", fields.join(", ")))
            }
            None => {}
        }

        let columns: Vec<String> = match (&self.values, &self.only) {
            (Some(values), _) => values
                .iter()
                .cloned()
                .chain(self.annotations.iter().map(|a| {
                    let function = self
                        .db
                        .aggregates()
                        .get(&a.function)
                        .map(|f| f.sql_name().to_string())
                        .unwrap_or_else(|| a.function.to_uppercase());
                    format!("{}({}) AS {}", function, a.field, a.alias)
                }))
                .collect(),
            (None, Some(only)) => only.clone(),
            (None, None) => vec![format!("{}.*", self.model)],
        };
        sql.push_str(&columns.join(", "));
        sql.push_str(&format!(" FROM {}", self.model));

        for path in &self.select_related {
            sql.push_str(&format!(" LEFT JOIN {}", path));
        }

        if let Some(filter) = &self.filter {
            sql.push_str(&format!(" WHERE {}", filter));
        }

        if let Some(values) = &self.values {
            if !self.annotations.is_empty() {
                sql.push_str(&format!(" GROUP BY {}", values.join(", ")));
            }
        }

        if !self.ordering.is_empty() {
            let terms: Vec<String> = self
                .ordering
                .iter()
                .map(|t| match t.as_str() {
                    "?" => "RANDOM()".to_string(),
                    t => match t.strip_prefix('-') {
                        Some(field) => format!("{} DESC", field),
                        None => format!("{} ASC", t),
                    },
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }

        if let Some(window) = self.window {
            sql.push_str(&format!(" LIMIT {} OFFSET {}", window.limit, window.offset));
        }

        for lookup in &self.prefetch {
            match &lookup.filter {
                Some(filter) => {
                    sql.push_str(&format!("; PREFETCH {} WHERE {}", lookup.relation, filter))
                }
                None => sql.push_str(&format!("; PREFETCH {}", lookup.relation)),
            }
        }

        sql
    }
}
