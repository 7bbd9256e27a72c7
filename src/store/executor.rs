//! Query execution over the in-memory tables
//!
//! Pipeline: filter → group (values/annotate) → order → distinct → slice →
//! render. A condition on a path that reaches several records matches when
//! any reached value matches.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use regex::Regex;
use serde_json::{Map, Value};

use super::aggregate::{AggregateRegistry, AggregateSpec};
use super::database::Table;
use super::errors::{StoreError, StoreResult};
use super::predicate::{Condition, Lookup, Operand, Predicate};
use super::queryset::{Distinct, QuerySet, Window};
use super::sorter::{Keyed, ResultSorter, SortDirection};
use crate::schema::{FieldKind, ModelDef, SchemaRegistry, LOOKUP_SEP};

type Record = Map<String, Value>;

/// A row flowing through the pipeline
enum Item<'a> {
    /// A stored record, rendered at the end
    Record(&'a Record),
    /// A `values` row
    Row(Record),
}

/// Eager-load tree derived from `select_related`, `prefetch_related` and `only`
#[derive(Debug, Default)]
struct RenderNode {
    only: Option<BTreeSet<String>>,
    children: BTreeMap<String, RenderChild>,
}

#[derive(Debug, Default)]
struct RenderChild {
    filter: Option<Predicate>,
    node: RenderNode,
}

impl RenderNode {
    fn build(registry: &SchemaRegistry, qs: &QuerySet) -> StoreResult<Self> {
        let mut root = RenderNode::default();

        for path in &qs.select_related {
            let segments = registry.walk_exact(&qs.model, path)?.segments();
            root.insert(&segments, None);
        }
        for lookup in &qs.prefetch {
            let segments = registry.walk_exact(&qs.model, &lookup.relation)?.segments();
            root.insert(&segments, lookup.filter.clone());
        }
        if let Some(only) = &qs.only {
            root.only = Some(BTreeSet::new());
            for field in only {
                let segments = registry.walk_exact(&qs.model, field)?.segments();
                root.restrict(&segments);
            }
        }

        Ok(root)
    }

    fn insert(&mut self, segments: &[String], filter: Option<Predicate>) {
        let mut node = self;
        for (idx, segment) in segments.iter().enumerate() {
            let child = node.children.entry(segment.clone()).or_default();
            if idx + 1 == segments.len() && filter.is_some() {
                child.filter = filter.clone();
            }
            node = &mut child.node;
        }
    }

    fn restrict(&mut self, segments: &[String]) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        self.only.get_or_insert_with(BTreeSet::new).insert(first.clone());
        if rest.is_empty() {
            return;
        }
        if let Some(child) = self.children.get_mut(first) {
            child.node.restrict(rest);
        }
    }
}

pub(crate) struct Executor<'a> {
    registry: &'a SchemaRegistry,
    aggregates: &'a AggregateRegistry,
    tables: &'a HashMap<String, Table>,
    regexes: HashMap<String, Regex>,
}

impl<'a> Executor<'a> {
    fn new(
        registry: &'a SchemaRegistry,
        aggregates: &'a AggregateRegistry,
        tables: &'a HashMap<String, Table>,
    ) -> Self {
        Self {
            registry,
            aggregates,
            tables,
            regexes: HashMap::new(),
        }
    }

    /// Executes `qs` and renders its rows
    pub(crate) fn fetch(qs: &QuerySet) -> StoreResult<Vec<Value>> {
        match qs.compile() {
            Err(StoreError::EmptyResultSet) => return Ok(Vec::new()),
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        let tables = qs.db.read()?;
        let mut exec = Executor::new(qs.db.registry(), qs.db.aggregates(), &tables);
        exec.prepare(qs)?;

        let model = exec.registry.model(&qs.model)?;
        let render = RenderNode::build(exec.registry, qs)?;
        let items = apply_window(exec.collect(qs)?, qs.window);

        Ok(items
            .into_iter()
            .map(|item| match item {
                Item::Record(record) => exec.render(model, record, &render),
                Item::Row(row) => Value::Object(row),
            })
            .collect())
    }

    /// Number of rows `qs` yields before slicing
    pub(crate) fn count(qs: &QuerySet) -> StoreResult<usize> {
        match qs.compile() {
            Err(StoreError::EmptyResultSet) => return Ok(0),
            Err(e) => return Err(e),
            Ok(_) => {}
        }

        let tables = qs.db.read()?;
        let mut exec = Executor::new(qs.db.registry(), qs.db.aggregates(), &tables);
        exec.prepare(qs)?;
        Ok(exec.collect(qs)?.len())
    }

    /// Scalar aggregates over the filtered records
    pub(crate) fn aggregate(qs: &QuerySet, specs: &[AggregateSpec]) -> StoreResult<Record> {
        let empty = match qs.compile() {
            Err(StoreError::EmptyResultSet) => true,
            Err(e) => return Err(e),
            Ok(_) => false,
        };

        let tables = qs.db.read()?;
        let mut exec = Executor::new(qs.db.registry(), qs.db.aggregates(), &tables);
        exec.prepare(qs)?;

        let model = exec.registry.model(&qs.model)?;
        let records = if empty {
            Vec::new()
        } else {
            exec.filtered(model, qs)
        };

        let mut out = Map::new();
        for spec in specs {
            out.insert(spec.alias.clone(), exec.compute(model, &records, spec)?);
        }
        Ok(out)
    }

    /// Compiles every regex used by the main filter and prefetch filters
    fn prepare(&mut self, qs: &QuerySet) -> StoreResult<()> {
        let mut predicates: Vec<&Predicate> = qs.filter.iter().collect();
        predicates.extend(qs.prefetch.iter().filter_map(|p| p.filter.as_ref()));

        for predicate in predicates {
            for condition in predicate.conditions() {
                let Some(key) = regex_key(condition) else {
                    continue;
                };
                if self.regexes.contains_key(&key) {
                    continue;
                }
                let compiled = Regex::new(&key).map_err(|e| StoreError::InvalidValue {
                    field: condition.path.clone(),
                    reason: e.to_string(),
                })?;
                self.regexes.insert(key, compiled);
            }
        }
        Ok(())
    }

    fn filtered(&self, model: &ModelDef, qs: &QuerySet) -> Vec<&'a Record> {
        let Some(table) = self.tables.get(&qs.model) else {
            return Vec::new();
        };
        table
            .rows()
            .iter()
            .filter(|r| qs.filter.as_ref().map_or(true, |p| self.eval(model, r, p)))
            .collect()
    }

    fn collect(&self, qs: &QuerySet) -> StoreResult<Vec<Item<'a>>> {
        let model = self.registry.model(&qs.model)?;
        let records = self.filtered(model, qs);

        let mut items: Vec<Item<'a>> = match &qs.values {
            Some(fields) => self
                .group(model, &records, fields, &qs.annotations)?
                .into_iter()
                .map(Item::Row)
                .collect(),
            None => records.into_iter().map(Item::Record).collect(),
        };

        if !qs.ordering.is_empty() {
            if qs.ordering.iter().any(|t| t == "?") {
                ResultSorter::shuffle(&mut items);
            }
            let terms: Vec<(&str, SortDirection)> = qs
                .ordering
                .iter()
                .filter(|t| t.as_str() != "?")
                .map(|t| match t.strip_prefix('-') {
                    Some(field) => (field, SortDirection::Desc),
                    None => (t.as_str(), SortDirection::Asc),
                })
                .collect();
            let directions: Vec<SortDirection> = terms.iter().map(|(_, d)| *d).collect();

            let mut keyed: Vec<Keyed<Item<'a>>> = items
                .into_iter()
                .map(|item| Keyed {
                    keys: terms
                        .iter()
                        .map(|(field, _)| self.column(model, &item, field))
                        .collect(),
                    item,
                })
                .collect();
            ResultSorter::sort(&mut keyed, &directions);
            items = keyed.into_iter().map(|k| k.item).collect();
        }

        match &qs.distinct {
            Some(Distinct::All) => {
                let mut seen = HashSet::new();
                items.retain(|item| match item {
                    // stored records are unique by primary key
                    Item::Record(_) => true,
                    Item::Row(row) => seen.insert(Value::Object(row.clone()).to_string()),
                });
            }
            Some(Distinct::On(fields)) => {
                let mut seen = HashSet::new();
                items.retain(|item| {
                    let key: Vec<Value> = fields.iter().map(|f| self.column(model, item, f)).collect();
                    seen.insert(Value::Array(key).to_string())
                });
            }
            None => {}
        }

        Ok(items)
    }

    /// Projects records to `fields`; with annotations, one row per distinct
    /// key in first-seen order
    fn group(
        &self,
        model: &ModelDef,
        records: &[&'a Record],
        fields: &[String],
        annotations: &[AggregateSpec],
    ) -> StoreResult<Vec<Record>> {
        let mut rows: Vec<Record> = Vec::new();
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Vec<Value>, Vec<&'a Record>)> = HashMap::new();

        for &record in records {
            let columns: Vec<Vec<Value>> = fields
                .iter()
                .map(|f| {
                    let reached = self.reach(model, record, f);
                    if reached.is_empty() {
                        vec![Value::Null]
                    } else {
                        reached
                    }
                })
                .collect();

            for combo in cartesian(&columns) {
                if annotations.is_empty() {
                    rows.push(fields.iter().cloned().zip(combo).collect());
                    continue;
                }
                let key = Value::Array(combo.clone()).to_string();
                let entry = groups.entry(key.clone()).or_insert_with(|| {
                    order.push(key);
                    (combo, Vec::new())
                });
                entry.1.push(record);
            }
        }

        for key in order {
            let Some((combo, members)) = groups.remove(&key) else {
                continue;
            };
            let mut row: Record = fields.iter().cloned().zip(combo).collect();
            for spec in annotations {
                row.insert(spec.alias.clone(), self.compute(model, &members, spec)?);
            }
            rows.push(row);
        }

        Ok(rows)
    }

    fn compute(&self, model: &ModelDef, records: &[&Record], spec: &AggregateSpec) -> StoreResult<Value> {
        let function = self
            .aggregates
            .get(&spec.function)
            .ok_or_else(|| StoreError::InvalidAggregate {
                alias: spec.alias.clone(),
                reason: format!("unknown aggregate function '{}'", spec.function),
            })?;
        let values: Vec<Value> = records
            .iter()
            .flat_map(|r| self.reach(model, r, &spec.field))
            .filter(|v| !v.is_null())
            .collect();
        let refs: Vec<&Value> = values.iter().collect();
        Ok(function.compute(&refs))
    }

    /// Ordering/distinct key of an item
    fn column(&self, model: &ModelDef, item: &Item<'_>, field: &str) -> Value {
        match item {
            Item::Record(record) => self
                .reach(model, record, field)
                .into_iter()
                .next()
                .unwrap_or(Value::Null),
            Item::Row(row) => row.get(field).cloned().unwrap_or(Value::Null),
        }
    }

    // ==================
    // Path traversal
    // ==================

    /// Every value reached by `path` from `record`
    fn reach(&self, model: &ModelDef, record: &Record, path: &str) -> Vec<Value> {
        let segments: Vec<&str> = path.split(LOOKUP_SEP).collect();
        let mut out = Vec::new();
        self.reach_into(model, record, &segments, &mut out);
        out
    }

    fn reach_into(&self, model: &ModelDef, record: &Record, segments: &[&str], out: &mut Vec<Value>) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        let Some(def) = model.get(first) else {
            return;
        };
        let name = model.canonical(first);

        match &def.kind {
            FieldKind::ForeignKey { target } => {
                let value = record.get(name).cloned().unwrap_or(Value::Null);
                if rest.is_empty() {
                    out.push(value);
                } else if value.is_null() {
                    out.push(Value::Null);
                } else {
                    match self.related(target, &value) {
                        Some((target_def, target_record)) => {
                            self.reach_into(target_def, target_record, rest, out)
                        }
                        None => out.push(Value::Null),
                    }
                }
            }
            FieldKind::ManyToMany { target } => {
                let ids = record.get(name).and_then(Value::as_array);
                for id in ids.into_iter().flatten() {
                    if rest.is_empty() {
                        out.push(id.clone());
                    } else if let Some((target_def, target_record)) = self.related(target, id) {
                        self.reach_into(target_def, target_record, rest, out);
                    }
                }
            }
            FieldKind::Reverse { target, field } => {
                let Ok(target_def) = self.registry.model(target) else {
                    return;
                };
                for related in self.reverse(model, record, target, field) {
                    if rest.is_empty() {
                        out.push(
                            related
                                .get(&target_def.primary_key)
                                .cloned()
                                .unwrap_or(Value::Null),
                        );
                    } else {
                        self.reach_into(target_def, related, rest, out);
                    }
                }
            }
            _ => {
                if rest.is_empty() {
                    out.push(record.get(name).cloned().unwrap_or(Value::Null));
                }
            }
        }
    }

    fn related(&self, target: &str, pk: &Value) -> Option<(&'a ModelDef, &'a Record)> {
        let def = self.registry.model(target).ok()?;
        let record = self.tables.get(target)?.get(pk)?;
        Some((def, record))
    }

    fn reverse(&self, model: &ModelDef, record: &Record, target: &str, field: &str) -> Vec<&'a Record> {
        let Some(pk) = record.get(&model.primary_key) else {
            return Vec::new();
        };
        self.tables.get(target).map_or_else(Vec::new, |table| {
            table
                .rows()
                .iter()
                .filter(|row| {
                    row.get(field)
                        .map_or(false, |v| ResultSorter::values_equal(v, pk))
                })
                .collect()
        })
    }

    // ==================
    // Predicate evaluation
    // ==================

    fn eval(&self, model: &ModelDef, record: &Record, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Condition(c) => self.test(model, record, c),
            Predicate::And(ps) => ps.iter().all(|p| self.eval(model, record, p)),
            Predicate::Or(ps) => ps.iter().any(|p| self.eval(model, record, p)),
            Predicate::Not(p) => !self.eval(model, record, p),
        }
    }

    fn test(&self, model: &ModelDef, record: &Record, condition: &Condition) -> bool {
        let left = self.reach(model, record, &condition.path);
        let present = || left.iter().filter(|v| !v.is_null());

        match (&condition.lookup, &condition.operand) {
            (Lookup::IsNull, operand) => {
                let wanted = !matches!(operand, Operand::Value(Value::Bool(false)));
                left.iter().all(Value::is_null) == wanted
            }
            (_, Operand::Null) => left.iter().all(Value::is_null),
            (Lookup::Range, Operand::List(bounds)) => match bounds.as_slice() {
                [low, high] => present().any(|l| {
                    matches!(
                        ResultSorter::partial_compare(l, low),
                        Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
                    ) && matches!(
                        ResultSorter::partial_compare(l, high),
                        Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
                    )
                }),
                _ => false,
            },
            (lookup, Operand::List(items)) => {
                let lookup = if *lookup == Lookup::In {
                    Lookup::Exact
                } else {
                    *lookup
                };
                present().any(|l| items.iter().any(|r| self.compare(lookup, l, r)))
            }
            (lookup, Operand::Value(right)) => present().any(|l| self.compare(*lookup, l, right)),
            (lookup, Operand::FieldRef(other)) => {
                let right = self.reach(model, record, other);
                present().any(|l| {
                    right
                        .iter()
                        .filter(|r| !r.is_null())
                        .any(|r| self.compare(*lookup, l, r))
                })
            }
        }
    }

    fn compare(&self, lookup: Lookup, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};

        match lookup {
            Lookup::Exact | Lookup::In => ResultSorter::values_equal(left, right),
            Lookup::IExact => match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => l.to_lowercase() == r.to_lowercase(),
                _ => ResultSorter::values_equal(left, right),
            },
            Lookup::Contains | Lookup::IContains => {
                if let Value::Array(items) = left {
                    return items.iter().any(|i| ResultSorter::values_equal(i, right));
                }
                let insensitive = lookup == Lookup::IContains;
                fold(&text(left), insensitive).contains(&fold(&text(right), insensitive))
            }
            Lookup::StartsWith | Lookup::IStartsWith => {
                let insensitive = lookup == Lookup::IStartsWith;
                fold(&text(left), insensitive).starts_with(&fold(&text(right), insensitive))
            }
            Lookup::EndsWith | Lookup::IEndsWith => {
                let insensitive = lookup == Lookup::IEndsWith;
                fold(&text(left), insensitive).ends_with(&fold(&text(right), insensitive))
            }
            Lookup::Gt => ResultSorter::partial_compare(left, right) == Some(Greater),
            Lookup::Gte => matches!(ResultSorter::partial_compare(left, right), Some(Greater | Equal)),
            Lookup::Lt => ResultSorter::partial_compare(left, right) == Some(Less),
            Lookup::Lte => matches!(ResultSorter::partial_compare(left, right), Some(Less | Equal)),
            Lookup::Regex | Lookup::IRegex => {
                let Some(pattern) = right.as_str() else {
                    return false;
                };
                let key = if lookup == Lookup::IRegex {
                    format!("(?i){}", pattern)
                } else {
                    pattern.to_string()
                };
                self.regexes
                    .get(&key)
                    .map_or(false, |re| re.is_match(&text(left)))
            }
            Lookup::Range | Lookup::IsNull => false,
        }
    }

    // ==================
    // Rendering
    // ==================

    fn render(&self, model: &ModelDef, record: &Record, node: &RenderNode) -> Value {
        let mut out = Map::new();
        let names = std::iter::once(&model.primary_key)
            .chain(model.fields.keys().filter(|k| *k != &model.primary_key));

        for name in names {
            let Some(def) = model.fields.get(name) else {
                continue;
            };
            if let Some(only) = &node.only {
                if name != &model.primary_key && !only.contains(name) {
                    continue;
                }
            }

            let child = node.children.get(name);
            let rendered = match (&def.kind, child) {
                (FieldKind::ForeignKey { target }, Some(child)) => {
                    let pk = record.get(name).cloned().unwrap_or(Value::Null);
                    match self.related(target, &pk) {
                        Some((target_def, target_record))
                            if self.accepts(target_def, target_record, child) =>
                        {
                            self.render(target_def, target_record, &child.node)
                        }
                        _ => Value::Null,
                    }
                }
                (FieldKind::ManyToMany { target }, Some(child)) => {
                    let ids = record.get(name).and_then(Value::as_array);
                    Value::Array(
                        ids.into_iter()
                            .flatten()
                            .filter_map(|id| self.related(target, id))
                            .filter(|(d, r)| self.accepts(d, r, child))
                            .map(|(d, r)| self.render(d, r, &child.node))
                            .collect(),
                    )
                }
                (FieldKind::Reverse { target, field }, Some(child)) => {
                    let Ok(target_def) = self.registry.model(target) else {
                        continue;
                    };
                    Value::Array(
                        self.reverse(model, record, target, field)
                            .into_iter()
                            .filter(|r| self.accepts(target_def, r, child))
                            .map(|r| self.render(target_def, r, &child.node))
                            .collect(),
                    )
                }
                (FieldKind::Reverse { .. }, None) => continue,
                _ => record.get(name).cloned().unwrap_or(Value::Null),
            };
            out.insert(name.clone(), rendered);
        }

        Value::Object(out)
    }

    fn accepts(&self, model: &ModelDef, record: &Record, child: &RenderChild) -> bool {
        child
            .filter
            .as_ref()
            .map_or(true, |p| self.eval(model, record, p))
    }
}

fn apply_window<T>(items: Vec<T>, window: Option<Window>) -> Vec<T> {
    match window {
        Some(Window { offset, limit }) => items.into_iter().skip(offset).take(limit).collect(),
        None => items,
    }
}

fn regex_key(condition: &Condition) -> Option<String> {
    let Operand::Value(Value::String(pattern)) = &condition.operand else {
        return None;
    };
    match condition.lookup {
        Lookup::Regex => Some(pattern.clone()),
        Lookup::IRegex => Some(format!("(?i){}", pattern)),
        _ => None,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn fold(value: &str, insensitive: bool) -> String {
    if insensitive {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

/// Every combination picking one value per column
fn cartesian(columns: &[Vec<Value>]) -> Vec<Vec<Value>> {
    let mut combos: Vec<Vec<Value>> = vec![Vec::new()];
    for column in columns {
        let mut next = Vec::with_capacity(combos.len() * column.len());
        for combo in &combos {
            for value in column {
                let mut extended = combo.clone();
                extended.push(value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::schema::{FieldDef, ModelDef, SchemaRegistry};
    use crate::store::{
        AggregateRegistry, AggregateSpec, Database, Lookup, Operand, Predicate, Prefetch,
    };

    fn db() -> Arc<Database> {
        let registry = SchemaRegistry::new()
            .with(
                ModelDef::new("customer")
                    .field("name", FieldDef::string())
                    .field("invoices", FieldDef::reverse("invoice", "customer")),
            )
            .unwrap()
            .with(ModelDef::new("tag").field("label", FieldDef::string()))
            .unwrap()
            .with(
                ModelDef::new("invoice")
                    .field("kind", FieldDef::string())
                    .field("amount", FieldDef::int())
                    .field("note", FieldDef::string().nullable())
                    .field("customer", FieldDef::foreign_key("customer").nullable())
                    .field("tags", FieldDef::many_to_many("tag")),
            )
            .unwrap();
        registry.validate().unwrap();

        let db = Arc::new(Database::new(
            Arc::new(registry),
            Arc::new(AggregateRegistry::with_defaults()),
        ));
        db.load_fixtures(json!({
            "customer": [{"id": 1, "name": "Acme"}, {"id": 2, "name": "Globex"}],
            "tag": [{"id": 1, "label": "urgent"}, {"id": 2, "label": "late"}],
            "invoice": [
                {"id": 1, "kind": "a", "amount": 10, "customer": 1, "tags": [1]},
                {"id": 2, "kind": "a", "amount": 5, "customer": 2, "note": "x", "tags": [1, 2]},
                {"id": 3, "kind": "b", "amount": 7, "customer": null}
            ]
        }))
        .unwrap();
        db
    }

    fn ids(rows: &[serde_json::Value]) -> Vec<i64> {
        rows.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_filter_across_foreign_key() {
        let qs = db().queryset("invoice").unwrap().filter(Predicate::condition(
            "customer__name",
            Lookup::IStartsWith,
            Operand::Value(json!("ac")),
        ));
        assert_eq!(ids(&qs.fetch().unwrap()), vec![1]);
    }

    #[test]
    fn test_many_to_many_matches_any() {
        let qs = db().queryset("invoice").unwrap().filter(Predicate::condition(
            "tags__label",
            Lookup::Exact,
            Operand::Value(json!("late")),
        ));
        assert_eq!(ids(&qs.fetch().unwrap()), vec![2]);
    }

    #[test]
    fn test_reverse_relation_filter() {
        let qs = db().queryset("customer").unwrap().filter(Predicate::condition(
            "invoices__amount",
            Lookup::Gt,
            Operand::Value(json!(8)),
        ));
        assert_eq!(ids(&qs.fetch().unwrap()), vec![1]);
    }

    #[test]
    fn test_null_never_matches_and_exclude_complements() {
        let base = db().queryset("invoice").unwrap();
        let cond = Predicate::condition("note", Lookup::Exact, Operand::Value(json!("x")));
        assert_eq!(ids(&base.filter(cond.clone()).fetch().unwrap()), vec![2]);
        assert_eq!(ids(&base.exclude(cond).fetch().unwrap()), vec![1, 3]);

        let null = Predicate::condition("customer", Lookup::Exact, Operand::Null);
        assert_eq!(ids(&base.filter(null).fetch().unwrap()), vec![3]);
    }

    #[test]
    fn test_field_reference_comparison() {
        let qs = db().queryset("invoice").unwrap().filter(Predicate::condition(
            "amount",
            Lookup::Gt,
            Operand::FieldRef("customer".into()),
        ));
        // 10 > 1, 5 > 2; invoice 3 has no customer
        assert_eq!(ids(&qs.fetch().unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_group_by_with_annotation() {
        let qs = db()
            .queryset("invoice")
            .unwrap()
            .values(["kind"])
            .unwrap()
            .annotate(&[AggregateSpec::new("amount", "sum")])
            .unwrap()
            .order_by(["kind"]);
        assert_eq!(
            qs.fetch().unwrap(),
            vec![
                json!({"kind": "a", "amount_sum": 15}),
                json!({"kind": "b", "amount_sum": 7})
            ]
        );
    }

    #[test]
    fn test_values_distinct() {
        let qs = db()
            .queryset("invoice")
            .unwrap()
            .values(["kind"])
            .unwrap()
            .distinct();
        assert_eq!(qs.count().unwrap(), 2);
    }

    #[test]
    fn test_scalar_aggregate() {
        let out = db()
            .queryset("invoice")
            .unwrap()
            .aggregate(&[
                AggregateSpec::new("amount", "sum"),
                AggregateSpec::new("note", "count"),
            ])
            .unwrap();
        assert_eq!(out["amount_sum"], json!(22));
        assert_eq!(out["note_count"], json!(1));
    }

    #[test]
    fn test_ordering_and_slice() {
        let qs = db().queryset("invoice").unwrap().order_by(["-amount"]);
        assert_eq!(ids(&qs.fetch().unwrap()), vec![1, 3, 2]);
        assert_eq!(ids(&qs.slice(1, 1).fetch().unwrap()), vec![3]);
        assert_eq!(qs.slice(1, 1).count().unwrap(), 3);
    }

    #[test]
    fn test_distinct_on_keeps_first_per_key() {
        let qs = db()
            .queryset("invoice")
            .unwrap()
            .order_by(["kind", "amount"])
            .distinct_on(["kind"]);
        assert_eq!(ids(&qs.fetch().unwrap()), vec![2, 3]);
    }

    #[test]
    fn test_render_select_related_and_only() {
        let qs = db()
            .queryset("invoice")
            .unwrap()
            .select_related(["customer"])
            .only(["customer__name", "amount"])
            .with_pk(json!(1))
            .unwrap();
        let rows = qs.fetch().unwrap();
        assert_eq!(rows[0], json!({"id": 1, "amount": 10, "customer": {"id": 1, "name": "Acme"}}));
    }

    #[test]
    fn test_render_filtered_prefetch() {
        let qs = db()
            .queryset("invoice")
            .unwrap()
            .prefetch_related([Prefetch::filtered(
                "tags",
                Predicate::condition("label", Lookup::Exact, Operand::Value(json!("late"))),
            )])
            .with_pk(json!(2))
            .unwrap();
        let rows = qs.fetch().unwrap();
        assert_eq!(rows[0]["tags"], json!([{"id": 2, "label": "late"}]));
        assert_eq!(rows[0]["customer"], json!(2));
    }

    #[test]
    fn test_empty_in_yields_nothing() {
        let qs = db()
            .queryset("invoice")
            .unwrap()
            .filter(Predicate::condition("id", Lookup::In, Operand::List(vec![])));
        assert!(qs.fetch().unwrap().is_empty());
        assert_eq!(qs.count().unwrap(), 0);
    }

    #[test]
    fn test_regex_lookup() {
        let qs = db().queryset("customer").unwrap().filter(Predicate::condition(
            "name",
            Lookup::IRegex,
            Operand::Value(json!("^glo")),
        ));
        assert_eq!(ids(&qs.fetch().unwrap()), vec![2]);
    }
}
