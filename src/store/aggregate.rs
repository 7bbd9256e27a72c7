//! Aggregate functions
//!
//! The registry is built at startup and may be extended with custom
//! functions. Each registered name is also a reserved query parameter.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Number, Value};

use super::errors::{StoreError, StoreResult};
use super::sorter::ResultSorter;
use crate::schema::SchemaRegistry;

/// An aggregate computed over the non-null values of a field
pub trait AggregateFunction: Send + Sync {
    /// SQL-like name used in plan explanations
    fn sql_name(&self) -> &str;

    /// Whether the function only accepts numeric fields
    fn numeric_only(&self) -> bool {
        false
    }

    /// Computes the aggregate; `values` never contains nulls
    fn compute(&self, values: &[&Value]) -> Value;
}

/// (alias, field path, function name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateSpec {
    pub alias: String,
    pub field: String,
    pub function: String,
}

impl AggregateSpec {
    /// Builds a spec aliased as `<field>_<function>`
    pub fn new(field: impl Into<String>, function: impl Into<String>) -> Self {
        let field = field.into();
        let function = function.into();
        Self {
            alias: format!("{}_{}", field, function),
            field,
            function,
        }
    }
}

struct Count;
struct Sum;
struct Avg;
struct Min;
struct Max;
struct Variance;
struct StdDev;

impl AggregateFunction for Count {
    fn sql_name(&self) -> &str {
        "COUNT"
    }

    fn compute(&self, values: &[&Value]) -> Value {
        Value::from(values.len())
    }
}

impl AggregateFunction for Sum {
    fn sql_name(&self) -> &str {
        "SUM"
    }

    fn numeric_only(&self) -> bool {
        true
    }

    fn compute(&self, values: &[&Value]) -> Value {
        if values.is_empty() {
            return Value::Null;
        }
        let integral: Option<i64> = values
            .iter()
            .try_fold(0i64, |acc, v| v.as_i64().and_then(|n| acc.checked_add(n)));
        match integral {
            Some(total) => Value::from(total),
            None => float(numbers(values).sum()),
        }
    }
}

impl AggregateFunction for Avg {
    fn sql_name(&self) -> &str {
        "AVG"
    }

    fn numeric_only(&self) -> bool {
        true
    }

    fn compute(&self, values: &[&Value]) -> Value {
        if values.is_empty() {
            return Value::Null;
        }
        float(numbers(values).sum::<f64>() / values.len() as f64)
    }
}

impl AggregateFunction for Min {
    fn sql_name(&self) -> &str {
        "MIN"
    }

    fn compute(&self, values: &[&Value]) -> Value {
        extreme(values, Ordering::Less)
    }
}

impl AggregateFunction for Max {
    fn sql_name(&self) -> &str {
        "MAX"
    }

    fn compute(&self, values: &[&Value]) -> Value {
        extreme(values, Ordering::Greater)
    }
}

impl AggregateFunction for Variance {
    fn sql_name(&self) -> &str {
        "VAR_POP"
    }

    fn numeric_only(&self) -> bool {
        true
    }

    fn compute(&self, values: &[&Value]) -> Value {
        population_variance(values).map_or(Value::Null, float)
    }
}

impl AggregateFunction for StdDev {
    fn sql_name(&self) -> &str {
        "STDDEV_POP"
    }

    fn numeric_only(&self) -> bool {
        true
    }

    fn compute(&self, values: &[&Value]) -> Value {
        population_variance(values).map_or(Value::Null, |v| float(v.sqrt()))
    }
}

fn numbers<'a>(values: &'a [&'a Value]) -> impl Iterator<Item = f64> + 'a {
    values.iter().filter_map(|v| v.as_f64())
}

fn float(n: f64) -> Value {
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn extreme(values: &[&Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for &v in values {
        best = match best {
            Some(b) if ResultSorter::compare_values(v, b) != wanted => Some(b),
            _ => Some(v),
        };
    }
    best.cloned().unwrap_or(Value::Null)
}

fn population_variance(values: &[&Value]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = numbers(values).sum::<f64>() / n;
    Some(numbers(values).map(|x| (x - mean).powi(2)).sum::<f64>() / n)
}

/// Registry of aggregate functions by parameter name
#[derive(Clone)]
pub struct AggregateRegistry {
    functions: BTreeMap<String, Arc<dyn AggregateFunction>>,
}

impl std::fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

impl Default for AggregateRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AggregateRegistry {
    /// An empty registry
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// `count`, `sum`, `avg`, `min`, `max`, `stddev`, `variance`
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register("count", Arc::new(Count));
        registry.register("sum", Arc::new(Sum));
        registry.register("avg", Arc::new(Avg));
        registry.register("min", Arc::new(Min));
        registry.register("max", Arc::new(Max));
        registry.register("stddev", Arc::new(StdDev));
        registry.register("variance", Arc::new(Variance));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn AggregateFunction>) {
        self.functions.insert(name.into(), function);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn AggregateFunction>> {
        self.functions.get(name)
    }

    /// Registered names, in registry order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Checks that the function exists and accepts the field
    pub fn validate(
        &self,
        schema: &SchemaRegistry,
        model: &str,
        spec: &AggregateSpec,
    ) -> StoreResult<Arc<dyn AggregateFunction>> {
        let function = self
            .get(&spec.function)
            .cloned()
            .ok_or_else(|| StoreError::InvalidAggregate {
                alias: spec.alias.clone(),
                reason: format!("unknown aggregate function '{}'", spec.function),
            })?;

        let resolved = schema.walk_exact(model, &spec.field)?;
        let terminal = resolved.terminal();
        if function.numeric_only() && !terminal.def.kind.is_numeric() {
            return Err(StoreError::InvalidAggregate {
                alias: spec.alias.clone(),
                reason: format!(
                    "{} requires a numeric field, '{}' is {}",
                    spec.function,
                    spec.field,
                    terminal.def.kind.type_name()
                ),
            });
        }

        Ok(function)
    }
}
