//! Aggregation planner
//!
//! `group_by` with aggregates → `values(group_by).annotate(specs)`;
//! `group_by` alone → `values(group_by).distinct()`;
//! aggregates alone → one scalar map. No ordering is added.

use serde_json::{Map, Value};

use super::errors::{QueryError, Stage};
use super::params::ParameterBundle;
use crate::schema::LOOKUP_SEP;
use crate::store::{AggregateRegistry, AggregateSpec, QuerySet};

/// Result of planning an aggregation
#[derive(Debug, Clone, PartialEq)]
pub enum GroupedResult {
    /// Grouped handle yielding one row per group
    Grouped(QuerySet),
    /// Aggregates over the whole filtered collection
    Scalar(Map<String, Value>),
}

pub struct AggregationPlanner;

impl AggregationPlanner {
    /// Builds one spec per field listed under each aggregate function key.
    ///
    /// `sum=amount,tax&count=id` yields `amount_sum`, `tax_sum`, `id_count`
    /// in parameter order.
    pub fn detect(params: &ParameterBundle, aggregates: &AggregateRegistry) -> Vec<AggregateSpec> {
        let mut specs: Vec<AggregateSpec> = Vec::new();
        for (key, value) in params.iter() {
            if !aggregates.contains(key) {
                continue;
            }
            for field in split_fields(value) {
                let spec = AggregateSpec::new(field, key);
                if !specs.iter().any(|s| s.alias == spec.alias) {
                    specs.push(spec);
                }
            }
        }
        specs
    }

    /// Splits a `group_by` value into canonical field paths
    pub fn group_fields(value: &str) -> Vec<String> {
        split_fields(value)
    }

    pub fn plan(
        queryset: &QuerySet,
        specs: &[AggregateSpec],
        group_by: &[String],
    ) -> Result<GroupedResult, QueryError> {
        let store = |e| QueryError::from_store(Stage::Aggregates, e);

        if group_by.is_empty() {
            if specs.is_empty() {
                return Ok(GroupedResult::Grouped(queryset.clone()));
            }
            return queryset
                .aggregate(specs)
                .map(GroupedResult::Scalar)
                .map_err(store);
        }

        let grouped = queryset.values(group_by.iter().cloned()).map_err(store)?;
        if specs.is_empty() {
            Ok(GroupedResult::Grouped(grouped.distinct()))
        } else {
            grouped
                .annotate(specs)
                .map(GroupedResult::Grouped)
                .map_err(store)
        }
    }
}

fn split_fields(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.replace('.', LOOKUP_SEP))
        .collect()
}
