//! In-memory relational store
//!
//! Records live in per-model tables. Retrieval goes through [`QuerySet`], a
//! lazy handle supporting filter, exclude, order_by, distinct, values,
//! annotate, aggregate, select_related, prefetch_related and only.

mod aggregate;
mod database;
mod errors;
mod executor;
mod predicate;
mod queryset;
mod sorter;

pub use aggregate::{AggregateFunction, AggregateRegistry, AggregateSpec};
pub use database::{Database, Table};
pub use errors::{StoreError, StoreResult};
pub use predicate::{resolve_lookup, Condition, Lookup, Operand, Predicate};
pub use queryset::{Distinct, Prefetch, QuerySet, Window};
pub use sorter::{ResultSorter, SortDirection};
