//! restplan - query-string driven REST layer over schema-registered
//! record collections
//!
//! Untrusted query parameters are compiled into a retrieval plan (filters,
//! projection, grouping, aggregation, ordering, distinctness) over an
//! in-memory relational store, then executed and paginated by the REST
//! layer.

pub mod cache;
pub mod cli;
pub mod compiler;
pub mod expr;
pub mod observability;
pub mod rest_api;
pub mod schema;
pub mod store;
