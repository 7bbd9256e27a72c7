//! Request Context
//!
//! Context carried through one compilation.
//! Contains the request identity, injected scope filters, and the
//! recorded failure that makes compilation non-reentrant.

use std::collections::BTreeMap;
use std::time::Instant;

use uuid::Uuid;

use super::errors::ValidationError;
use crate::store::Predicate;

/// Context carried through one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    /// Absolute URL of the collection, without query string
    pub base_url: String,

    /// Whether the caller paginates the result
    pub paginated: bool,

    /// Whether stage errors are reported in options
    pub debug: bool,

    /// Permission filters applied before any parameter is interpreted
    pub scope: Vec<Predicate>,

    /// Per metadata relation, the predicate its rows must satisfy to be
    /// prefetched
    pub metadata_validity: BTreeMap<String, Predicate>,

    failure: Option<ValidationError>,

    started_at: Instant,
}

impl RequestContext {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            base_url: base_url.into(),
            paginated: true,
            debug: false,
            scope: Vec::new(),
            metadata_validity: BTreeMap::new(),
            failure: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_pagination(mut self, paginated: bool) -> Self {
        self.paginated = paginated;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Adds a permission scope filter
    pub fn with_scope(mut self, predicate: Predicate) -> Self {
        self.scope.push(predicate);
        self
    }

    pub fn with_metadata_validity(mut self, relation: impl Into<String>, predicate: Predicate) -> Self {
        self.metadata_validity.insert(relation.into(), predicate);
        self
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Failure recorded by an earlier compilation of this request
    pub fn failure(&self) -> Option<&ValidationError> {
        self.failure.as_ref()
    }

    pub(crate) fn record_failure(&mut self, err: ValidationError) {
        self.failure = Some(err);
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("")
    }
}
