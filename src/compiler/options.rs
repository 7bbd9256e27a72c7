//! Compiled-plan options
//!
//! Records which optional stages ran and whether they succeeded. A `None`
//! flag means the stage was not attempted.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::errors::{QueryError, Stage};
use super::params::ParameterBundle;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Options {
    pub aggregates: Option<bool>,
    pub distinct: Option<bool>,
    pub filters: Option<bool>,
    pub order_by: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distinct_error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_data: Option<ParameterBundle>,
}

impl Options {
    /// Flag of a stage
    pub fn get(&self, stage: Stage) -> Option<bool> {
        match stage {
            Stage::Fields => self.fields,
            Stage::Filters => self.filters,
            Stage::Aggregates => self.aggregates,
            Stage::OrderBy => self.order_by,
            Stage::Distinct => self.distinct,
        }
    }

    pub fn set(&mut self, stage: Stage, ok: bool) {
        let slot = match stage {
            Stage::Fields => &mut self.fields,
            Stage::Filters => &mut self.filters,
            Stage::Aggregates => &mut self.aggregates,
            Stage::OrderBy => &mut self.order_by,
            Stage::Distinct => &mut self.distinct,
        };
        *slot = Some(ok);
    }

    pub fn error(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Fields => self.fields_error.as_deref(),
            Stage::Filters => self.filters_error.as_deref(),
            Stage::Aggregates => self.aggregates_error.as_deref(),
            Stage::OrderBy => self.order_by_error.as_deref(),
            Stage::Distinct => self.distinct_error.as_deref(),
        }
    }

    /// Marks a stage as failed, keeping the message when `debug` is set
    pub fn record_failure(&mut self, stage: Stage, err: &QueryError, debug: bool) {
        self.set(stage, false);
        if !debug {
            return;
        }
        let slot = match stage {
            Stage::Fields => &mut self.fields_error,
            Stage::Filters => &mut self.filters_error,
            Stage::Aggregates => &mut self.aggregates_error,
            Stage::OrderBy => &mut self.order_by_error,
            Stage::Distinct => &mut self.distinct_error,
        };
        *slot = Some(err.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unattempted_stages_serialize_as_null() {
        let value = serde_json::to_value(Options::default()).unwrap();
        assert_eq!(
            value,
            json!({"aggregates": null, "distinct": null, "filters": null, "order_by": null})
        );
    }

    #[test]
    fn test_failure_message_only_under_debug() {
        let err = QueryError::Ordering("bad".into());
        let mut quiet = Options::default();
        quiet.record_failure(Stage::OrderBy, &err, false);
        assert_eq!(quiet.order_by, Some(false));
        assert!(quiet.order_by_error.is_none());

        let mut loud = Options::default();
        loud.record_failure(Stage::OrderBy, &err, true);
        assert_eq!(loud.error(Stage::OrderBy), Some("bad"));
    }
}
