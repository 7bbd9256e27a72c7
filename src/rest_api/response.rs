//! # Response Formatting
//!
//! Standard response types for REST API.

use serde::Serialize;

use super::pagination::Page;
use crate::compiler::Options;

/// Paginated list envelope
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub count: usize,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<T>,
    pub options: Options,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(
        results: Vec<T>,
        page: &Page,
        next: Option<String>,
        previous: Option<String>,
        options: Options,
    ) -> Self {
        Self {
            count: page.count,
            next,
            previous,
            page: page.number,
            page_size: page.size,
            results,
            options,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub resources: Vec<String>,
}

impl HealthResponse {
    pub fn ok(resources: Vec<String>) -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest_api::pagination::PageRequest;
    use serde_json::json;

    #[test]
    fn test_list_response_serialization() {
        let page = PageRequest { number: 1, size: 2 }.resolve(3).unwrap();
        let response = ListResponse::new(
            vec![json!({"id": 1}), json!({"id": 2})],
            &page,
            Some("http://h/api/invoice?page=2".into()),
            None,
            Options::default(),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["page"], 1);
        assert_eq!(json["page_size"], 2);
        assert_eq!(json["next"], "http://h/api/invoice?page=2");
        assert!(json["previous"].is_null());
        assert_eq!(json["results"].as_array().unwrap().len(), 2);
        assert!(json["options"]["filters"].is_null());
    }

    #[test]
    fn test_health_response() {
        let json = serde_json::to_value(HealthResponse::ok(vec!["invoice".into()])).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["resources"], json!(["invoice"]));
    }
}
