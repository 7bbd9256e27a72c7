//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use restplan::cache::CacheDirectory;
use restplan::compiler::{
    CompiledPlan, ParameterBundle, PlanResult, QueryCompiler, RequestContext, Source,
    ValidationError,
};
use restplan::rest_api::{
    PaginationConfig, QueryHandler, ResourceConfig, ResourceRegistry, RestServer, ServerConfig,
};
use restplan::schema::SchemaLoader;
use restplan::store::{AggregateRegistry, Database};
use serde_json::{json, Value};

pub const SCHEMA: &str = r#"{
    "models": {
        "customer": {
            "fields": {
                "id": {"type": "int"},
                "name": {"type": "string"}
            }
        },
        "invoice": {
            "fields": {
                "id": {"type": "int"},
                "amount": {"type": "int"},
                "discount": {"type": "int", "null": true},
                "status": {"type": "string", "choices": [["paid", "Paid"], ["open", "Open"]]},
                "start_date": {"type": "date"},
                "end_date": {"type": "date"},
                "customer": {"type": "foreign_key", "target": "customer"},
                "notes": {"type": "reverse", "target": "note", "field": "invoice"}
            },
            "metadata": ["notes"]
        },
        "note": {
            "fields": {
                "id": {"type": "int"},
                "body": {"type": "string"},
                "valid": {"type": "bool"},
                "invoice": {"type": "foreign_key", "target": "invoice"}
            }
        }
    }
}"#;

pub fn fixtures() -> Value {
    json!({
        "customer": [
            {"id": 1, "name": "Acme"},
            {"id": 2, "name": "Globex"}
        ],
        "invoice": [
            {"id": 1, "amount": 10, "discount": null, "status": "paid",
             "start_date": "2024-01-01", "end_date": "2024-01-31", "customer": 1},
            {"id": 2, "amount": 20, "discount": 5, "status": "open",
             "start_date": "2024-02-01", "end_date": "2024-02-01", "customer": 1},
            {"id": 3, "amount": 30, "discount": null, "status": "paid",
             "start_date": "2024-03-01", "end_date": "2024-03-15", "customer": 2}
        ],
        "note": [
            {"id": 1, "body": "sent", "valid": true, "invoice": 1},
            {"id": 2, "body": "draft", "valid": false, "invoice": 1},
            {"id": 3, "body": "late", "valid": true, "invoice": 3}
        ]
    })
}

pub fn database() -> Arc<Database> {
    let registry = SchemaLoader::load_str(SCHEMA).unwrap();
    let db = Arc::new(Database::new(
        Arc::new(registry),
        Arc::new(AggregateRegistry::with_defaults()),
    ));
    db.load_fixtures(fixtures()).unwrap();
    db
}

pub fn compiler() -> QueryCompiler {
    QueryCompiler::new(Arc::new(CacheDirectory::default()))
}

/// Compiles `query` against every invoice with a fresh request context
pub fn compile_with(
    compiler: &QueryCompiler,
    db: &Arc<Database>,
    query: &str,
) -> Result<CompiledPlan, ValidationError> {
    let source = Source::Collection(db.queryset("invoice").unwrap());
    let mut ctx = RequestContext::new("http://testserver/api/invoice");
    compiler.compile(source, &ParameterBundle::from_query(query), &mut ctx)
}

pub fn compile(query: &str) -> Result<CompiledPlan, ValidationError> {
    compile_with(&compiler(), &database(), query)
}

pub fn rows(plan: &CompiledPlan) -> Vec<Value> {
    match &plan.result {
        PlanResult::Plan(qs) => qs.fetch().unwrap(),
        other => panic!("expected a plan, got {other:?}"),
    }
}

pub fn ids(plan: &CompiledPlan) -> Vec<i64> {
    let mut ids: Vec<i64> = rows(plan)
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect();
    ids.sort_unstable();
    ids
}

/// Resources used by the endpoint tests
pub fn resources() -> BTreeMap<String, ResourceConfig> {
    let mut invoices = ResourceConfig::model("invoice");
    invoices
        .metadata_validity
        .insert("notes".into(), [("valid".to_string(), "true".to_string())].into());

    let paid = ResourceConfig::model("invoice").with_scope("status", "paid");

    let summary = ResourceConfig {
        data: Some(json!({"total": 60})),
        ..ResourceConfig::default()
    };

    [
        ("invoice".to_string(), invoices),
        ("paid".to_string(), paid),
        ("customer".to_string(), ResourceConfig::model("customer")),
        ("summary".to_string(), summary),
    ]
    .into_iter()
    .collect()
}

pub fn handler(page_size: usize) -> QueryHandler {
    let db = database();
    let resources = ResourceRegistry::build(&resources(), db.registry()).unwrap();
    QueryHandler::new(
        db,
        compiler(),
        resources,
        PaginationConfig {
            default_page_size: page_size,
            ..PaginationConfig::default()
        },
    )
}

pub fn router(page_size: usize) -> axum::Router {
    RestServer::new(handler(page_size), ServerConfig::default()).router()
}
