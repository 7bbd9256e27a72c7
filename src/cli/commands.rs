//! CLI command implementations
//!
//! Every command boots the same way: configuration, schema, fixtures,
//! resources, then the compiler and handler.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::args::Command;
use super::config::Config;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};
use crate::cache::CacheDirectory;
use crate::compiler::{ParameterBundle, PlanResult, QueryCompiler};
use crate::observability;
use crate::rest_api::{QueryHandler, ResourceRegistry, RestHandler, RestServer};
use crate::schema::SchemaLoader;
use crate::store::{AggregateRegistry, Database, StoreError};

/// Dispatch a parsed command
pub fn run_command(command: Command) -> CliResult<()> {
    match command {
        Command::Serve { config, port } => serve(&config, port),
        Command::Check { config } => check(&config),
        Command::Compile {
            config,
            resource,
            query,
            execute,
        } => compile(&config, &resource, &query, execute),
    }
}

fn load(config_path: &Path) -> CliResult<Config> {
    let config = Config::load(config_path)?;
    if let Err(e) = observability::init(&config.logging) {
        // a subscriber installed by an embedding application is fine
        eprintln!("{}", e);
    }
    Ok(config)
}

/// Builds the handler described by `config`
pub fn boot(config: &Config) -> CliResult<QueryHandler> {
    let registry = SchemaLoader::load_file(&config.schema)
        .map_err(|e| CliError::boot_failed(format!("Schema error: {}", e)))?;
    info!(models = registry.len(), schema = %config.schema.display(), "Schema loaded");

    let db = Arc::new(Database::new(
        Arc::new(registry),
        Arc::new(AggregateRegistry::with_defaults()),
    ));
    for path in &config.fixtures {
        db.load_fixtures_file(path)
            .map_err(|e| CliError::boot_failed(format!("{}: {}", path.display(), e)))?;
    }

    let resources = ResourceRegistry::build(&config.resources, db.registry())?;
    let cache = Arc::new(CacheDirectory::new(config.cache.clone()));
    let compiler = QueryCompiler::new(cache)
        .with_limits(config.limits)
        .with_page_keys(&config.pagination.page_key, &config.pagination.page_size_key);

    Ok(QueryHandler::new(db, compiler, resources, config.pagination.clone()).with_debug(config.debug))
}

/// Serve the REST API until interrupted
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    let handler = boot(&config)?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to start runtime: {}", e)))?;
    runtime.block_on(async move {
        let server = RestServer::new(handler, config.server.clone());
        tokio::select! {
            result = server.start() => result.map_err(CliError::from),
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                Ok(())
            }
        }
    })
}

/// Validate everything `serve` would load, then exit
pub fn check(config_path: &Path) -> CliResult<()> {
    let config = load(config_path)?;
    let handler = boot(&config)?;

    let db = handler.database();
    let mut records = serde_json::Map::new();
    for model in db.registry().models() {
        let count = db
            .count(&model.name)
            .map_err(|e| CliError::boot_failed(e.to_string()))?;
        records.insert(model.name.clone(), json!(count));
    }

    write_response(json!({
        "resources": handler.resources(),
        "records": records,
    }))
}

/// Compile one query and print the plan, optionally executing it
pub fn compile(config_path: &Path, resource: &str, query: &str, execute: bool) -> CliResult<()> {
    let config = load(config_path)?;
    let handler = boot(&config)?;
    let base_url = format!("http://{}/api/{}", config.server.socket_addr(), resource);
    let params = ParameterBundle::from_query(query.trim_start_matches('?'));

    let plan = match handler.compile(resource, &params, &base_url) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(resource, error = %e, "Compilation rejected");
            let err = CliError::from(e);
            write_error(err.code_str(), err.message())?;
            return Err(err);
        }
    };

    let described = match &plan.result {
        PlanResult::Plan(qs) => match qs.compile() {
            Ok(text) => json!({"kind": "plan", "model": qs.model(), "query": text}),
            Err(StoreError::EmptyResultSet) => {
                json!({"kind": "plan", "model": qs.model(), "query": Value::Null, "empty": true})
            }
            Err(e) => return Err(CliError::query_failed(e.to_string())),
        },
        PlanResult::Aggregate(map) => json!({"kind": "aggregate", "result": map}),
        PlanResult::Raw(_) => json!({"kind": "raw"}),
    };

    let mut data = json!({
        "resource": resource,
        "plan": described,
        "options": plan.options,
    });
    if execute {
        data["results"] = handler.list(resource, &params, &base_url)?;
    }
    write_response(data)
}
