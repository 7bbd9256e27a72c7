//! # REST API HTTP Server
//!
//! Axum router exposing every resource:
//!
//! - `GET /api/:resource` lists with the query string compiled into a plan
//! - `GET /api/:resource/:id` retrieves one record
//! - `GET /health`

use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap},
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::config::ServerConfig;
use super::errors::{RestError, RestResult};
use super::handler::RestHandler;
use super::response::HealthResponse;
use crate::compiler::ParameterBundle;

/// REST API server state
pub struct RestServer<H: RestHandler> {
    handler: Arc<H>,
    config: ServerConfig,
}

/// Shared state type
type ServerState<H> = Arc<RestServer<H>>;

impl<H: RestHandler + 'static> RestServer<H> {
    pub fn new(handler: H, config: ServerConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
        }
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Build the Axum router
    pub fn router(self) -> Router {
        let cors = cors_layer(&self.config);
        let state = Arc::new(self);

        Router::new()
            .route("/health", get(health_handler::<H>))
            .route("/api/:resource", get(list_handler::<H>))
            .route("/api/:resource/:id", get(retrieve_handler::<H>))
            .with_state(state)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind and serve until the process stops
    pub async fn start(self) -> RestResult<()> {
        let addr = self.config.bind_addr().map_err(RestError::Internal)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RestError::Internal(format!("failed to bind {}: {}", addr, e)))?;

        info!(
            addr = %addr,
            resources = ?self.handler.resources(),
            "restplan listening"
        );

        axum::serve(listener, self.router())
            .await
            .map_err(|e| RestError::Internal(format!("server error: {}", e)))
    }
}

/// CORS from config: an empty origin list is permissive
fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Absolute URL of a path on this server, from the `Host` header
fn absolute_url(headers: &HeaderMap, path: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{}{}", host, path)
}

async fn health_handler<H: RestHandler + 'static>(
    State(server): State<ServerState<H>>,
) -> Json<HealthResponse> {
    Json(HealthResponse::ok(server.handler.resources()))
}

/// List records handler
async fn list_handler<H: RestHandler + 'static>(
    State(server): State<ServerState<H>>,
    Path(resource): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Json<Value>, RestError> {
    let params = ParameterBundle::from_query(query.as_deref().unwrap_or_default());
    let base_url = absolute_url(&headers, &format!("/api/{}", resource));

    let result = server.handler.list(&resource, &params, &base_url)?;
    Ok(Json(result))
}

/// Get single record handler
async fn retrieve_handler<H: RestHandler + 'static>(
    State(server): State<ServerState<H>>,
    Path((resource, id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Json<Value>, RestError> {
    let params = ParameterBundle::from_query(query.as_deref().unwrap_or_default());
    let base_url = absolute_url(&headers, &format!("/api/{}/{}", resource, id));

    let result = server.handler.retrieve(&resource, &id, &params, &base_url)?;
    Ok(Json(result))
}
