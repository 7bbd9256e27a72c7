//! # REST API Module
//!
//! Resources, pagination, the list envelope and the axum server around the
//! query compiler.

pub mod config;
pub mod errors;
pub mod handler;
pub mod pagination;
pub mod resource;
pub mod response;
pub mod server;

pub use config::ServerConfig;
pub use errors::{ErrorResponse, RestError, RestResult};
pub use handler::{QueryHandler, RestHandler};
pub use pagination::{Page, PageRequest, PaginationConfig};
pub use resource::{Resource, ResourceConfig, ResourceKind, ResourceRegistry};
pub use response::{HealthResponse, ListResponse};
pub use server::RestServer;
