//! Configuration file
//!
//! A JSON object. Only `schema` is required; relative paths are resolved
//! against the directory holding the configuration file.
//!
//! ```json
//! {
//!   "schema": "schema.json",
//!   "fixtures": ["fixtures.json"],
//!   "server": {"host": "127.0.0.1", "port": 8000},
//!   "cache": {"default_ttl_secs": 3600},
//!   "pagination": {"default_page_size": 100, "max_page_size": 1000},
//!   "resources": {
//!     "invoices": {"model": "invoice", "scope": {"status__in": "paid,open"}}
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::cache::CacheConfig;
use crate::expr::ExprLimits;
use crate::observability::LogConfig;
use crate::rest_api::{PaginationConfig, ResourceConfig, ServerConfig};

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema file (required)
    pub schema: PathBuf,

    /// Fixture files loaded in order at startup
    #[serde(default)]
    pub fixtures: Vec<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Filter expression bounds
    #[serde(default)]
    pub limits: ExprLimits,

    #[serde(default)]
    pub pagination: PaginationConfig,

    #[serde(default)]
    pub logging: LogConfig,

    /// Report silent stage failures in the response options
    #[serde(default)]
    pub debug: bool,

    /// Exposed resources; empty exposes every model
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceConfig>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        config.validate()?;

        Ok(config)
    }

    fn resolve_paths(&mut self, dir: &Path) {
        let resolve = |p: &PathBuf| {
            if p.is_relative() {
                dir.join(p)
            } else {
                p.clone()
            }
        };
        self.schema = resolve(&self.schema);
        self.fixtures = self.fixtures.iter().map(resolve).collect();
    }

    /// Validate configuration
    pub fn validate(&self) -> CliResult<()> {
        if self.schema.as_os_str().is_empty() {
            return Err(CliError::config_error("schema path must not be empty"));
        }

        self.server.bind_addr().map_err(CliError::config_error)?;
        self.cache.validate().map_err(CliError::config_error)?;
        self.pagination
            .validate()
            .map_err(|e| CliError::config_error(format!("pagination: {}", e)))?;

        if self.limits.max_length == 0 || self.limits.max_depth == 0 {
            return Err(CliError::config_error(
                "limits.max_length and limits.max_depth must be > 0",
            ));
        }

        for (name, resource) in &self.resources {
            if resource.page_size == Some(0) {
                return Err(CliError::config_error(format!(
                    "resource '{}': page_size must be > 0",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("restplan.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), r#"{"schema": "schema.json"}"#);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.schema, dir.path().join("schema.json"));
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.pagination.default_page_size, 100);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert!(config.resources.is_empty());
        assert!(!config.debug);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for body in [
            r#"{}"#,
            r#"{"schema": "s.json", "cache": {"max_entries": 0}}"#,
            r#"{"schema": "s.json", "pagination": {"default_page_size": 0}}"#,
            r#"{"schema": "s.json", "server": {"host": "nowhere host"}}"#,
            r#"{"schema": "s.json", "resources": {"r": {"model": "m", "page_size": 0}}}"#,
        ] {
            let path = write_config(dir.path(), body);
            let err = Config::load(&path).unwrap_err();
            assert_eq!(err.code_str(), "RP_CLI_CONFIG_ERROR", "{}", body);
        }
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/nonexistent/restplan.json")).unwrap_err();
        assert_eq!(err.code_str(), "RP_CLI_CONFIG_ERROR");
    }
}
