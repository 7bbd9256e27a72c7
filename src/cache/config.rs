//! Cache directory configuration

use serde::{Deserialize, Serialize};

/// Default entry lifetime in seconds
pub const DEFAULT_CACHE_TTL: u64 = 3600;

/// Upper bound on an entry lifetime (30 days)
pub const MAX_CACHE_TTL: u64 = 30 * 24 * 3600;

/// Prefix of every stored key
pub const CACHE_PREFIX: &str = "restplan:cache:";

fn default_ttl() -> u64 {
    DEFAULT_CACHE_TTL
}

fn default_max_ttl() -> u64 {
    MAX_CACHE_TTL
}

fn default_max_entries() -> usize {
    10_000
}

fn default_prefix() -> String {
    CACHE_PREFIX.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime used when the request sends no `timeout`
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,

    /// Cap applied to `timeout` (and to `timeout=0`)
    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u64,

    /// Maximum number of live entries. A full directory scans every entry on
    /// each store to pick evictions, so keep this in the tens of thousands.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl(),
            max_ttl_secs: default_max_ttl(),
            max_entries: default_max_entries(),
            prefix: default_prefix(),
        }
    }
}

impl CacheConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl_secs == 0 {
            return Err("cache.default_ttl_secs must be positive".into());
        }
        if self.max_ttl_secs < self.default_ttl_secs {
            return Err("cache.max_ttl_secs must be at least cache.default_ttl_secs".into());
        }
        if self.max_entries == 0 {
            return Err("cache.max_entries must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = CacheConfig {
            default_ttl_secs: 100,
            max_ttl_secs: 10,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
