//! Token-keyed parameter cache
//!
//! A cache entry remembers the non-reserved parameters of a request under a
//! short token so the same query can be replayed with `?cache=<token>`.
//! Stores are last-write-wins. Expired entries are invisible and are purged
//! when capacity is needed.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::errors::{CacheError, CacheResult};
use crate::compiler::params::{ParameterBundle, ReservedKeys};

/// Hard ceiling keeping expiry arithmetic in range (about 100 years)
const LONGEST_TTL_SECS: i64 = 100 * 365 * 24 * 3600;

/// Parameters that never travel in a cache URL
const CONTROL_KEYS: &[&str] = &["cache", "timeout"];

/// A stored parameter bundle
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub token: String,
    pub params: ParameterBundle,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Outcome of resolving a token against the incoming parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCache {
    /// Stored bundle overlaid by the incoming one
    pub params: ParameterBundle,
    /// Whether a live entry was found
    pub hit: bool,
    /// `base?cache=<token>` plus the incoming reserved parameters
    pub cache_url: String,
    /// `base?` every merged parameter spelled out
    pub raw_url: String,
}

/// Process-wide cache of parameter bundles
#[derive(Debug)]
pub struct CacheDirectory {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CacheDirectory {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn key(&self, token: &str) -> String {
        format!("{}{}", self.config.prefix, token)
    }

    /// Lifetime for a raw `timeout` value.
    ///
    /// Absent → default; `0` → the maximum; larger than the maximum → the
    /// maximum; unparsable → default, with a warning.
    pub fn ttl(&self, timeout: Option<&str>) -> Duration {
        let secs = match timeout.map(|t| t.trim().parse::<u64>()) {
            None => self.config.default_ttl_secs,
            Some(Ok(0)) => self.config.max_ttl_secs,
            Some(Ok(n)) => n.min(self.config.max_ttl_secs),
            Some(Err(_)) => {
                warn!(
                    timeout = timeout.unwrap_or_default(),
                    default = self.config.default_ttl_secs,
                    "Invalid cache timeout, using default"
                );
                self.config.default_ttl_secs
            }
        };
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX).min(LONGEST_TTL_SECS))
    }

    pub fn resolve(
        &self,
        token: &str,
        incoming: &ParameterBundle,
        reserved: &ReservedKeys,
        base_url: &str,
    ) -> CacheResult<ResolvedCache> {
        self.resolve_at(token, incoming, reserved, base_url, Utc::now())
    }

    /// Merges the live entry for `token` (if any) under `incoming`
    pub fn resolve_at(
        &self,
        token: &str,
        incoming: &ParameterBundle,
        reserved: &ReservedKeys,
        base_url: &str,
        now: DateTime<Utc>,
    ) -> CacheResult<ResolvedCache> {
        let stored = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            entries
                .get(&self.key(token))
                .filter(|e| e.is_live(now))
                .map(|e| e.params.clone())
        };
        let hit = stored.is_some();
        let incoming = strip_control(incoming);
        let params = stored.unwrap_or_default().merged(&incoming);

        let mut shared = ParameterBundle::new();
        shared.insert("cache", token);
        for (k, v) in incoming.only(reserved).iter() {
            shared.insert(k, v);
        }

        debug!(token = %token, hit, params = params.len(), "Cache resolved");

        Ok(ResolvedCache {
            cache_url: with_query(base_url, &shared),
            raw_url: with_query(base_url, &params),
            params,
            hit,
        })
    }

    pub fn store(
        &self,
        token: &str,
        params: &ParameterBundle,
        ttl: Duration,
    ) -> CacheResult<DateTime<Utc>> {
        self.store_at(token, params, ttl, Utc::now())
    }

    /// Stores `params` under `token`, replacing any previous entry.
    ///
    /// Returns the expiry instant.
    pub fn store_at(
        &self,
        token: &str,
        params: &ParameterBundle,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> CacheResult<DateTime<Utc>> {
        let key = self.key(token);
        let expires_at = now + ttl;
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            entries.retain(|_, e| e.is_live(now));
            if entries.len() >= self.config.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!(key = %oldest, "Cache full, evicting earliest expiry");
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                token: token.to_string(),
                params: params.clone(),
                created_at: now,
                expires_at,
            },
        );
        Ok(expires_at)
    }

    /// Live entry for `token`
    pub fn get(&self, token: &str) -> CacheResult<Option<CacheEntry>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let now = Utc::now();
        Ok(entries
            .get(&self.key(token))
            .filter(|e| e.is_live(now))
            .cloned())
    }

    /// Drops expired entries, returning how many were removed
    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CacheDirectory {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn strip_control(params: &ParameterBundle) -> ParameterBundle {
    params
        .iter()
        .filter(|(k, _)| !CONTROL_KEYS.contains(k))
        .collect()
}

fn with_query(base: &str, params: &ParameterBundle) -> String {
    if params.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, params.to_query())
    }
}
