//! Cache directory
//!
//! Shares a request's filter parameters under a short token. The compiler
//! resolves `?cache=<token>` before interpreting any other parameter.

mod config;
mod directory;
mod errors;

pub use config::{CacheConfig, CACHE_PREFIX, DEFAULT_CACHE_TTL, MAX_CACHE_TTL};
pub use directory::{CacheDirectory, CacheEntry, ResolvedCache};
pub use errors::{CacheError, CacheResult};
