//! Cache directory errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache directory lock poisoned")]
    LockPoisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;
