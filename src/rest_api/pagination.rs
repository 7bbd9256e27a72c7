//! Page-number pagination
//!
//! `page` is 1-based. `page_size` is clamped to the configured maximum and
//! falls back to the default when absent or unparsable. A page past the end
//! is an error, except page 1 of an empty collection.

use serde::{Deserialize, Serialize};

use super::errors::{RestError, RestResult};
use crate::compiler::params::{ParameterBundle, PAGE_KEY, PAGE_SIZE_KEY};

/// Pagination defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    #[serde(default = "default_page_key")]
    pub page_key: String,

    #[serde(default = "default_page_size_key")]
    pub page_size_key: String,
}

fn default_page_size() -> usize {
    100
}

fn default_max_page_size() -> usize {
    1000
}

fn default_page_key() -> String {
    PAGE_KEY.to_string()
}

fn default_page_size_key() -> String {
    PAGE_SIZE_KEY.to_string()
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            page_key: default_page_key(),
            page_size_key: default_page_size_key(),
        }
    }
}

impl PaginationConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_page_size == 0 {
            return Err("default_page_size must be > 0".into());
        }
        if self.max_page_size < self.default_page_size {
            return Err(format!(
                "max_page_size ({}) must be >= default_page_size ({})",
                self.max_page_size, self.default_page_size
            ));
        }
        if self.page_key.is_empty() || self.page_key == self.page_size_key {
            return Err("page_key and page_size_key must be distinct and non-empty".into());
        }
        Ok(())
    }
}

/// Requested page before the total is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub number: usize,
    pub size: usize,
}

impl PageRequest {
    /// Reads the page keys from `params`.
    ///
    /// `default_size` overrides the configured default for one resource.
    pub fn from_params(
        params: &ParameterBundle,
        config: &PaginationConfig,
        default_size: Option<usize>,
    ) -> RestResult<Self> {
        let number = match params.get(&config.page_key) {
            None => 1,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(RestError::InvalidPage(format!("'{}' is not a page number", raw))),
            },
        };

        let default_size = default_size
            .unwrap_or(config.default_page_size)
            .min(config.max_page_size);
        let size = params
            .get(&config.page_size_key)
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map_or(default_size, |n| n.min(config.max_page_size));

        Ok(Self { number, size })
    }

    /// Fixes the request against the collection size
    pub fn resolve(self, count: usize) -> RestResult<Page> {
        let pages = count.div_ceil(self.size).max(1);
        if self.number > pages {
            return Err(RestError::InvalidPage(format!(
                "page {} is past the last page ({})",
                self.number, pages
            )));
        }
        Ok(Page {
            number: self.number,
            size: self.size,
            pages,
            count,
        })
    }
}

/// A page within a counted collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
    pub pages: usize,
    pub count: usize,
}

impl Page {
    pub fn offset(&self) -> usize {
        (self.number - 1) * self.size
    }

    pub fn has_next(&self) -> bool {
        self.number < self.pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    /// Link to the next page, keeping every other parameter
    pub fn next_url(&self, base_url: &str, params: &ParameterBundle, page_key: &str) -> Option<String> {
        self.has_next()
            .then(|| link(base_url, params, page_key, Some(self.number + 1)))
    }

    /// Link to the previous page. Page 1 drops the page key.
    pub fn previous_url(
        &self,
        base_url: &str,
        params: &ParameterBundle,
        page_key: &str,
    ) -> Option<String> {
        if !self.has_previous() {
            return None;
        }
        let target = self.number - 1;
        Some(link(base_url, params, page_key, (target > 1).then_some(target)))
    }
}

fn link(base_url: &str, params: &ParameterBundle, page_key: &str, page: Option<usize>) -> String {
    let mut params = params.clone();
    match page {
        Some(n) => params.insert(page_key, n.to_string()),
        None => {
            params.remove(page_key);
        }
    }
    if params.is_empty() {
        base_url.to_string()
    } else {
        format!("{}?{}", base_url, params.to_query())
    }
}
