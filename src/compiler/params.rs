//! Parameter bundle and reserved keys

use std::collections::BTreeSet;

use serde::Serialize;

use crate::store::AggregateRegistry;

/// Keys interpreted by the compiler rather than used as implicit filters
pub const RESERVED: &[&str] = &[
    "fields", "simple", "all", "meta", "cache", "timeout", "filters", "order_by", "distinct",
    "group_by", "silent", "display", "format",
];

/// Default pagination keys
pub const PAGE_KEY: &str = "page";
pub const PAGE_SIZE_KEY: &str = "page_size";

/// Parses a loose boolean spelling.
///
/// Accepts `true yes y 1 vrai oui o` and `false no n 0 faux non`, ignoring
/// case and surrounding whitespace.
pub fn str_to_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "vrai" | "oui" | "o" => Some(true),
        "false" | "no" | "n" | "0" | "faux" | "non" => Some(false),
        _ => None,
    }
}

/// Ordered map of raw query parameters.
///
/// Keys are case-sensitive. Inserting an existing key replaces its value but
/// keeps the original position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParameterBundle {
    entries: Vec<(String, String)>,
}

impl ParameterBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an urlencoded query string; later duplicates win
    pub fn from_query(query: &str) -> Self {
        url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Value of `key` read as a boolean; absent or unparsable is false
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(str_to_bool).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the bundle without the reserved keys
    pub fn without(&self, reserved: &ReservedKeys) -> Self {
        self.iter()
            .filter(|(k, _)| !reserved.contains(k))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Copy of the bundle with only the reserved keys
    pub fn only(&self, reserved: &ReservedKeys) -> Self {
        self.iter()
            .filter(|(k, _)| reserved.contains(k))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Overlays `other` on top of `self`; `other` wins on conflicts
    pub fn merged(&self, other: &ParameterBundle) -> Self {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.insert(k, v);
        }
        out
    }

    /// Urlencoded form, in insertion order
    pub fn to_query(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

impl FromIterator<(String, String)> for ParameterBundle {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut bundle = ParameterBundle::new();
        for (k, v) in iter {
            bundle.insert(k, v);
        }
        bundle
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for ParameterBundle {
    fn from_iter<T: IntoIterator<Item = (&'a str, &'a str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Set of reserved keys for one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedKeys {
    keys: BTreeSet<String>,
}

impl ReservedKeys {
    /// Fixed keys, one key per aggregate function, and the pagination keys
    pub fn new(aggregates: &AggregateRegistry, page_key: &str, page_size_key: &str) -> Self {
        let mut keys: BTreeSet<String> = RESERVED.iter().map(|k| k.to_string()).collect();
        keys.extend(aggregates.names().map(str::to_string));
        keys.insert(page_key.to_string());
        keys.insert(page_size_key.to_string());
        Self { keys }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

impl Default for ReservedKeys {
    fn default() -> Self {
        Self::new(&AggregateRegistry::with_defaults(), PAGE_KEY, PAGE_SIZE_KEY)
    }
}
