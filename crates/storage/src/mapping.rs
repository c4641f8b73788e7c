//! Field mapping
//!
//! The mapping is the set of top-level source fields the index knows about.
//! With dynamic mapping on, unknown fields are added as documents arrive;
//! with it off, the engine must reject writes carrying unmapped fields until
//! the mapping is updated explicitly.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Known top-level fields of the index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    fields: BTreeSet<String>,
}

impl Mapping {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields of `source` not present in the mapping, sorted.
    pub fn unmapped_fields(&self, source: &Value) -> Vec<String> {
        match source.as_object() {
            Some(object) => object
                .keys()
                .filter(|k| !self.fields.contains(*k))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Add fields; returns how many were new.
    pub fn merge<I, S>(&mut self, fields: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        fields
            .into_iter()
            .map(Into::<String>::into)
            .filter(|f| self.fields.insert(f.clone()))
            .count()
    }

    /// Add every top-level field of `source`.
    pub fn merge_source(&mut self, source: &Value) -> usize {
        match source.as_object() {
            Some(object) => self.merge(object.keys().cloned()),
            None => 0,
        }
    }

    /// True if `field` is mapped.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    /// Mapped fields, sorted.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// Number of mapped fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
