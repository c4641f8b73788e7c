//! Queries served by a [`Searcher`](crate::Searcher).
//!
//! Only exact matching is supported: all documents, exact field values
//! (dotted paths address nested objects, arrays match on any element) and
//! id lists.

use crate::document::StoredDoc;
use serde_json::Value;

/// A search request
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every live document
    MatchAll,
    /// Documents whose `field` equals `value`
    Term {
        /// Dotted field path, e.g. `user.name`
        field: String,
        /// Exact value
        value: Value,
    },
    /// Documents with one of these ids
    Ids(Vec<String>),
}

impl Query {
    /// Term query.
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Ids query.
    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// True if `doc` satisfies the query.
    pub fn matches(&self, doc: &StoredDoc) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Term { field, value } => match lookup(&doc.source, field) {
                Some(found) => {
                    found == value || found.as_array().map_or(false, |items| items.contains(value))
                }
                None => false,
            },
            Query::Ids(ids) => ids.iter().any(|id| *id == doc.id),
        }
    }
}

fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(source, |current, segment| current.as_object()?.get(segment))
}
