//! Document store abstraction.
//!
//! The vault and registry persist plain JSON documents grouped into named
//! collections. Lookups are equality filters on top-level fields; there are
//! no indexes, migrations or cross-record transactions.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, used by tests and dry runs
//! - [`FileStore`]: a single JSON file rewritten atomically on every write

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::io;

use serde_json::{Map, Value};
use thiserror::Error;

/// A stored document (JSON object).
pub type Document = Map<String, Value>;

/// Errors returned by document store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Stored data is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store file exceeds the size cap.
    #[error("Store file too large (max {max} bytes)")]
    FileTooLarge {
        /// Maximum accepted size in bytes.
        max: u64,
    },

    /// A writer panicked while holding the store lock.
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Equality filter over top-level document fields.
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    /// Matches every document.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches documents whose `field` equals `value`.
    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    /// Adds another equality clause.
    #[must_use]
    pub fn and(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((field.to_string(), value.into()));
        self
    }

    /// Returns true if the document satisfies every clause.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

/// Generic document collection interface.
///
/// Each call is atomic on its own. When several documents match a filter,
/// `find_one` and `delete_one` act on the most recently inserted one.
pub trait DocumentStore: Send + Sync {
    /// Appends a document to a collection.
    fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StoreError>;

    /// Returns the newest document matching the filter.
    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError>;

    /// Returns all matching documents in insertion order.
    fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError>;

    /// Removes the newest matching document. Returns true if one was removed.
    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError>;
}

/// Index of the newest document matching `filter`.
fn newest_match(docs: &[Document], filter: &Filter) -> Option<usize> {
    docs.iter().rposition(|doc| filter.matches(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_filter_all_matches_anything() {
        assert!(Filter::all().matches(&doc(json!({"a": 1}))));
        assert!(Filter::all().matches(&Document::new()));
    }

    #[test]
    fn test_filter_clauses_are_conjunctive() {
        let d = doc(json!({"owner_id": "x", "kind": "device"}));
        assert!(Filter::eq("owner_id", "x").matches(&d));
        assert!(Filter::eq("owner_id", "x").and("kind", "device").matches(&d));
        assert!(!Filter::eq("owner_id", "x").and("kind", "user").matches(&d));
        assert!(!Filter::eq("missing", "x").matches(&d));
    }

    #[test]
    fn test_newest_match_prefers_last_insert() {
        let docs = vec![
            doc(json!({"id": "a", "n": 1})),
            doc(json!({"id": "b", "n": 2})),
            doc(json!({"id": "a", "n": 3})),
        ];
        assert_eq!(newest_match(&docs, &Filter::eq("id", "a")), Some(2));
        assert_eq!(newest_match(&docs, &Filter::eq("id", "c")), None);
    }
}
