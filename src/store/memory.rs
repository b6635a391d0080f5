//! In-memory document store.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{Document, DocumentStore, Filter, StoreError, newest_match};

/// Process-local document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .map(|guard| guard.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl DocumentStore for MemoryStore {
    fn insert_one(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        let mut guard = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        guard.entry(collection.to_string()).or_default().push(doc);
        Ok(())
    }

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>, StoreError> {
        let guard = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(collection).and_then(|docs| {
            newest_match(docs, filter).map(|idx| docs[idx].clone())
        }))
    }

    fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        let mut guard = self.collections.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(docs) = guard.get_mut(collection) else {
            return Ok(false);
        };
        match newest_match(docs, filter) {
            Some(idx) => {
                docs.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
