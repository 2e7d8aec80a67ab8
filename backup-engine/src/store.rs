//! Document store seam.
//!
//! The engine only ever enumerates a collection, reads one document, or
//! upserts one document by id. Anything that can do that (the server's
//! SQLite store, a test double) can be snapshotted and restored.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// A JSON object as stored in a collection.
pub type Document = Map<String, Value>;

pub trait DocumentStore: Send + Sync {
    /// All documents of `collection`, in a stable order.
    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>>;

    fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>>;

    /// Insert or replace the document stored under `id`.
    fn upsert(&self, collection: &str, id: &str, document: Document) -> anyhow::Result<()>;

    fn count(&self, collection: &str) -> anyhow::Result<usize> {
        Ok(self.list(collection)?.len())
    }
}

/// Stable identifier of a document: a string, or an integer rendered as one.
pub fn document_id(document: &Document, id_field: &str) -> Option<String> {
    match document.get(id_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// In-process store used by tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every collection and document, for whole-state comparisons.
    pub fn dump(&self) -> BTreeMap<String, BTreeMap<String, Document>> {
        self.read_guard()
            .iter()
            .map(|(name, docs)| (name.clone(), docs.clone()))
            .collect()
    }

    fn read_guard(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, BTreeMap<String, Document>>> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentStore for MemoryStore {
    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        Ok(self
            .read_guard()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        Ok(self
            .read_guard()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    fn upsert(&self, collection: &str, id: &str, document: Document) -> anyhow::Result<()> {
        let mut guard = self.collections.write().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        Ok(())
    }
}
