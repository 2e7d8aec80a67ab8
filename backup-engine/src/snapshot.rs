//! Snapshot engine.
//!
//! Reads every registered collection into one `{meta, collections}`
//! document. Any read failure aborts the snapshot, so a stored archive is
//! always a complete view.

use crate::schema::Registry;
use crate::store::{Document, DocumentStore};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Bumped when the `{meta, collections}` envelope itself changes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub format_version: u32,
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub include_sensitive: bool,
    #[serde(default)]
    pub generator: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub counts: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub meta: SnapshotMeta,
    pub collections: BTreeMap<String, Vec<Document>>,
}

impl SnapshotDocument {
    /// Parse and shape-check decompressed archive JSON.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| EngineError::MalformedBackup(format!("not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut root) = value else {
            return Err(EngineError::MalformedBackup(
                "top-level value must be an object".into(),
            ));
        };

        let meta = match root.remove("meta") {
            Some(meta @ Value::Object(_)) => serde_json::from_value::<SnapshotMeta>(meta)
                .map_err(|e| EngineError::MalformedBackup(format!("invalid meta: {e}")))?,
            Some(_) => return Err(EngineError::MalformedBackup("meta must be an object".into())),
            None => return Err(EngineError::MalformedBackup("missing meta".into())),
        };

        let raw_collections = match root.remove("collections") {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(EngineError::MalformedBackup(
                    "collections must be an object".into(),
                ))
            }
            None => return Err(EngineError::MalformedBackup("missing collections".into())),
        };

        let mut collections = BTreeMap::new();
        for (name, docs) in raw_collections {
            let Value::Array(items) = docs else {
                return Err(EngineError::MalformedBackup(format!(
                    "collection {name} must be an array"
                )));
            };
            let mut documents = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(doc) => documents.push(doc),
                    _ => {
                        return Err(EngineError::MalformedBackup(format!(
                            "collection {name} item {index} is not an object"
                        )))
                    }
                }
            }
            collections.insert(name, documents);
        }

        Ok(Self { meta, collections })
    }

    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn total_documents(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }
}

pub struct SnapshotEngine {
    store: Arc<dyn DocumentStore>,
    registry: Registry,
}

impl SnapshotEngine {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Registry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn create_snapshot(&self, include_sensitive: bool) -> Result<SnapshotDocument> {
        self.create_snapshot_at(include_sensitive, Utc::now())
    }

    pub fn create_snapshot_at(
        &self,
        include_sensitive: bool,
        created_at: DateTime<Utc>,
    ) -> Result<SnapshotDocument> {
        let mut collections = BTreeMap::new();
        let mut counts = BTreeMap::new();

        for spec in self.registry.collections() {
            let mut documents = self
                .store
                .list(spec.name)
                .map_err(|e| EngineError::store(spec.name, e))?;

            if !include_sensitive {
                for document in &mut documents {
                    self.registry.redact(spec, document);
                }
            }

            debug!(collection = spec.name, count = documents.len(), "Collection read");
            counts.insert(spec.name.to_string(), documents.len());
            collections.insert(spec.name.to_string(), documents);
        }

        let meta = SnapshotMeta {
            format_version: FORMAT_VERSION,
            schema_version: self.registry.version(),
            created_at,
            include_sensitive,
            generator: Some(format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
            host: hostname::get().ok().and_then(|h| h.into_string().ok()),
            counts,
        };

        let snapshot = SnapshotDocument { meta, collections };
        info!(
            collections = snapshot.collections.len(),
            documents = snapshot.total_documents(),
            include_sensitive,
            "Snapshot created"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(
                "users",
                "u1",
                doc(json!({
                    "_id": "u1",
                    "email": "coach@example.com",
                    "passwordHash": "$2b$10$secret",
                    "nested": {"tokens": [{"refreshToken": "r"}]}
                })),
            )
            .unwrap();
        store
            .upsert("teams", "t1", doc(json!({"_id": "t1", "name": "Falcons"})))
            .unwrap();
        store
    }

    fn contains_key(value: &Value, key: &str) -> bool {
        match value {
            Value::Object(map) => {
                map.contains_key(key) || map.values().any(|v| contains_key(v, key))
            }
            Value::Array(items) => items.iter().any(|v| contains_key(v, key)),
            _ => false,
        }
    }

    #[test]
    fn test_snapshot_covers_every_collection() {
        let engine = SnapshotEngine::new(seeded_store(), Registry::default());
        let snapshot = engine.create_snapshot(true).unwrap();

        assert_eq!(snapshot.collections.len(), Registry::default().collections().len());
        assert_eq!(snapshot.collections["users"].len(), 1);
        assert_eq!(snapshot.collections["teams"].len(), 1);
        assert!(snapshot.collections["athletes"].is_empty());
        assert_eq!(snapshot.meta.counts["users"], 1);
        assert_eq!(snapshot.meta.schema_version, crate::schema::SCHEMA_VERSION);
        assert!(snapshot.meta.include_sensitive);
    }

    #[test]
    fn test_snapshot_with_sensitive_keeps_credentials() {
        let engine = SnapshotEngine::new(seeded_store(), Registry::default());
        let snapshot = engine.create_snapshot(true).unwrap();
        assert_eq!(snapshot.collections["users"][0]["passwordHash"], "$2b$10$secret");
    }

    #[test]
    fn test_snapshot_without_sensitive_strips_denied_fields() {
        let engine = SnapshotEngine::new(seeded_store(), Registry::default());
        let snapshot = engine.create_snapshot(false).unwrap();

        let users = Value::Array(
            snapshot.collections["users"]
                .iter()
                .cloned()
                .map(Value::Object)
                .collect(),
        );
        assert!(!contains_key(&users, "passwordHash"));
        assert!(!contains_key(&users, "refreshToken"));
        assert_eq!(snapshot.collections["users"][0]["email"], "coach@example.com");
        assert!(!snapshot.meta.include_sensitive);
    }

    struct FailingStore;

    impl DocumentStore for FailingStore {
        fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
            if collection == "athletes" {
                anyhow::bail!("connection reset");
            }
            Ok(Vec::new())
        }

        fn get(&self, _: &str, _: &str) -> anyhow::Result<Option<Document>> {
            Ok(None)
        }

        fn upsert(&self, _: &str, _: &str, _: Document) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_failure_aborts_snapshot() {
        let engine = SnapshotEngine::new(Arc::new(FailingStore), Registry::default());
        match engine.create_snapshot(true) {
            Err(EngineError::Store { collection, .. }) => assert_eq!(collection, "athletes"),
            other => panic!("expected store error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_round_trip() {
        let engine = SnapshotEngine::new(seeded_store(), Registry::default());
        let snapshot = engine.create_snapshot(true).unwrap();
        let bytes = snapshot.to_json_vec().unwrap();
        assert_eq!(SnapshotDocument::from_json_slice(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn test_parse_rejects_missing_collections() {
        let bytes = serde_json::to_vec(&json!({
            "meta": {
                "formatVersion": 1,
                "schemaVersion": 3,
                "createdAt": "2026-01-01T00:00:00Z",
                "includeSensitive": false
            },
            "users": []
        }))
        .unwrap();
        match SnapshotDocument::from_json_slice(&bytes) {
            Err(EngineError::MalformedBackup(msg)) => assert!(msg.contains("collections")),
            other => panic!("expected malformed backup, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        let cases = [
            json!([1, 2, 3]),
            json!({"collections": {}}),
            json!({"meta": "x", "collections": {}}),
            json!({"meta": {"formatVersion": 1}, "collections": {}}),
        ];
        for case in cases {
            let bytes = serde_json::to_vec(&case).unwrap();
            assert!(matches!(
                SnapshotDocument::from_json_slice(&bytes),
                Err(EngineError::MalformedBackup(_))
            ));
        }

        let meta = json!({
            "formatVersion": 1,
            "schemaVersion": 3,
            "createdAt": "2026-01-01T00:00:00Z",
            "includeSensitive": true
        });
        let not_array = json!({"meta": meta, "collections": {"users": {}}});
        let not_object = json!({"meta": meta, "collections": {"users": [1]}});
        for case in [not_array, not_object] {
            let bytes = serde_json::to_vec(&case).unwrap();
            assert!(matches!(
                SnapshotDocument::from_json_slice(&bytes),
                Err(EngineError::MalformedBackup(_))
            ));
        }

        assert!(matches!(
            SnapshotDocument::from_json_slice(b"not json"),
            Err(EngineError::MalformedBackup(_))
        ));
    }
}
