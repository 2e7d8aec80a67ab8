//! Restore engine: preview (read-only) and apply (idempotent upsert).
//!
//! Apply is refused unless the injected restore switch is on. Preview never
//! writes and stays available when restore is disabled.

use crate::config::RestoreConfig;
use crate::schema::Registry;
use crate::snapshot::{SnapshotDocument, SnapshotMeta, FORMAT_VERSION};
use crate::store::{document_id, DocumentStore};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Error messages kept per collection; the counts stay exact.
const MAX_ERRORS_PER_COLLECTION: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPreview {
    pub incoming: usize,
    pub existing: usize,
    pub would_insert: usize,
    pub would_update: usize,
    pub missing_ids: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePreview {
    pub meta: SnapshotMeta,
    pub collection_counts: BTreeMap<String, CollectionPreview>,
    pub warnings: Vec<String>,
    pub restore_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    /// Documents written, new or replacing an existing one.
    pub inserted_count: usize,
    /// The part of `inserted_count` that replaced an existing document.
    #[serde(default)]
    pub updated_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<String>,
}

impl CollectionReport {
    fn fail(&mut self, message: String) {
        self.skipped_count += 1;
        if self.errors.len() < MAX_ERRORS_PER_COLLECTION {
            self.errors.push(message);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub meta: SnapshotMeta,
    pub collections: BTreeMap<String, CollectionReport>,
}

impl RestoreReport {
    pub fn total_inserted(&self) -> usize {
        self.collections.values().map(|c| c.inserted_count).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.collections.values().map(|c| c.skipped_count).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.collections.values().any(|c| c.skipped_count > 0)
    }
}

pub struct RestoreEngine {
    store: Arc<dyn DocumentStore>,
    registry: Registry,
    enabled: bool,
}

impl RestoreEngine {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Registry, config: &RestoreConfig) -> Self {
        Self {
            store,
            registry,
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fails fast with `RestoreDisabled`; call before any archive work.
    pub fn ensure_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(EngineError::RestoreDisabled)
        }
    }

    pub fn preview_restore(&self, doc: &SnapshotDocument) -> Result<RestorePreview> {
        check_format(&doc.meta)?;

        let mut warnings = Vec::new();
        if doc.meta.schema_version != self.registry.version() {
            warnings.push(format!(
                "Archive schema version {} differs from current version {}",
                doc.meta.schema_version,
                self.registry.version()
            ));
        }
        if !doc.meta.include_sensitive {
            warnings.push(
                "Archive was created without sensitive fields; existing credentials are kept, \
                 new documents will have none"
                    .to_string(),
            );
        }

        let mut collection_counts = BTreeMap::new();
        for (name, documents) in &doc.collections {
            let Some(spec) = self.registry.get(name) else {
                warnings.push(format!(
                    "Unknown collection {name} ({} documents) will be skipped",
                    documents.len()
                ));
                continue;
            };

            let existing_ids: HashSet<String> = match self.store.list(name) {
                Ok(existing) => existing
                    .iter()
                    .filter_map(|d| document_id(d, spec.id_field))
                    .collect(),
                Err(e) => {
                    warnings.push(format!("Could not read existing {name}: {e:#}"));
                    HashSet::new()
                }
            };

            let mut counts = CollectionPreview {
                incoming: documents.len(),
                existing: existing_ids.len(),
                ..Default::default()
            };
            let mut seen = HashSet::new();
            let mut duplicates = 0;
            for document in documents {
                let Some(id) = document_id(document, spec.id_field) else {
                    counts.missing_ids += 1;
                    continue;
                };
                if !seen.insert(id.clone()) {
                    duplicates += 1;
                    continue;
                }
                if existing_ids.contains(&id) {
                    counts.would_update += 1;
                } else {
                    counts.would_insert += 1;
                }
            }

            if counts.missing_ids > 0 {
                warnings.push(format!(
                    "{} documents in {name} have no usable {} and will be skipped",
                    counts.missing_ids, spec.id_field
                ));
            }
            if duplicates > 0 {
                warnings.push(format!(
                    "{duplicates} duplicate ids in {name}; the last occurrence wins"
                ));
            }
            collection_counts.insert(name.clone(), counts);
        }

        Ok(RestorePreview {
            meta: doc.meta.clone(),
            collection_counts,
            warnings,
            restore_enabled: self.enabled,
        })
    }

    pub fn apply_restore(&self, doc: &SnapshotDocument) -> Result<RestoreReport> {
        self.ensure_enabled()?;
        check_format(&doc.meta)?;

        if doc.meta.schema_version != self.registry.version() {
            warn!(
                archive_schema = doc.meta.schema_version,
                current_schema = self.registry.version(),
                "Restoring archive from a different schema version"
            );
        }

        let mut collections = BTreeMap::new();
        for (name, documents) in &doc.collections {
            let mut report = CollectionReport::default();

            let Some(spec) = self.registry.get(name) else {
                report.skipped_count = documents.len();
                report.errors.push(format!("Unknown collection {name}"));
                warn!(collection = %name, "Skipping unknown collection");
                collections.insert(name.clone(), report);
                continue;
            };

            // Array order: a later document with the same id overwrites an earlier one.
            for (index, document) in documents.iter().enumerate() {
                let Some(id) = document_id(document, spec.id_field) else {
                    report.fail(format!("Document {index} has no usable {}", spec.id_field));
                    continue;
                };

                let existing = match self.store.get(name, &id) {
                    Ok(existing) => existing,
                    Err(e) => {
                        report.fail(format!("{id}: {e:#}"));
                        continue;
                    }
                };
                let mut document = document.clone();
                if let (false, Some(existing)) = (doc.meta.include_sensitive, &existing) {
                    self.registry.carry_over_redacted(spec, existing, &mut document);
                }

                match self.store.upsert(name, &id, document) {
                    Ok(()) => {
                        report.inserted_count += 1;
                        if existing.is_some() {
                            report.updated_count += 1;
                        }
                    }
                    Err(e) => report.fail(format!("{id}: {e:#}")),
                }
            }

            if report.skipped_count > 0 {
                warn!(
                    collection = %name,
                    skipped = report.skipped_count,
                    "Collection restored with errors"
                );
            }
            collections.insert(name.clone(), report);
        }

        let report = RestoreReport {
            meta: doc.meta.clone(),
            collections,
        };
        info!(
            inserted = report.total_inserted(),
            skipped = report.total_skipped(),
            "Restore applied"
        );
        Ok(report)
    }
}

fn check_format(meta: &SnapshotMeta) -> Result<()> {
    if meta.format_version == 0 || meta.format_version > FORMAT_VERSION {
        return Err(EngineError::MalformedBackup(format!(
            "unsupported format version {}",
            meta.format_version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotEngine;
    use crate::store::{Document, MemoryStore};
    use serde_json::{json, Value};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn enabled() -> RestoreConfig {
        RestoreConfig { enabled: true }
    }

    fn snapshot(include_sensitive: bool, collections: Value) -> SnapshotDocument {
        SnapshotDocument::from_value(json!({
            "meta": {
                "formatVersion": 1,
                "schemaVersion": crate::schema::SCHEMA_VERSION,
                "createdAt": "2026-10-01T00:00:00Z",
                "includeSensitive": include_sensitive
            },
            "collections": collections
        }))
        .unwrap()
    }

    fn sample() -> SnapshotDocument {
        snapshot(
            true,
            json!({
                "teams": [{"_id": "t1", "name": "Falcons"}, {"_id": "t2", "name": "Hawks"}],
                "athletes": [{"_id": 7, "name": "Sam", "team": "t1"}]
            }),
        )
    }

    #[test]
    fn test_apply_refused_when_disabled() {
        let store = Arc::new(MemoryStore::new());
        store.upsert("teams", "t9", doc(json!({"_id": "t9"}))).unwrap();
        let engine = RestoreEngine::new(store.clone(), Registry::default(), &RestoreConfig::default());

        assert!(matches!(engine.apply_restore(&sample()), Err(EngineError::RestoreDisabled)));
        assert_eq!(store.count("teams").unwrap(), 1);
        assert_eq!(store.count("athletes").unwrap(), 0);
    }

    #[test]
    fn test_preview_allowed_when_disabled_and_read_only() {
        let store = Arc::new(MemoryStore::new());
        store.upsert("teams", "t1", doc(json!({"_id": "t1", "name": "Old"}))).unwrap();
        let before = store.dump();
        let engine = RestoreEngine::new(store.clone(), Registry::default(), &RestoreConfig::default());

        let preview = engine.preview_restore(&sample()).unwrap();
        assert!(!preview.restore_enabled);
        assert_eq!(
            preview.collection_counts["teams"],
            CollectionPreview {
                incoming: 2,
                existing: 1,
                would_insert: 1,
                would_update: 1,
                missing_ids: 0
            }
        );
        assert_eq!(preview.collection_counts["athletes"].would_insert, 1);
        assert_eq!(store.dump(), before);
    }

    #[test]
    fn test_preview_warnings() {
        let store = Arc::new(MemoryStore::new());
        let engine = RestoreEngine::new(store, Registry::default(), &enabled());
        let mut doc = snapshot(
            false,
            json!({
                "teams": [{"_id": "t1"}, {"_id": "t1"}, {"name": "no id"}],
                "legacy_stuff": [{"_id": "x"}]
            }),
        );
        doc.meta.schema_version = 1;

        let preview = engine.preview_restore(&doc).unwrap();
        let joined = preview.warnings.join("\n");
        assert!(joined.contains("schema version 1"));
        assert!(joined.contains("without sensitive fields"));
        assert!(joined.contains("Unknown collection legacy_stuff"));
        assert!(joined.contains("no usable _id"));
        assert!(joined.contains("duplicate ids in teams"));
        assert_eq!(preview.collection_counts["teams"].missing_ids, 1);
        assert_eq!(preview.collection_counts["teams"].would_insert, 1);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let engine = RestoreEngine::new(store.clone(), Registry::default(), &enabled());

        let first = engine.apply_restore(&sample()).unwrap();
        assert_eq!(first.total_inserted(), 3);
        assert_eq!(first.collections["teams"].updated_count, 0);
        let after_first = store.dump();

        let second = engine.apply_restore(&sample()).unwrap();
        assert_eq!(second.collections["teams"].inserted_count, 2);
        assert_eq!(second.collections["teams"].updated_count, 2);
        assert_eq!(second.collections["athletes"].updated_count, 1);
        assert_eq!(store.dump(), after_first);
        assert_eq!(store.count("teams").unwrap(), 2);
        assert_eq!(store.get("athletes", "7").unwrap().unwrap()["name"], "Sam");
    }

    #[test]
    fn test_last_write_wins_within_collection() {
        let store = Arc::new(MemoryStore::new());
        let engine = RestoreEngine::new(store.clone(), Registry::default(), &enabled());
        let doc = snapshot(
            true,
            json!({"teams": [{"_id": "t1", "name": "First"}, {"_id": "t1", "name": "Second"}]}),
        );

        engine.apply_restore(&doc).unwrap();
        assert_eq!(store.count("teams").unwrap(), 1);
        assert_eq!(store.get("teams", "t1").unwrap().unwrap()["name"], "Second");
    }

    #[test]
    fn test_missing_ids_and_unknown_collections_are_reported() {
        let store = Arc::new(MemoryStore::new());
        let engine = RestoreEngine::new(store.clone(), Registry::default(), &enabled());
        let doc = snapshot(
            true,
            json!({
                "teams": [{"_id": "t1"}, {"name": "orphan"}],
                "mystery": [{"_id": "m1"}, {"_id": "m2"}]
            }),
        );

        let report = engine.apply_restore(&doc).unwrap();
        assert_eq!(report.collections["teams"].inserted_count, 1);
        assert_eq!(report.collections["teams"].skipped_count, 1);
        assert_eq!(report.collections["mystery"].skipped_count, 2);
        assert!(report.collections["mystery"].errors[0].contains("Unknown collection"));
        assert!(store.list("mystery").unwrap().is_empty());
        assert!(report.has_errors());
    }

    /// Fails every write to one collection.
    struct BrokenCollection {
        inner: MemoryStore,
        broken: &'static str,
    }

    impl DocumentStore for BrokenCollection {
        fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
            self.inner.list(collection)
        }

        fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
            self.inner.get(collection, id)
        }

        fn upsert(&self, collection: &str, id: &str, document: Document) -> anyhow::Result<()> {
            if collection == self.broken {
                anyhow::bail!("disk full");
            }
            self.inner.upsert(collection, id, document)
        }
    }

    #[test]
    fn test_collection_failure_does_not_abort_others() {
        let store = Arc::new(BrokenCollection {
            inner: MemoryStore::new(),
            broken: "athletes",
        });
        let engine = RestoreEngine::new(store.clone(), Registry::default(), &enabled());

        let report = engine.apply_restore(&sample()).unwrap();
        let athletes = &report.collections["athletes"];
        assert_eq!(athletes.inserted_count, 0);
        assert_eq!(athletes.skipped_count, 1);
        assert!(athletes.errors[0].contains("disk full"));
        assert_eq!(report.collections["teams"].inserted_count, 2);
        assert_eq!(store.count("teams").unwrap(), 2);
    }

    #[test]
    fn test_redacted_restore_keeps_existing_credentials() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(
                "users",
                "u1",
                doc(json!({
                    "_id": "u1",
                    "email": "old@example.com",
                    "passwordHash": "h1",
                    "devices": [{"name": "phone", "refreshToken": "r1"}],
                    "profile": {"settings": {"apiKey": "k1"}}
                })),
            )
            .unwrap();

        let snapshots = SnapshotEngine::new(store.clone(), Registry::default());
        let redacted = snapshots.create_snapshot(false).unwrap();
        assert!(!redacted.collections["users"][0].contains_key("passwordHash"));
        assert!(!redacted.collections["users"][0]["devices"][0]
            .as_object()
            .unwrap()
            .contains_key("refreshToken"));

        let engine = RestoreEngine::new(store.clone(), Registry::default(), &enabled());
        engine.apply_restore(&redacted).unwrap();
        engine.apply_restore(&redacted).unwrap();

        let user = store.get("users", "u1").unwrap().unwrap();
        assert_eq!(user["passwordHash"], "h1");
        assert_eq!(user["devices"][0]["refreshToken"], "r1");
        assert_eq!(user["profile"]["settings"]["apiKey"], "k1");
        assert_eq!(user["email"], "old@example.com");
    }

    #[test]
    fn test_future_format_rejected() {
        let store = Arc::new(MemoryStore::new());
        let engine = RestoreEngine::new(store, Registry::default(), &enabled());
        let mut doc = sample();
        doc.meta.format_version = FORMAT_VERSION + 1;
        assert!(matches!(engine.preview_restore(&doc), Err(EngineError::MalformedBackup(_))));
        assert!(matches!(engine.apply_restore(&doc), Err(EngineError::MalformedBackup(_))));
    }
}
