//! SQLite-backed document store: one row per `(collection, id)`, the
//! document kept as JSON text.

use crate::db::connection::DbPool;
use anyhow::Context;
use backup_engine::{Document, DocumentStore};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

pub struct SqliteDocumentStore {
    pool: DbPool,
}

impl SqliteDocumentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_body(collection: &str, id: &str, body: &str) -> anyhow::Result<Document> {
    match serde_json::from_str::<Value>(body)
        .with_context(|| format!("corrupt document {collection}/{id}"))?
    {
        Value::Object(document) => Ok(document),
        _ => anyhow::bail!("document {collection}/{id} is not a JSON object"),
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn list(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(id, body)| parse_body(collection, id, body))
            .collect()
    }

    fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let conn = self.pool.get()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|body| parse_body(collection, id, &body)).transpose()
    }

    fn upsert(&self, collection: &str, id: &str, document: Document) -> anyhow::Result<()> {
        let body = serde_json::to_string(&document)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body, updated_at = datetime('now')",
            params![collection, id, body],
        )?;
        Ok(())
    }

    fn count(&self, collection: &str) -> anyhow::Result<usize> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connection::create_pool, migrate::migrate};
    use backup_engine::config::RestoreConfig;
    use backup_engine::schema::Registry;
    use backup_engine::{RestoreEngine, SnapshotEngine};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> SqliteDocumentStore {
        let path = temp_dir.path().join("test.db");
        let pool = create_pool(&path.to_string_lossy()).unwrap();
        migrate(&pool).unwrap();
        SqliteDocumentStore::new(pool)
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_upsert_get_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = store(&temp_dir);

        store.upsert("teams", "t2", doc(json!({"_id": "t2", "name": "Hawks"}))).unwrap();
        store.upsert("teams", "t1", doc(json!({"_id": "t1", "name": "Falcons"}))).unwrap();
        store.upsert("teams", "t1", doc(json!({"_id": "t1", "name": "Falcons II"}))).unwrap();

        assert_eq!(store.count("teams").unwrap(), 2);
        assert_eq!(store.get("teams", "t1").unwrap().unwrap()["name"], "Falcons II");
        assert!(store.get("teams", "t3").unwrap().is_none());
        assert!(store.get("users", "t1").unwrap().is_none());

        let names: Vec<_> = store
            .list("teams")
            .unwrap()
            .into_iter()
            .map(|d| d["_id"].clone())
            .collect();
        assert_eq!(names, vec![json!("t1"), json!("t2")]);
    }

    #[test]
    fn test_snapshot_and_restore_through_sqlite() {
        let source_dir = TempDir::new().unwrap();
        let source = Arc::new(store(&source_dir));
        source
            .upsert("users", "u1", doc(json!({"_id": "u1", "passwordHash": "h"})))
            .unwrap();
        source.upsert("athletes", "7", doc(json!({"_id": 7, "name": "Sam"}))).unwrap();

        let snapshot = SnapshotEngine::new(source, Registry::default())
            .create_snapshot(true)
            .unwrap();

        let target_dir = TempDir::new().unwrap();
        let target = Arc::new(store(&target_dir));
        let engine = RestoreEngine::new(target.clone(), Registry::default(), &RestoreConfig { enabled: true });
        engine.apply_restore(&snapshot).unwrap();
        engine.apply_restore(&snapshot).unwrap();

        assert_eq!(target.count("users").unwrap(), 1);
        assert_eq!(target.get("athletes", "7").unwrap().unwrap()["name"], "Sam");
    }
}
