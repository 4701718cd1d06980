use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};

use trellis_core::error::{GraphError, Result};

use crate::store::CheckpointStore;
use crate::types::{Checkpoint, CheckpointMetadata, TypedBlob};

const SELECT_COLUMNS: &str = "SELECT id, thread_id, namespace, parent_id, step, pending_nodes, barriers, metadata, created_at
     FROM checkpoints";

/// SQLite-backed checkpoint store for durable persistence.
///
/// Thread-safe via `Arc<Mutex<Connection>>`. All SQLite operations are
/// dispatched to a blocking thread via `tokio::task::spawn_blocking`.
/// Blobs live in their own table keyed by
/// `(thread_id, namespace, checkpoint_id, key)`.
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| GraphError::Checkpoint(format!("failed to open database: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GraphError::Checkpoint(format!("failed to open in-memory db: {e}")))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                parent_id TEXT,
                step INTEGER NOT NULL,
                pending_nodes TEXT NOT NULL,
                barriers TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (thread_id, namespace, id)
            );
            CREATE INDEX IF NOT EXISTS idx_checkpoints_level
                ON checkpoints(thread_id, namespace, step);
            CREATE TABLE IF NOT EXISTS checkpoint_blobs (
                thread_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                checkpoint_id TEXT NOT NULL,
                key TEXT NOT NULL,
                type_tag TEXT NOT NULL,
                bytes BLOB NOT NULL,
                PRIMARY KEY (thread_id, namespace, checkpoint_id, key)
            );",
        )
        .map_err(|e| GraphError::Checkpoint(format!("failed to create tables: {e}")))?;
        Ok(())
    }

    /// Run `f` against the connection on a blocking thread.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await
        .map_err(|e| GraphError::Checkpoint(format!("spawn_blocking: {e}")))?
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let step: i64 = row.get(4)?;
    let created_at: String = row.get(8)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let metadata: CheckpointMetadata = json_column(row, 7)?;

    Ok(Checkpoint {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        namespace: row.get(2)?,
        parent_id: row.get(3)?,
        step: step as usize,
        pending_nodes: json_column(row, 5)?,
        barriers: json_column(row, 6)?,
        blobs: BTreeMap::new(),
        metadata,
        created_at,
    })
}

fn load_blobs(conn: &Connection, checkpoint: &mut Checkpoint) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "SELECT key, type_tag, bytes FROM checkpoint_blobs
             WHERE thread_id = ?1 AND namespace = ?2 AND checkpoint_id = ?3",
        )
        .map_err(|e| GraphError::Checkpoint(format!("prepare: {e}")))?;
    let rows = stmt
        .query_map(
            params![checkpoint.thread_id, checkpoint.namespace, checkpoint.id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    TypedBlob {
                        type_tag: row.get(1)?,
                        bytes: row.get(2)?,
                    },
                ))
            },
        )
        .map_err(|e| GraphError::Checkpoint(format!("query blobs: {e}")))?;
    for row in rows {
        let (key, blob) = row.map_err(|e| GraphError::Checkpoint(format!("read blob: {e}")))?;
        checkpoint.blobs.insert(key, blob);
    }
    Ok(())
}

fn query_checkpoints(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Checkpoint>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| GraphError::Checkpoint(format!("prepare: {e}")))?;
    let rows = stmt
        .query_map(params, row_to_checkpoint)
        .map_err(|e| GraphError::Checkpoint(format!("query: {e}")))?;

    let mut checkpoints = Vec::new();
    for row in rows {
        let mut checkpoint =
            row.map_err(|e| GraphError::Checkpoint(format!("read row: {e}")))?;
        load_blobs(conn, &mut checkpoint)?;
        checkpoints.push(checkpoint);
    }
    Ok(checkpoints)
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        self.with_conn(move |conn| {
            let pending_nodes_json = serde_json::to_string(&checkpoint.pending_nodes)
                .map_err(|e| GraphError::Checkpoint(format!("serialize pending_nodes: {e}")))?;
            let barriers_json = serde_json::to_string(&checkpoint.barriers)
                .map_err(|e| GraphError::Checkpoint(format!("serialize barriers: {e}")))?;
            let metadata_json = serde_json::to_string(&checkpoint.metadata)
                .map_err(|e| GraphError::Checkpoint(format!("serialize metadata: {e}")))?;
            let created_at_str = checkpoint.created_at.to_rfc3339();

            let tx = conn
                .transaction()
                .map_err(|e| GraphError::Checkpoint(format!("begin: {e}")))?;
            // Delete then insert so an overwrite gets a fresh `seq` and counts
            // as the newest write.
            tx.execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1 AND namespace = ?2 AND id = ?3",
                params![checkpoint.thread_id, checkpoint.namespace, checkpoint.id],
            )
            .map_err(|e| GraphError::Checkpoint(format!("replace checkpoint: {e}")))?;
            tx.execute(
                "INSERT INTO checkpoints
                    (id, thread_id, namespace, parent_id, step, pending_nodes, barriers, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    checkpoint.id,
                    checkpoint.thread_id,
                    checkpoint.namespace,
                    checkpoint.parent_id,
                    checkpoint.step as i64,
                    pending_nodes_json,
                    barriers_json,
                    metadata_json,
                    created_at_str,
                ],
            )
            .map_err(|e| GraphError::Checkpoint(format!("insert checkpoint: {e}")))?;
            tx.execute(
                "DELETE FROM checkpoint_blobs
                 WHERE thread_id = ?1 AND namespace = ?2 AND checkpoint_id = ?3",
                params![checkpoint.thread_id, checkpoint.namespace, checkpoint.id],
            )
            .map_err(|e| GraphError::Checkpoint(format!("replace blobs: {e}")))?;
            for (key, blob) in &checkpoint.blobs {
                tx.execute(
                    "INSERT INTO checkpoint_blobs
                        (thread_id, namespace, checkpoint_id, key, type_tag, bytes)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        checkpoint.thread_id,
                        checkpoint.namespace,
                        checkpoint.id,
                        key,
                        blob.type_tag,
                        blob.bytes,
                    ],
                )
                .map_err(|e| GraphError::Checkpoint(format!("insert blob: {e}")))?;
            }
            tx.commit()
                .map_err(|e| GraphError::Checkpoint(format!("commit: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        thread_id: &str,
        namespace: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        let namespace = namespace.to_owned();
        let checkpoint_id = checkpoint_id.to_owned();
        self.with_conn(move |conn| {
            let sql = format!("{SELECT_COLUMNS} WHERE thread_id = ?1 AND namespace = ?2 AND id = ?3");
            let found = conn
                .query_row(&sql, params![thread_id, namespace, checkpoint_id], row_to_checkpoint)
                .optional()
                .map_err(|e| GraphError::Checkpoint(format!("query: {e}")))?;
            match found {
                Some(mut checkpoint) => {
                    load_blobs(conn, &mut checkpoint)?;
                    Ok(Some(checkpoint))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn get_latest(&self, thread_id: &str, namespace: &str) -> Result<Option<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        let namespace = namespace.to_owned();
        self.with_conn(move |conn| {
            let sql = format!(
                "{SELECT_COLUMNS} WHERE thread_id = ?1 AND namespace = ?2
                 ORDER BY step DESC, seq DESC LIMIT 1"
            );
            Ok(query_checkpoints(conn, &sql, params![thread_id, namespace])?
                .into_iter()
                .next())
        })
        .await
    }

    async fn list(&self, thread_id: &str, namespace: &str) -> Result<Vec<Checkpoint>> {
        let thread_id = thread_id.to_owned();
        let namespace = namespace.to_owned();
        self.with_conn(move |conn| {
            let sql = format!(
                "{SELECT_COLUMNS} WHERE thread_id = ?1 AND namespace = ?2
                 ORDER BY step ASC, seq ASC"
            );
            query_checkpoints(conn, &sql, params![thread_id, namespace])
        })
        .await
    }

    async fn has_thread(&self, thread_id: &str) -> Result<bool> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                    |row| row.get(0),
                )
                .map_err(|e| GraphError::Checkpoint(format!("query: {e}")))?;
            Ok(count > 0)
        })
        .await
    }

    async fn delete_namespace(&self, thread_id: &str, namespace: &str) -> Result<()> {
        let thread_id = thread_id.to_owned();
        let namespace = namespace.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM checkpoint_blobs WHERE thread_id = ?1 AND namespace = ?2",
                params![thread_id, namespace],
            )
            .map_err(|e| GraphError::Checkpoint(format!("delete blobs: {e}")))?;
            conn.execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1 AND namespace = ?2",
                params![thread_id, namespace],
            )
            .map_err(|e| GraphError::Checkpoint(format!("delete: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let thread_id = thread_id.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM checkpoint_blobs WHERE thread_id = ?1",
                params![thread_id],
            )
            .map_err(|e| GraphError::Checkpoint(format!("delete blobs: {e}")))?;
            let removed = conn
                .execute(
                    "DELETE FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                )
                .map_err(|e| GraphError::Checkpoint(format!("delete: {e}")))?;
            if removed > 0 {
                tracing::debug!(thread_id = %thread_id, removed, "deleted checkpoint thread");
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use serde_json::json;

    fn make_checkpoint(id: &str, thread_id: &str, namespace: &str, step: usize) -> Checkpoint {
        let mut cp = Checkpoint::new(thread_id, namespace, step)
            .with_parent((step > 0).then(|| format!("cp-{}", step - 1)))
            .with_pending_nodes(vec![format!("node_{step}")])
            .with_barriers(BTreeMap::from([("join".into(), vec!["a".into()])]))
            .with_source("loop", Some(format!("node_{step}")));
        cp.id = id.into();
        cp.put_blob(&JsonSerializer, "state", &json!({"count": step}))
            .unwrap();
        cp
    }

    #[tokio::test]
    async fn put_and_get_roundtrips_every_field() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        let cp = make_checkpoint("cp-0", "thread-1", "", 0);
        store.put(cp.clone()).await.unwrap();

        let retrieved = store.get("thread-1", "", "cp-0").await.unwrap().unwrap();
        assert_eq!(retrieved, cp);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        assert!(store.get("no-thread", "", "no-cp").await.unwrap().is_none());
        assert!(!store.has_thread("no-thread").await.unwrap());
    }

    #[tokio::test]
    async fn get_latest_per_namespace() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("cp-0", "t", "", 0)).await.unwrap();
        store.put(make_checkpoint("cp-1", "t", "", 1)).await.unwrap();
        store.put(make_checkpoint("loop-0", "t", "loop", 0)).await.unwrap();

        assert_eq!(store.get_latest("t", "").await.unwrap().unwrap().id, "cp-1");
        assert_eq!(store.get_latest("t", "loop").await.unwrap().unwrap().id, "loop-0");
    }

    #[tokio::test]
    async fn equal_steps_prefer_latest_write() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("a", "t", "", 2)).await.unwrap();
        store.put(make_checkpoint("b", "t", "", 2)).await.unwrap();
        assert_eq!(store.get_latest("t", "").await.unwrap().unwrap().id, "b");

        // Rewriting "a" makes it the newest again.
        store.put(make_checkpoint("a", "t", "", 2)).await.unwrap();
        assert_eq!(store.get_latest("t", "").await.unwrap().unwrap().id, "a");
        assert_eq!(store.list("t", "").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_namespace_and_thread() {
        let store = SqliteCheckpointStore::in_memory().unwrap();
        store.put(make_checkpoint("root", "t", "", 0)).await.unwrap();
        store.put(make_checkpoint("inner", "t", "loop", 0)).await.unwrap();

        store.delete_namespace("t", "loop").await.unwrap();
        assert!(store.list("t", "loop").await.unwrap().is_empty());
        assert!(store.has_thread("t").await.unwrap());

        store.delete_thread("t").await.unwrap();
        assert!(!store.has_thread("t").await.unwrap());
    }

    #[tokio::test]
    async fn file_based_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");

        {
            let store = SqliteCheckpointStore::new(&path).unwrap();
            store.put(make_checkpoint("cp-0", "t", "", 0)).await.unwrap();
        }

        let store = SqliteCheckpointStore::new(&path).unwrap();
        let cp = store.get_latest("t", "").await.unwrap().unwrap();
        assert_eq!(cp.id, "cp-0");
        let state: serde_json::Value = cp.blob(&JsonSerializer, "state").unwrap().unwrap();
        assert_eq!(state, json!({"count": 0}));
    }
}
