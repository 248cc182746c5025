//! SQLite-backed [`MetadataStore`].
//!
//! rusqlite is blocking, so every call runs on the blocking pool against a
//! single connection guarded by a mutex.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::{MetadataStore, blob_to_vec, vec_to_blob};
use crate::error::StoreError;
use crate::models::{Document, DocumentChunk, DocumentStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    content BLOB NOT NULL,
    checksum TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    generation INTEGER NOT NULL,
    live_generation INTEGER,
    chunk_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    generation INTEGER NOT NULL,
    sequence INTEGER NOT NULL,
    text TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    active INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id, active);
"#;

const DOCUMENT_COLUMNS: &str = "id, checksum, status, error, generation, live_generation, \
     chunk_count, created_at, updated_at";

const CHUNK_COLUMNS: &str = "id, document_id, generation, sequence, text, token_count, \
     start_offset, end_offset, embedding, active, created_at";

#[derive(Debug, Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::InvalidRecord(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // Every commit reaches disk before a save returns.
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock()))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRecord(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::InvalidRecord(format!("bad chunk id: {e}")))
}

/// Raw column values; conversion errors surface after the row callback.
struct DocumentRow {
    id: String,
    checksum: String,
    status: String,
    error: Option<String>,
    generation: i64,
    live_generation: Option<i64>,
    chunk_count: i64,
    created_at: String,
    updated_at: String,
}

impl DocumentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            checksum: row.get(1)?,
            status: row.get(2)?,
            error: row.get(3)?,
            generation: row.get(4)?,
            live_generation: row.get(5)?,
            chunk_count: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_document(self, content: Vec<u8>) -> Result<Document, StoreError> {
        Ok(Document {
            status: self
                .status
                .parse::<DocumentStatus>()
                .map_err(StoreError::InvalidRecord)?,
            id: self.id,
            content,
            checksum: self.checksum,
            error: self.error,
            generation: self.generation as u32,
            live_generation: self.live_generation.map(|g| g as u32),
            chunk_count: self.chunk_count as u32,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

struct ChunkRow {
    id: String,
    document_id: String,
    generation: i64,
    sequence: i64,
    text: String,
    token_count: i64,
    start_offset: i64,
    end_offset: i64,
    embedding: Vec<u8>,
    active: bool,
    created_at: String,
}

impl ChunkRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            generation: row.get(2)?,
            sequence: row.get(3)?,
            text: row.get(4)?,
            token_count: row.get(5)?,
            start_offset: row.get(6)?,
            end_offset: row.get(7)?,
            embedding: row.get(8)?,
            active: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_chunk(self) -> Result<DocumentChunk, StoreError> {
        Ok(DocumentChunk {
            id: parse_uuid(&self.id)?,
            document_id: self.document_id,
            generation: self.generation as u32,
            sequence: self.sequence as u32,
            text: self.text,
            token_count: self.token_count as u32,
            start_offset: self.start_offset as u64,
            end_offset: self.end_offset as u64,
            embedding: blob_to_vec(&self.embedding)?,
            active: self.active,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

fn query_chunks(
    conn: &Connection,
    filter: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<DocumentChunk>, StoreError> {
    let sql = format!(
        "SELECT {CHUNK_COLUMNS} FROM chunks WHERE {filter} \
         ORDER BY document_id, generation, sequence"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, ChunkRow::read)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ChunkRow::into_chunk).collect()
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        let doc = document.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO documents
                 (id, content, checksum, status, error, generation, live_generation,
                  chunk_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    doc.id,
                    doc.content,
                    doc.checksum,
                    doc.status.as_str(),
                    doc.error,
                    doc.generation,
                    doc.live_generation,
                    doc.chunk_count,
                    doc.created_at.to_rfc3339(),
                    doc.updated_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {DOCUMENT_COLUMNS}, content FROM documents WHERE id = ?1"),
                    params![id],
                    |row| Ok((DocumentRow::read(row)?, row.get::<_, Vec<u8>>(9)?)),
                )
                .optional()?;
            row.map(|(doc, content)| doc.into_document(content))
                .transpose()
        })
        .await
    }

    async fn mark_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            let updated = conn.execute(
                "UPDATE documents SET status = ?2, error = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, status.as_str(), error, Utc::now().to_rfc3339()],
            )?;
            if updated == 0 {
                return Err(StoreError::DocumentNotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([], DocumentRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|row| row.into_document(Vec::new()))
                .collect()
        })
        .await
    }

    async fn save_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), StoreError> {
        let chunks = chunks.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT OR REPLACE INTO chunks ({CHUNK_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ))?;
                for chunk in &chunks {
                    stmt.execute(params![
                        chunk.id.to_string(),
                        chunk.document_id,
                        chunk.generation,
                        chunk.sequence,
                        chunk.text,
                        chunk.token_count,
                        chunk.start_offset as i64,
                        chunk.end_offset as i64,
                        vec_to_blob(&chunk.embedding),
                        chunk.active,
                        chunk.created_at.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn load_chunks(&self, ids: &[Uuid]) -> Result<Vec<DocumentChunk>, StoreError> {
        let ids = ids.to_vec();
        self.call(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1"
            ))?;
            let mut chunks = Vec::with_capacity(ids.len());
            for id in ids {
                let row = stmt
                    .query_row(params![id.to_string()], ChunkRow::read)
                    .optional()?;
                if let Some(row) = row {
                    chunks.push(row.into_chunk()?);
                }
            }
            Ok(chunks)
        })
        .await
    }

    async fn list_active_chunks(
        &self,
        document_id: &str,
    ) -> Result<Vec<DocumentChunk>, StoreError> {
        let document_id = document_id.to_string();
        self.call(move |conn| {
            query_chunks(conn, "document_id = ?1 AND active = 1", params![document_id])
        })
        .await
    }

    async fn list_all_active_chunks(&self) -> Result<Vec<DocumentChunk>, StoreError> {
        self.call(|conn| query_chunks(conn, "active = 1", [])).await
    }

    async fn deactivate_chunks(
        &self,
        document_id: &str,
        generation: Option<u32>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let document_id = document_id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt = tx.prepare(
                    "UPDATE chunks SET active = 0
                     WHERE document_id = ?1 AND active = 1
                       AND (?2 IS NULL OR generation = ?2)
                     RETURNING id",
                )?;
                let rows = stmt
                    .query_map(params![document_id, generation], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.iter()
                    .map(|raw| parse_uuid(raw))
                    .collect::<Result<Vec<_>, _>>()?
            };
            tx.commit()?;
            Ok(ids)
        })
        .await
    }

    async fn purge_document(&self, id: &str) -> Result<Vec<Uuid>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt = tx.prepare("DELETE FROM chunks WHERE document_id = ?1 RETURNING id")?;
                let rows = stmt
                    .query_map(params![id], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.iter()
                    .map(|raw| parse_uuid(raw))
                    .collect::<Result<Vec<_>, _>>()?
            };
            tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(ids)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::services::store::tests::{chunk, exercise_store};

    #[tokio::test]
    async fn test_sqlite_store_contract() {
        exercise_store(Arc::new(SqliteMetadataStore::open_in_memory().unwrap())).await;
    }

    #[tokio::test]
    async fn test_file_store_syncs_every_commit() {
        let dir = TempDir::new().unwrap();
        let store = SqliteMetadataStore::open(&dir.path().join("docqa.db")).unwrap();
        let (journal, synchronous) = store
            .call(|conn| {
                let journal: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
                let synchronous: i64 = conn.query_row("PRAGMA synchronous", [], |r| r.get(0))?;
                Ok((journal, synchronous))
            })
            .await
            .unwrap();
        assert_eq!(journal, "wal");
        // 2 = FULL
        assert_eq!(synchronous, 2);
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("docqa.db");
        {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store
                .save_document(&Document::new("a", b"body".to_vec()))
                .await
                .unwrap();
            store.save_chunks(&[chunk("a", 1, 0)]).await.unwrap();
        }

        let store = SqliteMetadataStore::open(&path).unwrap();
        let doc = store.load_document("a").await.unwrap().unwrap();
        assert_eq!(doc.content, b"body");
        let chunks = store.list_active_chunks("a").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, DocumentChunk::generate_id("a", 1, 0));
    }

    #[tokio::test]
    async fn test_invalid_status_is_reported() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        store
            .save_document(&Document::new("a", Vec::new()))
            .await
            .unwrap();
        store
            .call(|conn| {
                conn.execute("UPDATE documents SET status = 'bogus'", [])?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(matches!(
            store.load_document("a").await,
            Err(StoreError::InvalidRecord(_))
        ));
    }
}
