//! SQLite-backed vector store implementation.
//!
//! Embeddings are stored as little-endian f32 BLOBs and cosine similarity
//! is computed in Rust. For larger corpora a dedicated ANN backend can be
//! swapped in behind the `VectorStore` trait.

use super::{cosine_similarity, DenseHit, VectorRecord, VectorStore};
use crate::error::{KlippError, Result};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};

/// Persistent vector store under the data directory.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Open (or create) the store at the given path.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        info!("Vector store ready at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                chunk_id  TEXT PRIMARY KEY,
                video_id  TEXT NOT NULL,
                start_sec REAL NOT NULL,
                end_sec   REAL NOT NULL,
                text      TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_video ON chunks(video_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KlippError::VectorStore(format!("Failed to acquire lock: {}", e)))
    }

    /// Serialize embedding to bytes.
    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Deserialize embedding from bytes.
    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }

    fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<VectorRecord> {
        let embedding_bytes: Vec<u8> = row.get(5)?;
        Ok(VectorRecord {
            chunk_id: row.get(0)?,
            video_id: row.get(1)?,
            start_sec: row.get(2)?,
            end_sec: row.get(3)?,
            text: row.get(4)?,
            embedding: Self::bytes_to_embedding(&embedding_bytes),
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn upsert_batch(&self, records: &[VectorRecord]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        for record in records {
            let embedding_bytes = Self::embedding_to_bytes(&record.embedding);
            tx.execute(
                "INSERT OR REPLACE INTO chunks (chunk_id, video_id, start_sec, end_sec, text, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.chunk_id,
                    record.video_id,
                    record.start_sec,
                    record.end_sec,
                    record.text,
                    embedding_bytes,
                ],
            )?;
        }

        tx.commit()?;
        debug!("Upserted {} chunk vectors", records.len());
        Ok(records.len())
    }

    #[instrument(skip(self, embedding, video_ids))]
    async fn query(
        &self,
        embedding: &[f32],
        limit: usize,
        video_ids: Option<&[String]>,
    ) -> Result<Vec<DenseHit>> {
        let conn = self.lock()?;

        let mut results: Vec<DenseHit> = {
            let scan = |stmt: &mut rusqlite::Statement<'_>,
                        p: &[&dyn rusqlite::ToSql]|
             -> Result<Vec<DenseHit>> {
                let rows = stmt.query_map(p, Self::map_record)?;
                let mut hits = Vec::new();
                for row in rows {
                    let record = row?;
                    let score = cosine_similarity(embedding, &record.embedding);
                    hits.push(DenseHit {
                        chunk_id: record.chunk_id,
                        video_id: record.video_id,
                        start_sec: record.start_sec,
                        end_sec: record.end_sec,
                        text: record.text,
                        score,
                    });
                }
                Ok(hits)
            };

            match video_ids {
                Some(ids) if !ids.is_empty() => {
                    let placeholders = vec!["?"; ids.len()].join(",");
                    let sql = format!(
                        "SELECT chunk_id, video_id, start_sec, end_sec, text, embedding
                         FROM chunks WHERE video_id IN ({})",
                        placeholders
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let p: Vec<&dyn rusqlite::ToSql> =
                        ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
                    scan(&mut stmt, &p)?
                }
                _ => {
                    let mut stmt = conn.prepare(
                        "SELECT chunk_id, video_id, start_sec, end_sec, text, embedding FROM chunks",
                    )?;
                    scan(&mut stmt, &[])?
                }
            }
        };

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(limit);

        debug!("Dense query returned {} hits", results.len());
        Ok(results)
    }

    async fn get(&self, chunk_ids: &[String]) -> Result<Vec<VectorRecord>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let placeholders = vec!["?"; chunk_ids.len()].join(",");
        let sql = format!(
            "SELECT chunk_id, video_id, start_sec, end_sec, text, embedding
             FROM chunks WHERE chunk_id IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk_ids.iter()), Self::map_record)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn delete_by_video(&self, video_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM chunks WHERE video_id = ?1", params![video_id])?;
        if deleted > 0 {
            info!("Deleted {} chunk vectors for {}", deleted, video_id);
        }
        Ok(deleted)
    }

    async fn chunk_ids_for_video(&self, video_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT chunk_id FROM chunks WHERE video_id = ?1")?;
        let rows = stmt.query_map(params![video_id], |row| row.get(0))?;
        let mut out: Vec<String> = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.sort();
        Ok(out)
    }

    async fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chunk_id: &str, video_id: &str, start: f64, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            chunk_id: chunk_id.to_string(),
            video_id: video_id.to_string(),
            start_sec: start,
            end_sec: start + 10.0,
            text: "a passage that is long enough to pass the stub filter".to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_upsert_query_delete() {
        let store = SqliteVectorStore::in_memory().unwrap();

        store
            .upsert_batch(&[
                record("v1-sem-0", "v1", 0.0, vec![1.0, 0.0, 0.0]),
                record("v1-sem-1", "v1", 10.0, vec![0.0, 1.0, 0.0]),
                record("v2-sem-0", "v2", 0.0, vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!((hits[0].score - 1.0).abs() < 0.001);

        let filtered = store
            .query(&[1.0, 0.0, 0.0], 10, Some(&["v2".to_string()]))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].video_id, "v2");

        let deleted = store.delete_by_video("v1").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_by_chunk_ids() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert_batch(&[record("v1-sem-0", "v1", 0.0, vec![1.0, 0.0])])
            .await
            .unwrap();

        let records = store
            .get(&["v1-sem-0".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chunk_id, "v1-sem-0");
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store
            .upsert_batch(&[record("v1-sem-0", "v1", 0.0, vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert_batch(&[record("v1-sem-0", "v1", 5.0, vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let records = store.get(&["v1-sem-0".to_string()]).await.unwrap();
        assert_eq!(records[0].start_sec, 5.0);
    }
}
