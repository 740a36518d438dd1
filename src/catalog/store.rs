//! SQLite-backed catalog implementation.

use super::{ClipRecord, DeleteStats, FtsHit, RawSegment, VideoRecord, VideoStatus, Word};
use crate::error::{KlippError, Result};
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// SQLite catalog store.
///
/// One connection guarded by a mutex; WAL mode with a 5 s busy timeout so
/// concurrent pipeline workers and request handlers do not trip over each
/// other.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open (or create) the catalog at the given path.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        info!("Catalog ready at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory catalog (useful for testing).
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
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                video_id   TEXT PRIMARY KEY,
                title      TEXT NOT NULL,
                local_path TEXT,
                status     TEXT DEFAULT 'added',
                created_at TEXT DEFAULT (datetime('now'))
            );
            CREATE TABLE IF NOT EXISTS segments (
                segment_id TEXT PRIMARY KEY,
                video_id   TEXT NOT NULL,
                start_sec  REAL NOT NULL,
                end_sec    REAL NOT NULL,
                text       TEXT NOT NULL,
                words_json TEXT,
                FOREIGN KEY (video_id) REFERENCES videos(video_id)
            );
            CREATE TABLE IF NOT EXISTS clips (
                clip_id    TEXT PRIMARY KEY,
                video_id   TEXT NOT NULL,
                start_sec  REAL NOT NULL,
                end_sec    REAL NOT NULL,
                path       TEXT NOT NULL,
                created_at TEXT DEFAULT (datetime('now')),
                FOREIGN KEY (video_id) REFERENCES videos(video_id)
            );
            "#,
        )?;

        Self::migrate(conn)?;
        Self::create_indexes(conn)?;
        Self::create_fts(conn)?;
        Ok(())
    }

    /// Lightweight migrations: add columns when absent.
    fn migrate(conn: &Connection) -> Result<()> {
        let mut existing = std::collections::HashSet::new();
        {
            let mut stmt = conn.prepare("PRAGMA table_info(videos)")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let name: String = row.get(1)?;
                existing.insert(name);
            }
        }

        let migrations = [
            ("channel_name", "ALTER TABLE videos ADD COLUMN channel_name TEXT"),
            ("duration", "ALTER TABLE videos ADD COLUMN duration INTEGER"),
            ("thumbnail_url", "ALTER TABLE videos ADD COLUMN thumbnail_url TEXT"),
            ("uploaded_at", "ALTER TABLE videos ADD COLUMN uploaded_at TEXT"),
            ("source_url", "ALTER TABLE videos ADD COLUMN source_url TEXT"),
        ];
        for (col, sql) in migrations {
            if !existing.contains(col) {
                conn.execute(sql, [])?;
                info!("Added column videos.{}", col);
            }
        }
        Ok(())
    }

    fn create_indexes(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_seg_video ON segments(video_id);
            CREATE INDEX IF NOT EXISTS idx_seg_start ON segments(start_sec);
            CREATE INDEX IF NOT EXISTS idx_clip_video ON clips(video_id);
            CREATE INDEX IF NOT EXISTS idx_video_status ON videos(status);
            CREATE INDEX IF NOT EXISTS idx_video_created ON videos(created_at DESC);
            "#,
        )?;
        Ok(())
    }

    /// FTS5 table over chunk bodies. Must store text — a contentless table
    /// returns empty rows on SELECT, which breaks the lexical side entirely.
    fn create_fts(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS segments_fts USING fts5(
                segment_id UNINDEXED,
                video_id UNINDEXED,
                text,
                tokenize='unicode61'
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| KlippError::Catalog(format!("Failed to acquire lock: {}", e)))
    }

    // ── Videos ──────────────────────────────────────────────

    /// Register a video. Returns false if the id already exists.
    #[instrument(skip(self))]
    pub fn insert_video(&self, video_id: &str, title: &str, local_path: Option<&str>) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO videos (video_id, title, local_path, status) VALUES (?1, ?2, ?3, 'added')",
            params![video_id, title, local_path],
        )?;
        Ok(changed > 0)
    }

    /// Update source metadata on a video (used after a remote download).
    pub fn update_video_metadata(
        &self,
        video_id: &str,
        channel_name: Option<&str>,
        source_url: Option<&str>,
        duration: Option<i64>,
        thumbnail_url: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE videos SET
                channel_name = COALESCE(?2, channel_name),
                source_url = COALESCE(?3, source_url),
                duration = COALESCE(?4, duration),
                thumbnail_url = COALESCE(?5, thumbnail_url)
             WHERE video_id = ?1",
            params![video_id, channel_name, source_url, duration, thumbnail_url],
        )?;
        Ok(())
    }

    pub fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT v.video_id, v.title, v.local_path, v.status, v.created_at,
                    v.channel_name, v.duration, v.thumbnail_url, v.uploaded_at, v.source_url,
                    (SELECT COUNT(*) FROM segments s WHERE s.video_id = v.video_id)
             FROM videos v WHERE v.video_id = ?1",
        )?;

        let video = stmt.query_row(params![video_id], Self::map_video_row);
        match video {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all videos, newest first, with segment counts.
    pub fn list_videos(&self) -> Result<Vec<VideoRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT v.video_id, v.title, v.local_path, v.status, v.created_at,
                    v.channel_name, v.duration, v.thumbnail_url, v.uploaded_at, v.source_url,
                    COALESCE(seg.cnt, 0)
             FROM videos v
             LEFT JOIN (SELECT video_id, COUNT(*) AS cnt FROM segments GROUP BY video_id) seg
               ON v.video_id = seg.video_id
             ORDER BY v.created_at DESC, v.video_id",
        )?;

        let rows = stmt.query_map([], Self::map_video_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Videos with no stored segments, candidates for the pipeline.
    pub fn pending_videos(&self) -> Result<Vec<VideoRecord>> {
        Ok(self
            .list_videos()?
            .into_iter()
            .filter(|v| v.segment_count == 0)
            .collect())
    }

    pub fn set_status(&self, video_id: &str, status: VideoStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE videos SET status = ?2 WHERE video_id = ?1",
            params![video_id, status.as_str()],
        )?;
        debug!("Video {} -> {}", video_id, status.as_str());
        Ok(())
    }

    /// Delete a video and everything hanging off it: segments, clips, and
    /// its full-text rows. Vector rows are the vector store's concern.
    #[instrument(skip(self))]
    pub fn delete_video(&self, video_id: &str) -> Result<DeleteStats> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let segments = tx.execute("DELETE FROM segments WHERE video_id = ?1", params![video_id])?;
        let clips = tx.execute("DELETE FROM clips WHERE video_id = ?1", params![video_id])?;
        tx.execute("DELETE FROM segments_fts WHERE video_id = ?1", params![video_id])?;
        tx.execute("DELETE FROM videos WHERE video_id = ?1", params![video_id])?;
        tx.commit()?;

        info!("Deleted video {} ({} segments, {} clips)", video_id, segments, clips);
        Ok(DeleteStats { segments, clips })
    }

    /// Map video ids back from channel names (the `filter_tags` search path).
    pub fn video_ids_for_channels(&self, channels: &[String]) -> Result<Vec<String>> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; channels.len()].join(",");
        let sql = format!(
            "SELECT video_id FROM videos WHERE channel_name IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(channels.iter()), |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ── Segments ────────────────────────────────────────────

    pub fn segment_count(&self, video_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM segments WHERE video_id = ?1",
            params![video_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Write a full set of raw segments and advance the video to
    /// `transcribed`, all in one transaction. Never leaves a half-written
    /// transcript behind.
    #[instrument(skip(self, segments), fields(count = segments.len()))]
    pub fn insert_segments(&self, video_id: &str, segments: &[RawSegment]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        for seg in segments {
            let words_json = match &seg.words {
                Some(words) if !words.is_empty() => Some(serde_json::to_string(words)?),
                _ => None,
            };
            tx.execute(
                "INSERT OR REPLACE INTO segments (segment_id, video_id, start_sec, end_sec, text, words_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![seg.segment_id, video_id, seg.start_sec, seg.end_sec, seg.text, words_json],
            )?;
        }
        tx.execute(
            "UPDATE videos SET status = 'transcribed' WHERE video_id = ?1",
            params![video_id],
        )?;
        tx.commit()?;

        info!("Stored {} segments for {}", segments.len(), video_id);
        Ok(segments.len())
    }

    /// All raw segments of a video in start order.
    pub fn segments_for(&self, video_id: &str) -> Result<Vec<RawSegment>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT segment_id, video_id, start_sec, end_sec, text, words_json
             FROM segments WHERE video_id = ?1 ORDER BY start_sec",
        )?;

        let rows = stmt.query_map(params![video_id], |row| {
            let words_json: Option<String> = row.get(5)?;
            Ok(RawSegment {
                segment_id: row.get(0)?,
                video_id: row.get(1)?,
                start_sec: row.get(2)?,
                end_sec: row.get(3)?,
                text: row.get(4)?,
                words: words_json.and_then(|j| serde_json::from_str::<Vec<Word>>(&j).ok()),
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_segments(&self, video_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM segments WHERE video_id = ?1", params![video_id])?;
        Ok(deleted)
    }

    // ── Clips ───────────────────────────────────────────────

    pub fn insert_clip(&self, clip: &ClipRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO clips (clip_id, video_id, start_sec, end_sec, path) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![clip.clip_id, clip.video_id, clip.start_sec, clip.end_sec, clip.path],
        )?;
        Ok(())
    }

    // ── Full-text index ─────────────────────────────────────

    /// Drop all FTS rows belonging to a video (the destructive half of a
    /// re-index).
    pub fn delete_fts_for_video(&self, video_id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM segments_fts WHERE video_id = ?1", params![video_id])?;
        Ok(())
    }

    /// Insert a batch of chunk rows into the full-text index.
    pub fn insert_fts_rows(&self, rows: &[(String, String, String)]) -> Result<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        for (chunk_id, video_id, text) in rows {
            tx.execute(
                "DELETE FROM segments_fts WHERE segment_id = ?1",
                params![chunk_id],
            )?;
            tx.execute(
                "INSERT INTO segments_fts (segment_id, video_id, text) VALUES (?1, ?2, ?3)",
                params![chunk_id, video_id, text],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// BM25 search over chunk bodies. Returns rows ordered best-first.
    pub fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT segment_id, video_id, text, bm25(segments_fts) AS rank
             FROM segments_fts WHERE segments_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok(FtsHit {
                chunk_id: row.get(0)?,
                video_id: row.get(1)?,
                text: row.get(2)?,
                rank: row.get(3)?,
            })
        });

        // A malformed MATCH expression is a query problem, not a server
        // fault; treat it as an empty result.
        let rows = match rows {
            Ok(r) => r,
            Err(e) => {
                warn!("FTS query failed: {}", e);
                return Ok(Vec::new());
            }
        };

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(hit) if !hit.chunk_id.is_empty() && !hit.text.is_empty() => out.push(hit),
                Ok(_) => {}
                Err(e) => {
                    warn!("FTS row error: {}", e);
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    /// All chunk ids currently present in the full-text index for a video.
    pub fn fts_chunk_ids(&self, video_id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT segment_id FROM segments_fts WHERE video_id = ?1",
        )?;
        let rows = stmt.query_map(params![video_id], |row| row.get(0))?;
        let mut out: Vec<String> = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.sort();
        Ok(out)
    }

    fn map_video_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VideoRecord> {
        let status: String = row.get(3)?;
        Ok(VideoRecord {
            video_id: row.get(0)?,
            title: row.get(1)?,
            local_path: row.get(2)?,
            status: VideoStatus::parse(&status),
            created_at: row.get(4)?,
            channel_name: row.get(5)?,
            duration: row.get(6)?,
            thumbnail_url: row.get(7)?,
            uploaded_at: row.get(8)?,
            source_url: row.get(9)?,
            segment_count: row.get(10)?,
        })
    }
}
