//! Note store using SQLite
//!
//! Embeddings are stored as BLOBs and similarity is computed in Rust.
//! Full-text search uses an FTS5 table kept in sync on every write.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{DocumentStore, IndexStats, NoteFilter, ScoredNote};
use crate::core::error::{Error, Result};
use crate::core::note::{normalize_text, Note, NoteId, OwnerId};
use crate::search::embedding::cosine_similarity;

const NOTE_COLUMNS: &str = "n.id, n.owner_id, n.title, n.body, n.tags, n.is_deleted, \
     n.deleted_at, n.created_at, n.updated_at, n.version, e.embedding";

/// Optional capabilities of a store deployment.
#[derive(Debug, Clone, Copy)]
pub struct StoreCapabilities {
    pub vector_search: bool,
    pub text_search: bool,
}

impl Default for StoreCapabilities {
    fn default() -> Self {
        Self {
            vector_search: true,
            text_search: true,
        }
    }
}

/// SQLite-backed [`DocumentStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
    dimension: usize,
    capabilities: StoreCapabilities,
}

impl SqliteStore {
    /// Open or create database at path
    pub fn open(db_path: &Path, dimension: usize) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn, dimension)
    }

    /// Open in-memory database (for testing)
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimension)
    }

    fn init(conn: Connection, dimension: usize) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            dimension,
            capabilities: StoreCapabilities::default(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn with_capabilities(mut self, capabilities: StoreCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn capabilities(&self) -> StoreCapabilities {
        self.capabilities
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("store connection lock poisoned".into()))
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                tags TEXT NOT NULL,  -- JSON array
                is_deleted INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS embeddings (
                note_id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE
            );

            -- Outbound links, replaced wholesale on every save
            CREATE TABLE IF NOT EXISTS note_links (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                PRIMARY KEY (source_id, target_id),
                FOREIGN KEY (source_id) REFERENCES notes(id) ON DELETE CASCADE
            );

            -- Backlinks, patched asynchronously
            CREATE TABLE IF NOT EXISTS note_backlinks (
                note_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                PRIMARY KEY (note_id, source_id),
                FOREIGN KEY (note_id) REFERENCES notes(id) ON DELETE CASCADE
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
                note_id UNINDEXED,
                title,
                body
            );

            CREATE TABLE IF NOT EXISTS index_meta (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_notes_owner ON notes(owner_id, is_deleted, updated_at);
            CREATE INDEX IF NOT EXISTS idx_notes_title ON notes(owner_id, title);
            CREATE INDEX IF NOT EXISTS idx_links_target ON note_links(target_id);
            CREATE INDEX IF NOT EXISTS idx_backlinks_source ON note_backlinks(source_id);
            "#,
        )?;

        Ok(())
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if !embedding.is_empty() && embedding.len() != self.dimension {
            return Err(Error::InvalidEmbedding {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    fn write_fts(conn: &Connection, note: &Note) -> Result<()> {
        let id = note.id.to_string();
        conn.execute("DELETE FROM notes_fts WHERE note_id = ?1", params![id])?;
        conn.execute(
            "INSERT INTO notes_fts (note_id, title, body) VALUES (?1, ?2, ?3)",
            params![id, note.title, normalize_text(&note.body)],
        )?;
        Ok(())
    }

    fn query_notes(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Note>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, note_from_row)?;

        let mut notes = Vec::new();
        for row in rows {
            let mut note = row?;
            load_relations(conn, &mut note)?;
            notes.push(note);
        }
        Ok(notes)
    }
}

impl DocumentStore for SqliteStore {
    fn insert_note(&self, note: &Note) -> Result<()> {
        self.check_dimension(&note.embedding)?;
        let tags_json = serde_json::to_string(&note.tags)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO notes (id, owner_id, title, body, tags, is_deleted, deleted_at,
                               created_at, updated_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                note.id.to_string(),
                note.owner_id.to_string(),
                note.title,
                note.body,
                tags_json,
                note.is_deleted,
                note.deleted_at.map(|d| d.timestamp_millis()),
                note.created_at.timestamp_millis(),
                note.updated_at.timestamp_millis(),
                note.version as i64,
            ],
        )?;
        if note.has_embedding() {
            tx.execute(
                "INSERT INTO embeddings (note_id, embedding) VALUES (?1, ?2)",
                params![note.id.to_string(), embedding_to_blob(&note.embedding)],
            )?;
        }
        Self::write_fts(&tx, note)?;
        tx.commit()?;

        trace!(note_id = %note.id, "Inserted note");
        Ok(())
    }

    fn update_note(&self, note: &Note) -> Result<()> {
        let tags_json = serde_json::to_string(&note.tags)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            r#"
            UPDATE notes SET
                title = ?2,
                body = ?3,
                tags = ?4,
                is_deleted = ?5,
                deleted_at = ?6,
                updated_at = ?7,
                version = ?8
            WHERE id = ?1 AND owner_id = ?9
            "#,
            params![
                note.id.to_string(),
                note.title,
                note.body,
                tags_json,
                note.is_deleted,
                note.deleted_at.map(|d| d.timestamp_millis()),
                note.updated_at.timestamp_millis(),
                note.version as i64,
                note.owner_id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(Error::NoteNotFound(note.id));
        }
        Self::write_fts(&tx, note)?;
        tx.commit()?;
        Ok(())
    }

    fn get_note(&self, owner: &OwnerId, id: NoteId) -> Result<Option<Note>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notes n LEFT JOIN embeddings e ON e.note_id = n.id \
             WHERE n.id = ?1 AND n.owner_id = ?2",
            NOTE_COLUMNS
        );
        let note = conn
            .query_row(&sql, params![id.to_string(), owner.to_string()], note_from_row)
            .optional()?;
        match note {
            Some(mut note) => {
                load_relations(&conn, &mut note)?;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    fn get_note_by_id(&self, id: NoteId) -> Result<Option<Note>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notes n LEFT JOIN embeddings e ON e.note_id = n.id WHERE n.id = ?1",
            NOTE_COLUMNS
        );
        let note = conn
            .query_row(&sql, params![id.to_string()], note_from_row)
            .optional()?;
        match note {
            Some(mut note) => {
                load_relations(&conn, &mut note)?;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    fn find_by_owner(&self, owner: &OwnerId, filter: &NoteFilter) -> Result<Vec<Note>> {
        let conn = self.conn()?;
        let deleted_clause = if filter.only_deleted {
            "AND n.is_deleted = 1"
        } else if filter.include_deleted {
            ""
        } else {
            "AND n.is_deleted = 0"
        };
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT {} FROM notes n LEFT JOIN embeddings e ON e.note_id = n.id \
             WHERE n.owner_id = ?1 {} \
             ORDER BY n.updated_at DESC, n.id ASC LIMIT ?2",
            NOTE_COLUMNS, deleted_clause
        );
        Self::query_notes(&conn, &sql, params![owner.to_string(), limit])
    }

    fn find_by_titles(&self, owner: &OwnerId, titles: &[String]) -> Result<Vec<Note>> {
        if titles.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notes n LEFT JOIN embeddings e ON e.note_id = n.id \
             WHERE n.owner_id = ?1 AND n.is_deleted = 0 AND n.title = ?2 \
             ORDER BY n.updated_at DESC, n.id ASC",
            NOTE_COLUMNS
        );
        let owner = owner.to_string();
        let mut notes = Vec::new();
        for title in titles {
            notes.extend(Self::query_notes(&conn, &sql, params![owner, title])?);
        }
        notes.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        notes.dedup_by(|a, b| a.id == b.id);
        Ok(notes)
    }

    fn set_outbound_links(&self, id: NoteId, links: &BTreeSet<NoteId>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let source = id.to_string();
        tx.execute("DELETE FROM note_links WHERE source_id = ?1", params![source])?;
        for target in links {
            tx.execute(
                "INSERT OR IGNORE INTO note_links (source_id, target_id) VALUES (?1, ?2)",
                params![source, target.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn add_backlink(&self, owner: &OwnerId, target: NoteId, source: NoteId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            INSERT OR IGNORE INTO note_backlinks (note_id, source_id)
            SELECT ?1, ?2
            WHERE EXISTS (SELECT 1 FROM notes WHERE id = ?1 AND owner_id = ?3)
              AND EXISTS (SELECT 1 FROM notes WHERE id = ?2 AND owner_id = ?3)
            "#,
            params![target.to_string(), source.to_string(), owner.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn remove_backlink(&self, owner: &OwnerId, target: NoteId, source: NoteId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"
            DELETE FROM note_backlinks
            WHERE note_id = ?1 AND source_id = ?2
              AND EXISTS (SELECT 1 FROM notes WHERE id = ?1 AND owner_id = ?3)
            "#,
            params![target.to_string(), source.to_string(), owner.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn set_embedding(&self, id: NoteId, embedding: &[f32], version: u64) -> Result<bool> {
        self.check_dimension(embedding)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT version FROM notes WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if current != Some(version as i64) {
            debug!(note_id = %id, ?current, version, "Discarding embedding for stale version");
            return Ok(false);
        }

        if embedding.is_empty() {
            tx.execute(
                "DELETE FROM embeddings WHERE note_id = ?1",
                params![id.to_string()],
            )?;
        } else {
            tx.execute(
                r#"
                INSERT INTO embeddings (note_id, embedding)
                VALUES (?1, ?2)
                ON CONFLICT(note_id) DO UPDATE SET embedding = excluded.embedding
                "#,
                params![id.to_string(), embedding_to_blob(embedding)],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    fn purge_note(&self, owner: &OwnerId, id: NoteId) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id_str = id.to_string();

        let removed = tx.execute(
            "DELETE FROM notes WHERE id = ?1 AND owner_id = ?2",
            params![id_str, owner.to_string()],
        )?;
        if removed == 0 {
            return Ok(false);
        }
        tx.execute("DELETE FROM notes_fts WHERE note_id = ?1", params![id_str])?;
        tx.execute(
            "DELETE FROM note_backlinks WHERE source_id = ?1",
            params![id_str],
        )?;
        // Links from other notes now point nowhere.
        tx.execute("DELETE FROM note_links WHERE target_id = ?1", params![id_str])?;
        tx.commit()?;
        Ok(true)
    }

    fn vector_search(
        &self,
        owner: &OwnerId,
        vector: &[f32],
        num_candidates: usize,
        limit: usize,
    ) -> Result<Vec<ScoredNote>> {
        if !self.capabilities.vector_search {
            return Err(Error::CapabilityUnavailable("vector search disabled".into()));
        }
        if vector.len() != self.dimension {
            return Err(Error::InvalidEmbedding {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        // Exact scan; fine for a personal corpus
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notes n JOIN embeddings e ON e.note_id = n.id \
             WHERE n.owner_id = ?1 AND n.is_deleted = 0",
            NOTE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![owner.to_string()], note_from_row)?;

        let mut scored: Vec<ScoredNote> = Vec::new();
        for row in rows {
            let note = row?;
            if note.embedding.len() != vector.len() {
                continue;
            }
            let similarity = cosine_similarity(vector, &note.embedding);
            scored.push(ScoredNote {
                score: ((1.0 + similarity as f64) / 2.0).clamp(0.0, 1.0),
                note,
            });
        }
        drop(stmt);

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.note.updated_at.cmp(&a.note.updated_at))
                .then_with(|| a.note.id.cmp(&b.note.id))
        });
        scored.truncate(num_candidates);
        scored.truncate(limit);

        for hit in &mut scored {
            load_relations(&conn, &mut hit.note)?;
        }
        Ok(scored)
    }

    fn text_search(&self, owner: &OwnerId, query: &str, limit: usize) -> Result<Vec<ScoredNote>> {
        if !self.capabilities.text_search {
            return Err(Error::CapabilityUnavailable("text search disabled".into()));
        }
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {}, bm25(notes_fts) AS rank \
             FROM notes_fts \
             JOIN notes n ON n.id = notes_fts.note_id \
             LEFT JOIN embeddings e ON e.note_id = n.id \
             WHERE notes_fts MATCH ?1 AND n.owner_id = ?2 AND n.is_deleted = 0 \
             ORDER BY rank ASC, n.updated_at DESC, n.id ASC \
             LIMIT ?3",
            NOTE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![match_expr, owner.to_string(), limit as i64],
            |row| {
                let note = note_from_row(row)?;
                let rank: f64 = row.get(11)?;
                Ok((note, rank))
            },
        )?;

        let mut hits = Vec::new();
        for row in rows {
            let (mut note, rank) = row?;
            load_relations(&conn, &mut note)?;
            // bm25 is lower-is-better
            hits.push(ScoredNote { note, score: -rank });
        }
        Ok(hits)
    }

    fn stats(&self, owner: Option<&OwnerId>) -> Result<IndexStats> {
        let conn = self.conn()?;
        let owner = owner.map(|o| o.to_string());

        let (note_count, deleted_count): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(is_deleted = 0), 0), COALESCE(SUM(is_deleted = 1), 0) \
             FROM notes WHERE ?1 IS NULL OR owner_id = ?1",
            params![owner],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let embedding_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings e JOIN notes n ON n.id = e.note_id \
             WHERE ?1 IS NULL OR n.owner_id = ?1",
            params![owner],
            |row| row.get(0),
        )?;

        let link_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM note_links l JOIN notes n ON n.id = l.source_id \
             WHERE ?1 IS NULL OR n.owner_id = ?1",
            params![owner],
            |row| row.get(0),
        )?;

        let last_indexed = conn
            .query_row(
                "SELECT value FROM index_meta WHERE key = 'last_full_index'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse().ok());

        Ok(IndexStats {
            note_count: note_count as usize,
            deleted_count: deleted_count as usize,
            embedding_count: embedding_count as usize,
            link_count: link_count as usize,
            last_indexed,
        })
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO index_meta (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.conn()?
            .query_row(
                "SELECT value FROM index_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.into())
    }
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let id: String = row.get(0)?;
    let owner: String = row.get(1)?;
    let tags_json: String = row.get(4)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let deleted_at: Option<i64> = row.get(6)?;
    let version: i64 = row.get(9)?;
    let embedding_blob: Option<Vec<u8>> = row.get(10)?;

    let owner_id = OwnerId::new(parse_uuid(1, &owner)?)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(Note {
        id: NoteId::from(parse_uuid(0, &id)?),
        owner_id,
        title: row.get(2)?,
        body: row.get(3)?,
        tags,
        embedding: embedding_blob
            .map(|b| blob_to_embedding(&b))
            .unwrap_or_default(),
        outbound_links: BTreeSet::new(),
        backlinks: BTreeSet::new(),
        is_deleted: row.get(5)?,
        deleted_at: deleted_at.map(from_millis),
        created_at: from_millis(row.get(7)?),
        updated_at: from_millis(row.get(8)?),
        version: version.max(0) as u64,
    })
}

fn load_relations(conn: &Connection, note: &mut Note) -> Result<()> {
    let id = note.id.to_string();
    note.outbound_links = query_ids(
        conn,
        "SELECT target_id FROM note_links WHERE source_id = ?1",
        &id,
    )?;
    note.backlinks = query_ids(
        conn,
        "SELECT source_id FROM note_backlinks WHERE note_id = ?1",
        &id,
    )?;
    Ok(())
}

fn query_ids(conn: &Connection, sql: &str, id: &str) -> Result<BTreeSet<NoteId>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params![id], |row| {
        let raw: String = row.get(0)?;
        parse_uuid(0, &raw).map(NoteId::from)
    })?;

    let mut ids = BTreeSet::new();
    for row in rows {
        ids.insert(row?);
    }
    Ok(ids)
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Build an FTS5 match expression: every alphanumeric term, OR-ed.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Convert f32 embedding to BLOB
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
