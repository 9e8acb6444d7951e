//! Document store abstraction.
//!
//! The store owns note persistence, link sets and the optional vector and
//! full-text search capabilities. Every read is scoped to one owner.

pub mod sqlite;

use std::collections::BTreeSet;

use crate::core::error::{Error, Result};
use crate::core::note::{Note, NoteId, OwnerId};

pub use sqlite::{SqliteStore, StoreCapabilities};

/// Filters for [`DocumentStore::find_by_owner`].
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    /// Include soft-deleted notes
    pub include_deleted: bool,
    /// Return soft-deleted notes only (trash view)
    pub only_deleted: bool,
    pub limit: Option<usize>,
}

impl NoteFilter {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn trash() -> Self {
        Self {
            only_deleted: true,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A note with a capability-specific relevance score.
#[derive(Debug, Clone)]
pub struct ScoredNote {
    pub note: Note,
    pub score: f64,
}

/// Store statistics.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub note_count: usize,
    pub deleted_count: usize,
    pub embedding_count: usize,
    pub link_count: usize,
    pub last_indexed: Option<i64>,
}

/// Persistence for notes.
///
/// Per-document writes are atomic; callers serialize concurrent edits to the
/// same note. Backlink writes are idempotent set operations.
pub trait DocumentStore: Send + Sync {
    fn insert_note(&self, note: &Note) -> Result<()>;

    /// Persist title, body, tags, deletion state, timestamps and version.
    /// Link sets and embedding are written by their own methods.
    fn update_note(&self, note: &Note) -> Result<()>;

    fn get_note(&self, owner: &OwnerId, id: NoteId) -> Result<Option<Note>>;

    /// Owner-agnostic lookup for background jobs that carry only ids.
    fn get_note_by_id(&self, id: NoteId) -> Result<Option<Note>>;

    /// Notes of one owner, most recently updated first.
    fn find_by_owner(&self, owner: &OwnerId, filter: &NoteFilter) -> Result<Vec<Note>>;

    /// Non-deleted notes whose title exactly equals one of `titles`,
    /// most recently updated first.
    fn find_by_titles(&self, owner: &OwnerId, titles: &[String]) -> Result<Vec<Note>>;

    /// Replace the outbound link set wholesale.
    fn set_outbound_links(&self, id: NoteId, links: &BTreeSet<NoteId>) -> Result<()>;

    /// Add `source` to `target`'s backlinks. Returns false if already present
    /// or if either note is outside `owner`.
    fn add_backlink(&self, owner: &OwnerId, target: NoteId, source: NoteId) -> Result<bool>;

    /// Remove `source` from `target`'s backlinks. Returns false if absent.
    fn remove_backlink(&self, owner: &OwnerId, target: NoteId, source: NoteId) -> Result<bool>;

    /// Store an embedding computed for `version`. Returns false when the note
    /// has moved past that version (or is gone) and nothing was written.
    fn set_embedding(&self, id: NoteId, embedding: &[f32], version: u64) -> Result<bool>;

    /// Permanently delete a note and strip it from every backlink set.
    fn purge_note(&self, owner: &OwnerId, id: NoteId) -> Result<bool>;

    /// Approximate nearest-neighbour search over the owner's non-deleted
    /// notes. Scores are similarities in `[0, 1]`, higher is better.
    fn vector_search(
        &self,
        _owner: &OwnerId,
        _vector: &[f32],
        _num_candidates: usize,
        _limit: usize,
    ) -> Result<Vec<ScoredNote>> {
        Err(Error::CapabilityUnavailable("vector search".into()))
    }

    /// Lexical relevance search over title and body. Higher is better.
    fn text_search(&self, _owner: &OwnerId, _query: &str, _limit: usize) -> Result<Vec<ScoredNote>> {
        Err(Error::CapabilityUnavailable("text search".into()))
    }

    fn stats(&self, owner: Option<&OwnerId>) -> Result<IndexStats>;

    fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    fn get_meta(&self, key: &str) -> Result<Option<String>>;
}
