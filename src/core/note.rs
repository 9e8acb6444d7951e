use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{Error, Result};
use super::wikilink::extract_links;

lazy_static! {
    static ref MARKUP_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Note identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(Uuid);

impl NoteId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for NoteId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for NoteId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("invalid note id '{}'", s)))
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Owner identity. Every core operation is partitioned by owner.
///
/// A valid owner is a non-nil UUID; anything else is rejected with
/// [`Error::InvalidOwner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(Uuid);

impl OwnerId {
    pub fn new(id: Uuid) -> Result<Self> {
        if id.is_nil() {
            return Err(Error::InvalidOwner("nil owner id".to_string()));
        }
        Ok(Self(id))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidOwner("owner id is empty".to_string()));
        }
        let id = Uuid::parse_str(trimmed)
            .map_err(|_| Error::InvalidOwner(format!("'{}' is not a valid owner id", s)))?;
        Self::new(id)
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for OwnerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.0.to_string()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A note as held by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub owner_id: OwnerId,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    /// Empty when absent, otherwise exactly the configured dimension
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub outbound_links: BTreeSet<NoteId>,
    pub backlinks: BTreeSet<NoteId>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Note {
    /// Fresh note: no links, no embedding, version 1.
    pub fn new(owner_id: OwnerId, title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NoteId::new(),
            owner_id,
            title: title.into(),
            body: body.into(),
            tags: Vec::new(),
            embedding: Vec::new(),
            outbound_links: BTreeSet::new(),
            backlinks: BTreeSet::new(),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Raw `[[...]]` titles in body order, duplicates kept.
    pub fn link_titles(&self) -> Vec<String> {
        extract_links(&self.body)
            .into_iter()
            .map(|l| l.title)
            .collect()
    }

    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.outbound_links.len() + self.backlinks.len()
    }

    /// Markup-free body.
    pub fn plain_body(&self) -> String {
        strip_markup(&self.body)
    }

    /// Text sent to the embedding provider.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.title, self.body)
    }

    pub fn word_count(&self) -> usize {
        self.plain_body().split_whitespace().count()
    }
}

/// Partial update applied by a save.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Remove HTML-like markup tags.
pub fn strip_markup(text: &str) -> String {
    MARKUP_RE.replace_all(text, "").into_owned()
}

/// Strip markup, collapse whitespace and trim.
pub fn normalize_text(text: &str) -> String {
    let stripped = MARKUP_RE.replace_all(text, " ");
    WHITESPACE_RE.replace_all(&stripped, " ").trim().to_string()
}

/// First `max_chars` characters of `s` (char-aware for Unicode).
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
