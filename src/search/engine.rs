//! Retrieval engine - tiered candidate search over one owner's notes
//!
//! Tiers are tried in order and the first one that yields candidates wins:
//! vector similarity, then full-text relevance, then keyword containment.
//! Results from different tiers are never merged.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::embedding::EmbeddingProvider;
use crate::core::config::RetrievalConfig;
use crate::core::error::Result;
use crate::core::note::{truncate_chars, Note, NoteId, OwnerId};
use crate::store::{DocumentStore, NoteFilter, ScoredNote};

/// Default snippet length for retrieval candidates.
pub const CANDIDATE_SNIPPET_CHARS: usize = 1500;

/// Retrieval strategy that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Vector,
    Fulltext,
    Keyword,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Vector => write!(f, "vector"),
            Tier::Fulltext => write!(f, "fulltext"),
            Tier::Keyword => write!(f, "keyword"),
        }
    }
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCandidate {
    pub id: NoteId,
    pub title: String,
    /// Markup-stripped body prefix
    pub snippet: String,
    /// Similarity in `[0, 1]` for the vector tier, lexical rank otherwise
    pub score: f64,
    pub tier: Tier,
}

impl RetrievalCandidate {
    fn from_note(note: &Note, score: f64, tier: Tier, snippet_chars: usize) -> Self {
        let body = note.plain_body();
        Self {
            id: note.id,
            title: note.title.clone(),
            snippet: truncate_chars(&body, snippet_chars).to_string(),
            score,
            tier,
        }
    }

    /// Score exposed on the wire: only vector similarities are meaningful
    /// across queries.
    pub fn public_score(&self) -> Option<f64> {
        match self.tier {
            Tier::Vector => Some(self.score),
            Tier::Fulltext | Tier::Keyword => None,
        }
    }
}

/// Tiered retrieval over a [`DocumentStore`].
#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<dyn DocumentStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Retrieve up to `k` candidates for `query` from the owner's
    /// non-deleted notes. An empty result is not an error.
    pub async fn retrieve(
        &self,
        owner: &OwnerId,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        self.retrieve_with_snippets(owner, query, k, CANDIDATE_SNIPPET_CHARS)
            .await
    }

    #[instrument(skip(self, query), fields(owner_id = %owner, query_len = query.len()))]
    pub async fn retrieve_with_snippets(
        &self,
        owner: &OwnerId,
        query: &str,
        k: usize,
        snippet_chars: usize,
    ) -> Result<Vec<RetrievalCandidate>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let start = Instant::now();

        let (tier, hits) = match self.vector_tier(owner, query, k).await {
            Some(hits) if !hits.is_empty() => (Tier::Vector, hits),
            _ => match self.fulltext_tier(owner, query, k) {
                Some(hits) if !hits.is_empty() => (Tier::Fulltext, hits),
                _ => (Tier::Keyword, self.keyword_tier(owner, query, k)?),
            },
        };

        let candidates: Vec<RetrievalCandidate> = hits
            .iter()
            .take(k)
            .map(|hit| RetrievalCandidate::from_note(&hit.note, hit.score, tier, snippet_chars))
            .collect();

        debug!(
            %tier,
            result_count = candidates.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        Ok(candidates)
    }

    /// `None` when the tier was skipped or failed.
    async fn vector_tier(&self, owner: &OwnerId, query: &str, k: usize) -> Option<Vec<ScoredNote>> {
        let embedder = self.embedder.as_ref()?;

        let vector = embedder.embed(query).await;
        if vector.is_empty() {
            debug!("Query embedding unavailable, skipping vector tier");
            return None;
        }
        if vector.len() != self.config.embedding_dim {
            warn!(
                expected = self.config.embedding_dim,
                actual = vector.len(),
                "Query embedding has wrong dimension, skipping vector tier"
            );
            return None;
        }

        match self
            .store
            .vector_search(owner, &vector, self.config.num_candidates, k)
        {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!(error = %e, "Vector search not available, falling back to text search");
                None
            }
        }
    }

    fn fulltext_tier(&self, owner: &OwnerId, query: &str, k: usize) -> Option<Vec<ScoredNote>> {
        match self.store.text_search(owner, query, k) {
            Ok(hits) => Some(hits),
            Err(e) => {
                warn!(error = %e, "Text search not available, falling back to keyword search");
                None
            }
        }
    }

    /// Case-insensitive containment of any query token longer than the
    /// configured minimum, most recently updated first.
    fn keyword_tier(&self, owner: &OwnerId, query: &str, k: usize) -> Result<Vec<ScoredNote>> {
        let keywords = keywords(query, self.config.min_keyword_len);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let notes = self.store.find_by_owner(owner, &NoteFilter::active())?;
        let hits = notes
            .into_iter()
            .filter_map(|note| {
                let title = note.title.to_lowercase();
                let body = note.body.to_lowercase();
                let matched = keywords
                    .iter()
                    .filter(|kw| title.contains(kw.as_str()) || body.contains(kw.as_str()))
                    .count();
                if matched == 0 {
                    return None;
                }
                Some(ScoredNote {
                    score: matched as f64 / keywords.len() as f64,
                    note,
                })
            })
            .take(k)
            .collect();
        Ok(hits)
    }
}

/// Lowercased whitespace-separated tokens with at least `min_len` chars.
pub fn keywords(query: &str, min_len: usize) -> Vec<String> {
    query
        .split_whitespace()
        .filter(|w| w.chars().count() >= min_len)
        .map(|w| w.to_lowercase())
        .collect()
}
