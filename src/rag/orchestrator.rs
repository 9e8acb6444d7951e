//! Question answering and semantic search over one owner's notes.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::context::ContextAssembler;
use super::generator::{build_prompt, AnswerGenerator};
use crate::core::config::{ContextConfig, NO_RELEVANT_NOTES_ANSWER};
use crate::core::error::{Error, Result};
use crate::core::note::{truncate_chars, Note, NoteId, OwnerId};
use crate::search::{RetrievalCandidate, RetrievalEngine};

/// Suggestions returned by [`RagOrchestrator::related`] when no limit is given
pub const DEFAULT_RELATED_LIMIT: usize = 5;
/// Body prefix (in chars) used as the related-notes query
const RELATED_QUERY_BODY_CHARS: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

/// A note the answer was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: NoteId,
    pub title: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// 0 or absent means the configured default
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: NoteId,
    pub title: String,
    pub snippet: String,
    pub score: Option<f64>,
}

impl From<&RetrievalCandidate> for Source {
    fn from(c: &RetrievalCandidate) -> Self {
        Self {
            id: c.id,
            title: c.title.clone(),
            score: c.public_score(),
        }
    }
}

impl From<RetrievalCandidate> for SearchHit {
    fn from(c: RetrievalCandidate) -> Self {
        let score = c.public_score();
        Self {
            id: c.id,
            title: c.title,
            snippet: c.snippet,
            score,
        }
    }
}

/// Retrieval, context assembly and answer generation.
pub struct RagOrchestrator {
    engine: RetrievalEngine,
    assembler: ContextAssembler,
    generator: Option<Arc<dyn AnswerGenerator>>,
    context_max_chars: usize,
}

impl RagOrchestrator {
    pub fn new(
        engine: RetrievalEngine,
        generator: Option<Arc<dyn AnswerGenerator>>,
        context: &ContextConfig,
    ) -> Self {
        Self {
            engine,
            assembler: ContextAssembler::new(context),
            generator,
            context_max_chars: context.max_chars,
        }
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub async fn ask(&self, owner: &OwnerId, question: &str) -> Result<AskResponse> {
        self.ask_with_cancellation(owner, question, &CancellationToken::new())
            .await
    }

    /// Answer `question` from the owner's notes.
    ///
    /// Cancellation is honoured until the generator is invoked; after that
    /// the generation call runs to completion.
    #[instrument(skip(self, question, cancel), fields(owner_id = %owner))]
    pub async fn ask_with_cancellation(
        &self,
        owner: &OwnerId,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<AskResponse> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question is required".into()));
        }
        let start = Instant::now();
        let top_k = self.engine.config().ask_top_k;

        let candidates = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = self.engine.retrieve(owner, question, top_k) => result?,
        };

        if candidates.is_empty() {
            info!("No relevant notes, skipping generation");
            return Ok(AskResponse {
                answer: NO_RELEVANT_NOTES_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let context = self.assembler.assemble(&candidates, self.context_max_chars);
        if cancel.is_cancelled() {
            debug!("Cancelled before generation");
            return Err(Error::Cancelled);
        }

        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| Error::Generation("answer generator not configured".into()))?;
        let prompt = build_prompt(question, &context);
        let answer = generator.generate(&prompt).await.map_err(|e| {
            warn!(error = %e, model = generator.model_name(), "Answer generation failed");
            match e {
                Error::Generation(_) => e,
                other => Error::Generation(other.to_string()),
            }
        })?;

        info!(
            source_count = candidates.len(),
            tier = %candidates[0].tier,
            context_len = context.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Answered question"
        );
        Ok(AskResponse {
            answer,
            sources: candidates.iter().map(Source::from).collect(),
        })
    }

    /// Ranked notes for `query` with short snippets. Never calls the
    /// generator.
    #[instrument(skip(self, query), fields(owner_id = %owner))]
    pub async fn search(&self, owner: &OwnerId, query: &str, limit: usize) -> Result<SearchResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query is required".into()));
        }
        let config = self.engine.config();
        let limit = match limit {
            0 => config.default_search_limit,
            n => n.min(config.max_search_limit),
        };

        let candidates = self
            .engine
            .retrieve_with_snippets(owner, query, limit, config.search_snippet_chars)
            .await?;
        debug!(result_count = candidates.len(), "Search complete");
        Ok(SearchResponse {
            results: candidates.into_iter().map(SearchHit::from).collect(),
        })
    }

    /// Link suggestions for `note`: the notes retrieved for its title and
    /// body prefix, never the note itself.
    #[instrument(skip(self, note), fields(owner_id = %note.owner_id, note_id = %note.id))]
    pub async fn related(&self, note: &Note, limit: usize) -> Result<SearchResponse> {
        let config = self.engine.config();
        let limit = match limit {
            0 => DEFAULT_RELATED_LIMIT,
            n => n.min(config.max_search_limit),
        };
        let plain = note.plain_body();
        let query = format!("{} {}", note.title, truncate_chars(&plain, RELATED_QUERY_BODY_CHARS));

        // One extra slot for the note itself.
        let candidates = self
            .engine
            .retrieve_with_snippets(&note.owner_id, &query, limit + 1, config.search_snippet_chars)
            .await?;
        let results: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|c| c.id != note.id)
            .take(limit)
            .map(SearchHit::from)
            .collect();
        debug!(result_count = results.len(), "Related notes found");
        Ok(SearchResponse { results })
    }
}
