//! Runtime configuration.
//!
//! Sources, lowest to highest priority: built-in defaults, an optional YAML
//! file, then `MINDVAULT_*` environment variables.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{Error, Result};

/// Embedding dimension D.
pub const EMBEDDING_DIM: usize = 768;

/// Answer returned when retrieval finds nothing.
pub const NO_RELEVANT_NOTES_ANSWER: &str =
    "I couldn't find any relevant notes to answer your question. Try adding more notes on this topic!";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub retrieval: RetrievalConfig,
    pub context: ContextConfig,
    pub links: LinkConfig,
    pub jobs: JobConfig,
    pub ollama: OllamaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub embedding_dim: usize,
    /// Candidate pool scanned by the vector tier
    pub num_candidates: usize,
    /// Candidates retrieved for `ask`
    pub ask_top_k: usize,
    /// Tokens must be at least this long to survive the keyword tier
    pub min_keyword_len: usize,
    pub search_snippet_chars: usize,
    pub default_search_limit: usize,
    pub max_search_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_dim: EMBEDDING_DIM,
            num_candidates: 50,
            ask_top_k: 5,
            min_keyword_len: 4,
            search_snippet_chars: 200,
            default_search_limit: 10,
            max_search_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_chars: usize,
    pub per_note_chars: usize,
    pub max_notes: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            per_note_chars: 1500,
            max_notes: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Remove backlinks whose reference disappeared from the source body
    pub prune_stale_backlinks: bool,
    /// Bodies this short (in chars) are not embedded
    pub min_embed_chars: usize,
    /// Cap on characters sent to the embedding provider
    pub max_embed_chars: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            prune_stale_backlinks: true,
            min_embed_chars: 10,
            max_embed_chars: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            max_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Unset means no remote backend; the local harmonic embedder is used
    pub url: Option<String>,
    pub embed_model: Option<String>,
    pub gen_model: Option<String>,
}

impl CoreConfig {
    /// Load config: defaults, then `path` if it exists, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                debug!(path = %p.display(), "Loaded config file");
                serde_yaml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `MINDVAULT_NUM_CANDIDATES` | `retrieval.num_candidates` |
    /// | `MINDVAULT_ASK_TOP_K` | `retrieval.ask_top_k` |
    /// | `MINDVAULT_CONTEXT_MAX_CHARS` | `context.max_chars` |
    /// | `MINDVAULT_PRUNE_STALE_BACKLINKS` | `links.prune_stale_backlinks` |
    /// | `MINDVAULT_JOB_WORKERS` | `jobs.workers` |
    /// | `MINDVAULT_JOB_QUEUE_CAPACITY` | `jobs.queue_capacity` |
    /// | `MINDVAULT_OLLAMA_URL` | `ollama.url` |
    /// | `MINDVAULT_EMBED_MODEL` | `ollama.embed_model` |
    /// | `MINDVAULT_GEN_MODEL` | `ollama.gen_model` |
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse("MINDVAULT_NUM_CANDIDATES") {
            self.retrieval.num_candidates = v;
        }
        if let Some(v) = env_parse("MINDVAULT_ASK_TOP_K") {
            self.retrieval.ask_top_k = v;
        }
        if let Some(v) = env_parse("MINDVAULT_CONTEXT_MAX_CHARS") {
            self.context.max_chars = v;
        }
        if let Ok(v) = std::env::var("MINDVAULT_PRUNE_STALE_BACKLINKS") {
            self.links.prune_stale_backlinks = v != "false" && v != "0";
        }
        if let Some(v) = env_parse::<usize>("MINDVAULT_JOB_WORKERS") {
            self.jobs.workers = v.max(1);
        }
        if let Some(v) = env_parse::<usize>("MINDVAULT_JOB_QUEUE_CAPACITY") {
            self.jobs.queue_capacity = v.max(1);
        }
        if let Ok(v) = std::env::var("MINDVAULT_OLLAMA_URL") {
            self.ollama.url = Some(v);
        }
        if let Ok(v) = std::env::var("MINDVAULT_EMBED_MODEL") {
            self.ollama.embed_model = Some(v);
        }
        if let Ok(v) = std::env::var("MINDVAULT_GEN_MODEL") {
            self.ollama.gen_model = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.embedding_dim == 0 {
            return Err(Error::Config("retrieval.embedding_dim must be > 0".into()));
        }
        if self.retrieval.num_candidates == 0 || self.retrieval.ask_top_k == 0 {
            return Err(Error::Config(
                "retrieval.num_candidates and retrieval.ask_top_k must be > 0".into(),
            ));
        }
        if self.jobs.workers == 0 || self.jobs.queue_capacity == 0 || self.jobs.max_attempts == 0 {
            return Err(Error::Config(
                "jobs.workers, jobs.queue_capacity and jobs.max_attempts must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
