//! mindvault library
//!
//! Personal knowledge base core: tiered retrieval-augmented question
//! answering over a user's notes and a bidirectional `[[link]]` graph.
//!
//! # Modules
//!
//! - `core`: notes, owner identities, wikilinks, configuration, errors
//! - `store`: document store trait and the SQLite implementation
//! - `search`: embedding providers and the tiered retrieval engine
//! - `rag`: context assembly, answer generation, orchestration
//! - `graph`: outbound links, backlinks and graph export
//! - `jobs`: background job pool for embeddings and backlinks
//! - `ai`: Ollama backend and test mocks
//! - `kb`: the [`KnowledgeBase`] facade tying it all together

pub mod ai;
pub mod core;
pub mod graph;
pub mod jobs;
pub mod kb;
pub mod rag;
pub mod search;
pub mod store;

// Re-exports for convenience
pub use crate::core::config::CoreConfig;
pub use crate::core::error::{Error, Result};
pub use crate::core::note::{Note, NoteId, NoteUpdate, OwnerId};
pub use crate::core::wikilink::{extract_links, LinkReference};
pub use graph::{GraphResponse, LinkGraphMaintainer};
pub use jobs::{Job, JobEvent, JobPool};
pub use kb::{Capabilities, KnowledgeBase};
pub use rag::{AnswerGenerator, AskResponse, ContextAssembler, RagOrchestrator, SearchResponse};
pub use search::{EmbeddingProvider, HarmonicEmbedder, RetrievalCandidate, RetrievalEngine, Tier};
pub use store::{DocumentStore, SqliteStore, StoreCapabilities};
