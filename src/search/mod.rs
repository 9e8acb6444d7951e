//! Retrieval for the knowledge base
//!
//! Tier 1: vector similarity over note embeddings
//! Tier 2: full-text relevance (FTS5)
//! Tier 3: keyword containment

pub mod embedding;
pub mod engine;

pub use embedding::{EmbeddingProvider, HarmonicEmbedder};
pub use engine::{RetrievalCandidate, RetrievalEngine, Tier};
