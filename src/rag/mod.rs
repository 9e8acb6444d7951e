//! Retrieval-augmented question answering.

pub mod context;
pub mod generator;
pub mod orchestrator;

pub use context::ContextAssembler;
pub use generator::{build_prompt, AnswerGenerator};
pub use orchestrator::{
    AskRequest, AskResponse, RagOrchestrator, SearchHit, SearchRequest, SearchResponse, Source,
};
