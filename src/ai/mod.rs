//! Capability backends: a remote Ollama server and test mocks.

pub mod mock;
pub mod ollama;

pub use ollama::OllamaBackend;
