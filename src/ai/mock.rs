//! Mock capabilities for deterministic testing.
//!
//! ```rust
//! use mindvault::ai::mock::{MockEmbedder, MockGenerator};
//!
//! let embedder = MockEmbedder::new(768);
//! let generator = MockGenerator::new("Paris");
//! assert_eq!(embedder.vector_for("France").len(), 768);
//! assert_eq!(generator.generate_call_count(), 0);
//! ```

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::error::{Error, Result};
use crate::rag::AnswerGenerator;
use crate::search::EmbeddingProvider;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Embedding provider with character-hash vectors and a call log.
pub struct MockEmbedder {
    dimension: usize,
    available: bool,
    calls: Mutex<Vec<String>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            available: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Provider that is configured but always returns the empty vector.
    pub fn unavailable(dimension: usize) -> Self {
        Self {
            available: false,
            ..Self::new(dimension)
        }
    }

    /// Deterministic unit vector for `text`; the same text always yields the
    /// same vector.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if text.is_empty() || self.dimension == 0 {
            return Vec::new();
        }
        let mut vec = vec![0.0f32; self.dimension];
        for (i, c) in text.chars().enumerate() {
            vec[(c as usize + i) % self.dimension] += 0.1;
        }
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
        vec
    }

    pub fn embed_call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Texts passed to `embed`, in call order.
    pub fn inputs(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        lock(&self.calls).push(text.to_string());
        if !self.available {
            return Vec::new();
        }
        self.vector_for(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }
}

/// Answer generator with a fixed response or a fixed failure.
pub struct MockGenerator {
    response: String,
    failure: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            failure: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Generator whose every call fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            failure: Some(reason.into()),
            ..Self::new("")
        }
    }

    pub fn generate_call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        lock(&self.prompts).push(prompt.to_string());
        match &self.failure {
            Some(reason) => Err(Error::Generation(reason.clone())),
            None => Ok(self.response.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "mock-generator"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::embedding::cosine_similarity;

    #[tokio::test]
    async fn test_embedder_is_deterministic_and_counts_calls() {
        let embedder = MockEmbedder::new(32);
        let a = embedder.embed("France").await;
        let b = embedder.embed("France").await;
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
        assert_eq!(embedder.embed_call_count(), 2);
        assert_eq!(embedder.inputs(), vec!["France", "France"]);
    }

    #[tokio::test]
    async fn test_unavailable_embedder_returns_empty() {
        let embedder = MockEmbedder::unavailable(32);
        assert!(embedder.embed("France").await.is_empty());
        assert_eq!(embedder.embed_call_count(), 1);
    }

    #[tokio::test]
    async fn test_generator_modes() {
        let ok = MockGenerator::new("answer");
        assert_eq!(ok.generate("p").await.unwrap(), "answer");
        assert_eq!(ok.prompts(), vec!["p"]);

        let failing = MockGenerator::failing("quota");
        assert!(matches!(failing.generate("p").await, Err(Error::Generation(_))));
        assert_eq!(failing.generate_call_count(), 1);
    }
}
