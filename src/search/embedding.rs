//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the narrow interface the retrieval pipeline uses.
//! It never fails: an empty vector means "unavailable" and makes callers
//! fall back to lexical search.
//!
//! [`HarmonicEmbedder`] is a deterministic, training-free implementation
//! based on Harmonic Token Projection (HTP):
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! - No neural network required
//! - Deterministic (same input → same output)
//! - Unicode-based (multilingual support)

use std::f64::consts::PI;

use async_trait::async_trait;

use crate::core::config::EMBEDDING_DIM;
use crate::core::note::{normalize_text, truncate_chars};

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// Text-to-vector capability.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`. Returns an empty vector when embedding is unavailable.
    async fn embed(&self, text: &str) -> Vec<f32>;

    /// Length of every non-empty vector this provider returns.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// Clean text before embedding: strip markup, collapse whitespace, cap
/// length. Returns `None` when fewer than `min_chars` characters remain.
pub fn prepare_text(text: &str, min_chars: usize, max_chars: usize) -> Option<String> {
    let clean = normalize_text(text);
    if clean.chars().count() < min_chars {
        return None;
    }
    Some(truncate_chars(&clean, max_chars).to_string())
}

/// HTP embedding model
pub struct HarmonicEmbedder {
    moduli: Vec<u64>,
    dimension: usize,
}

impl HarmonicEmbedder {
    /// Model producing [`EMBEDDING_DIM`] dimensions.
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIM)
    }

    /// Dimension is `2 * number of coprime moduli`, so it is rounded down
    /// to an even number.
    pub fn with_dimension(dimension: usize) -> Self {
        let moduli = first_primes(dimension / 2);
        Self {
            dimension: moduli.len() * 2,
            moduli,
        }
    }

    /// Generate embedding for a single text
    ///
    /// Algorithm:
    /// 1. Tokenize text into words
    /// 2. Embed each token using harmonic projection
    /// 3. Average token embeddings (mean pooling)
    /// 4. L2 normalize result
    ///
    /// Text without tokens yields an empty vector.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut sum_embedding = vec![0.0f64; self.dimension];
        for token in &tokens {
            for (i, val) in self.embed_token(token).iter().enumerate() {
                sum_embedding[i] += val;
            }
        }

        let count = tokens.len() as f64;
        for val in &mut sum_embedding {
            *val /= count;
        }

        let norm: f64 = sum_embedding.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            sum_embedding.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum_embedding.iter().map(|x| *x as f32).collect()
        }
    }

    /// Embed a single token using Harmonic Token Projection
    ///
    /// Steps:
    /// 1. Convert token to Unicode code points
    /// 2. Encode as base-2^16 integer N
    /// 3. For each modulus m_i, compute r_i = N mod m_i
    /// 4. Project to unit circle: E_i = [sin(2πr_i/m_i), cos(2πr_i/m_i)]
    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);

        let mut embedding = Vec::with_capacity(self.dimension);
        for &m in &self.moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }
        embedding
    }
}

impl Default for HarmonicEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HarmonicEmbedder {
    async fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_sync(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "harmonic-token-projection"
    }
}

/// N = Σ u_j * B^(L-j) where B = 2^16, with wrapping arithmetic
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// First `count` primes, used as pairwise-coprime moduli.
fn first_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;
    while primes.len() < count {
        if primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

/// Splits text into words, normalizes to lowercase
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

/// Cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}
