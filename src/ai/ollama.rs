//! Ollama backend for embeddings and answer generation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::config::{OllamaConfig, EMBEDDING_DIM};
use crate::core::error::{Error, Result};
use crate::rag::AnswerGenerator;
use crate::search::EmbeddingProvider;

pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// 768-dimensional embedding model.
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

pub const DEFAULT_GEN_MODEL: &str = "llama3.1:8b";

pub const EMBED_TIMEOUT_SECS: u64 = 30;

pub const GEN_TIMEOUT_SECS: u64 = 120;

pub struct OllamaBackend {
    client: Client,
    base_url: String,
    embed_model: String,
    gen_model: String,
    dimension: usize,
}

impl OllamaBackend {
    pub fn new(base_url: String, embed_model: String, gen_model: String, dimension: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GEN_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Request(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            url = %base_url,
            embed_model = %embed_model,
            gen_model = %gen_model,
            "Initializing Ollama backend"
        );

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            embed_model,
            gen_model,
            dimension,
        })
    }

    /// Backend from the `ollama` config section, or `None` when no URL is set.
    /// `dimension` is the configured embedding width.
    pub fn from_config(config: &OllamaConfig, dimension: usize) -> Result<Option<Self>> {
        let Some(url) = config.url.clone() else {
            return Ok(None);
        };
        let embed_model = config
            .embed_model
            .clone()
            .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string());
        let gen_model = config
            .gen_model
            .clone()
            .unwrap_or_else(|| DEFAULT_GEN_MODEL.to_string());
        Self::new(url, embed_model, gen_model, dimension).map(Some)
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.embed_model.clone(),
            input: vec![text.to_string()],
        };

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .timeout(Duration::from_secs(EMBED_TIMEOUT_SECS))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Request(format!("Ollama returned {}: {}", status, body)));
        }

        let result: EmbeddingResponse = response.json().await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Request("Ollama returned no embeddings".into()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl EmbeddingProvider for OllamaBackend {
    /// Failures collapse to the empty vector so retrieval falls back.
    #[instrument(skip(self, text), fields(component = "ollama", model = %self.embed_model, input_len = text.len()))]
    async fn embed(&self, text: &str) -> Vec<f32> {
        let start = Instant::now();
        match self.request_embedding(text).await {
            Ok(vector) if vector.len() == self.dimension => {
                debug!(duration_ms = start.elapsed().as_millis() as u64, "Embedding complete");
                vector
            }
            Ok(vector) => {
                warn!(
                    expected = self.dimension,
                    actual = vector.len(),
                    "Embedding model returned wrong dimension"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Embedding request failed");
                Vec::new()
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.embed_model
    }
}

#[async_trait]
impl AnswerGenerator for OllamaBackend {
    #[instrument(skip(self, prompt), fields(component = "ollama", model = %self.gen_model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let request = GenerateRequest {
            model: self.gen_model.clone(),
            prompt: prompt.to_string(),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("Ollama returned {}: {}", status, body)));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Generation(format!("Failed to parse response: {}", e)))?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(response_len = result.response.len(), duration_ms = elapsed, "Generation complete");
        if elapsed > 30_000 {
            warn!(duration_ms = elapsed, slow = true, "Slow generation operation");
        }
        Ok(result.response)
    }

    fn model_name(&self) -> &str {
        &self.gen_model
    }
}
