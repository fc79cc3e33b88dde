//! Embedding collaborator: consumed as an opaque `embed(text) -> vector`
//! contract. The Ollama implementation is the default local provider.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub ms: u64,
    pub model: String,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Vector dimensionality, probed once and cached.
    async fn dim(&self) -> Result<usize>;
}

pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dim: OnceCell<usize>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            dim: OnceCell::new(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let start = Instant::now();
        let body = EmbeddingsRequest {
            model: &self.model,
            prompt: text,
        };
        let resp = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&body)
            .send()
            .await
            .context("embeddings request")?;
        anyhow::ensure!(
            resp.status().is_success(),
            "embeddings request failed ({})",
            resp.status()
        );
        let parsed: EmbeddingsResponse = resp.json().await.context("parse embeddings response")?;
        anyhow::ensure!(!parsed.embedding.is_empty(), "empty embedding in response");
        Ok(Embedding {
            vector: parsed.embedding,
            ms: start.elapsed().as_millis() as u64,
            model: self.model.clone(),
        })
    }

    async fn dim(&self) -> Result<usize> {
        self.dim
            .get_or_try_init(|| async {
                let probe = self.embed("dimension probe").await?;
                Ok(probe.vector.len())
            })
            .await
            .copied()
    }
}

/// Text fed to the embedder for one URL: stable field order so embeddings
/// are comparable across submission paths.
pub fn embed_text(url: &str, title: &str, domain: &str) -> String {
    format!("{} | {} | {}", url, title, domain)
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_text_keeps_stable_field_order() {
        assert_eq!(
            embed_text("http://example.com/a", "login page", "example.com"),
            "http://example.com/a | login page | example.com"
        );
    }
}
