//! Embedding provider for semantic menu similarity.
//!
//! Tier three of deduplication embeds a menu's identity text (normalized
//! restaurant name, location, and dish signature) and asks the database
//! for the nearest canonical menu by cosine distance. This module owns the
//! provider seam and the retry policy: transient failures (429, 5xx,
//! transport errors) back off exponentially, other client errors fail
//! fast since retrying a 401 or a 400 never helps.
//!
//! Embedding is optional. With `provider = "disabled"` the dedup pipeline
//! simply skips tier three.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::config::EmbeddingConfig;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Dimensionality of the vectors this provider produces.
    fn dims(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// OpenAI embeddings endpoint. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .context("Embedding HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                bail!("transient: embedding endpoint returned {}", status);
            }
            bail!("Embedding endpoint returned {}: {}", status, body);
        }

        let reply: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        let vector: Vec<f32> = reply["data"][0]["embedding"]
            .as_array()
            .context("Embedding response missing data[0].embedding")?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != self.dims {
            bail!(
                "Embedding has {} dims, expected {}",
                vector.len(),
                self.dims
            );
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut attempt: u32 = 0;
        loop {
            match self.request_embedding(text).await {
                Ok(vector) => return Ok(vector),
                Err(err) => {
                    let transient = err.to_string().starts_with("transient:")
                        || err.downcast_ref::<reqwest::Error>().is_some();
                    if !transient || attempt >= self.max_retries {
                        return Err(err);
                    }
                    // 1s, 2s, 4s, ... capped at 32s.
                    let backoff = Duration::from_secs(1 << attempt.min(5));
                    tracing::warn!(
                        attempt = attempt + 1,
                        backoff_secs = backoff.as_secs(),
                        error = %err,
                        "Embedding request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Instantiate the configured embedding provider, `None` when disabled.
pub fn create_embedding_provider(
    config: &EmbeddingConfig,
) -> Result<Option<std::sync::Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(std::sync::Arc::new(OpenAiEmbeddings::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Cosine similarity between two vectors. Zero-magnitude input yields 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Format a vector as a pgvector literal, e.g. `[0.1,0.2,0.3]`.
pub fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, -0.3, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn vector_literal_format() {
        assert_eq!(vector_literal(&[0.25, -1.0, 2.0]), "[0.25,-1,2]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn disabled_provider_is_none() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            model: "text-embedding-ada-002".to_string(),
            dims: 1536,
            max_retries: 5,
            timeout_secs: 30,
        };
        assert!(create_embedding_provider(&config).unwrap().is_none());
    }
}
