//! Embedding backend adapter.
//!
//! The index and search paths only require `embed(text) → Vec<f32>`; any
//! backend that yields fixed-dimension float vectors fits behind the trait.
//! The shipped adapter speaks Ollama's `/api/embed`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::config::OllamaEmbeddingConfig;

use super::errors::ProviderError;

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Trait ───────────────────────────────────────────────────────────────────

/// A backend that turns text into a fixed-dimension float vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

// ─── Ollama adapter ──────────────────────────────────────────────────────────

/// Response from Ollama's `/api/embed` endpoint.
#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embedding client for an Ollama-compatible `/api/embed` endpoint.
pub struct OllamaEmbedding {
    http: HttpClient,
    url: String,
    model: String,
}

impl OllamaEmbedding {
    /// Build the client. The request timeout is generous because local
    /// inference may need to load the model first.
    pub fn new(config: &OllamaEmbeddingConfig) -> Result<Self, ProviderError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::RequestFailed {
                url: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            url: format!("{base}/api/embed"),
            model: config.model_name.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::RequestFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let parsed: OllamaEmbedResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        let embedding = parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyEmbedding)?;

        if embedding.is_empty() {
            return Err(ProviderError::EmptyEmbedding);
        }

        Ok(embedding)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_construction_strips_trailing_slash() {
        let config = OllamaEmbeddingConfig {
            base_url: "http://localhost:11434/".to_string(),
            model_name: "nomic-embed-text".to_string(),
            timeout_secs: 10,
        };
        let client = OllamaEmbedding::new(&config).unwrap();
        assert_eq!(client.url, "http://localhost:11434/api/embed");
    }

    #[test]
    fn test_embed_response_parsing() {
        let json = r#"{"model": "nomic-embed-text", "embeddings": [[0.1, -0.2, 0.3]]}"#;
        let parsed: OllamaEmbedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.embeddings.len(), 1);
        assert_eq!(parsed.embeddings[0].len(), 3);
    }

    #[test]
    fn test_embed_response_missing_embeddings() {
        let parsed: OllamaEmbedResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.embeddings.is_empty());
    }
}
