//! Chat-completion backend adapter.
//!
//! Used only for search-phrase generation, so the surface is a single
//! non-streaming `complete(system, user, temperature)` call against an
//! OpenAI-compatible `/chat/completions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::config::OllamaChatConfig;

use super::errors::ProviderError;

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Trait ───────────────────────────────────────────────────────────────────

/// A backend that answers one system+user exchange with plain text.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, ProviderError>;
}

// ─── OpenAI-compatible adapter ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Chat client for an OpenAI-compatible endpoint (Ollama's `/v1` included).
pub struct OllamaChat {
    http: HttpClient,
    url: String,
    model: String,
}

impl OllamaChat {
    pub fn new(config: &OllamaChatConfig) -> Result<Self, ProviderError> {
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
            url: format!("{base}/chat/completions"),
            model: config.model_name.clone(),
        })
    }
}

#[async_trait]
impl ChatProvider for OllamaChat {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": temperature,
            "stream": false,
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

        let parsed: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ProviderError::InvalidResponse {
                reason: "chat completion returned no content".to_string(),
            });
        }

        Ok(content.trim().to_string())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_construction() {
        let config = OllamaChatConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            model_name: "llama3.2".to_string(),
            temperature: 0.2,
            phrase_generation_prompt: None,
            timeout_secs: 10,
        };
        let client = OllamaChat::new(&config).unwrap();
        assert_eq!(client.url, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn test_completion_response_parsing() {
        let json = r#"{"choices": [{"message": {"role": "assistant", "content": " a phrase "}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].message.content, " a phrase ");
    }

    #[test]
    fn test_completion_response_empty_choices() {
        let parsed: ChatCompletionResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.choices.is_empty());
    }
}
