//! Application configuration.
//!
//! A single JSON file describes the listen endpoint, the semantic-search
//! backends, and the fleet of upstream MCP servers. Keys are PascalCase to
//! stay compatible with existing deployments of the config format.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Errors raised while loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {reason}")]
    Unreadable { path: String, reason: String },

    #[error("failed to parse config file '{path}': {reason}")]
    Unparsable { path: String, reason: String },

    #[error("invalid config for server '{server}': {reason}")]
    InvalidServer { server: String, reason: String },
}

// ─── Top-level config ────────────────────────────────────────────────────────

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppConfig {
    pub mcp_server: McpServerConfig,
    pub semantic_kernel: SemanticKernelConfig,
    pub mcp_servers: Vec<UpstreamServerConfig>,
    pub logging: LoggingConfig,
}

/// Listen endpoint for the MCP front-end.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct McpServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3030,
        }
    }
}

/// Semantic-search configuration: vector store shape plus the embedding and
/// chat backends used for indexing and phrase generation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SemanticKernelConfig {
    pub vector_store: VectorStoreConfig,
    pub ollama_embedding: OllamaEmbeddingConfig,
    pub ollama_chat: OllamaChatConfig,
    /// When true, search phrases are rewritten by the chat model instead of
    /// the built-in template.
    pub use_enhanced_phrase_generation: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VectorStoreConfig {
    pub collection_name: String,
    pub embedding_dimensions: usize,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            collection_name: "mcp-tools".to_string(),
            embedding_dimensions: 1536,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OllamaEmbeddingConfig {
    pub base_url: String,
    pub model_name: String,
    /// Request timeout in seconds. Local inference can take minutes on a
    /// cold model, so the default is generous.
    pub timeout_secs: u64,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model_name: "nomic-embed-text".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OllamaChatConfig {
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    /// System prompt template for phrase generation. `{tool_name}`,
    /// `{description}`, and `{server_name}` are substituted per tool.
    pub phrase_generation_prompt: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OllamaChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model_name: "llama3.2".to_string(),
            temperature: 0.2,
            phrase_generation_prompt: None,
            timeout_secs: 300,
        }
    }
}

/// Log verbosity, mirroring the `Logging.LogLevel.Default` key path.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LoggingConfig {
    pub log_level: LogLevelConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LogLevelConfig {
    pub default: String,
}

impl Default for LogLevelConfig {
    fn default() -> Self {
        Self {
            default: "info".to_string(),
        }
    }
}

// ─── Upstream server config ──────────────────────────────────────────────────

/// Transport used to reach an upstream MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Stdio,
    Http,
    StreamableHttp,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::StreamableHttp => write!(f, "streamable-http"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

/// One upstream MCP server entry from `McpServers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpstreamServerConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub transport: TransportKind,
    /// Executable for stdio servers.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment applied to the child process only, never to this process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for stdio servers. Defaults to the user's home.
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Endpoint for http / streamable-http / sse servers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Fallback tool names advertised before discovery completes.
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl UpstreamServerConfig {
    /// Check transport-specific required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.transport {
            TransportKind::Stdio => {
                if self.command.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    return Err(ConfigError::InvalidServer {
                        server: self.name.clone(),
                        reason: "stdio transport requires a Command".to_string(),
                    });
                }
            }
            TransportKind::Http | TransportKind::StreamableHttp | TransportKind::Sse => {
                match self.url.as_deref() {
                    None => {
                        return Err(ConfigError::InvalidServer {
                            server: self.name.clone(),
                            reason: format!("{} transport requires a Url", self.transport),
                        });
                    }
                    Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                        return Err(ConfigError::InvalidServer {
                            server: self.name.clone(),
                            reason: format!("invalid Url '{url}'"),
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: AppConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Unparsable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        for server in &config.mcp_servers {
            server.validate()?;
        }

        Ok(config)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
