//! Backend adapters for embedding and chat completion.
//!
//! Both backends are consumed through narrow traits so any
//! OpenAI-compatible or Ollama-compatible HTTP endpoint fits.

pub mod chat;
pub mod embedding;
pub mod errors;

pub use chat::{ChatProvider, OllamaChat};
pub use embedding::{EmbeddingProvider, OllamaEmbedding};
pub use errors::ProviderError;
