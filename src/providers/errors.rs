//! Provider adapter error types.

use thiserror::Error;

/// Errors from the embedding and chat-completion backends.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to parse backend response: {reason}")]
    InvalidResponse { reason: String },

    #[error("backend returned an empty embedding")]
    EmptyEmbedding,

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
