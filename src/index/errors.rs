//! Tool index error types.

use thiserror::Error;

use crate::providers::ProviderError;

/// Errors from index refresh and semantic search.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The embedding backend failed for the query (search) or in a way
    /// that aborts a refresh.
    #[error("embedding backend failed: {source}")]
    Embedding {
        #[from]
        source: ProviderError,
    },

    /// A vector of the wrong length reached the index. The dimension is
    /// pinned for the process lifetime; this aborts the operation rather
    /// than corrupting the store.
    #[error("embedding dimension mismatch: index uses {expected}, backend returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}
