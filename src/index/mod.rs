//! Tool index — a refreshable in-memory vector store over every discovered
//! tool, keyed by `server.tool`.
//!
//! Provides:
//! - Atomic rebuild from the running sessions (snapshot swap)
//! - Search-phrase derivation (templated or LLM-assisted)
//! - Cosine-ranked semantic search with thresholded top-k
//! - Fast per-server lookups for the listing surfaces

pub mod errors;
pub mod phrase;
pub mod store;
pub mod types;

pub use errors::IndexError;
pub use phrase::PhraseGenerator;
pub use store::ToolIndex;
pub use types::{IndexInfo, RefreshStats, SearchResult};
