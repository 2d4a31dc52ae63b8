//! Index data types: vector records, snapshots, and search results.

use chrono::{DateTime, Utc};

use crate::upstream::types::ToolDescriptor;

// ─── Records ─────────────────────────────────────────────────────────────────

/// The authoritative record id: `"{server}.{tool}"`.
///
/// Dots inside either name are permitted; the pair is the key.
pub fn record_id(server: &str, tool: &str) -> String {
    format!("{server}.{tool}")
}

/// One entry in the vector store: metadata plus the embedding for one
/// `(server, tool)` pair. Replaced wholesale on reindex.
#[derive(Debug, Clone)]
pub struct ToolVectorRecord {
    pub id: String,
    pub server_name: String,
    pub tool_name: String,
    pub description: String,
    /// The parameter list as captured at discovery, serialized.
    pub parameters_json: String,
    pub parameter_count: usize,
    pub parameter_names: Vec<String>,
    /// Retained for debugging; search only needs the embedding.
    pub search_phrase: String,
    pub embedding: Vec<f32>,
    pub last_updated: DateTime<Utc>,
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// The published index state. Built off to the side during refresh and
/// swapped in as one unit, so readers observe either the full old state or
/// the full new state.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    /// Server name → tool descriptors, preserving config order for servers
    /// and upstream order for tools.
    pub by_server: Vec<(String, Vec<ToolDescriptor>)>,
    /// Record id → vector record, ordered for deterministic iteration.
    pub records: std::collections::BTreeMap<String, ToolVectorRecord>,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl IndexSnapshot {
    pub fn server_tools(&self, name: &str) -> Option<&[ToolDescriptor]> {
        self.by_server
            .iter()
            .find(|(server, _)| server == name)
            .map(|(_, tools)| tools.as_slice())
    }

    pub fn tool_count(&self) -> usize {
        self.by_server.iter().map(|(_, tools)| tools.len()).sum()
    }

    /// Find the descriptor backing a record.
    pub fn descriptor(&self, server: &str, tool: &str) -> Option<&ToolDescriptor> {
        self.server_tools(server)?
            .iter()
            .find(|t| t.name == tool)
    }
}

// ─── Search & stats ──────────────────────────────────────────────────────────

/// One ranked hit from a semantic search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub server_name: String,
    pub tool: ToolDescriptor,
    /// Cosine similarity clamped to `[0, 1]`.
    pub score: f32,
}

/// Outcome of one index refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStats {
    pub servers: usize,
    pub tools_indexed: usize,
    pub tools_skipped: usize,
    /// True when this caller observed another refresh complete while
    /// waiting and adopted its outcome.
    pub coalesced: bool,
}

/// Summary counts for the info surfaces.
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub collection_name: String,
    pub server_count: usize,
    pub tool_count: usize,
    /// `(server, tool_count)` in listing order.
    pub per_server: Vec<(String, usize)>,
    pub last_refresh: Option<DateTime<Utc>>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
