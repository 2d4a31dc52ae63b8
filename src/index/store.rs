//! The refreshable in-memory vector store over all discovered tools.
//!
//! Refresh builds a complete new snapshot off to the side and publishes it
//! by swapping one `Arc`; searches read whichever snapshot is published and
//! never observe a partial index.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::providers::EmbeddingProvider;
use crate::upstream::{Supervisor, UpstreamError};

use super::errors::IndexError;
use super::phrase::PhraseGenerator;
use super::types::{
    record_id, IndexInfo, IndexSnapshot, RefreshStats, SearchResult, ToolVectorRecord,
};

// ─── ToolIndex ───────────────────────────────────────────────────────────────

/// Searchable representation of every currently-discovered tool across all
/// running sessions.
pub struct ToolIndex {
    supervisor: Arc<Supervisor>,
    embedding: Arc<dyn EmbeddingProvider>,
    phrases: PhraseGenerator,
    collection_name: String,
    /// Embedding dimension, pinned by the first successful embedding for
    /// the process lifetime. 0 = not yet pinned.
    dimension: AtomicUsize,
    /// Dimension the config expects; a differing backend logs a warning.
    configured_dimension: usize,
    snapshot: std::sync::RwLock<Arc<IndexSnapshot>>,
    /// Serializes refreshes. Paired with `refresh_epoch` so queued callers
    /// coalesce onto a refresh that completed while they waited.
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_epoch: AtomicU64,
}

impl ToolIndex {
    pub fn new(
        supervisor: Arc<Supervisor>,
        embedding: Arc<dyn EmbeddingProvider>,
        phrases: PhraseGenerator,
        collection_name: String,
        configured_dimension: usize,
    ) -> Self {
        Self {
            supervisor,
            embedding,
            phrases,
            collection_name,
            dimension: AtomicUsize::new(0),
            configured_dimension,
            snapshot: std::sync::RwLock::new(Arc::new(IndexSnapshot::default())),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, snapshot: IndexSnapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }

    /// Whether phrase generation runs through the chat model.
    pub fn is_enhanced(&self) -> bool {
        self.phrases.is_enhanced()
    }

    // ─── Refresh ─────────────────────────────────────────────────────────

    /// Atomically rebuild the entire index from the running sessions.
    ///
    /// Per-tool embedding failures skip that tool; a dimension mismatch
    /// aborts the whole refresh and keeps the old snapshot. Concurrent
    /// callers coalesce: one that waited while another refresh completed
    /// adopts that outcome instead of re-running.
    pub async fn refresh(&self) -> Result<RefreshStats, IndexError> {
        let epoch_before = self.refresh_epoch.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.refresh_epoch.load(Ordering::Acquire) != epoch_before {
            let snapshot = self.snapshot();
            return Ok(RefreshStats {
                servers: snapshot.by_server.len(),
                tools_indexed: snapshot.records.len(),
                tools_skipped: 0,
                coalesced: true,
            });
        }

        let started = std::time::Instant::now();

        // Gather descriptors from all running sessions, preserving order.
        let sessions = self.supervisor.running();
        let mut by_server = Vec::with_capacity(sessions.len());
        let mut flat: Vec<(String, crate::upstream::ToolDescriptor)> = Vec::new();
        for session in &sessions {
            let tools = session.tools();
            for tool in &tools {
                flat.push((session.name().to_string(), tool.clone()));
            }
            by_server.push((session.name().to_string(), tools));
        }

        // All phrases are derived before any embedding is requested, to
        // avoid thrashing between backend models.
        let phrases = self.phrases.generate_all(&flat).await;

        let mut records = std::collections::BTreeMap::new();
        let mut skipped = 0usize;

        for ((server, tool), phrase) in flat.into_iter().zip(phrases) {
            let embedding = match self.embedding.embed(&phrase).await {
                Ok(vector) => vector,
                Err(e) => {
                    tracing::warn!(
                        server = %server,
                        tool = %tool.name,
                        error = %e,
                        "embedding failed, skipping tool in this index build"
                    );
                    skipped += 1;
                    continue;
                }
            };

            self.check_dimension(embedding.len())?;

            let id = record_id(&server, &tool.name);
            let parameter_names: Vec<String> =
                tool.parameters.iter().map(|p| p.name.clone()).collect();
            let parameters_json =
                serde_json::to_string(&tool.parameters).unwrap_or_else(|_| "[]".to_string());

            records.insert(
                id.clone(),
                ToolVectorRecord {
                    id,
                    server_name: server,
                    tool_name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters_json,
                    parameter_count: tool.parameters.len(),
                    parameter_names,
                    search_phrase: phrase,
                    embedding,
                    last_updated: Utc::now(),
                },
            );
        }

        let stats = RefreshStats {
            servers: by_server.len(),
            tools_indexed: records.len(),
            tools_skipped: skipped,
            coalesced: false,
        };

        self.publish(IndexSnapshot {
            by_server,
            records,
            last_refresh: Some(Utc::now()),
        });
        self.refresh_epoch.fetch_add(1, Ordering::AcqRel);

        tracing::info!(
            collection = %self.collection_name,
            servers = stats.servers,
            tools_indexed = stats.tools_indexed,
            tools_skipped = stats.tools_skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool index refreshed"
        );

        Ok(stats)
    }

    /// Pin the dimension on first use; reject anything else afterwards.
    fn check_dimension(&self, actual: usize) -> Result<(), IndexError> {
        let expected = self.dimension.load(Ordering::Acquire);
        if expected == 0 {
            self.dimension.store(actual, Ordering::Release);
            if actual != self.configured_dimension {
                tracing::warn!(
                    configured = self.configured_dimension,
                    actual,
                    "embedding dimension differs from configuration, using backend dimension"
                );
            }
            return Ok(());
        }
        if actual != expected {
            return Err(IndexError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    // ─── Lookups ─────────────────────────────────────────────────────────

    /// Snapshot of all servers and their tools.
    pub fn all_tools(&self) -> Vec<(String, Vec<crate::upstream::ToolDescriptor>)> {
        self.snapshot().by_server.clone()
    }

    /// Snapshot of one server's tools.
    pub fn server_tools(&self, name: &str) -> Option<Vec<crate::upstream::ToolDescriptor>> {
        self.snapshot().server_tools(name).map(|t| t.to_vec())
    }

    /// Summary counts for the info surfaces.
    pub fn info(&self) -> IndexInfo {
        let snapshot = self.snapshot();
        IndexInfo {
            collection_name: self.collection_name.clone(),
            server_count: snapshot.by_server.len(),
            tool_count: snapshot.tool_count(),
            per_server: snapshot
                .by_server
                .iter()
                .map(|(server, tools)| (server.clone(), tools.len()))
                .collect(),
            last_refresh: snapshot.last_refresh,
        }
    }

    // ─── Search ──────────────────────────────────────────────────────────

    /// Semantic search over the published snapshot.
    ///
    /// Returns at most `max_results` hits with cosine score `≥ min_score`,
    /// best first, ties broken by record id for determinism.
    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let snapshot = self.snapshot();
        if snapshot.records.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedding.embed(query).await?;
        let expected = self.dimension.load(Ordering::Acquire);
        if expected != 0 && query_embedding.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: query_embedding.len(),
            });
        }

        let ranked = rank_records(&snapshot, &query_embedding, max_results, min_score);

        let results = ranked
            .into_iter()
            .filter_map(|(id, score)| {
                let record = snapshot.records.get(&id)?;
                let tool = snapshot
                    .descriptor(&record.server_name, &record.tool_name)?
                    .clone();
                Some(SearchResult {
                    server_name: record.server_name.clone(),
                    tool,
                    score,
                })
            })
            .collect();

        Ok(results)
    }

    // ─── Call delegation ─────────────────────────────────────────────────

    /// Forward a call to the owning session.
    ///
    /// Server lookup is case-insensitive; the session resolves the tool
    /// name the same way and uses the exact name on the wire.
    pub async fn call(
        &self,
        server: &str,
        tool: &str,
        params: serde_json::Value,
    ) -> Result<String, UpstreamError> {
        let session =
            self.supervisor
                .get_ci(server)
                .ok_or_else(|| UpstreamError::UnknownServer {
                    server: server.to_string(),
                    running: self.supervisor.running_names().join(", "),
                })?;
        session.call(tool, params).await
    }
}

// ─── Ranking ─────────────────────────────────────────────────────────────────

/// Rank all records against a query embedding.
///
/// Returns `(record_id, score)` pairs: filtered by `min_score`, sorted by
/// score descending with id-ascending tie-break, truncated to `k`.
pub fn rank_records(
    snapshot: &IndexSnapshot,
    query: &[f32],
    k: usize,
    min_score: f32,
) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = snapshot
        .records
        .values()
        .map(|record| {
            (
                record.id.clone(),
                cosine_similarity(query, &record.embedding),
            )
        })
        .filter(|(_, score)| *score >= min_score)
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(k);
    scored
}

/// Cosine similarity clamped to `[0, 1]`.
///
/// Zero-magnitude vectors score 0. Callers guarantee equal lengths; the
/// shorter prefix is used defensively if they ever differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
