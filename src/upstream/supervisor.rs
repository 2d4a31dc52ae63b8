//! Fleet supervision across all configured upstream servers.
//!
//! The supervisor owns every `UpstreamSession` and fans lifecycle
//! operations out in parallel. Partial startup is normal: one server
//! failing never takes the others down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::UpstreamServerConfig;

use super::errors::UpstreamError;
use super::session::{SessionState, UpstreamSession};

/// Bound on `stop_all`; transports are forcibly dropped afterwards.
const STOP_ALL_GRACE: Duration = Duration::from_secs(10);

// ─── Supervisor ──────────────────────────────────────────────────────────────

/// Owns one session per configured server, enabled or not.
///
/// Disabled servers stay visible to lookups so callers get a precise
/// `disabled` answer instead of `unknown server`.
pub struct Supervisor {
    sessions: HashMap<String, Arc<UpstreamSession>>,
    /// Config order, for stable listings.
    order: Vec<String>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("order", &self.order)
            .finish()
    }
}

impl Supervisor {
    /// Build sessions from validated config entries.
    ///
    /// Duplicate names are rejected: the server name is the routing key.
    pub fn from_configs(configs: Vec<UpstreamServerConfig>) -> Result<Self, UpstreamError> {
        let mut sessions = HashMap::new();
        let mut order = Vec::new();

        for config in configs {
            config.validate().map_err(|e| {
                let reason = match e {
                    crate::config::ConfigError::InvalidServer { reason, .. } => reason,
                    other => other.to_string(),
                };
                UpstreamError::ConfigInvalid {
                    server: config.name.clone(),
                    reason,
                }
            })?;

            let name = config.name.clone();
            if sessions.contains_key(&name) {
                return Err(UpstreamError::ConfigInvalid {
                    server: name.clone(),
                    reason: "duplicate server name".to_string(),
                });
            }

            order.push(name.clone());
            sessions.insert(name, Arc::new(UpstreamSession::new(config)));
        }

        Ok(Self { sessions, order })
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start all enabled sessions in parallel.
    ///
    /// Returns `(started, total_enabled)`. Never fatal — failed sessions
    /// are logged by the session itself and left in `Failed`.
    pub async fn start_all(&self) -> (usize, usize) {
        let enabled: Vec<Arc<UpstreamSession>> = self
            .order
            .iter()
            .filter_map(|name| self.sessions.get(name))
            .filter(|s| s.is_enabled())
            .cloned()
            .collect();

        let total = enabled.len();

        let handles: Vec<_> = enabled
            .into_iter()
            .map(|session| tokio::spawn(async move { session.start().await }))
            .collect();

        let mut started = 0;
        for handle in handles {
            if matches!(handle.await, Ok(true)) {
                started += 1;
            }
        }

        tracing::info!(started, total, "upstream session startup complete");
        (started, total)
    }

    /// Stop every session, bounded by a grace period.
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self
            .sessions
            .values()
            .cloned()
            .map(|session| tokio::spawn(async move { session.stop().await }))
            .collect();

        let shutdown = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(STOP_ALL_GRACE, shutdown).await.is_err() {
            tracing::warn!(
                grace_secs = STOP_ALL_GRACE.as_secs(),
                "shutdown grace period elapsed, abandoning remaining sessions"
            );
        }

        tracing::info!("upstream sessions stopped");
    }

    /// Trigger tool re-discovery on every running session.
    pub async fn refresh_all_tools(&self) {
        let running = self.running();
        let handles: Vec<_> = running
            .into_iter()
            .map(|session| {
                tokio::spawn(async move {
                    if let Err(e) = session.refresh_tools().await {
                        tracing::warn!(
                            server = %e.server(),
                            error = %e,
                            "tool refresh failed for session"
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            let _ = handle.await;
        }
    }

    // ─── Lookup ──────────────────────────────────────────────────────────

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<Arc<UpstreamSession>> {
        self.sessions.get(name).cloned()
    }

    /// Case-insensitive lookup, preferring an exact match.
    pub fn get_ci(&self, name: &str) -> Option<Arc<UpstreamSession>> {
        if let Some(session) = self.sessions.get(name) {
            return Some(session.clone());
        }
        self.sessions
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, session)| session.clone())
    }

    /// Sessions currently in `Running`, in config order.
    pub fn running(&self) -> Vec<Arc<UpstreamSession>> {
        self.order
            .iter()
            .filter_map(|name| self.sessions.get(name))
            .filter(|s| s.state() == SessionState::Running)
            .cloned()
            .collect()
    }

    /// All sessions in config order.
    pub fn all(&self) -> Vec<Arc<UpstreamSession>> {
        self.order
            .iter()
            .filter_map(|name| self.sessions.get(name))
            .cloned()
            .collect()
    }

    /// Number of running sessions.
    pub fn running_count(&self) -> usize {
        self.running().len()
    }

    /// Names of all running sessions.
    pub fn running_names(&self) -> Vec<String> {
        self.running()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    // ─── Test support ────────────────────────────────────────────────────

    /// Build a supervisor over pre-constructed sessions.
    #[cfg(test)]
    pub(crate) fn from_sessions(sessions: Vec<Arc<UpstreamSession>>) -> Self {
        let order: Vec<String> = sessions.iter().map(|s| s.name().to_string()).collect();
        let map = sessions
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();
        Self {
            sessions: map,
            order,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use crate::upstream::types::{RawToolDefinition, ToolDescriptor};

    fn config(name: &str, enabled: bool) -> UpstreamServerConfig {
        UpstreamServerConfig {
            name: name.to_string(),
            description: String::new(),
            transport: TransportKind::Stdio,
            command: Some("true".to_string()),
            args: Vec::new(),
            env: Default::default(),
            work_dir: None,
            url: None,
            enabled,
            tools: Vec::new(),
        }
    }

    fn running_session(name: &str, tool_names: &[&str]) -> Arc<UpstreamSession> {
        let tools = tool_names
            .iter()
            .map(|t| {
                ToolDescriptor::from_raw(RawToolDefinition {
                    name: t.to_string(),
                    description: format!("does {t}"),
                    input_schema: serde_json::json!({}),
                })
            })
            .collect();
        Arc::new(UpstreamSession::with_discovered_tools(
            config(name, true),
            tools,
        ))
    }

    #[test]
    fn test_from_configs_rejects_duplicates() {
        let err =
            Supervisor::from_configs(vec![config("a", true), config("a", true)]).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_from_configs_rejects_invalid() {
        let mut bad = config("a", true);
        bad.command = None;
        let err = Supervisor::from_configs(vec![bad]).unwrap_err();
        assert!(matches!(err, UpstreamError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_get_exact_and_ci() {
        let supervisor = Supervisor::from_sessions(vec![running_session("Serena", &["t"])]);
        assert!(supervisor.get("Serena").is_some());
        assert!(supervisor.get("serena").is_none());
        assert!(supervisor.get_ci("serena").is_some());
        assert!(supervisor.get_ci("SERENA").is_some());
        assert!(supervisor.get_ci("missing").is_none());
    }

    #[test]
    fn test_running_preserves_config_order() {
        let supervisor = Supervisor::from_sessions(vec![
            running_session("zeta", &["t1"]),
            running_session("alpha", &["t2"]),
        ]);
        let names = supervisor.running_names();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_disabled_sessions_visible_but_not_running() {
        let disabled = Arc::new(UpstreamSession::new(config("off", false)));
        let supervisor = Supervisor::from_sessions(vec![disabled]);
        assert!(supervisor.get("off").is_some());
        assert_eq!(supervisor.running_count(), 0);
    }

    #[tokio::test]
    async fn test_start_all_with_no_enabled_sessions() {
        let supervisor = Supervisor::from_configs(vec![config("a", false)]).unwrap();
        let (started, total) = supervisor.start_all().await;
        assert_eq!(started, 0);
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_start_all_survives_failures() {
        let mut bad = config("bad", true);
        bad.command = Some("/nonexistent/binary".to_string());
        let supervisor = Supervisor::from_configs(vec![bad]).unwrap();

        let (started, total) = supervisor.start_all().await;
        assert_eq!(started, 0);
        assert_eq!(total, 1);
        assert_eq!(
            supervisor.get("bad").unwrap().state(),
            SessionState::Failed
        );
    }

    #[tokio::test]
    async fn test_stop_all_is_idempotent() {
        let supervisor =
            Supervisor::from_sessions(vec![running_session("a", &["t"])]);
        supervisor.stop_all().await;
        assert_eq!(supervisor.running_count(), 0);
        supervisor.stop_all().await;
    }
}
