//! Per-server session lifecycle.
//!
//! Each upstream MCP server gets one `UpstreamSession` that owns its
//! transport exclusively. Callers go through the session's request/reply
//! surface and never touch the transport directly.

use std::time::Duration;

use tokio::process::Command;

use crate::config::{TransportKind, UpstreamServerConfig};

use super::errors::UpstreamError;
use super::transport::{self, HttpTransport, SseTransport, StdioTransport, Transport};
use super::types::{
    initialize_params, ToolCallResult, ToolDescriptor, ToolsListResult,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for the initialize handshake and tool discovery.
///
/// Generous because stdio servers routinely import heavyweight runtimes
/// (node, Python ML stacks) before they answer.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a forwarded `tools/call`.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for graceful child exit before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Session state ───────────────────────────────────────────────────────────

/// Lifecycle state of one upstream session.
///
/// `Failed` is terminal until an explicit re-start; `stop` is safe from
/// any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Failed,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

/// A live connection: the transport plus, for stdio, the owned child.
struct Connection {
    transport: Transport,
    child: Option<tokio::process::Child>,
}

// ─── UpstreamSession ─────────────────────────────────────────────────────────

/// One managed upstream MCP server.
pub struct UpstreamSession {
    config: UpstreamServerConfig,
    state: std::sync::RwLock<SessionState>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    /// `Some` once discovery has completed at least once; until then the
    /// configured fallback tool names are advertised.
    discovered: std::sync::RwLock<Option<Vec<ToolDescriptor>>>,
    call_timeout: Duration,
}

impl UpstreamSession {
    pub fn new(config: UpstreamServerConfig) -> Self {
        Self {
            config,
            state: std::sync::RwLock::new(SessionState::Stopped),
            connection: tokio::sync::Mutex::new(None),
            discovered: std::sync::RwLock::new(None),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Current tool descriptors.
    ///
    /// Before discovery has completed, falls back to the configured tool
    /// names with empty descriptions.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        let discovered = self.discovered.read().unwrap_or_else(|e| e.into_inner());
        match discovered.as_ref() {
            Some(tools) => tools.clone(),
            None => self
                .config
                .tools
                .iter()
                .map(|name| ToolDescriptor::placeholder(name))
                .collect(),
        }
    }

    /// Whether `tools/list` has succeeded at least once on this session.
    pub fn has_discovered(&self) -> bool {
        self.discovered
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Resolve a tool name case-insensitively against the current set,
    /// returning the exact upstream-reported name.
    pub fn resolve_tool(&self, name: &str) -> Option<String> {
        let tools = self.tools();
        if let Some(tool) = tools.iter().find(|t| t.name == name) {
            return Some(tool.name.clone());
        }
        tools
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .map(|t| t.name.clone())
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Start the session: construct the transport, perform the MCP
    /// handshake, and discover tools.
    ///
    /// Idempotent — returns true immediately if already running. On any
    /// failure the partial connection is cleaned up, the session goes
    /// `Failed`, and false is returned; other sessions are unaffected.
    pub async fn start(&self) -> bool {
        if !self.config.enabled {
            tracing::debug!(server = %self.config.name, "session disabled, not starting");
            return false;
        }
        if self.state() == SessionState::Running {
            return true;
        }

        self.set_state(SessionState::Starting);

        match self.connect_and_discover().await {
            Ok(connection) => {
                let mut guard = self.connection.lock().await;
                *guard = Some(connection);
                drop(guard);
                self.set_state(SessionState::Running);

                let tool_count = self.tools().len();
                tracing::info!(
                    server = %self.config.name,
                    transport = %self.config.transport,
                    tools = tool_count,
                    "upstream session started"
                );
                true
            }
            Err(e) => {
                self.set_state(SessionState::Failed);
                tracing::warn!(
                    server = %self.config.name,
                    error = %e,
                    "upstream session failed to start (non-fatal)"
                );
                false
            }
        }
    }

    /// Build the transport, handshake, and run initial discovery.
    async fn connect_and_discover(&self) -> Result<Connection, UpstreamError> {
        let mut connection = self.open_transport().await?;

        if let Err(e) = self.discover_on(&connection.transport).await {
            Self::close_child(&self.config.name, connection.child.take()).await;
            return Err(e);
        }

        Ok(connection)
    }

    async fn open_transport(&self) -> Result<Connection, UpstreamError> {
        let name = &self.config.name;

        match self.config.transport {
            TransportKind::Stdio => self.spawn_stdio().await,
            TransportKind::Sse => {
                let url = self.config.url.as_deref().unwrap_or_default();
                let sse = SseTransport::connect(name, url).await?;
                let transport = Transport::Sse(sse);
                self.handshake_on(&transport).await?;
                Ok(Connection {
                    transport,
                    child: None,
                })
            }
            TransportKind::Http | TransportKind::StreamableHttp => {
                let url = self.config.url.as_deref().unwrap_or_default();
                let http = HttpTransport::new(name, url)?;
                let transport = Transport::Http(http);
                match self.handshake_on(&transport).await {
                    Ok(()) => Ok(Connection {
                        transport,
                        child: None,
                    }),
                    Err(e) => {
                        tracing::debug!(
                            server = %name,
                            error = %e,
                            "streamable HTTP handshake failed, trying SSE fallback"
                        );
                        let sse = SseTransport::connect(name, url).await?;
                        let transport = Transport::Sse(sse);
                        self.handshake_on(&transport).await?;
                        tracing::info!(server = %name, "fell back to SSE transport");
                        Ok(Connection {
                            transport,
                            child: None,
                        })
                    }
                }
            }
        }
    }

    /// Spawn the stdio child and handshake. stderr is captured so a failed
    /// start can include the server's own diagnostics.
    async fn spawn_stdio(&self) -> Result<Connection, UpstreamError> {
        let name = &self.config.name;
        let command = self.config.command.as_deref().ok_or_else(|| {
            UpstreamError::ConfigInvalid {
                server: name.clone(),
                reason: "stdio transport requires a Command".to_string(),
            }
        })?;

        let mut cmd = Command::new(command);
        cmd.args(&self.config.args);

        // Environment goes to the child process only, never this process.
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let work_dir = self
            .config
            .work_dir
            .clone()
            .map(std::path::PathBuf::from)
            .or_else(dirs::home_dir);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| UpstreamError::StartFailed {
            server: name.clone(),
            reason: format!("failed to spawn '{command}': {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| UpstreamError::StartFailed {
            server: name.clone(),
            reason: "failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| UpstreamError::StartFailed {
            server: name.clone(),
            reason: "failed to capture stdout".to_string(),
        })?;
        let stderr_handle = child.stderr.take();

        let transport = Transport::Stdio(StdioTransport::new(name, stdin, stdout));

        if let Err(e) = self.handshake_on(&transport).await {
            let stderr_ctx = read_stderr_on_failure(stderr_handle).await;
            let _ = child.kill().await;
            let reason = if stderr_ctx.is_empty() {
                e.to_string()
            } else {
                format!("{e} | stderr: {}", stderr_ctx.trim())
            };
            return Err(UpstreamError::StartFailed {
                server: name.clone(),
                reason,
            });
        }

        Ok(Connection {
            transport,
            child: Some(child),
        })
    }

    /// Perform the MCP handshake on a candidate transport.
    async fn handshake_on(&self, transport: &Transport) -> Result<(), UpstreamError> {
        let name = &self.config.name;

        let response = tokio::time::timeout(
            INIT_TIMEOUT,
            transport.request("initialize", Some(initialize_params())),
        )
        .await
        .map_err(|_| UpstreamError::Timeout {
            server: name.clone(),
            method: "initialize".to_string(),
            timeout_secs: INIT_TIMEOUT.as_secs(),
        })??;

        transport::extract_result(name, response)?;

        // Some servers work without it, so a failed initialized notification
        // is downgraded to a warning.
        if let Err(e) = transport.notify("notifications/initialized", None).await {
            tracing::warn!(server = %name, error = %e, "initialized notification failed");
        }

        Ok(())
    }

    /// Run `tools/list` on a transport and store the result.
    async fn discover_on(&self, transport: &Transport) -> Result<(), UpstreamError> {
        let tools = self.list_tools_on(transport).await?;
        let mut guard = self.discovered.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(tools);
        Ok(())
    }

    async fn list_tools_on(
        &self,
        transport: &Transport,
    ) -> Result<Vec<ToolDescriptor>, UpstreamError> {
        let name = &self.config.name;

        let response = tokio::time::timeout(INIT_TIMEOUT, transport.request("tools/list", None))
            .await
            .map_err(|_| UpstreamError::Timeout {
                server: name.clone(),
                method: "tools/list".to_string(),
                timeout_secs: INIT_TIMEOUT.as_secs(),
            })??;

        let result = transport::extract_result(name, response)?;
        let list: ToolsListResult =
            serde_json::from_value(result).map_err(|e| UpstreamError::Transport {
                server: name.clone(),
                reason: format!("failed to parse tools/list response: {e}"),
            })?;

        Ok(list.tools.into_iter().map(ToolDescriptor::from_raw).collect())
    }

    /// Re-run tool discovery on a running session.
    ///
    /// An empty result retains the previous list: a transient empty
    /// response must not degrade a good index.
    pub async fn refresh_tools(&self) -> Result<(), UpstreamError> {
        if self.state() != SessionState::Running {
            return Err(UpstreamError::NotRunning {
                server: self.config.name.clone(),
                state: self.state().to_string(),
            });
        }

        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or_else(|| UpstreamError::NotRunning {
            server: self.config.name.clone(),
            state: self.state().to_string(),
        })?;

        let tools = self.list_tools_on(&connection.transport).await?;
        drop(guard);

        if tools.is_empty() && self.has_discovered() {
            tracing::warn!(
                server = %self.config.name,
                "tools/list returned empty on refresh, keeping previous tool list"
            );
            return Ok(());
        }

        let count = tools.len();
        let mut discovered = self.discovered.write().unwrap_or_else(|e| e.into_inner());
        *discovered = Some(tools);
        drop(discovered);

        tracing::debug!(server = %self.config.name, tools = count, "tool list refreshed");
        Ok(())
    }

    /// Forward a `tools/call` to this server and flatten the text content.
    pub async fn call(
        &self,
        tool_name: &str,
        params: serde_json::Value,
    ) -> Result<String, UpstreamError> {
        let name = &self.config.name;

        if !self.config.enabled {
            return Err(UpstreamError::Disabled {
                server: name.clone(),
            });
        }
        if self.state() != SessionState::Running {
            return Err(UpstreamError::NotRunning {
                server: name.clone(),
                state: self.state().to_string(),
            });
        }

        // Case-insensitive lookup; the exact upstream name goes on the wire.
        let wire_name = self.resolve_tool(tool_name).ok_or_else(|| {
            let available = self
                .tools()
                .iter()
                .map(|t| t.name.clone())
                .collect::<Vec<_>>()
                .join(", ");
            UpstreamError::UnknownTool {
                server: name.clone(),
                tool: tool_name.to_string(),
                available,
            }
        })?;

        let params = serde_json::json!({
            "name": wire_name,
            "arguments": params,
        });

        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or_else(|| UpstreamError::NotRunning {
            server: name.clone(),
            state: self.state().to_string(),
        })?;

        let response = tokio::time::timeout(
            self.call_timeout,
            connection.transport.request("tools/call", Some(params)),
        )
        .await
        .map_err(|_| UpstreamError::Timeout {
            server: name.clone(),
            method: format!("tools/call ({wire_name})"),
            timeout_secs: self.call_timeout.as_secs(),
        })??;
        drop(guard);

        let result = transport::extract_result(name, response)?;
        let call_result: ToolCallResult =
            serde_json::from_value(result).map_err(|e| UpstreamError::Transport {
                server: name.clone(),
                reason: format!("failed to parse tools/call response: {e}"),
            })?;

        let text = call_result.flatten_text();
        if call_result.is_error {
            return Err(UpstreamError::Server {
                server: name.clone(),
                code: super::types::error_codes::INTERNAL_ERROR,
                message: if text.is_empty() {
                    format!("tool '{wire_name}' reported an error")
                } else {
                    text
                },
            });
        }

        Ok(text)
    }

    /// Stop the session: close the connection, clear discovered state.
    ///
    /// Safe from any state.
    pub async fn stop(&self) {
        if self.state() == SessionState::Stopped {
            return;
        }
        self.set_state(SessionState::Stopping);

        let connection = self.connection.lock().await.take();
        if let Some(mut connection) = connection {
            Self::close_child(&self.config.name, connection.child.take()).await;
            // Dropping the transport closes HTTP/SSE resources and aborts
            // the SSE reader task.
            drop(connection);
        }

        let mut discovered = self.discovered.write().unwrap_or_else(|e| e.into_inner());
        *discovered = None;
        drop(discovered);

        self.set_state(SessionState::Stopped);
        tracing::debug!(server = %self.config.name, "upstream session stopped");
    }

    /// Wait briefly for a child to exit, then kill it.
    async fn close_child(name: &str, child: Option<tokio::process::Child>) {
        let Some(mut child) = child else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %name, status = %status, "child exited");
            }
            _ => {
                let _ = child.kill().await;
                tracing::debug!(server = %name, "child force-killed after grace period");
            }
        }
    }

    // ─── Test support ────────────────────────────────────────────────────

    /// Build a session that reports `Running` with a fixed discovered tool
    /// set and no live transport.
    #[cfg(test)]
    pub(crate) fn with_discovered_tools(
        config: UpstreamServerConfig,
        tools: Vec<ToolDescriptor>,
    ) -> Self {
        let session = Self::new(config);
        session.set_state(SessionState::Running);
        *session.discovered.write().unwrap() = Some(tools);
        session
    }

    /// Simulate an upstream tool-list change without a live transport.
    #[cfg(test)]
    pub(crate) fn set_discovered_tools(&self, tools: Vec<ToolDescriptor>) {
        *self.discovered.write().unwrap() = Some(tools);
    }
}

/// Read any available stderr output from a failed stdio server.
///
/// Short timeout so an empty pipe doesn't block the start path; truncated
/// to keep log messages readable.
async fn read_stderr_on_failure(stderr_handle: Option<tokio::process::ChildStderr>) -> String {
    use tokio::io::AsyncReadExt;

    let Some(mut stderr) = stderr_handle else {
        return String::new();
    };

    let mut buf = String::new();
    match tokio::time::timeout(Duration::from_millis(500), stderr.read_to_string(&mut buf)).await {
        Ok(Ok(_)) => {
            if buf.len() > 2000 {
                buf.truncate(2000);
                buf.push_str("...(truncated)");
            }
            buf
        }
        _ => String::new(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::types::RawToolDefinition;

    fn stdio_config(name: &str, enabled: bool) -> UpstreamServerConfig {
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

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::from_raw(RawToolDefinition {
            name: name.to_string(),
            description: format!("Test tool {name}"),
            input_schema: serde_json::json!({}),
        })
    }

    #[test]
    fn test_new_session_is_stopped() {
        let session = UpstreamSession::new(stdio_config("a", true));
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.has_discovered());
    }

    #[test]
    fn test_tools_fall_back_to_configured_names() {
        let mut config = stdio_config("a", true);
        config.tools = vec!["t1".to_string(), "t2".to_string()];
        let session = UpstreamSession::new(config);

        let tools = session.tools();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "t1");
        assert!(tools[0].description.is_empty());
    }

    #[test]
    fn test_resolve_tool_case_insensitive() {
        let session = UpstreamSession::with_discovered_tools(
            stdio_config("a", true),
            vec![descriptor("Write_Memory"), descriptor("read_memory")],
        );

        // Exact name wins
        assert_eq!(
            session.resolve_tool("Write_Memory").as_deref(),
            Some("Write_Memory")
        );
        // Case-insensitive lookup resolves to the exact upstream name
        assert_eq!(
            session.resolve_tool("write_memory").as_deref(),
            Some("Write_Memory")
        );
        assert_eq!(session.resolve_tool("nonexistent"), None);
    }

    #[tokio::test]
    async fn test_call_on_disabled_session() {
        let session = UpstreamSession::new(stdio_config("a", false));
        let err = session.call("t1", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Disabled { .. }));
    }

    #[tokio::test]
    async fn test_call_on_stopped_session() {
        let session = UpstreamSession::new(stdio_config("a", true));
        let err = session.call("t1", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotRunning { .. }));
        assert!(err.to_string().contains("stopped"));
    }

    #[tokio::test]
    async fn test_call_unknown_tool_lists_available() {
        let session = UpstreamSession::with_discovered_tools(
            stdio_config("a", true),
            vec![descriptor("t1"), descriptor("t2")],
        );
        let err = session
            .call("nope", serde_json::json!({}))
            .await
            .unwrap_err();
        match err {
            UpstreamError::UnknownTool { available, .. } => {
                assert!(available.contains("t1"));
                assert!(available.contains("t2"));
            }
            other => panic!("expected UnknownTool, got: {other}"),
        }
    }

    #[tokio::test]
    async fn test_start_disabled_returns_false() {
        let session = UpstreamSession::new(stdio_config("a", false));
        assert!(!session.start().await);
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_start_failure_goes_failed() {
        let mut config = stdio_config("a", true);
        config.command = Some("/nonexistent/mcp-server-binary".to_string());
        let session = UpstreamSession::new(config);

        assert!(!session.start().await);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_stop_from_any_state() {
        let session = UpstreamSession::with_discovered_tools(
            stdio_config("a", true),
            vec![descriptor("t1")],
        );
        assert_eq!(session.state(), SessionState::Running);

        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(!session.has_discovered());

        // Stopping again is a no-op
        session.stop().await;
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_refresh_on_stopped_session_fails() {
        let session = UpstreamSession::new(stdio_config("a", true));
        let err = session.refresh_tools().await.unwrap_err();
        assert!(matches!(err, UpstreamError::NotRunning { .. }));
    }
}
