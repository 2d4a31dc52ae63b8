//! Upstream session error types.

use thiserror::Error;

/// Errors that can occur while managing or calling upstream MCP servers.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Server entry failed transport-specific validation.
    #[error("invalid config for server '{server}': {reason}")]
    ConfigInvalid { server: String, reason: String },

    /// Transport construction, handshake, or discovery failed during start.
    #[error("server '{server}' failed to start: {reason}")]
    StartFailed { server: String, reason: String },

    /// The server is disabled in config.
    #[error("server '{server}' is disabled")]
    Disabled { server: String },

    /// The server is not in the Running state.
    #[error("server '{server}' is not running (state: {state})")]
    NotRunning { server: String, state: String },

    /// No configured server has this name.
    #[error("unknown server '{server}'. Running servers: {running}")]
    UnknownServer { server: String, running: String },

    /// The requested tool is not in the server's current tool set.
    #[error("unknown tool '{tool}' on server '{server}'. Available tools: {available}")]
    UnknownTool {
        server: String,
        tool: String,
        available: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error).
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// Server returned a JSON-RPC error response.
    #[error("server '{server}' returned error [{code}]: {message}")]
    Server {
        server: String,
        code: i32,
        message: String,
    },

    /// A call or handshake exceeded its deadline.
    #[error("request '{method}' to server '{server}' timed out after {timeout_secs}s")]
    Timeout {
        server: String,
        method: String,
        timeout_secs: u64,
    },
}

impl UpstreamError {
    /// The server name this error concerns.
    pub fn server(&self) -> &str {
        match self {
            Self::ConfigInvalid { server, .. }
            | Self::StartFailed { server, .. }
            | Self::Disabled { server }
            | Self::NotRunning { server, .. }
            | Self::UnknownServer { server, .. }
            | Self::UnknownTool { server, .. }
            | Self::Transport { server, .. }
            | Self::Server { server, .. }
            | Self::Timeout { server, .. } => server,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_names_available() {
        let err = UpstreamError::UnknownTool {
            server: "serena".into(),
            tool: "nope".into(),
            available: "write_memory, read_memory".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("serena"));
        assert!(msg.contains("nope"));
        assert!(msg.contains("write_memory"));
    }

    #[test]
    fn test_server_accessor() {
        let err = UpstreamError::Disabled {
            server: "alpha".into(),
        };
        assert_eq!(err.server(), "alpha");
    }
}
