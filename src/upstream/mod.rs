//! Upstream server supervision — MCP sessions over stdio, streamable HTTP,
//! and SSE transports.
//!
//! This module handles:
//! - Spawning and managing stdio MCP server child processes
//! - Connecting to HTTP and SSE MCP servers
//! - JSON-RPC 2.0 framing and the MCP handshake
//! - Tool discovery (`tools/list`) and call forwarding (`tools/call`)
//! - Session lifecycle (start, refresh, graceful shutdown)

pub mod errors;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::UpstreamError;
pub use session::{SessionState, UpstreamSession};
pub use supervisor::Supervisor;
pub use types::{Parameter, ToolDescriptor};
