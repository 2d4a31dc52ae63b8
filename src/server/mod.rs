//! The MCP front-end served to downstream clients.
//!
//! - `meta`: the five meta-tools and their rendering
//! - `rpc`: serving-side JSON-RPC frames
//! - `http`: the axum router (`/mcp`, `/health`, `/tool-index-info`,
//!   `/search-tools`) and graceful shutdown

pub mod http;
pub mod meta;
pub mod rpc;

pub use http::{router, shutdown_signal, AppState};
pub use meta::{meta_tool_definitions, MetaToolHandler};
