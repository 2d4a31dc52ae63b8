//! Toolscope — an MCP tool-aggregation proxy with semantic tool discovery.
//!
//! Fronts a fleet of upstream MCP servers (stdio, streamable HTTP, SSE)
//! behind a single MCP endpoint. Instead of pushing every upstream tool
//! into a client's context window, clients query in natural language and
//! get back a small ranked set of tools with ready-to-use invocation
//! templates.
//!
//! Module layout follows the dependency order: providers (embedding/chat
//! backends) → upstream (session supervision) → index (vector store and
//! search) → server (meta-tools and HTTP front-end).

pub mod config;
pub mod index;
pub mod providers;
pub mod server;
pub mod upstream;

pub use config::AppConfig;
pub use index::{PhraseGenerator, ToolIndex};
pub use server::{AppState, MetaToolHandler};
pub use upstream::Supervisor;
