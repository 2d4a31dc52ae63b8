//! Shared types for upstream MCP sessions.
//!
//! JSON-RPC 2.0 message frames and the MCP protocol structures exchanged
//! with upstream servers (`initialize`, `tools/list`, `tools/call`).

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── MCP protocol types ──────────────────────────────────────────────────────

/// Client identification sent in the `initialize` handshake.
pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

/// Payload of a `tools/list` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<RawToolDefinition>,
}

/// A tool definition as reported by an upstream server.
#[derive(Debug, Clone, Deserialize)]
pub struct RawToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Payload of a `tools/call` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// One content block of a tool result. Only text blocks are surfaced;
/// images and resources are ignored when flattening.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

impl ToolCallResult {
    /// Join all text blocks with newlines, dropping non-text blocks.
    pub fn flatten_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Tool descriptors ────────────────────────────────────────────────────────

/// A discovered tool with parameters derived from its input schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    /// The raw JSON schema as reported upstream, passed through on re-export.
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Build a descriptor from an upstream tool definition.
    pub fn from_raw(raw: RawToolDefinition) -> Self {
        let parameters = derive_parameters(&raw.input_schema);
        Self {
            name: raw.name,
            description: raw.description,
            parameters,
            input_schema: raw.input_schema,
        }
    }

    /// Placeholder descriptor for a configured tool name when discovery has
    /// not completed yet.
    pub fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            parameters: Vec::new(),
            input_schema: serde_json::json!({}),
        }
    }
}

/// One parameter of a tool, derived from the schema's `properties` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub description: String,
    pub required: bool,
}

/// Derive the parameter list from a JSON schema object.
///
/// Reads `properties` for names, types, and descriptions, and `required`
/// for the required flags. A schema `type` that is an array (nullable
/// unions) contributes its first element.
pub fn derive_parameters(schema: &serde_json::Value) -> Vec<Parameter> {
    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    properties
        .iter()
        .map(|(name, prop)| {
            let type_name = match prop.get("type") {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Array(arr)) => arr
                    .first()
                    .and_then(|v| v.as_str())
                    .unwrap_or("string")
                    .to_string(),
                _ => "string".to_string(),
            };
            let description = prop
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("")
                .to_string();

            Parameter {
                name: name.clone(),
                type_name,
                description,
                required: required.contains(&name.as_str()),
            }
        })
        .collect()
}

// ─── Standard JSON-RPC error codes ───────────────────────────────────────────

/// Well-known JSON-RPC / MCP error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
