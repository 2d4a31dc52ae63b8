//! The meta-tool surface advertised to downstream MCP clients.
//!
//! Five tools: semantic search, full listing, index info, call forwarding,
//! and index refresh. All outputs are plain text (or a JSON string) shaped
//! for direct consumption by an LLM caller; error strings start with
//! "Error " and name the failing subject.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::index::{SearchResult, ToolIndex};
use crate::upstream::types::Parameter;
use crate::upstream::Supervisor;

// ─── Definitions ─────────────────────────────────────────────────────────────

/// Tool definitions for `tools/list`, in MCP schema form.
pub fn meta_tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "search_tools_semantic",
            "description": "Search all connected MCP servers for tools matching a natural-language query. \
                            Returns the most relevant tools with ready-to-use invocation templates.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural-language description of what you want to do"
                    },
                    "maxResults": {
                        "type": "integer",
                        "description": "Maximum number of tools to return (default 5)"
                    },
                    "minRelevanceScore": {
                        "type": "number",
                        "description": "Minimum relevance score between 0 and 1 (default 0.55)"
                    }
                },
                "required": ["query"]
            }
        }),
        json!({
            "name": "list_all_servers_and_tools_json",
            "description": "List every connected MCP server and its tools as a JSON document.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "get_tool_index_info",
            "description": "Summarize the tool index: server count, tool count, and per-server tool counts.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "call_external_tool",
            "description": "Invoke a tool on one of the connected MCP servers and return its text output.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "serverName": {"type": "string", "description": "Name of the upstream server"},
                    "toolName": {"type": "string", "description": "Name of the tool to invoke"},
                    "parameters": {"type": "object", "description": "Arguments for the tool"}
                },
                "required": ["serverName", "toolName"]
            }
        }),
        json!({
            "name": "refresh_tool_index",
            "description": "Re-discover tools on every running server and rebuild the semantic index.",
            "inputSchema": {"type": "object", "properties": {}}
        }),
    ]
}

// ─── Handler ─────────────────────────────────────────────────────────────────

/// Output of one meta-tool invocation.
#[derive(Debug, Clone)]
pub struct MetaToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl MetaToolOutput {
    fn ok(text: String) -> Self {
        Self {
            text,
            is_error: false,
        }
    }

    fn err(text: String) -> Self {
        Self {
            text,
            is_error: true,
        }
    }
}

/// Dispatches meta-tool calls against the index and supervisor.
pub struct MetaToolHandler {
    index: Arc<ToolIndex>,
    supervisor: Arc<Supervisor>,
}

impl MetaToolHandler {
    pub fn new(index: Arc<ToolIndex>, supervisor: Arc<Supervisor>) -> Self {
        Self { index, supervisor }
    }

    pub async fn dispatch(&self, tool_name: &str, arguments: &Value) -> MetaToolOutput {
        match tool_name {
            "search_tools_semantic" => self.search_tools(arguments).await,
            "list_all_servers_and_tools_json" => self.list_all_json(),
            "get_tool_index_info" => self.index_info(),
            "call_external_tool" => self.call_external(arguments).await,
            "refresh_tool_index" => self.refresh().await,
            other => MetaToolOutput::err(format!(
                "Error: unknown tool '{other}'. Available tools: search_tools_semantic, \
                 list_all_servers_and_tools_json, get_tool_index_info, call_external_tool, \
                 refresh_tool_index."
            )),
        }
    }

    async fn search_tools(&self, args: &Value) -> MetaToolOutput {
        let Some(query) = args.get("query").and_then(|q| q.as_str()) else {
            return MetaToolOutput::err(
                "Error: search_tools_semantic requires a 'query' string argument.".to_string(),
            );
        };
        if query.trim().is_empty() {
            return MetaToolOutput::err(
                "Error: search_tools_semantic requires a non-empty query.".to_string(),
            );
        }

        let max_results = args
            .get("maxResults")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as usize;
        let min_score = args
            .get("minRelevanceScore")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.55) as f32;

        match self.index.search(query, max_results, min_score).await {
            Ok(results) if results.is_empty() => MetaToolOutput::ok(format!(
                "No tools found matching \"{query}\" with relevance score >= {min_score:.2}. \
                 Try lowering minRelevanceScore or calling refresh_tool_index."
            )),
            Ok(results) => MetaToolOutput::ok(render_search_results(query, &results)),
            Err(e) => MetaToolOutput::err(format!(
                "Error searching tools for \"{query}\": {e}. \
                 Check that the embedding backend is reachable, then retry."
            )),
        }
    }

    fn list_all_json(&self) -> MetaToolOutput {
        let servers = self.index.all_tools();
        let total_tools: usize = servers.iter().map(|(_, tools)| tools.len()).sum();

        let servers_json: Vec<Value> = servers
            .iter()
            .map(|(name, tools)| {
                json!({
                    "serverName": name,
                    "toolCount": tools.len(),
                    "tools": tools.iter().map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters.iter().map(|p| {
                                json!({
                                    "name": p.name,
                                    "type": p.type_name,
                                    "description": p.description,
                                    "required": p.required,
                                })
                            }).collect::<Vec<_>>(),
                        })
                    }).collect::<Vec<_>>(),
                })
            })
            .collect();

        let document = json!({
            "totalServers": servers.len(),
            "totalTools": total_tools,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "servers": servers_json,
        });

        match serde_json::to_string_pretty(&document) {
            Ok(text) => MetaToolOutput::ok(text),
            Err(e) => MetaToolOutput::err(format!("Error serializing server listing: {e}.")),
        }
    }

    fn index_info(&self) -> MetaToolOutput {
        let info = self.index.info();
        let mut text = format!(
            "MCP tool-aggregation proxy\n\
             Phrase generation: {}\n\
             Collection: {}\n\
             Servers: {}\n\
             Tools: {}\n",
            if self.index.is_enhanced() {
                "LLM-assisted"
            } else {
                "heuristic template"
            },
            info.collection_name,
            info.server_count,
            info.tool_count,
        );

        if !info.per_server.is_empty() {
            let per_server: Vec<String> = info
                .per_server
                .iter()
                .map(|(server, count)| format!("{server} ({count})"))
                .collect();
            text.push_str(&format!("Per server: {}\n", per_server.join(", ")));
        }
        if let Some(at) = info.last_refresh {
            text.push_str(&format!("Last refresh: {}\n", at.to_rfc3339()));
        }

        MetaToolOutput::ok(text)
    }

    async fn call_external(&self, args: &Value) -> MetaToolOutput {
        let Some(server) = args.get("serverName").and_then(|v| v.as_str()) else {
            return MetaToolOutput::err(
                "Error: call_external_tool requires a 'serverName' string argument.".to_string(),
            );
        };
        let Some(tool) = args.get("toolName").and_then(|v| v.as_str()) else {
            return MetaToolOutput::err(
                "Error: call_external_tool requires a 'toolName' string argument.".to_string(),
            );
        };

        let params = args.get("parameters").cloned().unwrap_or_else(|| json!({}));
        if !params.is_object() {
            return MetaToolOutput::err(format!(
                "Error: 'parameters' for {server}.{tool} must be a JSON object."
            ));
        }

        match self.index.call(server, tool, params).await {
            Ok(text) => MetaToolOutput::ok(text),
            Err(e) => MetaToolOutput::err(format!(
                "Error calling '{tool}' on server '{server}': {e}. \
                 Use list_all_servers_and_tools_json to check available tools, \
                 or refresh_tool_index if servers changed."
            )),
        }
    }

    async fn refresh(&self) -> MetaToolOutput {
        self.supervisor.refresh_all_tools().await;

        match self.index.refresh().await {
            Ok(stats) => {
                let mut text = format!(
                    "Tool index refreshed: {} tools across {} servers.",
                    stats.tools_indexed, stats.servers
                );
                if stats.tools_skipped > 0 {
                    text.push_str(&format!(
                        " {} tools were skipped because their embeddings failed.",
                        stats.tools_skipped
                    ));
                }
                if stats.coalesced {
                    text.push_str(" (adopted a refresh that was already in flight)");
                }
                MetaToolOutput::ok(text)
            }
            Err(e) => MetaToolOutput::err(format!(
                "Error refreshing tool index: {e}. The previous index is still active."
            )),
        }
    }
}

// ─── Search result rendering ─────────────────────────────────────────────────

/// Render ranked results as blocks with invocation envelopes.
pub fn render_search_results(query: &str, results: &[SearchResult]) -> String {
    let mut blocks = vec![format!(
        "Found {} tool{} matching \"{query}\":",
        results.len(),
        if results.len() == 1 { "" } else { "s" },
    )];

    for result in results {
        let mut block = format!(
            "## {}.{} (score: {:.3})\n{}",
            result.server_name,
            result.tool.name,
            result.score,
            if result.tool.description.is_empty() {
                "(no description)"
            } else {
                result.tool.description.as_str()
            },
        );

        if !result.tool.parameters.is_empty() {
            block.push_str("\nParameters:");
            for param in &result.tool.parameters {
                block.push_str(&format!(
                    "\n  - {} ({}) ({}): {}",
                    param.name,
                    param.type_name,
                    if param.required { "required" } else { "optional" },
                    param.description,
                ));
            }
        }

        let envelope = invocation_envelope(&result.server_name, &result.tool.name, &result.tool.parameters);
        block.push_str("\nInvocation:\n");
        block.push_str(&serde_json::to_string_pretty(&envelope).unwrap_or_default());

        blocks.push(block);
    }

    blocks.join("\n\n")
}

/// Build the ready-to-execute JSON-RPC envelope for one result.
fn invocation_envelope(server: &str, tool: &str, parameters: &[Parameter]) -> Value {
    let args: serde_json::Map<String, Value> = parameters
        .iter()
        .map(|p| (p.name.clone(), placeholder_value(p)))
        .collect();

    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {
            "name": "call_external_tool",
            "arguments": {
                "serverName": server,
                "toolName": tool,
                "parameters": args,
            }
        }
    })
}

/// Placeholder for a parameter value, derived from its JSON-schema type.
fn placeholder_value(param: &Parameter) -> Value {
    match param.type_name.to_lowercase().as_str() {
        "int" | "integer" => json!(0),
        "number" | "float" | "double" => json!(0.0),
        "bool" | "boolean" => json!(false),
        t if t.starts_with("array") => json!([]),
        t if t.starts_with("object") || t.starts_with("map") => json!({}),
        _ => json!(format!("<{}>", snake_placeholder(param))),
    }
}

/// Snake-case a parameter description into a placeholder token, falling
/// back to the parameter name when the description is empty.
fn snake_placeholder(param: &Parameter) -> String {
    let source = if param.description.trim().is_empty() {
        &param.name
    } else {
        &param.description
    };

    let mut out = String::with_capacity(source.len());
    let mut last_was_sep = true;
    for c in source.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_end_matches('_').to_string();
    if trimmed.is_empty() {
        param.name.to_lowercase()
    } else {
        trimmed
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TransportKind, UpstreamServerConfig};
    use crate::index::PhraseGenerator;
    use crate::providers::{EmbeddingProvider, ProviderError};
    use crate::upstream::types::{RawToolDefinition, ToolDescriptor};
    use crate::upstream::UpstreamSession;
    use async_trait::async_trait;

    // ─── Fixtures ────────────────────────────────────────────────────

    struct UnitEmbedding;

    #[async_trait]
    impl EmbeddingProvider for UnitEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn descriptor(name: &str, description: &str, schema: Value) -> ToolDescriptor {
        ToolDescriptor::from_raw(RawToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: schema,
        })
    }

    fn config(name: &str) -> UpstreamServerConfig {
        UpstreamServerConfig {
            name: name.to_string(),
            description: String::new(),
            transport: TransportKind::Stdio,
            command: Some("true".to_string()),
            args: Vec::new(),
            env: Default::default(),
            work_dir: None,
            url: None,
            enabled: true,
            tools: Vec::new(),
        }
    }

    async fn handler_with(servers: &[(&str, Vec<ToolDescriptor>)]) -> MetaToolHandler {
        let sessions = servers
            .iter()
            .map(|(name, tools)| {
                Arc::new(UpstreamSession::with_discovered_tools(
                    config(name),
                    tools.clone(),
                ))
            })
            .collect();
        let supervisor = Arc::new(Supervisor::from_sessions(sessions));
        let index = Arc::new(ToolIndex::new(
            supervisor.clone(),
            Arc::new(UnitEmbedding),
            PhraseGenerator::heuristic(),
            "test".to_string(),
            3,
        ));
        index.refresh().await.unwrap();
        MetaToolHandler::new(index, supervisor)
    }

    fn param(name: &str, type_name: &str, description: &str, required: bool) -> Parameter {
        Parameter {
            name: name.to_string(),
            type_name: type_name.to_string(),
            description: description.to_string(),
            required,
        }
    }

    // ─── Placeholders & envelope ─────────────────────────────────────

    #[test]
    fn test_placeholder_by_type() {
        assert_eq!(placeholder_value(&param("a", "integer", "", true)), json!(0));
        assert_eq!(placeholder_value(&param("a", "int", "", true)), json!(0));
        assert_eq!(placeholder_value(&param("a", "number", "", true)), json!(0.0));
        assert_eq!(placeholder_value(&param("a", "boolean", "", true)), json!(false));
        assert_eq!(placeholder_value(&param("a", "array", "", true)), json!([]));
        assert_eq!(placeholder_value(&param("a", "object", "", true)), json!({}));
    }

    #[test]
    fn test_string_placeholder_snakes_description() {
        let p = param("path", "string", "The file path!", true);
        assert_eq!(placeholder_value(&p), json!("<the_file_path>"));
    }

    #[test]
    fn test_string_placeholder_falls_back_to_name() {
        let p = param("content", "string", "", true);
        assert_eq!(placeholder_value(&p), json!("<content>"));
    }

    #[test]
    fn test_invocation_envelope_shape() {
        let envelope = invocation_envelope(
            "Serena",
            "write_memory",
            &[param("content", "string", "Memory content", true)],
        );
        assert_eq!(envelope["method"], "tools/call");
        assert_eq!(envelope["params"]["name"], "call_external_tool");
        assert_eq!(envelope["params"]["arguments"]["serverName"], "Serena");
        assert_eq!(envelope["params"]["arguments"]["toolName"], "write_memory");
        assert_eq!(
            envelope["params"]["arguments"]["parameters"]["content"],
            "<memory_content>"
        );
    }

    // ─── Rendering ───────────────────────────────────────────────────

    #[test]
    fn test_render_search_results_blocks() {
        let results = vec![SearchResult {
            server_name: "Serena".to_string(),
            tool: descriptor(
                "write_memory",
                "Save a memory note",
                json!({
                    "properties": {
                        "content": {"type": "string", "description": "Memory content"}
                    },
                    "required": ["content"]
                }),
            ),
            score: 0.8734,
        }];

        let text = render_search_results("save a memory", &results);
        assert!(text.contains("Found 1 tool matching \"save a memory\""));
        assert!(text.contains("## Serena.write_memory (score: 0.873)"));
        assert!(text.contains("Save a memory note"));
        assert!(text.contains("- content (string) (required): Memory content"));
        assert!(text.contains("\"serverName\": \"Serena\""));
        // Blocks are separated by blank lines
        assert!(text.contains("\n\n## "));
    }

    // ─── Dispatch ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_meta_tool() {
        let handler = handler_with(&[]).await;
        let out = handler.dispatch("bogus", &json!({})).await;
        assert!(out.is_error);
        assert!(out.text.starts_with("Error"));
        assert!(out.text.contains("search_tools_semantic"));
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let handler = handler_with(&[]).await;
        let out = handler.dispatch("search_tools_semantic", &json!({})).await;
        assert!(out.is_error);
        assert!(out.text.contains("query"));
    }

    #[tokio::test]
    async fn test_search_empty_index_message() {
        let handler = handler_with(&[]).await;
        let out = handler
            .dispatch("search_tools_semantic", &json!({"query": "anything"}))
            .await;
        assert!(!out.is_error);
        assert!(out.text.starts_with("No tools found"));
        assert!(out.text.contains("0.55"));
    }

    #[tokio::test]
    async fn test_search_returns_rendered_results() {
        let handler = handler_with(&[(
            "A",
            vec![descriptor("t1", "does things", json!({}))],
        )])
        .await;
        let out = handler
            .dispatch(
                "search_tools_semantic",
                &json!({"query": "things", "minRelevanceScore": 0.0}),
            )
            .await;
        assert!(!out.is_error);
        assert!(out.text.contains("## A.t1"));
    }

    #[tokio::test]
    async fn test_list_all_counts() {
        let handler = handler_with(&[
            (
                "A",
                vec![
                    descriptor("t1", "first", json!({})),
                    descriptor("t2", "second", json!({})),
                ],
            ),
            ("B", vec![descriptor("u1", "third", json!({}))]),
        ])
        .await;

        let out = handler
            .dispatch("list_all_servers_and_tools_json", &json!({}))
            .await;
        assert!(!out.is_error);

        let doc: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(doc["totalServers"], 2);
        assert_eq!(doc["totalTools"], 3);
        assert!(doc["timestamp"].is_string());
        assert_eq!(doc["servers"][0]["serverName"], "A");
        assert_eq!(doc["servers"][0]["toolCount"], 2);
        assert_eq!(doc["servers"][1]["toolCount"], 1);
    }

    #[tokio::test]
    async fn test_list_all_empty_server() {
        let handler = handler_with(&[("A", vec![])]).await;
        let out = handler
            .dispatch("list_all_servers_and_tools_json", &json!({}))
            .await;
        let doc: Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(doc["totalServers"], 1);
        assert_eq!(doc["servers"][0]["toolCount"], 0);
    }

    #[tokio::test]
    async fn test_index_info_text() {
        let handler = handler_with(&[("A", vec![descriptor("t1", "x", json!({}))])]).await;
        let out = handler.dispatch("get_tool_index_info", &json!({})).await;
        assert!(!out.is_error);
        assert!(out.text.contains("Servers: 1"));
        assert!(out.text.contains("Tools: 1"));
        assert!(out.text.contains("A (1)"));
        assert!(out.text.contains("heuristic template"));
    }

    #[tokio::test]
    async fn test_call_external_requires_arguments() {
        let handler = handler_with(&[]).await;
        let out = handler.dispatch("call_external_tool", &json!({})).await;
        assert!(out.is_error);
        assert!(out.text.contains("serverName"));
    }

    #[tokio::test]
    async fn test_call_external_unknown_server() {
        let handler = handler_with(&[("A", vec![descriptor("t1", "x", json!({}))])]).await;
        let out = handler
            .dispatch(
                "call_external_tool",
                &json!({"serverName": "missing", "toolName": "t1"}),
            )
            .await;
        assert!(out.is_error);
        assert!(out.text.starts_with("Error calling"));
        assert!(out.text.contains("missing"));
    }

    #[tokio::test]
    async fn test_call_external_unknown_tool_lists_available() {
        let handler = handler_with(&[(
            "A",
            vec![
                descriptor("t1", "x", json!({})),
                descriptor("t2", "y", json!({})),
            ],
        )])
        .await;
        let out = handler
            .dispatch(
                "call_external_tool",
                &json!({"serverName": "A", "toolName": "nope"}),
            )
            .await;
        assert!(out.is_error);
        assert!(out.text.contains("'nope'"));
        assert!(out.text.contains("t1"));
        assert!(out.text.contains("t2"));
    }

    #[tokio::test]
    async fn test_call_external_rejects_non_object_parameters() {
        let handler = handler_with(&[("A", vec![descriptor("t1", "x", json!({}))])]).await;
        let out = handler
            .dispatch(
                "call_external_tool",
                &json!({"serverName": "A", "toolName": "t1", "parameters": [1, 2]}),
            )
            .await;
        assert!(out.is_error);
        assert!(out.text.contains("JSON object"));
    }

    #[tokio::test]
    async fn test_refresh_reports_counts() {
        let handler = handler_with(&[("A", vec![descriptor("t1", "x", json!({}))])]).await;
        let out = handler.dispatch("refresh_tool_index", &json!({})).await;
        assert!(!out.is_error);
        assert!(out.text.contains("1 tools across 1 servers"));
    }
}
