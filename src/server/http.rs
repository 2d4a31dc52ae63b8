//! HTTP front-end: the `/mcp` JSON-RPC endpoint plus auxiliary routes.
//!
//! `POST /mcp` speaks the MCP streamable-HTTP framing: each request is
//! answered with plain JSON, or with a single-event SSE body when the
//! client's `Accept` header asks for `text/event-stream`. `GET /mcp` opens
//! a legacy SSE channel that announces `/mcp` as the POST endpoint.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::index::ToolIndex;
use crate::upstream::types::error_codes;

use super::meta::{meta_tool_definitions, MetaToolHandler};
use super::rpc::{tool_result_text, RpcRequest, RpcResponse};

// ─── State & router ──────────────────────────────────────────────────────────

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<MetaToolHandler>,
    pub index: Arc<ToolIndex>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mcp", post(mcp_post).get(mcp_sse))
        .route("/health", get(health))
        .route("/tool-index-info", get(tool_index_info))
        .route("/search-tools", post(search_tools))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── /mcp ────────────────────────────────────────────────────────────────────

async fn mcp_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let wants_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false);

    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = RpcResponse::error(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("invalid JSON-RPC request: {e}"),
            );
            return rpc_reply(response, wants_sse);
        }
    };

    if request.is_notification() {
        return StatusCode::ACCEPTED.into_response();
    }
    let id = request.id.clone().unwrap_or(Value::Null);

    let response = match request.method.as_str() {
        "initialize" => RpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => RpcResponse::success(id, json!({})),
        "tools/list" => RpcResponse::success(id, json!({"tools": meta_tool_definitions()})),
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let Some(tool_name) = params.get("name").and_then(|n| n.as_str()) else {
                return rpc_reply(
                    RpcResponse::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        "tools/call requires params.name",
                    ),
                    wants_sse,
                );
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

            let output = state.handler.dispatch(tool_name, &arguments).await;
            RpcResponse::success(id, tool_result_text(&output.text, output.is_error))
        }
        other => RpcResponse::error(
            id,
            error_codes::METHOD_NOT_FOUND,
            format!("method '{other}' is not supported"),
        ),
    };

    rpc_reply(response, wants_sse)
}

/// Serialize a JSON-RPC reply as plain JSON or a single-event SSE body.
fn rpc_reply(response: RpcResponse, wants_sse: bool) -> Response {
    if !wants_sse {
        return Json(response).into_response();
    }

    let payload = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    let body = format!("event: message\ndata: {payload}\n\n");
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
        .into_response()
}

/// Legacy SSE channel: announce the POST endpoint, then keep the stream
/// open with keepalive comments.
async fn mcp_sse() -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let endpoint = stream::once(async { Ok(Event::default().event("endpoint").data("/mcp")) });
    let stream = endpoint.chain(stream::pending());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ─── Auxiliary endpoints ─────────────────────────────────────────────────────

async fn health() -> &'static str {
    "MCP Server is running"
}

async fn tool_index_info(State(state): State<AppState>) -> Json<Value> {
    let info = state.index.info();
    Json(json!({
        "ServiceType": "McpToolAggregationProxy",
        "IsSemanticKernelEnabled": true,
        "ServerCount": info.server_count,
        "ToolCount": info.tool_count,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchToolsRequest {
    #[serde(default)]
    prompt: String,
    max_results: Option<usize>,
    min_relevance_score: Option<f32>,
}

async fn search_tools(
    State(state): State<AppState>,
    Json(request): Json<SearchToolsRequest>,
) -> Response {
    if request.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Prompt must not be empty"})),
        )
            .into_response();
    }

    let max_results = request.max_results.unwrap_or(5);
    let min_score = request.min_relevance_score.unwrap_or(0.55);

    match state.index.search(&request.prompt, max_results, min_score).await {
        Ok(results) => {
            let tools: Vec<Value> = results
                .iter()
                .map(|result| {
                    json!({
                        "ServerName": result.server_name,
                        "ToolName": result.tool.name,
                        "Description": result.tool.description,
                        "Score": result.score,
                        "Parameters": result.tool.parameters.iter().map(|p| {
                            json!({
                                "Name": p.name,
                                "Type": p.type_name,
                                "Description": p.description,
                                "Required": p.required,
                            })
                        }).collect::<Vec<_>>(),
                    })
                })
                .collect();

            Json(json!({
                "Query": request.prompt,
                "MaxResults": max_results,
                "MinRelevanceScore": min_score,
                "Tools": tools,
            }))
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "search-tools request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

// ─── Shutdown ────────────────────────────────────────────────────────────────

/// Wait for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}
