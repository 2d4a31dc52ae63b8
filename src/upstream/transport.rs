//! JSON-RPC transports for upstream MCP servers.
//!
//! Three transports share one request/notify surface:
//! - stdio: line-delimited JSON over a child process's stdin/stdout
//! - streamable HTTP: POST per message, response as JSON or an SSE body
//! - SSE: GET event stream for server→client, POST for client→server
//!
//! Requests on a single transport are serialized; the MCP protocol is
//! request/response with correlation ids and upstream servers are not
//! required to handle interleaving.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};

use super::errors::UpstreamError;
use super::types::{JsonRpcRequest, JsonRpcResponse};

// ─── Request ID generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport dispatch ──────────────────────────────────────────────────────

/// A live connection to one upstream server, over whichever transport its
/// config selected. Owned by exactly one session.
pub enum Transport {
    Stdio(StdioTransport),
    Http(HttpTransport),
    Sse(SseTransport),
}

impl Transport {
    /// Send a request and wait for the matching response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        match self {
            Self::Stdio(t) => t.request(method, params).await,
            Self::Http(t) => t.request(method, params).await,
            Self::Sse(t) => t.request(method, params).await,
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), UpstreamError> {
        match self {
            Self::Stdio(t) => t.notify(method, params).await,
            Self::Http(t) => t.notify(method, params).await,
            Self::Sse(t) => t.notify(method, params).await,
        }
    }

    /// Human-readable transport kind for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio(_) => "stdio",
            Self::Http(_) => "streamable-http",
            Self::Sse(_) => "sse",
        }
    }
}

// ─── Stdio transport ─────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
///
/// One JSON object per line. Lines that are not parseable responses (server
/// log output, notifications) are skipped.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<ChildStdin>,
    reader: Mutex<BufReader<ChildStdout>>,
}

impl StdioTransport {
    /// Create a new transport from a child process's stdin/stdout.
    pub fn new(server_name: &str, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(stdin),
            reader: Mutex::new(BufReader::new(stdout)),
        }
    }

    fn transport_error(&self, reason: String) -> UpstreamError {
        UpstreamError::Transport {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// Send a JSON-RPC request and read lines until the matching `id` appears.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let mut json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;
        json.push('\n');

        {
            let mut writer = self.writer.lock().await;
            writer
                .write_all(json.as_bytes())
                .await
                .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
            writer
                .flush()
                .await
                .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))?;
        }

        let mut line_buf = String::new();
        let mut reader = self.reader.lock().await;

        loop {
            line_buf.clear();
            let bytes_read = reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error(
                    "server stdout closed (process may have exited)".to_string(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == id => return Ok(resp),
                // A response for a different id, a server-side notification,
                // or plain log output — keep reading.
                _ => continue,
            }
        }
    }

    /// Send a JSON-RPC notification.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), UpstreamError> {
        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        let mut json = serde_json::to_string(&notification)
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;
        json.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write notification: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush notification: {e}")))?;

        Ok(())
    }
}

// ─── Streamable HTTP transport ───────────────────────────────────────────────

/// JSON-RPC over HTTP POST. The server answers each POST either with a
/// plain JSON body or with an SSE-framed body carrying the response event;
/// both are accepted. A session id issued during `initialize` is echoed on
/// subsequent requests.
pub struct HttpTransport {
    server_name: String,
    url: String,
    http: reqwest::Client,
    session_id: std::sync::RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(server_name: &str, url: &str) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| UpstreamError::Transport {
                server: server_name.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            server_name: server_name.to_string(),
            url: url.to_string(),
            http,
            session_id: std::sync::RwLock::new(None),
        })
    }

    fn transport_error(&self, reason: String) -> UpstreamError {
        UpstreamError::Transport {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn post(
        &self,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, UpstreamError> {
        let mut request = self
            .http
            .post(&self.url)
            .json(body)
            .header("Accept", "application/json, text/event-stream");

        let session_id = self
            .session_id
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(sid) = session_id {
            request = request.header("Mcp-Session-Id", sid);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(format!("POST {} failed: {e}", self.url)))?;

        // Streamable HTTP servers hand out a session id on initialize.
        if let Some(sid) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut guard) = self.session_id.write() {
                *guard = Some(sid.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!(
                "HTTP {status} from {}: {}",
                self.url,
                body_text.trim()
            )));
        }

        Ok(response)
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_value(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        let response = self.post(&body).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            self.read_sse_response(response, id).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| self.transport_error(format!("failed to read response body: {e}")))?;
            serde_json::from_str::<JsonRpcResponse>(&text).map_err(|e| {
                self.transport_error(format!("failed to parse response: {e} (body: {text})"))
            })
        }
    }

    /// Read an SSE-framed POST response until the event carrying our id.
    async fn read_sse_response(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let mut events = SseEventStream::new(response);

        while let Some(event) = events.next().await {
            let event = event.map_err(|reason| self.transport_error(reason))?;
            if event.data.is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                Ok(resp) if resp.id == id => return Ok(resp),
                // Server-side notifications and unrelated ids are skipped.
                _ => continue,
            }
        }

        Err(self.transport_error(format!(
            "SSE response stream ended before a reply to request {id}"
        )))
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), UpstreamError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        self.post(&body).await.map(|_| ())
    }
}

// ─── SSE transport ───────────────────────────────────────────────────────────

/// Legacy SSE transport: a long-lived GET stream carries server→client
/// messages; an `endpoint` event announced at connect names the POST target
/// for client→server messages.
pub struct SseTransport {
    server_name: String,
    endpoint: String,
    http: reqwest::Client,
    incoming: Mutex<mpsc::UnboundedReceiver<JsonRpcResponse>>,
    /// Serializes request/response pairs so replies cannot be claimed by the
    /// wrong caller.
    request_gate: Mutex<()>,
    reader: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the `endpoint` event.
    pub async fn connect(server_name: &str, url: &str) -> Result<Self, UpstreamError> {
        let transport_error = |reason: String| UpstreamError::Transport {
            server: server_name.to_string(),
            reason,
        };

        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| transport_error(format!("failed to build HTTP client: {e}")))?;

        let response = http
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| transport_error(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(format!("HTTP {status} from {url}")));
        }

        let mut events = SseEventStream::new(response);

        // The first endpoint event tells us where to POST.
        let endpoint = loop {
            match events.next().await {
                Some(Ok(event)) if event.name == "endpoint" => {
                    break resolve_endpoint(url, event.data.trim());
                }
                Some(Ok(_)) => continue,
                Some(Err(reason)) => return Err(transport_error(reason)),
                None => {
                    return Err(transport_error(
                        "SSE stream closed before the endpoint event".to_string(),
                    ));
                }
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let name = server_name.to_string();
        let reader = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) => {
                        if event.data.is_empty() {
                            continue;
                        }
                        if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&event.data) {
                            if tx.send(resp).is_err() {
                                break;
                            }
                        }
                    }
                    Err(reason) => {
                        tracing::warn!(server = %name, reason = %reason, "SSE stream error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            server_name: server_name.to_string(),
            endpoint,
            http,
            incoming: Mutex::new(rx),
            request_gate: Mutex::new(()),
            reader,
        })
    }

    fn transport_error(&self, reason: String) -> UpstreamError {
        UpstreamError::Transport {
            server: self.server_name.clone(),
            reason,
        }
    }

    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let _gate = self.request_gate.lock().await;

        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("POST {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                self.transport_error(format!("HTTP {status} from {}: {}", self.endpoint, body))
            );
        }

        // The reply arrives on the event stream, not the POST response.
        let mut incoming = self.incoming.lock().await;
        loop {
            match incoming.recv().await {
                Some(resp) if resp.id == id => return Ok(resp),
                Some(_) => continue,
                None => {
                    return Err(self.transport_error(
                        "SSE stream closed while waiting for a reply".to_string(),
                    ));
                }
            }
        }
    }

    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), UpstreamError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(format!("POST {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.transport_error(format!("HTTP {status} from {}", self.endpoint)));
        }
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Resolve an `endpoint` event payload against the SSE URL it arrived on.
///
/// Absolute URLs pass through; absolute paths are joined to the origin;
/// anything else is joined to the URL's parent path.
fn resolve_endpoint(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }

    if let Some(path) = endpoint.strip_prefix('/') {
        // scheme://host[:port]
        let origin_end = base_url
            .find("://")
            .map(|i| i + 3)
            .and_then(|start| base_url[start..].find('/').map(|i| start + i))
            .unwrap_or(base_url.len());
        return format!("{}/{path}", &base_url[..origin_end]);
    }

    let parent = base_url.rfind('/').map_or(base_url, |i| &base_url[..i]);
    format!("{parent}/{endpoint}")
}

// ─── SSE event parsing ───────────────────────────────────────────────────────

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field; `"message"` when absent.
    pub name: String,
    /// Concatenated `data:` lines.
    pub data: String,
}

/// Parse one SSE event block (the text between blank-line separators).
pub fn parse_sse_event(block: &str) -> SseEvent {
    let mut name = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Comments (`:`) and other fields are ignored.
    }

    SseEvent {
        name: if name.is_empty() {
            "message".to_string()
        } else {
            name
        },
        data: data_lines.join("\n"),
    }
}

/// Incremental SSE reader over a response body.
///
/// Buffers raw bytes and yields one event per `\n\n` boundary, tolerating
/// events split across network chunks.
struct SseEventStream {
    bytes: std::pin::Pin<
        Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buffer: String,
}

impl SseEventStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            bytes: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    async fn next(&mut self) -> Option<Result<SseEvent, String>> {
        loop {
            if let Some(event_end) = self.buffer.find("\n\n") {
                let block = self.buffer[..event_end].to_string();
                self.buffer = self.buffer[event_end + 2..].to_string();
                if block.trim().is_empty() {
                    continue;
                }
                return Some(Ok(parse_sse_event(&block)));
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                }
                Some(Err(e)) => return Some(Err(format!("stream read error: {e}"))),
                None => {
                    // Stream ended — flush any trailing partial event.
                    if self.buffer.trim().is_empty() {
                        return None;
                    }
                    let block = std::mem::take(&mut self.buffer);
                    return Some(Ok(parse_sse_event(block.trim())));
                }
            }
        }
    }
}

// ─── Response helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting error replies to
/// `UpstreamError::Server`.
pub fn extract_result(
    server: &str,
    response: JsonRpcResponse,
) -> Result<serde_json::Value, UpstreamError> {
    if let Some(err) = response.error {
        return Err(UpstreamError::Server {
            server: server.to_string(),
            code: err.code,
            message: err.message,
        });
    }

    response.result.ok_or(UpstreamError::Server {
        server: server.to_string(),
        code: super::types::error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".to_string(),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::types::JsonRpcError;

    #[test]
    fn test_next_request_id_is_monotonic() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_extract_result_success() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: Some(serde_json::json!({"text": "hello"})),
            error: None,
        };
        let result = extract_result("a", resp).unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[test]
    fn test_extract_result_error() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: Some(JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        };
        let err = extract_result("a", resp).unwrap_err();
        match err {
            UpstreamError::Server { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            _ => panic!("expected Server error"),
        }
    }

    #[test]
    fn test_extract_result_missing_both() {
        let resp = JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: None,
            error: None,
        };
        let err = extract_result("a", resp).unwrap_err();
        assert!(matches!(err, UpstreamError::Server { .. }));
    }

    #[test]
    fn test_parse_sse_event_with_name() {
        let event = parse_sse_event("event: endpoint\ndata: /messages?sessionId=abc");
        assert_eq!(event.name, "endpoint");
        assert_eq!(event.data, "/messages?sessionId=abc");
    }

    #[test]
    fn test_parse_sse_event_default_name() {
        let event = parse_sse_event("data: {\"jsonrpc\":\"2.0\"}");
        assert_eq!(event.name, "message");
        assert_eq!(event.data, "{\"jsonrpc\":\"2.0\"}");
    }

    #[test]
    fn test_parse_sse_event_multiline_data() {
        let event = parse_sse_event("data: line1\ndata: line2");
        assert_eq!(event.data, "line1\nline2");
    }

    #[test]
    fn test_parse_sse_event_ignores_comments() {
        let event = parse_sse_event(": keep-alive\ndata: x");
        assert_eq!(event.data, "x");
    }

    #[test]
    fn test_resolve_endpoint_absolute_url() {
        assert_eq!(
            resolve_endpoint("http://localhost:9000/sse", "http://other:1/messages"),
            "http://other:1/messages"
        );
    }

    #[test]
    fn test_resolve_endpoint_absolute_path() {
        assert_eq!(
            resolve_endpoint("http://localhost:9000/sse", "/messages?sessionId=1"),
            "http://localhost:9000/messages?sessionId=1"
        );
    }

    #[test]
    fn test_resolve_endpoint_relative_path() {
        assert_eq!(
            resolve_endpoint("http://localhost:9000/mcp/sse", "messages"),
            "http://localhost:9000/mcp/messages"
        );
    }
}
