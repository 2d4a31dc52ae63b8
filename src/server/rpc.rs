//! Serving-side JSON-RPC 2.0 frames for the downstream MCP endpoint.
//!
//! Downstream clients may use numeric or string ids, so the id is carried
//! as a raw JSON value here, unlike the upstream client frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An incoming JSON-RPC request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications.
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Notifications carry no id and expect no reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.method.starts_with("notifications/")
    }
}

/// An outgoing JSON-RPC response.
#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Wrap plain text as an MCP `tools/call` result payload.
pub fn tool_result_text(text: &str, is_error: bool) -> Value {
    serde_json::json!({
        "content": [{"type": "text", "text": text}],
        "isError": is_error,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_with_numeric_id() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": 7, "method": "tools/list"}"#)
                .unwrap();
        assert_eq!(req.id, Some(serde_json::json!(7)));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_request_with_string_id() {
        let req: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "id": "abc", "method": "ping"}"#).unwrap();
        assert_eq!(req.id, Some(serde_json::json!("abc")));
    }

    #[test]
    fn test_notification_detection() {
        let no_id: RpcRequest =
            serde_json::from_str(r#"{"jsonrpc": "2.0", "method": "tools/list"}"#).unwrap();
        assert!(no_id.is_notification());

        let initialized: RpcRequest = serde_json::from_str(
            r#"{"jsonrpc": "2.0", "id": 1, "method": "notifications/initialized"}"#,
        )
        .unwrap();
        assert!(initialized.is_notification());
    }

    #[test]
    fn test_success_response_omits_error() {
        let resp = RpcResponse::success(serde_json::json!(1), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_error_response_omits_result() {
        let resp = RpcResponse::error(serde_json::json!(1), -32601, "Method not found");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("-32601"));
        assert!(!json.contains("\"result\""));
    }

    #[test]
    fn test_tool_result_text_shape() {
        let result = tool_result_text("hello", false);
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "hello");
        assert_eq!(result["isError"], false);
    }
}
