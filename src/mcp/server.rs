//! Protocol bridge: JSON-RPC messages in, JSON-RPC responses out
//!
//! The server owns no per-request state. Each call to [`McpServer::handle`]
//! receives the raw body and the gate for that request, and returns what
//! should be written back.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::x402::{PaymentGate, PaymentRequirement};

use super::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PARSE_ERROR,
    SUPPORTED_PROTOCOL_VERSIONS, ServerCapabilities, ServerInfo, ToolCallParams, ToolsCapability,
    ToolsListResult,
};
use super::registry::{DispatchError, ToolRegistry};

/// What to write back for one POST body
#[derive(Debug)]
pub enum Reply {
    /// Response to a single request
    Single(JsonRpcResponse),
    /// Responses to the requests of a batch, in order
    Batch(Vec<JsonRpcResponse>),
    /// Only notifications were received; nothing to answer
    Accepted,
}

/// A body the bridge refuses as a whole
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid Request: {0}")]
    InvalidRequest(String),
    /// Unexpected failure; detail is logged, never returned
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn to_jsonrpc(&self) -> JsonRpcError {
        match self {
            BridgeError::Parse(msg) => JsonRpcError::new(PARSE_ERROR, format!("Parse error: {}", msg)),
            BridgeError::InvalidRequest(msg) => JsonRpcError::invalid_request(msg.clone()),
            BridgeError::Internal(_) => JsonRpcError::internal(),
        }
    }
}

pub struct McpServer {
    registry: Arc<ToolRegistry>,
    info: ServerInfo,
}

impl McpServer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handle a raw POST body
    pub async fn handle(&self, body: &[u8], gate: &dyn PaymentGate) -> Result<Reply, BridgeError> {
        let message: Value =
            serde_json::from_slice(body).map_err(|e| BridgeError::Parse(e.to_string()))?;

        match message {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(BridgeError::InvalidRequest("empty batch".to_string()));
                }
                let mut responses = Vec::new();
                for item in items {
                    let response = match parse_request(item) {
                        Ok(request) => {
                            // Earlier elements may already be paid for; one
                            // failure must not discard their results.
                            let id = request.id.clone();
                            match self.handle_message(request, gate).await {
                                Ok(response) => response,
                                Err(e) => {
                                    tracing::error!(id = ?id, error = %e, "batch element failed");
                                    Some(JsonRpcResponse::error(id, e.to_jsonrpc()))
                                }
                            }
                        }
                        Err(e) => Some(JsonRpcResponse::error(None, e.to_jsonrpc())),
                    };
                    responses.extend(response);
                }
                if responses.is_empty() {
                    Ok(Reply::Accepted)
                } else {
                    Ok(Reply::Batch(responses))
                }
            }
            other => {
                let request = parse_request(other)?;
                Ok(match self.handle_message(request, gate).await? {
                    Some(response) => Reply::Single(response),
                    None => Reply::Accepted,
                })
            }
        }
    }

    async fn handle_message(
        &self,
        request: JsonRpcRequest,
        gate: &dyn PaymentGate,
    ) -> Result<Option<JsonRpcResponse>, BridgeError> {
        if request.is_notification() {
            self.handle_notification(&request);
            return Ok(None);
        }
        tracing::debug!(method = %request.method, id = ?request.id, "<-");
        let response = self.handle_request(request, gate).await?;
        match &response.error {
            Some(error) => tracing::debug!(code = error.code, message = %error.message, "-> error"),
            None => tracing::debug!("-> ok"),
        }
        Ok(Some(response))
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => tracing::debug!("client initialized"),
            "notifications/cancelled" => tracing::debug!("client cancelled a request"),
            method => tracing::debug!(method, "ignoring notification"),
        }
    }

    async fn handle_request(
        &self,
        req: JsonRpcRequest,
        gate: &dyn PaymentGate,
    ) -> Result<JsonRpcResponse, BridgeError> {
        let id = req.id.clone();

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(req.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(gate),
            "tools/call" => match self.handle_tools_call(req.params, gate).await {
                Err(CallError::Dispatch(e)) if e.is_internal() => {
                    return Err(BridgeError::Internal(e.to_string()));
                }
                Err(CallError::Dispatch(e)) => Err(e.to_jsonrpc()),
                Err(CallError::Rpc(e)) => Err(e),
                Ok(value) => Ok(value),
            },
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Ok(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let requested = params
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
            .and_then(|p| p.protocol_version);
        let protocol_version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()))
            .unwrap_or_else(|| SUPPORTED_PROTOCOL_VERSIONS[0].to_string());

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: Some(false) }),
            },
            server_info: self.info.clone(),
        };
        to_result(result)
    }

    fn handle_tools_list(&self, gate: &dyn PaymentGate) -> Result<Value, JsonRpcError> {
        let tools = self
            .registry
            .tools()
            .iter()
            .zip(self.registry.list())
            .map(|(tool, mut info)| {
                if let Some(price) = tool.price {
                    let requirement = PaymentRequirement::new(price).describe(&tool.description);
                    let accepts = gate.advertise(&requirement);
                    if !accepts.is_empty() {
                        info.meta = Some(json!({ "x402/price": price, "x402/accepts": accepts }));
                    }
                }
                info
            })
            .collect();
        to_result(ToolsListResult { tools })
    }

    async fn handle_tools_call(
        &self,
        params: Option<Value>,
        gate: &dyn PaymentGate,
    ) -> Result<Value, CallError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
        let call: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?;

        tracing::debug!(tool = %call.name, "tools/call");
        let result = self.registry.dispatch(call, gate).await?;
        serde_json::to_value(result).map_err(|e| CallError::Dispatch(DispatchError::Internal(e.to_string())))
    }
}

enum CallError {
    Rpc(JsonRpcError),
    Dispatch(DispatchError),
}

impl From<JsonRpcError> for CallError {
    fn from(e: JsonRpcError) -> Self {
        CallError::Rpc(e)
    }
}

impl From<DispatchError> for CallError {
    fn from(e: DispatchError) -> Self {
        CallError::Dispatch(e)
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to encode result");
        JsonRpcError::internal()
    })
}

fn parse_request(value: Value) -> Result<JsonRpcRequest, BridgeError> {
    if !value.is_object() {
        return Err(BridgeError::InvalidRequest("expected a JSON-RPC request object".to_string()));
    }
    let request: JsonRpcRequest =
        serde_json::from_value(value).map_err(|e| BridgeError::InvalidRequest(e.to_string()))?;
    if request.jsonrpc != "2.0" {
        return Err(BridgeError::InvalidRequest(format!(
            "unsupported jsonrpc version {:?}",
            request.jsonrpc
        )));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{
        INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PAYMENT_REQUIRED,
    };
    use crate::mcp::registry::tests::CountingGate;
    use crate::mcp::tools::default_registry;
    use std::sync::atomic::Ordering;

    fn server() -> McpServer {
        McpServer::new(Arc::new(default_registry().unwrap()))
    }

    async fn single(body: Value, gate: &CountingGate) -> Value {
        let bytes = serde_json::to_vec(&body).unwrap();
        match server().handle(&bytes, gate).await.unwrap() {
            Reply::Single(response) => serde_json::to_value(response).unwrap(),
            other => panic!("expected a single reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let gate = CountingGate::new(true);
        let reply = single(
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2024-11-05"}}),
            &gate,
        )
        .await;
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(reply["result"]["serverInfo"]["name"], "mcp402");

        let reply = single(
            json!({"jsonrpc": "2.0", "id": 2, "method": "initialize", "params": {"protocolVersion": "1999-01-01"}}),
            &gate,
        )
        .await;
        assert_eq!(reply["result"]["protocolVersion"], SUPPORTED_PROTOCOL_VERSIONS[0]);
    }

    #[tokio::test]
    async fn test_add_call() {
        let gate = CountingGate::new(true);
        let reply = single(
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call",
                   "params": {"name": "add", "arguments": {"a": 2, "b": 3}}}),
            &gate,
        )
        .await;
        assert_eq!(reply["id"], 7);
        assert_eq!(reply["result"]["content"][0]["type"], "text");
        assert_eq!(reply["result"]["content"][0]["text"], "5");
    }

    #[tokio::test]
    async fn test_unpaid_call() {
        let gate = CountingGate::new(false);
        let reply = single(
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                   "params": {"name": "add", "arguments": {"a": 2, "b": 3}}}),
            &gate,
        )
        .await;
        assert_eq!(reply["error"]["code"], PAYMENT_REQUIRED);
        assert!(reply.get("result").is_none());
    }

    #[tokio::test]
    async fn test_error_codes() {
        let gate = CountingGate::new(true);
        let reply = single(json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"}), &gate).await;
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        let reply = single(
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "sub"}}),
            &gate,
        )
        .await;
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

        let reply = single(
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                   "params": {"name": "add", "arguments": {"a": "x", "b": 1}}}),
            &gate,
        )
        .await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);

        let reply = single(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call"}), &gate).await;
        assert_eq!(reply["error"]["code"], INVALID_PARAMS);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notification_is_accepted() {
        let gate = CountingGate::new(true);
        let body = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert!(matches!(server().handle(body, &gate).await.unwrap(), Reply::Accepted));
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_skips_notifications() {
        let gate = CountingGate::new(true);
        let body = serde_json::to_vec(&json!([
            {"jsonrpc": "2.0", "id": "a", "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": "b", "method": "tools/list"},
            42
        ]))
        .unwrap();
        let Reply::Batch(responses) = server().handle(&body, &gate).await.unwrap() else {
            panic!("expected a batch reply");
        };
        assert_eq!(responses.len(), 3);
        let values: Vec<Value> = responses.iter().map(|r| serde_json::to_value(r).unwrap()).collect();
        assert_eq!(values[0]["id"], "a");
        assert_eq!(values[1]["id"], "b");
        assert_eq!(values[1]["result"]["tools"][0]["name"], "add");
        assert_eq!(values[2]["error"]["code"], INVALID_REQUEST);
        assert!(values[2]["id"].is_null());
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let gate = CountingGate::new(true);
        let server = server();
        assert!(matches!(server.handle(b"{not json", &gate).await, Err(BridgeError::Parse(_))));
        assert!(matches!(server.handle(b"[]", &gate).await, Err(BridgeError::InvalidRequest(_))));
        assert!(matches!(server.handle(b"\"hi\"", &gate).await, Err(BridgeError::InvalidRequest(_))));
        assert!(matches!(
            server.handle(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#, &gate).await,
            Err(BridgeError::InvalidRequest(_))
        ));
    }
}
