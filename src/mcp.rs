use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::session::{SessionState, SharedSession};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "google-cloud-logging-mcp";

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// `None` only when the key is absent; `"id": null` is still a request.
    #[serde(default, deserialize_with = "present_id")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// JSON-RPC notifications carry no id and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

fn present_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Handles one request against the given session. Returns `None` for notifications.
pub async fn process_request(
    dispatcher: &Dispatcher,
    session: &SharedSession,
    req: RpcRequest,
) -> Option<RpcResponse> {
    if req.is_notification() {
        debug!(method = %req.method, "notification received");
        return None;
    }
    let id = req.id.clone().unwrap_or(Value::Null);

    let resp = match req.method.as_str() {
        "initialize" => RpcResponse::ok(id, initialize_result()),
        "ping" => RpcResponse::ok(id, serde_json::json!({})),
        "tools/list" => RpcResponse::ok(id, serde_json::json!({ "tools": dispatcher.tools() })),
        "tools/call" => handle_call_tool(dispatcher, session, id, req.params).await,
        other => RpcResponse::error(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
    };
    Some(resp)
}

fn initialize_result() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

async fn handle_call_tool(
    dispatcher: &Dispatcher,
    session: &SharedSession,
    id: Value,
    params: Value,
) -> RpcResponse {
    let params: CallToolParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => return RpcResponse::error(id, INVALID_PARAMS, format!("invalid params: {e}")),
    };

    let mut state = session.lock().await;
    let call = dispatcher.invoke(&mut state, &params.name, &params.arguments);
    // A panicking handler fails this request only.
    let outcome = AssertUnwindSafe(call).catch_unwind().await;
    match outcome {
        Ok(envelope) => match serde_json::to_value(envelope) {
            Ok(v) => RpcResponse::ok(id, v),
            Err(e) => RpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
        },
        Err(_) => {
            error!(tool = %params.name, "tool handler panicked");
            state.clear();
            RpcResponse::error(id, INTERNAL_ERROR, format!("internal error while running {}", params.name))
        }
    }
}

pub async fn run_stdio(dispatcher: Arc<Dispatcher>) -> Result<()> {
    info!("Google Cloud Logging MCP server running on stdio");
    serve_stream(&dispatcher, tokio::io::stdin(), tokio::io::stdout()).await
}

/// 单流传输：逐行读取 JSON-RPC 请求，按到达顺序逐个处理。
pub async fn serve_stream<R, W>(dispatcher: &Dispatcher, input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input);
    let session = SessionState::shared();
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        // Undecodable bytes are a parse error for this line only.
        let req: RpcRequest = match serde_json::from_slice(&line) {
            Ok(r) => r,
            Err(e) => {
                write_response(
                    &mut output,
                    &RpcResponse::error(Value::Null, PARSE_ERROR, format!("parse error: {e}")),
                )
                .await?;
                continue;
            }
        };

        if req.method == "initialize" {
            info!("client connected");
        }

        if let Some(resp) = process_request(dispatcher, &session, req).await {
            write_response(&mut output, &resp).await?;
        }
    }

    info!("stdin closed, shutting down");
    Ok(())
}

async fn write_response<W: AsyncWrite + Unpin>(output: &mut W, resp: &RpcResponse) -> Result<()> {
    let line = serde_json::to_string(resp)?;
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}
