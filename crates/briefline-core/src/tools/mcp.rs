//! Remote tool adapters over the MCP streamable-HTTP transport.
//!
//! Requests are JSON-RPC 2.0 messages POSTed to a single endpoint. The server may
//! answer with plain JSON or with an SSE body, in which case the payload of the
//! last event is the reply. The session id handed out by `initialize` is echoed on
//! every later request and released with `DELETE` on shutdown.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{DynTool, Tool};
use crate::BriefError;
use crate::config::McpSettings;

const JSONRPC_VERSION: &str = "2.0";
const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const STREAMABLE_ACCEPT: &str = "application/json, text/event-stream";
const MAX_LIST_PAGES: usize = 64;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Description of a tool advertised by the server.
#[derive(Debug, Clone, Deserialize)]
struct RemoteToolInfo {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<RemoteToolInfo>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

/// Connection to one MCP server.
pub struct McpClient {
    http: Client,
    url: String,
    call_timeout: Duration,
    session_id: OnceLock<String>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl McpClient {
    /// Connect and perform the `initialize` handshake.
    pub async fn connect(settings: &McpSettings) -> Result<Self, BriefError> {
        let http = Client::builder().timeout(settings.timeout).build()?;
        let client = Self {
            http,
            url: settings.url.clone(),
            call_timeout: settings.sse_read_timeout,
            session_id: OnceLock::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };

        let init = client
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "briefline", "version": env!("CARGO_PKG_VERSION")}
                })),
                None,
            )
            .await?;
        debug!(server = ?init.get("serverInfo"), "MCP session initialised");

        if let Err(err) = client.notify("notifications/initialized").await {
            client.terminate().await;
            return Err(err);
        }
        Ok(client)
    }

    async fn list_tools(&self) -> Result<Vec<RemoteToolInfo>, BriefError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|cursor| json!({"cursor": cursor}));
            let result = self.request("tools/list", params, None).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|err| BriefError::Mcp(format!("invalid tools/list result: {err}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        break;
                    }
                    cursor = Some(next);
                }
                _ => return Ok(tools),
            }
        }
        Err(BriefError::Mcp(
            "tools/list pagination did not terminate".into(),
        ))
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, BriefError> {
        let result = self
            .request(
                "tools/call",
                Some(json!({"name": name, "arguments": arguments})),
                Some(self.call_timeout),
            )
            .await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|err| BriefError::Mcp(format!("invalid tools/call result: {err}")))?;

        let text = result
            .content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            return Err(BriefError::tool(name, text));
        }
        Ok(text)
    }

    /// Release the server-side session. Idempotent.
    pub async fn terminate(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(session_id) = self.session_id.get() else {
            return;
        };
        let outcome = self
            .http
            .delete(&self.url)
            .header(SESSION_HEADER, session_id)
            .send()
            .await;
        match outcome {
            Ok(response)
                if response.status().is_success()
                    || response.status() == StatusCode::METHOD_NOT_ALLOWED => {}
            Ok(response) => warn!(status = %response.status(), "MCP session termination rejected"),
            Err(err) => warn!(error = %err, "MCP session termination failed"),
        }
    }

    fn post(&self, body: &JsonRpcRequest<'_>) -> RequestBuilder {
        let mut builder = self
            .http
            .post(&self.url)
            .header(reqwest::header::ACCEPT, STREAMABLE_ACCEPT)
            .json(body);
        if let Some(session_id) = self.session_id.get() {
            builder = builder.header(SESSION_HEADER, session_id);
        }
        builder
    }

    async fn notify(&self, method: &str) -> Result<(), BriefError> {
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params: None,
        };
        let response = self.post(&request).send().await?;
        if !response.status().is_success() {
            return Err(BriefError::from_response(response).await);
        }
        Ok(())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, BriefError> {
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: Some(self.next_id.fetch_add(1, Ordering::SeqCst)),
            method,
            params,
        };

        let mut builder = self.post(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(BriefError::from_response(response).await);
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let _ = self.session_id.set(session_id.to_string());
        }

        let body = response.text().await?;
        let reply = parse_jsonrpc_response_text(&body)?;
        if let Some(error) = reply.error {
            return Err(BriefError::Mcp(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            )));
        }
        reply
            .result
            .ok_or_else(|| BriefError::Mcp(format!("{method} returned no result")))
    }
}

fn parse_jsonrpc_response_text(text: &str) -> Result<JsonRpcResponse, BriefError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BriefError::Mcp("server returned an empty body".into()));
    }

    let json_text = if looks_like_sse_text(trimmed) {
        extract_json_from_sse_text(trimmed)
    } else {
        Cow::Borrowed(trimmed)
    };

    serde_json::from_str(json_text.as_ref())
        .map_err(|err| BriefError::Mcp(format!("invalid JSON-RPC response: {err}")))
}

fn looks_like_sse_text(text: &str) -> bool {
    text.starts_with("data:")
        || text.starts_with("event:")
        || text.contains("\ndata:")
        || text.contains("\nevent:")
}

/// Payload of the last complete SSE event in `text`.
fn extract_json_from_sse_text(text: &str) -> Cow<'_, str> {
    let text = text.trim_start_matches('\u{feff}');
    let mut current: Vec<&str> = Vec::new();
    let mut last: Vec<&str> = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r').trim_start();
        if line.is_empty() {
            if !current.is_empty() {
                last = std::mem::take(&mut current);
            }
            continue;
        }
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            current.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    if !current.is_empty() {
        last = current;
    }

    match last.len() {
        0 => Cow::Borrowed(text.trim()),
        1 => Cow::Borrowed(last[0]),
        _ => Cow::Owned(last.join("\n")),
    }
}

/// One remote tool exposed through the shared [`McpClient`].
pub struct McpToolAdapter {
    client: Arc<McpClient>,
    name: String,
    description: String,
    parameters: Value,
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(&self, arguments: Value) -> Result<String, BriefError> {
        self.client.call_tool(&self.name, arguments).await
    }
}

/// Adapters for every tool the server advertises, plus the client that owns the
/// session. Empty when no endpoint is configured or the server is unreachable.
pub async fn load_mcp_adapters(
    settings: Option<&McpSettings>,
) -> (Vec<DynTool>, Option<Arc<McpClient>>) {
    let Some(settings) = settings else {
        info!("no MCP endpoint configured; skipping remote tools");
        return (Vec::new(), None);
    };

    info!(url = %settings.url, "connecting to MCP server");
    let client = match McpClient::connect(settings).await {
        Ok(client) => Arc::new(client),
        Err(err) => {
            warn!(error = %err, url = %settings.url, "MCP connection failed");
            return (Vec::new(), None);
        }
    };

    let remote = match client.list_tools().await {
        Ok(remote) => remote,
        Err(err) => {
            warn!(error = %err, "MCP tool listing failed");
            client.terminate().await;
            return (Vec::new(), None);
        }
    };

    let adapters: Vec<DynTool> = remote
        .into_iter()
        .map(|info| {
            Arc::new(McpToolAdapter {
                client: client.clone(),
                description: info.description.unwrap_or_default(),
                parameters: info
                    .input_schema
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                name: info.name,
            }) as DynTool
        })
        .collect();

    info!(count = adapters.len(), "loaded MCP adapters");
    (adapters, Some(client))
}
