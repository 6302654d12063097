//! Tool discovery on remote MCP servers.
//!
//! Speaks just enough JSON-RPC over streamable HTTP to list a server's
//! tools: `initialize`, `notifications/initialized`, then `tools/list`
//! (following `nextCursor`). Responses may come back as plain JSON or as a
//! single-response event stream.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::debug;

use crate::api::{DiscoveredTool, McpProtocol};
use crate::error::{Error, Result};
use crate::translate::tools::RemoteEndpoint;

pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Lists the tools a server exposes.
#[async_trait]
pub trait ToolLister: Send + Sync {
    async fn list_tools(
        &self,
        endpoint: &RemoteEndpoint,
        headers: &BTreeMap<String, String>,
    ) -> Result<Vec<DiscoveredTool>>;
}

/// [`ToolLister`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpToolLister {
    client: reqwest::Client,
}

impl HttpToolLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post(
        &self,
        endpoint: &RemoteEndpoint,
        headers: &BTreeMap<String, String>,
        session: Option<&str>,
        body: &Value,
    ) -> Result<reqwest::Response> {
        let discovery_err = |reason: String| Error::Discovery {
            url: endpoint.url.clone(),
            reason,
        };
        let mut request = self
            .client
            .post(&endpoint.url)
            .timeout(endpoint.timeout.unwrap_or(DEFAULT_DISCOVERY_TIMEOUT))
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        let response = request
            .send()
            .await
            .map_err(|e| discovery_err(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(discovery_err(format!("server answered {status}")));
        }
        Ok(response)
    }

    /// Send a request and return `(session id, result)`.
    async fn call(
        &self,
        endpoint: &RemoteEndpoint,
        headers: &BTreeMap<String, String>,
        session: Option<&str>,
        body: &Value,
    ) -> Result<(Option<String>, Value)> {
        let response = self.post(endpoint, headers, session, body).await?;
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response.text().await.map_err(|e| Error::Discovery {
            url: endpoint.url.clone(),
            reason: e.to_string(),
        })?;
        let result = parse_rpc_body(&content_type, &text).map_err(|reason| Error::Discovery {
            url: endpoint.url.clone(),
            reason,
        })?;
        Ok((session, result))
    }
}

#[async_trait]
impl ToolLister for HttpToolLister {
    async fn list_tools(
        &self,
        endpoint: &RemoteEndpoint,
        headers: &BTreeMap<String, String>,
    ) -> Result<Vec<DiscoveredTool>> {
        if endpoint.protocol == McpProtocol::Sse {
            return Err(Error::Discovery {
                url: endpoint.url.clone(),
                reason: "discovery over the SSE transport is not supported".to_string(),
            });
        }

        let initialize = rpc_request(
            1,
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "dockhand", "version": env!("CARGO_PKG_VERSION")},
            }),
        );
        let (session, _) = self.call(endpoint, headers, None, &initialize).await?;
        let session = session.as_deref();

        let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        self.post(endpoint, headers, session, &initialized).await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for id in 2.. {
            let params = match &cursor {
                Some(cursor) => json!({"cursor": cursor}),
                None => json!({}),
            };
            let (_, result) = self
                .call(endpoint, headers, session, &rpc_request(id, "tools/list", params))
                .await?;
            let (page, next) = parse_tools(&result).map_err(|reason| Error::Discovery {
                url: endpoint.url.clone(),
                reason,
            })?;
            tools.extend(page);
            match next {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }
        debug!(url = %endpoint.url, count = tools.len(), "listed tools");
        Ok(tools)
    }
}

fn rpc_request(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

/// Extract the JSON-RPC result from a response body, either plain JSON or an
/// event stream whose `data:` lines carry the response.
pub fn parse_rpc_body(content_type: &str, body: &str) -> std::result::Result<Value, String> {
    if content_type.starts_with("text/event-stream") {
        let mut data = String::new();
        for line in body.lines().chain(std::iter::once("")) {
            if let Some(chunk) = line.strip_prefix("data:") {
                data.push_str(chunk.trim_start());
            } else if line.is_empty() && !data.is_empty() {
                let message: Value =
                    serde_json::from_str(&data).map_err(|e| format!("invalid event data: {e}"))?;
                if message.get("result").is_some() || message.get("error").is_some() {
                    return rpc_result(message);
                }
                data.clear();
            }
        }
        return Err("event stream carried no response".to_string());
    }
    let message: Value =
        serde_json::from_str(body).map_err(|e| format!("invalid JSON response: {e}"))?;
    rpc_result(message)
}

fn rpc_result(mut message: Value) -> std::result::Result<Value, String> {
    if let Some(error) = message.get("error") {
        let text = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(format!("server returned error: {text}"));
    }
    message
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| "response has no result".to_string())
}

/// Tools of one `tools/list` page and the cursor of the next page.
pub fn parse_tools(
    result: &Value,
) -> std::result::Result<(Vec<DiscoveredTool>, Option<String>), String> {
    let entries = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| "tools/list result has no tools array".to_string())?;
    let mut tools = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| "tool entry without a name".to_string())?;
        tools.push(DiscoveredTool {
            name: name.to_string(),
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    let next = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Ok((tools, next))
}
