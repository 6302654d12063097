//! Tool server resources: `RemoteMCPServer` (an endpoint somewhere) and
//! `MCPServer` (a server Dockhand's sibling controller runs in-cluster).

use std::fmt;

use dockhand_state::{impl_resource, Condition, ObjectMeta};
use serde::{Deserialize, Serialize};

use super::common::{AllowedNamespaces, ValueRef, API_VERSION};

/// Wire protocol of a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum McpProtocol {
    #[default]
    #[serde(rename = "STREAMABLE_HTTP")]
    StreamableHttp,
    #[serde(rename = "SSE")]
    Sse,
}

impl McpProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpProtocol::StreamableHttp => "STREAMABLE_HTTP",
            McpProtocol::Sse => "SSE",
        }
    }

    /// Parse a protocol name; case-insensitive, `-` and `_` interchangeable.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "STREAMABLE_HTTP" | "HTTP" => Some(McpProtocol::StreamableHttp),
            "SSE" => Some(McpProtocol::Sse),
            _ => None,
        }
    }
}

impl fmt::Display for McpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMcpServer {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RemoteMcpServerSpec,
    #[serde(default)]
    pub status: RemoteMcpServerStatus,
}
impl_resource!(RemoteMcpServer, API_VERSION, "RemoteMCPServer");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServerSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub protocol: McpProtocol,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_from: Vec<ValueRef>,
    /// Duration string such as `30s` or `1m30s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_read_timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_on_close: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<AllowedNamespaces>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMcpServerStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovered_tools: Vec<DiscoveredTool>,
}

/// A tool reported by a server's `tools/list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServer {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: McpServerSpec,
    #[serde(default)]
    pub status: super::common::CommonStatus,
}
impl_resource!(McpServer, API_VERSION, "MCPServer");

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerSpec {
    #[serde(default)]
    pub deployment: McpServerDeployment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerDeployment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}
