//! Tool resolution.
//!
//! Every tool server reference, whatever its kind, is normalized into a
//! [`RemoteEndpoint`]. Endpoints and agent-as-tool references are then turned
//! into the runtime's toolsets and remote-agent entries, with headers
//! resolved and cluster-internal URLs optionally routed through a proxy.

use std::collections::BTreeMap;
use std::time::Duration;

use dockhand_state::objects::{Namespace, Service};
use dockhand_state::{ClusterClient, ClusterClientExt, ObjectRef, Resource};
use reqwest::Url;
use tracing::debug;

use super::runtime::{ConnectionParams, RemoteAgentConfig, Toolset};
use crate::api::{
    Agent, AllowedNamespaces, FromNamespaces, McpProtocol, McpServer, McpServerTool,
    RemoteMcpServer, Tool, ToolType, TypedReference, ValueRef, API_GROUP,
};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::resolve::resolve_headers;
use crate::AGENT_PORT;

/// Header carrying the original host when a URL is routed via the proxy.
pub const PROXY_HOST_HEADER: &str = "x-dockhand-host";
pub const SERVICE_PATH_ANNOTATION: &str = "dockhand.stevedores.org/mcp-service-path";
pub const SERVICE_PORT_ANNOTATION: &str = "dockhand.stevedores.org/mcp-service-port";
pub const SERVICE_PROTOCOL_ANNOTATION: &str = "dockhand.stevedores.org/mcp-service-protocol";
const DEFAULT_MCP_PATH: &str = "/mcp";
const NAMESPACE_SEPARATOR: &str = "__NS__";

/// The kinds of object a tool may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolServerKind {
    RemoteMcpServer,
    McpServer,
    Service,
}

impl ToolServerKind {
    /// Classify a reference. An empty kind means `RemoteMCPServer`.
    pub fn from_reference(reference: &TypedReference) -> Result<Self> {
        let ours = reference.api_group.is_empty() || reference.api_group == API_GROUP;
        match reference.kind.as_str() {
            "" | "RemoteMCPServer" if ours => Ok(ToolServerKind::RemoteMcpServer),
            "MCPServer" if ours => Ok(ToolServerKind::McpServer),
            "Service" if reference.api_group.is_empty() || reference.api_group == "core" => {
                Ok(ToolServerKind::Service)
            }
            _ => Err(Error::validation(format!(
                "unknown tool server kind {:?} (apiGroup {:?}) for {}",
                reference.kind, reference.api_group, reference.name
            ))),
        }
    }
}

/// Canonical description of a reachable tool server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEndpoint {
    pub url: String,
    pub protocol: McpProtocol,
    /// Headers declared on the server object.
    pub headers_from: Vec<ValueRef>,
    /// Namespace `headers_from` is resolved in.
    pub namespace: String,
    pub timeout: Option<Duration>,
    pub sse_read_timeout: Option<Duration>,
    pub terminate_on_close: Option<bool>,
}

impl RemoteEndpoint {
    fn new(url: String, protocol: McpProtocol, namespace: &str) -> Self {
        Self {
            url,
            protocol,
            headers_from: Vec::new(),
            namespace: namespace.to_string(),
            timeout: None,
            sse_read_timeout: None,
            terminate_on_close: None,
        }
    }
}

/// Toolsets and remote agents for one declarative agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedTools {
    pub http_tools: Vec<Toolset>,
    pub sse_tools: Vec<Toolset>,
    pub remote_agents: Vec<RemoteAgentConfig>,
}

/// Parse a duration such as `500ms`, `30s`, `5m`, `1h` or `1m30s`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let invalid = |why: &str| Error::validation(format!("invalid duration {raw:?}: {why}"));
    let mut rest = raw.trim();
    if rest.is_empty() {
        return Err(invalid("empty"));
    }

    let mut seconds = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| invalid("bad number"))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor = match &rest[..unit_end] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        seconds += value * factor;
        rest = &rest[unit_end..];
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid("out of range"))
}

/// Runtime name of an agent used as a tool: `<ns>__NS__<name>`, with `-`
/// replaced since the runtime uses the name as an identifier.
pub fn agent_tool_name(namespace: &str, name: &str) -> String {
    format!("{namespace}{NAMESPACE_SEPARATOR}{name}").replace('-', "_")
}

/// Resolves tool references for agents.
pub struct ToolResolver<'a> {
    cluster: &'a dyn ClusterClient,
    proxy: Option<&'a Url>,
    cluster_domain: &'a str,
}

impl<'a> ToolResolver<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, config: &'a ControllerConfig) -> Self {
        Self {
            cluster,
            proxy: config.proxy_url.as_ref(),
            cluster_domain: &config.cluster_domain,
        }
    }

    /// Normalize the server `reference` points at, as seen from `from_ns`.
    pub async fn resolve_endpoint(
        &self,
        reference: &TypedReference,
        from_ns: &str,
    ) -> Result<RemoteEndpoint> {
        let ns = reference.namespace_or(from_ns);
        let name = reference.name.as_str();
        match ToolServerKind::from_reference(reference)? {
            ToolServerKind::RemoteMcpServer => {
                let server = self
                    .cluster
                    .get_resource_opt::<RemoteMcpServer>(ns, name)
                    .await?
                    .ok_or_else(|| Error::not_found("RemoteMCPServer", format!("{ns}/{name}")))?;
                self.check_cross_namespace(
                    server.spec.allowed_namespaces.as_ref(),
                    from_ns,
                    &server.object_ref(),
                )
                .await?;
                remote_endpoint(&server)
            }
            ToolServerKind::McpServer => {
                let server = self
                    .cluster
                    .get_resource_opt::<McpServer>(ns, name)
                    .await?
                    .ok_or_else(|| Error::not_found("MCPServer", format!("{ns}/{name}")))?;
                let port = server.spec.deployment.port;
                if port == 0 {
                    return Err(Error::validation(format!(
                        "cannot determine port for MCPServer {ns}/{name}"
                    )));
                }
                Ok(RemoteEndpoint::new(
                    format!("http://{name}.{ns}:{port}{DEFAULT_MCP_PATH}"),
                    McpProtocol::StreamableHttp,
                    ns,
                ))
            }
            ToolServerKind::Service => {
                let service = self
                    .cluster
                    .get_resource_opt::<Service>(ns, name)
                    .await?
                    .ok_or_else(|| Error::not_found("Service", format!("{ns}/{name}")))?;
                service_endpoint(&service)
            }
        }
    }

    /// Translate an agent's tools in declaration order.
    pub async fn translate_tools(&self, agent: &Agent, tools: &[Tool]) -> Result<ResolvedTools> {
        let mut resolved = ResolvedTools::default();
        for tool in tools {
            match tool.tool_type {
                ToolType::McpServer => {
                    let mcp = tool.mcp_server.as_ref().ok_or_else(|| {
                        Error::validation(format!(
                            "McpServer tool on {} has no mcpServer reference",
                            agent.identity()
                        ))
                    })?;
                    let (protocol, toolset) = self.mcp_toolset(agent, tool, mcp).await?;
                    match protocol {
                        McpProtocol::Sse => resolved.sse_tools.push(toolset),
                        McpProtocol::StreamableHttp => resolved.http_tools.push(toolset),
                    }
                }
                ToolType::Agent => {
                    let reference = tool.agent.as_ref().ok_or_else(|| {
                        Error::validation(format!(
                            "Agent tool on {} has no agent reference",
                            agent.identity()
                        ))
                    })?;
                    resolved
                        .remote_agents
                        .push(self.agent_entry(agent, tool, reference).await?);
                }
            }
        }
        Ok(resolved)
    }

    async fn mcp_toolset(
        &self,
        agent: &Agent,
        tool: &Tool,
        mcp: &McpServerTool,
    ) -> Result<(McpProtocol, Toolset)> {
        let agent_ns = agent.metadata.namespace.as_str();
        let endpoint = self.resolve_endpoint(&mcp.reference, agent_ns).await?;

        let mut headers =
            resolve_headers(self.cluster, &endpoint.namespace, &endpoint.headers_from).await?;
        headers.extend(resolve_headers(self.cluster, agent_ns, &tool.headers_from).await?);
        let url = self.rewrite_for_proxy(&endpoint.url, &mut headers).await?;

        let toolset = Toolset {
            params: ConnectionParams {
                url,
                headers,
                timeout: endpoint.timeout.map(|d| d.as_secs_f64()),
                sse_read_timeout: endpoint.sse_read_timeout.map(|d| d.as_secs_f64()),
                terminate_on_close: endpoint.terminate_on_close,
            },
            tools: mcp.tool_names.clone(),
            require_approval: mcp.require_approval.clone(),
        };
        debug!(
            agent = %agent.identity(),
            server = %mcp.reference.name,
            protocol = %endpoint.protocol,
            "resolved tool server"
        );
        Ok((endpoint.protocol, toolset))
    }

    async fn agent_entry(
        &self,
        agent: &Agent,
        tool: &Tool,
        reference: &TypedReference,
    ) -> Result<RemoteAgentConfig> {
        let agent_ns = agent.metadata.namespace.as_str();
        let ns = reference.namespace_or(agent_ns);
        if ns == agent_ns && reference.name == agent.metadata.name {
            return Err(Error::SelfReference {
                agent: agent.identity(),
            });
        }
        let target = self
            .cluster
            .get_resource_opt::<Agent>(ns, &reference.name)
            .await?
            .ok_or_else(|| Error::not_found("Agent", format!("{ns}/{}", reference.name)))?;
        self.check_cross_namespace(
            target.spec.allowed_namespaces.as_ref(),
            agent_ns,
            &target.object_ref(),
        )
        .await?;

        let mut headers = resolve_headers(self.cluster, agent_ns, &tool.headers_from).await?;
        let url = format!("http://{}.{ns}:{AGENT_PORT}", reference.name);
        let url = self.rewrite_for_proxy(&url, &mut headers).await?;
        Ok(RemoteAgentConfig {
            name: agent_tool_name(ns, &reference.name),
            url,
            headers,
            description: target.spec.description,
        })
    }

    /// Route `url` through the proxy when one is configured and the host is
    /// inside the cluster. The original host goes into
    /// [`PROXY_HOST_HEADER`]; the path is kept.
    pub async fn rewrite_for_proxy(
        &self,
        url: &str,
        headers: &mut BTreeMap<String, String>,
    ) -> Result<String> {
        let Some(proxy) = self.proxy else {
            return Ok(url.to_string());
        };
        let target = Url::parse(url)
            .map_err(|e| Error::resolution(format!("tool url {url:?}"), e.to_string()))?;
        let Some(host) = target.host_str() else {
            return Ok(url.to_string());
        };
        if !self.is_internal_host(host).await? {
            return Ok(url.to_string());
        }

        let original_host = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let proxy_err = |what: &str| Error::resolution(format!("proxy rewrite of {url:?}"), what);
        let mut rewritten = target.clone();
        rewritten
            .set_scheme(proxy.scheme())
            .map_err(|_| proxy_err("incompatible scheme"))?;
        rewritten
            .set_host(proxy.host_str())
            .map_err(|e| proxy_err(&e.to_string()))?;
        rewritten
            .set_port(proxy.port())
            .map_err(|_| proxy_err("cannot set port"))?;
        headers.insert(PROXY_HOST_HEADER.to_string(), original_host);
        Ok(rewritten.to_string())
    }

    /// Best effort: a host under the cluster domain, or `name.namespace`
    /// where the namespace exists.
    async fn is_internal_host(&self, host: &str) -> Result<bool> {
        if !self.cluster_domain.is_empty() && host.ends_with(&format!(".{}", self.cluster_domain)) {
            return Ok(true);
        }
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() != 2 || labels.iter().any(|l| l.is_empty()) {
            return Ok(false);
        }
        Ok(self
            .cluster
            .get_resource_opt::<Namespace>("", labels[1])
            .await?
            .is_some())
    }

    async fn check_cross_namespace(
        &self,
        policy: Option<&AllowedNamespaces>,
        from_ns: &str,
        target: &ObjectRef,
    ) -> Result<()> {
        if from_ns == target.namespace {
            return Ok(());
        }
        let admitted = match policy {
            None => false,
            Some(p) if p.from == FromNamespaces::All => true,
            Some(p) => {
                let labels = self
                    .cluster
                    .get_resource_opt::<Namespace>("", from_ns)
                    .await?
                    .map(|n| n.metadata.labels)
                    .unwrap_or_default();
                p.admits(&labels)
            }
        };
        if admitted {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "{target} does not allow references from namespace {from_ns}"
            )))
        }
    }
}

/// Endpoint of a RemoteMCPServer; duration strings are parsed here.
pub fn remote_endpoint(server: &RemoteMcpServer) -> Result<RemoteEndpoint> {
    let spec = &server.spec;
    if spec.url.is_empty() {
        return Err(Error::validation(format!(
            "RemoteMCPServer {} has no url",
            server.object_ref().key()
        )));
    }
    let mut endpoint =
        RemoteEndpoint::new(spec.url.clone(), spec.protocol, &server.metadata.namespace);
    endpoint.headers_from = spec.headers_from.clone();
    endpoint.timeout = spec.timeout.as_deref().map(parse_duration).transpose()?;
    endpoint.sse_read_timeout = spec
        .sse_read_timeout
        .as_deref()
        .map(parse_duration)
        .transpose()?;
    endpoint.terminate_on_close = spec.terminate_on_close;
    Ok(endpoint)
}

fn service_endpoint(service: &Service) -> Result<RemoteEndpoint> {
    let ns = service.metadata.namespace.as_str();
    let name = service.metadata.name.as_str();
    let annotations = &service.metadata.annotations;

    let port = match annotations.get(SERVICE_PORT_ANNOTATION) {
        Some(raw) => Some(raw.trim().parse::<i32>().map_err(|_| {
            Error::validation(format!(
                "Service {ns}/{name}: {SERVICE_PORT_ANNOTATION} is not a port: {raw:?}"
            ))
        })?),
        None => {
            let ports = &service.spec.ports;
            ports
                .iter()
                .find(|p| p.app_protocol.as_deref() == Some("mcp") || p.name == "mcp")
                .or(if ports.len() == 1 { ports.first() } else { None })
                .map(|p| p.port)
        }
    }
    .filter(|p| *p > 0)
    .ok_or_else(|| Error::validation(format!("cannot determine port for Service {ns}/{name}")))?;

    let path = annotations
        .get(SERVICE_PATH_ANNOTATION)
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_MCP_PATH);
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    let protocol = match annotations.get(SERVICE_PROTOCOL_ANNOTATION) {
        Some(raw) => McpProtocol::parse(raw).ok_or_else(|| {
            Error::validation(format!(
                "Service {ns}/{name}: unknown protocol {raw:?} in {SERVICE_PROTOCOL_ANNOTATION}"
            ))
        })?,
        None => McpProtocol::StreamableHttp,
    };

    Ok(RemoteEndpoint::new(
        format!("http://{name}.{ns}:{port}{path}"),
        protocol,
        ns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_state::objects::{ServicePort, ServiceSpec};
    use dockhand_state::{MemoryCluster, ObjectMeta};

    fn service(name: &str, ports: Vec<ServicePort>) -> Service {
        Service {
            metadata: ObjectMeta::named("tools", name),
            spec: ServiceSpec {
                ports,
                ..Default::default()
            },
        }
    }

    fn port(name: &str, number: i32) -> ServicePort {
        ServicePort {
            name: name.into(),
            port: number,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("3d").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        let err = parse_duration("99999999999999999999999h").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_agent_tool_name_sanitized() {
        assert_eq!(agent_tool_name("team-a", "k8s-agent"), "team_a__NS__k8s_agent");
    }

    #[test]
    fn test_kind_defaults_to_remote_server() {
        let reference = TypedReference {
            name: "x".into(),
            ..Default::default()
        };
        assert_eq!(
            ToolServerKind::from_reference(&reference).unwrap(),
            ToolServerKind::RemoteMcpServer
        );
        let unknown = TypedReference {
            kind: "Ingress".into(),
            name: "x".into(),
            ..Default::default()
        };
        let err = ToolServerKind::from_reference(&unknown).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("unknown tool server kind"));
    }

    #[test]
    fn test_service_port_selection() {
        let named = service("named", vec![port("metrics", 9090), port("mcp", 8084)]);
        assert_eq!(
            service_endpoint(&named).unwrap().url,
            "http://named.tools:8084/mcp"
        );

        let sole = service("sole", vec![port("http", 3000)]);
        assert_eq!(service_endpoint(&sole).unwrap().url, "http://sole.tools:3000/mcp");

        let ambiguous = service("ambiguous", vec![port("a", 1), port("b", 2)]);
        let err = service_endpoint(&ambiguous).unwrap_err();
        assert!(err.to_string().contains("cannot determine port"));
    }

    #[test]
    fn test_service_annotations_override() {
        let mut svc = service("annotated", vec![port("a", 1), port("b", 2)]);
        svc.metadata
            .annotations
            .insert(SERVICE_PORT_ANNOTATION.into(), "7000".into());
        svc.metadata
            .annotations
            .insert(SERVICE_PATH_ANNOTATION.into(), "sse".into());
        svc.metadata
            .annotations
            .insert(SERVICE_PROTOCOL_ANNOTATION.into(), "SSE".into());
        let endpoint = service_endpoint(&svc).unwrap();
        assert_eq!(endpoint.url, "http://annotated.tools:7000/sse");
        assert_eq!(endpoint.protocol, McpProtocol::Sse);
    }

    #[tokio::test]
    async fn test_proxy_rewrite_only_for_internal_hosts() {
        let cluster = MemoryCluster::new();
        cluster
            .seed(&Namespace {
                metadata: ObjectMeta {
                    name: "tools".into(),
                    ..Default::default()
                },
            })
            .unwrap();
        let config = ControllerConfig::new()
            .with_proxy_url("http://proxy.dockhand:9000")
            .unwrap();
        let resolver = ToolResolver::new(&cluster, &config);

        let mut headers = BTreeMap::new();
        let url = resolver
            .rewrite_for_proxy("http://k8s.tools:8084/mcp", &mut headers)
            .await
            .unwrap();
        assert_eq!(url, "http://proxy.dockhand:9000/mcp");
        assert_eq!(headers[PROXY_HOST_HEADER], "k8s.tools:8084");

        let mut headers = BTreeMap::new();
        let url = resolver
            .rewrite_for_proxy("http://k8s.tools.svc.cluster.local/mcp", &mut headers)
            .await
            .unwrap();
        assert_eq!(url, "http://proxy.dockhand:9000/mcp");
        assert_eq!(headers[PROXY_HOST_HEADER], "k8s.tools.svc.cluster.local");

        let mut headers = BTreeMap::new();
        let url = resolver
            .rewrite_for_proxy("https://api.example.com/mcp", &mut headers)
            .await
            .unwrap();
        assert_eq!(url, "https://api.example.com/mcp");
        assert!(headers.is_empty());

        // two labels, but no such namespace
        let url = resolver
            .rewrite_for_proxy("http://example.com/mcp", &mut headers)
            .await
            .unwrap();
        assert_eq!(url, "http://example.com/mcp");
    }

    #[tokio::test]
    async fn test_no_proxy_leaves_urls_alone() {
        let cluster = MemoryCluster::new();
        let config = ControllerConfig::new();
        let resolver = ToolResolver::new(&cluster, &config);
        let mut headers = BTreeMap::new();
        let url = resolver
            .rewrite_for_proxy("http://k8s.tools:8084/mcp", &mut headers)
            .await
            .unwrap();
        assert_eq!(url, "http://k8s.tools:8084/mcp");
        assert!(headers.is_empty());
    }
}
