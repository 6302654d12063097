//! The `Agent` resource.

use std::collections::BTreeMap;

use dockhand_state::objects::{
    EnvVar, LocalObjectReference, PodSecurityContext, ResourceRequirements, SecurityContext,
    Toleration, Volume, VolumeMount,
};
use dockhand_state::{impl_resource, ObjectMeta, Resource};
use serde::{Deserialize, Serialize};

use super::common::{AllowedNamespaces, CommonStatus, TypedReference, ValueRef, API_VERSION};

/// A declarative or bring-your-own agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: CommonStatus,
}
impl_resource!(Agent, API_VERSION, "Agent");

impl Agent {
    /// `namespace/name`, the identity used in graph walks and store records.
    pub fn identity(&self) -> String {
        self.object_ref().key()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    #[serde(rename = "type", default)]
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<SkillsSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declarative: Option<DeclarativeAgentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byo: Option<ByoAgentSpec>,
    /// Namespaces whose agents may use this agent as a tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<AllowedNamespaces>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    #[default]
    Declarative,
    #[serde(rename = "BYO")]
    Byo,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Declarative => "Declarative",
            AgentType::Byo => "BYO",
        }
    }
}

/// OCI image references pulled into `/skills` before the agent starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillsSpec {
    #[serde(default)]
    pub refs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeAgentSpec {
    #[serde(default)]
    pub system_message: String,
    /// `name` or `namespace/name` of a ModelConfig.
    pub model_config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_code_blocks: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a2a_config: Option<A2AConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeclarativeDeploymentSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByoAgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<ByoDeploymentSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarativeDeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<String>,
    #[serde(flatten)]
    pub shared: SharedDeploymentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByoDeploymentSpec {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(flatten)]
    pub shared: SharedDeploymentSpec,
}

/// Deployment preferences common to both agent types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedDeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContext>,
    /// Run as an existing service account instead of a generated one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Labels/annotations for the generated service account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_config: Option<ServiceAccountConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2AConfig {
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

/// A skill advertised on the agent card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_modes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_modes: Vec<String>,
}

/// A capability attached to a declarative agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(rename = "type", default)]
    pub tool_type: ToolType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_server: Option<McpServerTool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<TypedReference>,
    /// Headers sent with every call; override the server's own headers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_from: Vec<ValueRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolType {
    #[default]
    McpServer,
    Agent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerTool {
    #[serde(flatten)]
    pub reference: TypedReference,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_approval: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_deserializes_from_manifest() {
        let agent: Agent = serde_json::from_value(serde_json::json!({
            "apiVersion": "dockhand.stevedores.org/v1alpha1",
            "kind": "Agent",
            "metadata": {"name": "helper", "namespace": "default"},
            "spec": {
                "type": "Declarative",
                "description": "helps",
                "declarative": {
                    "systemMessage": "be helpful",
                    "modelConfig": "gpt",
                    "tools": [
                        {"type": "McpServer", "mcpServer": {"name": "k8s", "toolNames": ["get_pods"]}},
                        {"type": "Agent", "agent": {"name": "other"}}
                    ],
                    "deployment": {"imageRegistry": "registry.local", "replicas": 2}
                }
            }
        }))
        .unwrap();

        assert_eq!(agent.identity(), "default/helper");
        let decl = agent.spec.declarative.unwrap();
        assert_eq!(decl.tools.len(), 2);
        assert_eq!(decl.tools[0].mcp_server.as_ref().unwrap().reference.name, "k8s");
        assert_eq!(decl.tools[1].tool_type, ToolType::Agent);
        let deployment = decl.deployment.unwrap();
        assert_eq!(deployment.image_registry.as_deref(), Some("registry.local"));
        assert_eq!(deployment.shared.replicas, Some(2));
    }

    #[test]
    fn test_byo_type_serializes_as_upper_case() {
        let json = serde_json::to_value(AgentType::Byo).unwrap();
        assert_eq!(json, serde_json::json!("BYO"));
    }
}
