//! Runtime configuration consumed by the agent process.
//!
//! These are the documents written into the agent's config Secret as
//! `config.json` and `agent-card.json`. Maps are ordered so that the JSON is
//! byte-stable for unchanged input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::AgentSkill;

/// Fields common to every model descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseModel {
    pub model: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_disable_verify: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_ca_cert_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_disable_system_cas: Option<bool>,
}

/// Provider-specific model descriptor, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeModel {
    #[serde(rename = "openai")]
    OpenAi(OpenAiModel),
    #[serde(rename = "azure_openai")]
    AzureOpenAi(AzureOpenAiModel),
    #[serde(rename = "anthropic")]
    Anthropic(AnthropicModel),
    #[serde(rename = "gemini")]
    Gemini(GeminiModel),
    #[serde(rename = "gemini_vertex_ai")]
    GeminiVertexAi(GeminiVertexAiModel),
    #[serde(rename = "anthropic_vertex_ai")]
    AnthropicVertexAi(AnthropicVertexAiModel),
    #[serde(rename = "ollama")]
    Ollama(OllamaModel),
    #[serde(rename = "bedrock")]
    Bedrock(BedrockModel),
}

impl RuntimeModel {
    pub fn base(&self) -> &BaseModel {
        match self {
            RuntimeModel::OpenAi(m) => &m.base,
            RuntimeModel::AzureOpenAi(m) => &m.base,
            RuntimeModel::Anthropic(m) => &m.base,
            RuntimeModel::Gemini(m) => &m.base,
            RuntimeModel::GeminiVertexAi(m) => &m.base,
            RuntimeModel::AnthropicVertexAi(m) => &m.base,
            RuntimeModel::Ollama(m) => &m.base,
            RuntimeModel::Bedrock(m) => &m.base,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenAiModel {
    #[serde(flatten)]
    pub base: BaseModel,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureOpenAiModel {
    #[serde(flatten)]
    pub base: BaseModel,
    pub azure_endpoint: String,
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_deployment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_ad_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnthropicModel {
    #[serde(flatten)]
    pub base: BaseModel,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiModel {
    #[serde(flatten)]
    pub base: BaseModel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeminiVertexAiModel {
    #[serde(flatten)]
    pub base: BaseModel,
    pub project_id: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnthropicVertexAiModel {
    #[serde(flatten)]
    pub base: BaseModel,
    pub project_id: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OllamaModel {
    #[serde(flatten)]
    pub base: BaseModel,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BedrockModel {
    #[serde(flatten)]
    pub base: BaseModel,
    pub region: String,
}

/// Connection parameters shared by both transports. Timeouts are seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_read_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminate_on_close: Option<bool>,
}

/// One tool server as the runtime sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Toolset {
    pub params: ConnectionParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_approval: Vec<String>,
}

/// Another agent reachable over A2A.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAgentConfig {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// `config.json`: everything the declarative runtime needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: RuntimeModel,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_tools: Vec<Toolset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sse_tools: Vec<Toolset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_agents: Vec<RemoteAgentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_code: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

/// `agent-card.json`: the A2A card served by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub capabilities: AgentCapabilities,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_is_tagged_with_flattened_base() {
        let model = RuntimeModel::OpenAi(OpenAiModel {
            base: BaseModel {
                model: "gpt-4o".into(),
                ..Default::default()
            },
            temperature: Some(0.2),
            ..Default::default()
        });
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "openai", "model": "gpt-4o", "temperature": 0.2})
        );
        let back: RuntimeModel = serde_json::from_value(json).unwrap();
        assert_eq!(back, model);
    }
}
