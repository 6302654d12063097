//! The `ModelConfig` resource.
//!
//! Numeric sampling parameters are carried as strings (`"0.7"`) and parsed
//! during translation.

use std::collections::BTreeMap;

use dockhand_state::{impl_resource, Condition, ObjectMeta};
use serde::{Deserialize, Serialize};

use super::common::API_VERSION;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ModelConfigSpec,
    #[serde(default)]
    pub status: ModelConfigStatus,
}
impl_resource!(ModelConfig, API_VERSION, "ModelConfig");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelProvider {
    #[default]
    #[serde(rename = "OpenAI")]
    OpenAi,
    #[serde(rename = "AzureOpenAI")]
    AzureOpenAi,
    Anthropic,
    Gemini,
    #[serde(rename = "GeminiVertexAI")]
    GeminiVertexAi,
    #[serde(rename = "AnthropicVertexAI")]
    AnthropicVertexAi,
    Ollama,
    Bedrock,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "OpenAI",
            ModelProvider::AzureOpenAi => "AzureOpenAI",
            ModelProvider::Anthropic => "Anthropic",
            ModelProvider::Gemini => "Gemini",
            ModelProvider::GeminiVertexAi => "GeminiVertexAI",
            ModelProvider::AnthropicVertexAi => "AnthropicVertexAI",
            ModelProvider::Ollama => "Ollama",
            ModelProvider::Bedrock => "Bedrock",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigSpec {
    pub model: String,
    #[serde(default)]
    pub provider: ModelProvider,
    /// Secret holding the provider credential.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_secret_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(default, rename = "openAI", skip_serializing_if = "Option::is_none")]
    pub open_ai: Option<OpenAiConfig>,
    #[serde(default, rename = "azureOpenAI", skip_serializing_if = "Option::is_none")]
    pub azure_open_ai: Option<AzureOpenAiConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<AnthropicConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini: Option<GeminiConfig>,
    #[serde(default, rename = "geminiVertexAI", skip_serializing_if = "Option::is_none")]
    pub gemini_vertex_ai: Option<GeminiVertexAiConfig>,
    #[serde(default, rename = "anthropicVertexAI", skip_serializing_if = "Option::is_none")]
    pub anthropic_vertex_ai: Option<AnthropicVertexAiConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama: Option<OllamaConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrock: Option<BedrockConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default)]
    pub disable_verify: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_cert_secret_ref: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca_cert_secret_key: String,
    #[serde(default, rename = "disableSystemCAs")]
    pub disable_system_cas: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureOpenAiConfig {
    #[serde(default)]
    pub azure_endpoint: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_deployment: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_ad_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnthropicConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeminiConfig {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiVertexAiConfig {
    #[serde(default, rename = "projectID")]
    pub project_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub response_mime_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnthropicVertexAiConfig {
    #[serde(default, rename = "projectID")]
    pub project_id: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedrockConfig {
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Hex SHA-256 over the secrets this config references.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_wire_names() {
        let cfg: ModelConfigSpec = serde_json::from_value(serde_json::json!({
            "model": "gemini-2.0-flash",
            "provider": "GeminiVertexAI",
            "geminiVertexAI": {"projectID": "proj", "location": "us-central1"}
        }))
        .unwrap();
        assert_eq!(cfg.provider, ModelProvider::GeminiVertexAi);
        assert_eq!(cfg.gemini_vertex_ai.unwrap().project_id, "proj");
        assert_eq!(ModelProvider::AzureOpenAi.as_str(), "AzureOpenAI");
    }

    #[test]
    fn test_tls_flag_names() {
        let tls: TlsConfig = serde_json::from_value(serde_json::json!({
            "caCertSecretRef": "ca",
            "caCertSecretKey": "ca.crt",
            "disableSystemCAs": true
        }))
        .unwrap();
        assert!(tls.disable_system_cas);
        assert!(!tls.disable_verify);
    }
}
