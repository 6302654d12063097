//! Dockhand resource definitions (`dockhand.stevedores.org/v1alpha1`).

pub mod agent;
pub mod common;
pub mod model_config;
pub mod tool_server;

pub use agent::{
    A2AConfig, Agent, AgentSkill, AgentSpec, AgentType, ByoAgentSpec, ByoDeploymentSpec,
    DeclarativeAgentSpec, DeclarativeDeploymentSpec, McpServerTool, ServiceAccountConfig,
    SharedDeploymentSpec, SkillsSpec, Tool, ToolType,
};
pub use common::{
    split_reference, AllowedNamespaces, CommonStatus, FromNamespaces, NamespaceSelector,
    TypedReference, ValueRef, ValueSource, ValueSourceKind, API_GROUP, API_VERSION,
};
pub use model_config::{
    AnthropicConfig, AnthropicVertexAiConfig, AzureOpenAiConfig, BedrockConfig, GeminiConfig,
    GeminiVertexAiConfig, ModelConfig, ModelConfigSpec, ModelConfigStatus, ModelProvider,
    OllamaConfig, OpenAiConfig, TlsConfig,
};
pub use tool_server::{
    DiscoveredTool, McpProtocol, McpServer, McpServerDeployment, McpServerSpec, RemoteMcpServer,
    RemoteMcpServerSpec, RemoteMcpServerStatus,
};
