//! Agent translation.
//!
//! Turns one Agent plus everything it references into the runtime config,
//! the capability card and the ordered desired object set. Translation only
//! reads from the cluster; applying the result is the reconciler's job.

pub mod model;
pub mod runtime;
pub mod tools;

use tracing::{debug, instrument};

use dockhand_state::ClusterClient;

use crate::api::{Agent, AgentType, DeclarativeAgentSpec};
use crate::config::ControllerConfig;
use crate::deployment::resolve_deployment;
use crate::error::{Error, Result};
use crate::graph::validate_agent_graph;
use crate::manifest::{build_manifest, DesiredObject, RuntimeDocuments};
use crate::AGENT_PORT;

use self::model::translate_model;
use self::runtime::{AgentCapabilities, AgentCard, AgentConfig};
use self::tools::ToolResolver;

/// Everything translation produces for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutputs {
    /// Desired objects in apply order.
    pub objects: Vec<DesiredObject>,
    /// Runtime config; `None` for BYO agents.
    pub config: Option<AgentConfig>,
    pub card: Option<AgentCard>,
    /// Change-detection hash written to the pod template.
    pub config_hash: Option<u64>,
}

/// Translates Agents against a cluster snapshot.
pub struct AgentTranslator<'a> {
    cluster: &'a dyn ClusterClient,
    config: &'a ControllerConfig,
}

impl<'a> AgentTranslator<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, config: &'a ControllerConfig) -> Self {
        Self { cluster, config }
    }

    /// Validate the agent graph, then translate. No objects are produced when
    /// validation fails.
    #[instrument(skip_all, fields(agent = %agent.identity()))]
    pub async fn translate(&self, agent: &Agent) -> Result<AgentOutputs> {
        validate_agent_graph(self.cluster, agent).await?;

        match agent.spec.agent_type {
            AgentType::Declarative => {
                let spec = agent.spec.declarative.as_ref().ok_or_else(|| {
                    Error::validation("declarative agent has no declarative spec")
                })?;
                self.translate_declarative(agent, spec).await
            }
            AgentType::Byo => {
                let deployment = resolve_deployment(agent, self.config, None)?;
                let manifest = build_manifest(agent, &deployment, None, self.config)?;
                Ok(AgentOutputs {
                    objects: manifest.objects,
                    config: None,
                    card: None,
                    config_hash: None,
                })
            }
        }
    }

    async fn translate_declarative(
        &self,
        agent: &Agent,
        spec: &DeclarativeAgentSpec,
    ) -> Result<AgentOutputs> {
        let ns = agent.metadata.namespace.as_str();
        if spec.model_config.is_empty() {
            return Err(Error::validation("declarative agent has no modelConfig"));
        }
        let model = translate_model(self.cluster, &spec.model_config, ns).await?;
        let tools = ToolResolver::new(self.cluster, self.config)
            .translate_tools(agent, &spec.tools)
            .await?;
        debug!(
            http_tools = tools.http_tools.len(),
            sse_tools = tools.sse_tools.len(),
            remote_agents = tools.remote_agents.len(),
            "tools translated"
        );

        let config = AgentConfig {
            model: model.model.clone(),
            description: agent.spec.description.clone(),
            instruction: spec.system_message.clone(),
            http_tools: tools.http_tools,
            sse_tools: tools.sse_tools,
            remote_agents: tools.remote_agents,
            execute_code: spec.execute_code_blocks,
            stream: spec.stream,
        };
        let card = agent_card(agent, spec);

        let deployment = resolve_deployment(agent, self.config, Some(&model))?;
        let manifest = build_manifest(
            agent,
            &deployment,
            Some(RuntimeDocuments {
                config: &config,
                card: &card,
                secret_hash: &model.secret_hash,
            }),
            self.config,
        )?;

        Ok(AgentOutputs {
            objects: manifest.objects,
            config: Some(config),
            card: Some(card),
            config_hash: manifest.config_hash,
        })
    }
}

/// The A2A card served by a declarative agent.
pub fn agent_card(agent: &Agent, spec: &DeclarativeAgentSpec) -> AgentCard {
    let name = &agent.metadata.name;
    let ns = &agent.metadata.namespace;
    AgentCard {
        name: name.clone(),
        description: agent.spec.description.clone(),
        url: format!("http://{name}.{ns}:{AGENT_PORT}/"),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: AgentCapabilities {
            streaming: spec.stream.unwrap_or(false),
            push_notifications: false,
            state_transition_history: true,
        },
        default_input_modes: vec!["text".to_string()],
        default_output_modes: vec!["text".to_string()],
        skills: spec
            .a2a_config
            .as_ref()
            .map(|a2a| a2a.skills.clone())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{A2AConfig, AgentSkill, AgentSpec};
    use dockhand_state::ObjectMeta;

    #[test]
    fn test_agent_card() {
        let spec = DeclarativeAgentSpec {
            stream: Some(true),
            a2a_config: Some(A2AConfig {
                skills: vec![AgentSkill {
                    id: "triage".into(),
                    name: "Triage".into(),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        };
        let agent = Agent {
            metadata: ObjectMeta::named("team-a", "helper"),
            spec: AgentSpec {
                description: "helps".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let card = agent_card(&agent, &spec);
        assert_eq!(card.url, "http://helper.team-a:8080/");
        assert!(card.capabilities.streaming);
        assert_eq!(card.default_input_modes, ["text"]);
        assert_eq!(card.skills[0].id, "triage");
        assert_eq!(card.description, "helps");
    }
}
