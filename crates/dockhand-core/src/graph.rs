//! Agent reference graph validation.
//!
//! Agents can use other agents as tools. Before anything is translated the
//! graph reachable from an agent must be free of self references and cycles,
//! and no deeper than [`MAX_AGENT_DEPTH`]. Only agent edges are walked; tool
//! server references cannot point back at agents.

use dockhand_state::{ClusterClient, ClusterClientExt};
use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::api::{Agent, AgentType, ToolType};
use crate::error::{Error, Result};

/// Deepest nesting of agent-as-tool references accepted.
pub const MAX_AGENT_DEPTH: usize = 10;

/// Accumulator threaded through one walk: how deep we are and which agents
/// are on the current path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationState {
    depth: usize,
    visited: Vec<String>,
}

impl TranslationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    /// State for the agents referenced by `identity`.
    pub fn descend(&self, identity: &str) -> Self {
        let mut visited = self.visited.clone();
        visited.push(identity.to_string());
        Self {
            depth: self.depth + 1,
            visited,
        }
    }
}

/// Validate the agent graph rooted at `agent`.
pub async fn validate_agent_graph(cluster: &dyn ClusterClient, agent: &Agent) -> Result<()> {
    validate(cluster, agent.clone(), TranslationState::new()).await
}

fn validate<'a>(
    cluster: &'a dyn ClusterClient,
    agent: Agent,
    state: TranslationState,
) -> BoxFuture<'a, Result<()>> {
    async move {
        let identity = agent.identity();
        if state.visited.contains(&identity) {
            return Err(Error::CycleDetected {
                agent: identity,
                path: state.visited,
            });
        }
        if state.depth > MAX_AGENT_DEPTH {
            return Err(Error::RecursionLimit {
                agent: identity,
                depth: state.depth,
                limit: MAX_AGENT_DEPTH,
            });
        }
        if agent.spec.agent_type != AgentType::Declarative {
            return Ok(());
        }
        let Some(declarative) = &agent.spec.declarative else {
            return Ok(());
        };

        let namespace = agent.metadata.namespace.as_str();
        let next = state.descend(&identity);
        for tool in declarative
            .tools
            .iter()
            .filter(|t| t.tool_type == ToolType::Agent)
        {
            let reference = tool.agent.as_ref().ok_or_else(|| {
                Error::validation(format!("agent tool on {identity} has no agent reference"))
            })?;
            let target_ns = reference.namespace_or(namespace);
            if target_ns == namespace && reference.name == agent.metadata.name {
                return Err(Error::SelfReference { agent: identity });
            }
            let child = cluster
                .get_resource_opt::<Agent>(target_ns, &reference.name)
                .await?
                .ok_or_else(|| {
                    Error::not_found("Agent", format!("{target_ns}/{}", reference.name))
                })?;
            debug!(
                parent = %identity,
                child = %child.identity(),
                depth = next.depth,
                "walking agent edge"
            );
            validate(cluster, child, next.clone()).await?;
        }
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descend_extends_by_value() {
        let root = TranslationState::new();
        let child = root.descend("default/a");
        let grandchild = child.descend("default/b");

        assert_eq!(root.depth(), 0);
        assert!(root.visited().is_empty());
        assert_eq!(child.visited(), ["default/a"]);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.visited(), ["default/a", "default/b"]);
    }
}
