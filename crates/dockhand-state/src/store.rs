//! Translated-configuration store.
//!
//! The agent runtime does not read cluster resources; it reads the
//! configuration the engine translated for it from this store.
//!
//! Guarantees:
//! - `store_*` is an upsert keyed by the record id.
//! - `delete_agent` is a no-op when the record is absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Translated configuration for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// `namespace/name`
    pub agent_id: String,
    /// `Declarative` or `BYO`
    pub agent_type: String,
    /// Runtime config JSON (declarative agents only)
    pub config_json: Option<String>,
    /// Capability card JSON (declarative agents only)
    pub card_json: Option<String>,
    /// Change-detection hash of the last translation
    pub config_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            config_json: None,
            card_json: None,
            config_hash: None,
            updated_at: Utc::now(),
        }
    }
}

/// A tool server and the tool names discovered on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServerRecord {
    /// `namespace/name`
    pub server_id: String,
    pub kind: String,
    pub url: String,
    pub protocol: String,
    pub description: String,
    pub tools: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn store_agent(&self, record: AgentRecord) -> StorageResult<()>;

    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>>;

    async fn delete_agent(&self, agent_id: &str) -> StorageResult<()>;

    /// All agent records ordered by id.
    async fn list_agents(&self) -> StorageResult<Vec<AgentRecord>>;

    async fn store_tool_server(&self, record: ToolServerRecord) -> StorageResult<()>;

    async fn get_tool_server(&self, server_id: &str) -> StorageResult<Option<ToolServerRecord>>;
}
