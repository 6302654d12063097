//! SurrealDB-backed ConfigStore implementation
//!
//! Rows are plain structs with string timestamps; conversion to the
//! `store` record types happens at the boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::store::{AgentRecord, ConfigStore, StorageResult, ToolServerRecord};

/// Connection settings for the config store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Endpoint URL (`mem://`, `surrealkv://path`, `ws://host:port`, ...)
    pub url: String,
    /// Namespace (default: "dockhand")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Root credentials; sign-in is skipped when absent
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "dockhand".to_string(),
            database: "main".to_string(),
            username: None,
            password: None,
        }
    }
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - DOCKHAND_STORE_URL (optional, default: "mem://")
    /// - DOCKHAND_STORE_NAMESPACE (optional, default: "dockhand")
    /// - DOCKHAND_STORE_DATABASE (optional, default: "main")
    /// - DOCKHAND_STORE_USERNAME / DOCKHAND_STORE_PASSWORD (optional, both or neither)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("DOCKHAND_STORE_URL").unwrap_or(defaults.url),
            namespace: std::env::var("DOCKHAND_STORE_NAMESPACE").unwrap_or(defaults.namespace),
            database: std::env::var("DOCKHAND_STORE_DATABASE").unwrap_or(defaults.database),
            username: std::env::var("DOCKHAND_STORE_USERNAME").ok(),
            password: std::env::var("DOCKHAND_STORE_PASSWORD").ok(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AgentRow {
    agent_id: String,
    agent_type: String,
    config_json: Option<String>,
    card_json: Option<String>,
    config_hash: Option<String>,
    updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ToolServerRow {
    server_id: String,
    kind: String,
    url: String,
    protocol: String,
    description: String,
    tools: Vec<String>,
    updated_at: String,
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Backend(format!("bad timestamp {raw:?}: {e}")))
}

impl From<AgentRecord> for AgentRow {
    fn from(r: AgentRecord) -> Self {
        Self {
            agent_id: r.agent_id,
            agent_type: r.agent_type,
            config_json: r.config_json,
            card_json: r.card_json,
            config_hash: r.config_hash,
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

impl TryFrom<AgentRow> for AgentRecord {
    type Error = StorageError;

    fn try_from(row: AgentRow) -> StorageResult<Self> {
        Ok(Self {
            updated_at: parse_timestamp(&row.updated_at)?,
            agent_id: row.agent_id,
            agent_type: row.agent_type,
            config_json: row.config_json,
            card_json: row.card_json,
            config_hash: row.config_hash,
        })
    }
}

impl From<ToolServerRecord> for ToolServerRow {
    fn from(r: ToolServerRecord) -> Self {
        Self {
            server_id: r.server_id,
            kind: r.kind,
            url: r.url,
            protocol: r.protocol,
            description: r.description,
            tools: r.tools,
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

impl TryFrom<ToolServerRow> for ToolServerRecord {
    type Error = StorageError;

    fn try_from(row: ToolServerRow) -> StorageResult<Self> {
        Ok(Self {
            updated_at: parse_timestamp(&row.updated_at)?,
            server_id: row.server_id,
            kind: row.kind,
            url: row.url,
            protocol: row.protocol,
            description: row.description,
            tools: row.tools,
        })
    }
}

/// SurrealDB-backed implementation of [`ConfigStore`].
pub struct SurrealConfigStore {
    db: Surreal<Any>,
}

impl SurrealConfigStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect(&StoreConfig::default()).await
    }

    /// Connect, sign in when credentials are configured, select ns/db and
    /// run schema init.
    pub async fn connect(config: &StoreConfig) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| StorageError::Connection(format!("{}: {e}", config.url)))?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .map_err(|e| StorageError::Connection(format!("root auth failed: {e}")))?;
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(url = %config.url, "SurrealConfigStore connected");
        Ok(Self { db })
    }
}

#[async_trait]
impl ConfigStore for SurrealConfigStore {
    async fn store_agent(&self, record: AgentRecord) -> StorageResult<()> {
        debug!(agent_id = %record.agent_id, "upserting agent record");
        let id = record.agent_id.clone();
        let row = AgentRow::from(record);
        self.db
            .query("UPSERT type::thing('agents', $id) CONTENT $row")
            .bind(("id", id))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM agents WHERE agent_id = $id")
            .bind(("id", agent_id.to_string()))
            .await?;
        let rows: Vec<AgentRow> = res.take(0)?;
        rows.into_iter().next().map(AgentRecord::try_from).transpose()
    }

    async fn delete_agent(&self, agent_id: &str) -> StorageResult<()> {
        self.db
            .query("DELETE agents WHERE agent_id = $id")
            .bind(("id", agent_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_agents(&self) -> StorageResult<Vec<AgentRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM agents ORDER BY agent_id ASC")
            .await?;
        let rows: Vec<AgentRow> = res.take(0)?;
        rows.into_iter().map(AgentRecord::try_from).collect()
    }

    async fn store_tool_server(&self, record: ToolServerRecord) -> StorageResult<()> {
        debug!(server_id = %record.server_id, "upserting tool server record");
        let id = record.server_id.clone();
        let row = ToolServerRow::from(record);
        self.db
            .query("UPSERT type::thing('tool_servers', $id) CONTENT $row")
            .bind(("id", id))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn get_tool_server(&self, server_id: &str) -> StorageResult<Option<ToolServerRecord>> {
        let mut res = self
            .db
            .query("SELECT * FROM tool_servers WHERE server_id = $id")
            .bind(("id", server_id.to_string()))
            .await?;
        let rows: Vec<ToolServerRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(ToolServerRecord::try_from)
            .transpose()
    }
}
