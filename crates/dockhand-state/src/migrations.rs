//! SurrealDB schema initialization for the config store
//!
//! Safe to call on every connection; every statement is idempotent.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::store::StorageResult;

/// Initialize all Dockhand tables.
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing Dockhand config store schema");

    init_agents_table(db).await?;
    init_tool_servers_table(db).await?;

    info!("Dockhand schema initialization complete");
    Ok(())
}

/// Initialize `agents` table
///
/// Schema:
/// ```text
/// TABLE agents {
///   agent_id:     STRING (unique, "namespace/name")
///   agent_type:   STRING
///   config_json:  STRING?
///   card_json:    STRING?
///   config_hash:  STRING?
///   updated_at:   DATETIME
/// }
/// ```
async fn init_agents_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing agents table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS agents SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_agent_id ON TABLE agents COLUMNS agent_id UNIQUE;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::SchemaSetup(format!("agents table: {e}")))?;
    Ok(())
}

/// Initialize `tool_servers` table
///
/// Schema:
/// ```text
/// TABLE tool_servers {
///   server_id:    STRING (unique, "namespace/name")
///   kind:         STRING
///   url:          STRING
///   protocol:     STRING
///   description:  STRING
///   tools:        ARRAY<STRING>
///   updated_at:   DATETIME
/// }
/// ```
async fn init_tool_servers_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing tool_servers table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tool_servers SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_server_id ON TABLE tool_servers COLUMNS server_id UNIQUE;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StorageError::SchemaSetup(format!("tool_servers table: {e}")))?;
    Ok(())
}
