//! Contract tests for ConfigStore.
//!
//! Both the in-memory fake and the SurrealDB backend (on `mem://`) must
//! satisfy the same upsert/delete/list behaviour.

use chrono::Utc;
use dockhand_state::{
    AgentRecord, ConfigStore, MemoryConfigStore, SurrealConfigStore, ToolServerRecord,
};

fn agent(id: &str, hash: &str) -> AgentRecord {
    let mut record = AgentRecord::new(id, "Declarative");
    record.config_json = Some(r#"{"model":{"type":"openai"}}"#.to_string());
    record.config_hash = Some(hash.to_string());
    record
}

async fn check_agent_upsert(store: &dyn ConfigStore) {
    store.store_agent(agent("default/a", "1")).await.unwrap();
    store.store_agent(agent("default/a", "2")).await.unwrap();

    let fetched = store.get_agent("default/a").await.unwrap().unwrap();
    assert_eq!(fetched.config_hash.as_deref(), Some("2"));
    assert_eq!(store.list_agents().await.unwrap().len(), 1);
}

async fn check_agent_delete(store: &dyn ConfigStore) {
    store.store_agent(agent("default/b", "1")).await.unwrap();
    store.delete_agent("default/b").await.unwrap();
    store.delete_agent("default/b").await.unwrap();
    assert!(store.get_agent("default/b").await.unwrap().is_none());
}

async fn check_list_order(store: &dyn ConfigStore) {
    store.store_agent(agent("team-z/z", "1")).await.unwrap();
    store.store_agent(agent("team-a/a", "1")).await.unwrap();
    let ids: Vec<String> = store
        .list_agents()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.agent_id)
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

async fn check_tool_server(store: &dyn ConfigStore) {
    let record = ToolServerRecord {
        server_id: "tools/k8s".into(),
        kind: "RemoteMCPServer".into(),
        url: "http://k8s-tools.tools:8084/mcp".into(),
        protocol: "STREAMABLE_HTTP".into(),
        description: "cluster tools".into(),
        tools: vec!["get_pods".into(), "get_logs".into()],
        updated_at: Utc::now(),
    };
    store.store_tool_server(record.clone()).await.unwrap();
    let fetched = store.get_tool_server("tools/k8s").await.unwrap().unwrap();
    assert_eq!(fetched.tools, record.tools);
    assert_eq!(fetched.url, record.url);
}

#[tokio::test]
async fn memory_store_contracts() {
    let store = MemoryConfigStore::new();
    check_agent_upsert(&store).await;
    check_agent_delete(&store).await;
    check_list_order(&store).await;
    check_tool_server(&store).await;
}

#[tokio::test]
async fn surreal_store_contracts() {
    let store = SurrealConfigStore::in_memory().await.unwrap();
    check_agent_upsert(&store).await;
    check_agent_delete(&store).await;
    check_list_order(&store).await;
    check_tool_server(&store).await;
}
