//! RemoteMCPServer reconciler: discover tools and publish them.

use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;

use dockhand_state::{ClusterClient, ClusterClientExt, ConfigStore, Resource, ToolServerRecord};

use crate::api::{DiscoveredTool, RemoteMcpServer};
use crate::discovery::ToolLister;
use crate::error::{Result, ResultExt};
use crate::obs::{
    emit_reconcile_failed, emit_reconcile_started, emit_status_updated, emit_tools_discovered,
    reconcile_span,
};
use crate::resolve::resolve_headers;
use crate::translate::tools::remote_endpoint;

use super::retry::RetryPolicy;
use super::{accepted_condition, write_status, ConfigStoreLock, ReconcileOutcome};

pub struct ToolServerReconciler {
    cluster: Arc<dyn ClusterClient>,
    store: Arc<dyn ConfigStore>,
    lister: Arc<dyn ToolLister>,
    retry: RetryPolicy,
    lock: ConfigStoreLock,
}

impl ToolServerReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn ConfigStore>,
        lister: Arc<dyn ToolLister>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cluster,
            store,
            lister,
            retry,
            lock: ConfigStoreLock::shared(),
        }
    }

    pub fn with_lock(mut self, lock: ConfigStoreLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn store_lock(&self) -> &ConfigStoreLock {
        &self.lock
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let key = format!("{namespace}/{name}");
        self.reconcile_key(namespace, name, &key)
            .instrument(reconcile_span("RemoteMCPServer", &key))
            .await
            .with_object(format!("RemoteMCPServer {key}"))
    }

    async fn reconcile_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<ReconcileOutcome> {
        let cluster = self.cluster.as_ref();
        let Some(server) = cluster
            .get_resource_opt::<RemoteMcpServer>(namespace, name)
            .await?
        else {
            return Ok(ReconcileOutcome::deleted());
        };
        emit_reconcile_started("RemoteMCPServer", key, server.metadata.generation);

        let result = self.discover(&server, key).await;
        let discovered = result.as_ref().ok().cloned();
        let conditions = [accepted_condition(
            result.as_ref().map(|_| ()),
            server.metadata.generation,
        )];
        let status_written = write_status::<RemoteMcpServer, _>(
            cluster,
            &self.retry,
            &server.object_ref(),
            &conditions,
            |live| match &discovered {
                Some(tools) if &live.status.discovered_tools != tools => {
                    live.status.discovered_tools = tools.clone();
                    true
                }
                _ => false,
            },
        )
        .await?;
        if status_written {
            emit_status_updated("RemoteMCPServer", key, result.is_ok());
        }

        match result {
            Ok(_) => Ok(ReconcileOutcome {
                status_written,
                ..Default::default()
            }),
            Err(err) => {
                emit_reconcile_failed("RemoteMCPServer", key, &err);
                Err(err)
            }
        }
    }

    async fn discover(&self, server: &RemoteMcpServer, key: &str) -> Result<Vec<DiscoveredTool>> {
        let endpoint = remote_endpoint(server)?;
        let headers =
            resolve_headers(self.cluster.as_ref(), &endpoint.namespace, &endpoint.headers_from)
                .await?;
        let tools = self.lister.list_tools(&endpoint, &headers).await?;
        emit_tools_discovered(key, tools.len());

        let record = ToolServerRecord {
            server_id: key.to_string(),
            kind: RemoteMcpServer::KIND.to_string(),
            url: endpoint.url.clone(),
            protocol: endpoint.protocol.to_string(),
            description: server.spec.description.clone(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
            updated_at: Utc::now(),
        };
        let _guard = self.lock.lock().await;
        self.store.store_tool_server(record).await?;
        Ok(tools)
    }
}
