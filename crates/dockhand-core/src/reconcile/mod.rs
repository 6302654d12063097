//! Reconciliation of Dockhand resources.
//!
//! Each reconciler is invoked once per resource event with the key of the
//! object that changed. A reconcile reads current state, converges the
//! cluster and the config store, and records the result in status.
//!
//! - [`agent`]: Agent → owned objects + config store record
//! - [`model_config`]: ModelConfig → secret hash in status
//! - [`tool_server`]: RemoteMCPServer → discovered tools
//! - [`apply`]: create-or-update and prune primitives
//! - [`retry`]: conflict retry with backoff

pub mod agent;
pub mod apply;
pub mod model_config;
pub mod retry;
pub mod tool_server;

use std::sync::{Arc, OnceLock};

use tokio::sync::{Mutex, MutexGuard};

use dockhand_state::{
    set_condition, ClusterClient, ClusterClientExt, Condition, ConditionStatus, ObjectRef,
    Resource,
};

use crate::api::{Agent, CommonStatus, ModelConfig, RemoteMcpServer};
use crate::error::{Error, Result};

pub use agent::AgentReconciler;
pub use apply::{apply_desired, apply_object, prune_owned, ApplyOutcome, Managed};
pub use model_config::ModelConfigReconciler;
pub use retry::{retry_on_conflict, RetryPolicy};
pub use tool_server::ToolServerReconciler;

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_READY: &str = "Ready";

/// Serializes config store writes across all reconcilers.
///
/// One process-wide lock is coarse, but store writes are short and rare
/// compared to cluster round trips. Reconcilers take [`ConfigStoreLock::shared`]
/// unless given another lock.
#[derive(Debug, Clone, Default)]
pub struct ConfigStoreLock(Arc<Mutex<()>>);

static SHARED_STORE_LOCK: OnceLock<ConfigStoreLock> = OnceLock::new();

impl ConfigStoreLock {
    /// A private lock, not shared with the process-wide one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide lock.
    pub fn shared() -> Self {
        SHARED_STORE_LOCK.get_or_init(Self::new).clone()
    }

    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.0.try_lock().ok()
    }

    /// Whether both handles guard the same mutex.
    pub fn is_same(&self, other: &ConfigStoreLock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// What one reconcile did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub applied: Vec<(ObjectRef, ApplyOutcome)>,
    pub pruned: Vec<ObjectRef>,
    pub status_written: bool,
    pub config_hash: Option<u64>,
    /// The resource no longer exists; its store record was removed.
    pub deleted: bool,
}

impl ReconcileOutcome {
    pub fn deleted() -> Self {
        Self {
            deleted: true,
            ..Default::default()
        }
    }

    /// Number of cluster objects created, updated or deleted.
    pub fn changed(&self) -> usize {
        self.applied.iter().filter(|(_, o)| o.is_write()).count() + self.pruned.len()
    }
}

/// `Accepted` condition for the outcome of a reconcile.
pub fn accepted_condition(result: std::result::Result<(), &Error>, generation: i64) -> Condition {
    match result {
        Ok(()) => Condition::new(
            CONDITION_ACCEPTED,
            ConditionStatus::True,
            "Reconciled",
            "",
            generation,
        ),
        Err(err) => Condition::new(
            CONDITION_ACCEPTED,
            ConditionStatus::False,
            "ReconcileFailed",
            err.to_string(),
            generation,
        ),
    }
}

/// Resources whose status carries conditions and an observed generation.
pub trait Conditioned: Resource {
    fn status_parts(&mut self) -> (&mut i64, &mut Vec<Condition>);
}

fn common_parts(status: &mut CommonStatus) -> (&mut i64, &mut Vec<Condition>) {
    (&mut status.observed_generation, &mut status.conditions)
}

impl Conditioned for Agent {
    fn status_parts(&mut self) -> (&mut i64, &mut Vec<Condition>) {
        common_parts(&mut self.status)
    }
}

impl Conditioned for ModelConfig {
    fn status_parts(&mut self) -> (&mut i64, &mut Vec<Condition>) {
        (
            &mut self.status.observed_generation,
            &mut self.status.conditions,
        )
    }
}

impl Conditioned for RemoteMcpServer {
    fn status_parts(&mut self) -> (&mut i64, &mut Vec<Condition>) {
        (
            &mut self.status.observed_generation,
            &mut self.status.conditions,
        )
    }
}

/// Write status on a fresh read of `object`: `edit` may change
/// kind-specific fields, then `conditions` are merged. The write happens only
/// when something changed or the observed generation is stale. Returns
/// whether status was written; a vanished object is not an error.
pub async fn write_status<K, F>(
    cluster: &dyn ClusterClient,
    policy: &RetryPolicy,
    object: &ObjectRef,
    conditions: &[Condition],
    edit: F,
) -> Result<bool>
where
    K: Conditioned,
    F: Fn(&mut K) -> bool,
{
    let edit = &edit;
    let written = retry_on_conflict(policy, object, move || async move {
        let Some(mut live) = cluster
            .get_resource_opt::<K>(&object.namespace, &object.name)
            .await?
        else {
            return Ok(false);
        };
        let generation = live.meta().generation;
        let mut changed = edit(&mut live);
        let (observed, current) = live.status_parts();
        for condition in conditions {
            let mut condition = condition.clone();
            condition.observed_generation = generation;
            changed |= set_condition(current, condition);
        }
        if *observed != generation {
            *observed = generation;
            changed = true;
        }
        if changed {
            cluster.update_resource_status(&live).await?;
        }
        Ok(changed)
    })
    .await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::discovery::HttpToolLister;
    use dockhand_state::{
        find_condition, ConfigStore, MemoryCluster, MemoryConfigStore, ObjectMeta,
    };

    #[test]
    fn test_accepted_condition_from_error() {
        let err = Error::validation("image is required");
        let condition = accepted_condition(Err(&err), 3);
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "ReconcileFailed");
        assert!(condition.message.contains("image is required"));
        assert_eq!(condition.observed_generation, 3);
    }

    #[tokio::test]
    async fn test_write_status_skips_unchanged() {
        let cluster = MemoryCluster::new();
        let agent = cluster
            .seed(&Agent {
                metadata: ObjectMeta::named("default", "helper"),
                ..Default::default()
            })
            .unwrap();
        let object = agent.object_ref();
        let conditions = [accepted_condition(Ok(()), 0)];

        let first = write_status::<Agent, _>(
            &cluster,
            &RetryPolicy::default(),
            &object,
            &conditions,
            |_| false,
        )
        .await
        .unwrap();
        let second = write_status::<Agent, _>(
            &cluster,
            &RetryPolicy::default(),
            &object,
            &conditions,
            |_| false,
        )
        .await
        .unwrap();
        assert!(first);
        assert!(!second);

        let stored: Agent = cluster.get_resource("default", "helper").await.unwrap();
        assert_eq!(stored.status.observed_generation, 1);
        let accepted = find_condition(&stored.status.conditions, CONDITION_ACCEPTED).unwrap();
        assert_eq!(accepted.observed_generation, 1);
        assert!(accepted.last_transition_time.is_some());
    }

    #[tokio::test]
    async fn test_config_store_lock_is_shared() {
        let lock = ConfigStoreLock::new();
        let clone = lock.clone();
        let _guard = lock.lock().await;
        assert!(clone.try_lock().is_none());
    }

    #[tokio::test]
    async fn test_reconcilers_default_to_the_process_wide_lock() {
        let cluster: Arc<dyn ClusterClient> = Arc::new(MemoryCluster::new());
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
        let agents =
            AgentReconciler::new(cluster.clone(), store.clone(), ControllerConfig::default());
        let servers = ToolServerReconciler::new(
            cluster,
            store,
            Arc::new(HttpToolLister::new()),
            RetryPolicy::default(),
        );

        assert!(agents.store_lock().is_same(servers.store_lock()));
        assert!(agents.store_lock().is_same(&ConfigStoreLock::shared()));
        assert!(!ConfigStoreLock::new().is_same(&ConfigStoreLock::shared()));

        let _guard = agents.store_lock().lock().await;
        assert!(servers.store_lock().try_lock().is_none());
    }

    #[tokio::test]
    async fn test_with_lock_replaces_the_shared_lock() {
        let cluster: Arc<dyn ClusterClient> = Arc::new(MemoryCluster::new());
        let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
        let private = ConfigStoreLock::new();
        let agents = AgentReconciler::new(cluster, store, ControllerConfig::default())
            .with_lock(private.clone());

        assert!(agents.store_lock().is_same(&private));
        assert!(!agents.store_lock().is_same(&ConfigStoreLock::shared()));
    }
}
