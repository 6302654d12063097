//! Agent reconciler.
//!
//! translate → apply desired objects in order → prune stale owned objects →
//! upsert the config store record → write status. A failure aborts the
//! remaining steps (already applied writes stay) and is recorded as
//! `Accepted=False`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, Instrument};

use dockhand_state::objects::Deployment;
use dockhand_state::{
    AgentRecord, ClusterClient, ClusterClientExt, Condition, ConditionStatus, ConfigStore,
    Resource,
};

use crate::api::Agent;
use crate::config::ControllerConfig;
use crate::error::{Result, ResultExt};
use crate::obs::{
    emit_agent_forgotten, emit_reconcile_failed, emit_reconcile_finished, emit_reconcile_started,
    emit_status_updated, reconcile_span,
};
use crate::translate::{AgentOutputs, AgentTranslator};

use super::apply::{apply_desired, prune_owned};
use super::{
    accepted_condition, write_status, ConfigStoreLock, ReconcileOutcome, CONDITION_READY,
};

pub struct AgentReconciler {
    cluster: Arc<dyn ClusterClient>,
    store: Arc<dyn ConfigStore>,
    config: ControllerConfig,
    lock: ConfigStoreLock,
}

impl AgentReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: Arc<dyn ConfigStore>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            cluster,
            store,
            config,
            lock: ConfigStoreLock::shared(),
        }
    }

    /// Share the store lock with other reconcilers.
    pub fn with_lock(mut self, lock: ConfigStoreLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn store_lock(&self) -> &ConfigStoreLock {
        &self.lock
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Reconcile the Agent `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let key = format!("{namespace}/{name}");
        self.reconcile_key(namespace, name, &key)
            .instrument(reconcile_span("Agent", &key))
            .await
            .with_object(format!("Agent {key}"))
    }

    async fn reconcile_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<ReconcileOutcome> {
        let started = Instant::now();
        let cluster = self.cluster.as_ref();

        let Some(agent) = cluster.get_resource_opt::<Agent>(namespace, name).await? else {
            self.forget(key).await?;
            return Ok(ReconcileOutcome::deleted());
        };
        let generation = agent.metadata.generation;
        emit_reconcile_started("Agent", key, generation);

        let result = self.converge(&agent).await;

        let conditions = [
            accepted_condition(result.as_ref().map(|_| ()), generation),
            self.ready_condition(&agent).await?,
        ];
        let status_written = write_status::<Agent, _>(
            cluster,
            &self.config.retry,
            &agent.object_ref(),
            &conditions,
            |_| false,
        )
        .await?;
        if status_written {
            emit_status_updated("Agent", key, result.is_ok());
        }

        match result {
            Ok(mut outcome) => {
                outcome.status_written = status_written;
                emit_reconcile_finished(
                    "Agent",
                    key,
                    started.elapsed().as_millis() as u64,
                    outcome.changed(),
                );
                Ok(outcome)
            }
            Err(err) => {
                emit_reconcile_failed("Agent", key, &err);
                Err(err)
            }
        }
    }

    async fn converge(&self, agent: &Agent) -> Result<ReconcileOutcome> {
        let cluster = self.cluster.as_ref();
        let outputs = AgentTranslator::new(cluster, &self.config)
            .translate(agent)
            .await?;

        let mut outcome = ReconcileOutcome {
            config_hash: outputs.config_hash,
            ..Default::default()
        };
        let mut desired = BTreeSet::new();
        for object in &outputs.objects {
            let object_ref = object.object_ref();
            let applied = apply_desired(cluster, &self.config.retry, object).await?;
            desired.insert(object_ref.clone());
            outcome.applied.push((object_ref, applied));
        }
        outcome.pruned = prune_owned(cluster, &agent.metadata.uid, &desired).await?;

        self.store_record(agent, &outputs).await?;
        Ok(outcome)
    }

    async fn store_record(&self, agent: &Agent, outputs: &AgentOutputs) -> Result<()> {
        let mut record = AgentRecord::new(agent.identity(), agent.spec.agent_type.as_str());
        record.config_json = outputs
            .config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        record.card_json = outputs
            .card
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        record.config_hash = outputs.config_hash.map(|h| h.to_string());

        let _guard = self.lock.lock().await;
        if let Some(existing) = self.store.get_agent(&record.agent_id).await? {
            record.updated_at = existing.updated_at;
            if existing == record {
                debug!(agent = %record.agent_id, "config store record unchanged");
                return Ok(());
            }
            record.updated_at = chrono::Utc::now();
        }
        self.store.store_agent(record).await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.delete_agent(key).await?;
        emit_agent_forgotten(key);
        Ok(())
    }

    async fn ready_condition(&self, agent: &Agent) -> Result<Condition> {
        let generation = agent.metadata.generation;
        let deployment = self
            .cluster
            .get_resource_opt::<Deployment>(&agent.metadata.namespace, &agent.metadata.name)
            .await?;
        let Some(deployment) = deployment else {
            return Ok(Condition::new(
                CONDITION_READY,
                ConditionStatus::Unknown,
                "DeploymentMissing",
                "deployment has not been created",
                generation,
            ));
        };
        let wanted = deployment.spec.replicas.unwrap_or(1);
        let available = deployment
            .status
            .as_ref()
            .map_or(0, |s| s.available_replicas);
        Ok(if available >= wanted {
            Condition::new(
                CONDITION_READY,
                ConditionStatus::True,
                "DeploymentReady",
                "",
                generation,
            )
        } else {
            Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                "DeploymentNotReady",
                format!("{available}/{wanted} replicas available"),
                generation,
            )
        })
    }
}
