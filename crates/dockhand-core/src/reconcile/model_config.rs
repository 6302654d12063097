//! ModelConfig reconciler.
//!
//! Resolves the secrets a ModelConfig references and publishes their hash in
//! `status.secretHash`. Agents fold that hash into their config hash, so a
//! rotated key rolls every agent using the model.

use std::sync::Arc;

use tracing::Instrument;

use dockhand_state::objects::Secret;
use dockhand_state::{ClusterClient, ClusterClientExt, Resource};

use crate::api::ModelConfig;
use crate::digest::secret_hash;
use crate::error::{Error, Result, ResultExt};
use crate::obs::{
    emit_reconcile_failed, emit_reconcile_started, emit_status_updated, reconcile_span,
};

use super::retry::RetryPolicy;
use super::{accepted_condition, write_status, ReconcileOutcome};

pub struct ModelConfigReconciler {
    cluster: Arc<dyn ClusterClient>,
    retry: RetryPolicy,
}

impl ModelConfigReconciler {
    pub fn new(cluster: Arc<dyn ClusterClient>, retry: RetryPolicy) -> Self {
        Self { cluster, retry }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let key = format!("{namespace}/{name}");
        self.reconcile_key(namespace, name, &key)
            .instrument(reconcile_span("ModelConfig", &key))
            .await
            .with_object(format!("ModelConfig {key}"))
    }

    async fn reconcile_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<ReconcileOutcome> {
        let cluster = self.cluster.as_ref();
        let Some(config) = cluster
            .get_resource_opt::<ModelConfig>(namespace, name)
            .await?
        else {
            return Ok(ReconcileOutcome::deleted());
        };
        emit_reconcile_started("ModelConfig", key, config.metadata.generation);

        let result = referenced_secrets(cluster, &config)
            .await
            .map(|secrets| secret_hash(&secrets));
        let hash = result.as_ref().ok().cloned();
        let conditions = [accepted_condition(
            result.as_ref().map(|_| ()),
            config.metadata.generation,
        )];
        let status_written = write_status::<ModelConfig, _>(
            cluster,
            &self.retry,
            &config.object_ref(),
            &conditions,
            |live| match &hash {
                Some(hash) if &live.status.secret_hash != hash => {
                    live.status.secret_hash = hash.clone();
                    true
                }
                _ => false,
            },
        )
        .await?;
        if status_written {
            emit_status_updated("ModelConfig", key, result.is_ok());
        }

        match result {
            Ok(_) => Ok(ReconcileOutcome {
                status_written,
                ..Default::default()
            }),
            Err(err) => {
                emit_reconcile_failed("ModelConfig", key, &err);
                Err(err)
            }
        }
    }
}

/// The API key secret and TLS CA secret of `config`, when set. A named key
/// that is missing from its secret is an error.
pub async fn referenced_secrets(
    cluster: &dyn ClusterClient,
    config: &ModelConfig,
) -> Result<Vec<Secret>> {
    let ns = config.metadata.namespace.as_str();
    let spec = &config.spec;
    let mut wanted = Vec::new();
    if !spec.api_key_secret.is_empty() {
        wanted.push((spec.api_key_secret.as_str(), spec.api_key_secret_key.as_str()));
    }
    if let Some(tls) = &spec.tls {
        if !tls.ca_cert_secret_ref.is_empty() {
            wanted.push((tls.ca_cert_secret_ref.as_str(), tls.ca_cert_secret_key.as_str()));
        }
    }

    let mut secrets: Vec<Secret> = Vec::with_capacity(wanted.len());
    for (name, key) in wanted {
        let index = match secrets.iter().position(|s| s.metadata.name == name) {
            Some(index) => index,
            None => {
                let secret = cluster
                    .get_resource_opt::<Secret>(ns, name)
                    .await?
                    .ok_or_else(|| Error::not_found("Secret", format!("{ns}/{name}")))?;
                secrets.push(secret);
                secrets.len() - 1
            }
        };
        if !key.is_empty() && !secrets[index].data.contains_key(key) {
            return Err(Error::resolution(
                format!("key {key:?}"),
                format!("not present in Secret {ns}/{name}"),
            ));
        }
    }
    Ok(secrets)
}
