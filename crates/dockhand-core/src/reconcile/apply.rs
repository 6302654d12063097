//! Create-or-update of desired objects and pruning of stale ones.
//!
//! Writes go through a mutate step that only touches the fields the engine
//! owns, so fields set by other actors on the live object survive. An update
//! is skipped when the mutated object is semantically equal to the live one.

use std::collections::BTreeSet;

use serde_json::Value;

use dockhand_state::objects::{Deployment, Secret, Service, ServiceAccount};
use dockhand_state::{
    ClusterClient, ClusterClientExt, ClusterResult, ObjectMeta, ObjectRef, Resource,
};

use crate::digest::canonical_value;
use crate::error::{Error, Result};
use crate::manifest::DesiredObject;
use crate::obs::{emit_object_applied, emit_object_pruned};

use super::retry::{retry_on_conflict, RetryPolicy};

/// Kinds the engine creates, and therefore the only kinds it prunes.
pub const MANAGED_KINDS: [&str; 4] = ["Secret", "ServiceAccount", "Deployment", "Service"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Created => "created",
            ApplyOutcome::Updated => "updated",
            ApplyOutcome::Unchanged => "unchanged",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, ApplyOutcome::Unchanged)
    }
}

/// An object kind the engine knows how to merge into a live object.
pub trait Managed: Resource + Default + PartialEq {
    /// Copy the engine-owned fields of `desired` onto `live`.
    fn copy_owned_fields(live: &mut Self, desired: &Self);

    fn clear_status(&mut self) {}

    /// JSON form compared canonically instead of with `PartialEq`.
    fn message_form(&self) -> Option<Value> {
        None
    }
}

impl Managed for Secret {
    fn copy_owned_fields(live: &mut Self, desired: &Self) {
        live.data = desired.data.clone();
        if desired.type_.is_some() {
            live.type_ = desired.type_.clone();
        }
    }
}

impl Managed for ServiceAccount {
    fn copy_owned_fields(_live: &mut Self, _desired: &Self) {}
}

impl Managed for Deployment {
    fn copy_owned_fields(live: &mut Self, desired: &Self) {
        let (spec, want) = (&mut live.spec, &desired.spec);
        spec.replicas = want.replicas;
        spec.strategy = want.strategy.clone();
        if spec.selector.match_labels.is_empty() {
            spec.selector = want.selector.clone();
        }
        let template = &mut spec.template;
        template.spec = want.template.spec.clone();
        template
            .metadata
            .labels
            .extend(want.template.metadata.labels.clone());
        template
            .metadata
            .annotations
            .extend(want.template.metadata.annotations.clone());
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    fn message_form(&self) -> Option<Value> {
        serde_json::to_value(&self.spec).ok()
    }
}

impl Managed for Service {
    fn copy_owned_fields(live: &mut Self, desired: &Self) {
        live.spec.ports = desired.spec.ports.clone();
        live.spec.selector = desired.spec.selector.clone();
        if desired.spec.type_.is_some() {
            live.spec.type_ = desired.spec.type_.clone();
        }
    }

    fn message_form(&self) -> Option<Value> {
        serde_json::to_value(&self.spec).ok()
    }
}

/// Merge `desired` into `live`: labels and annotations merged with desired
/// winning, owner references replaced, owned fields copied.
pub fn mutate<K: Managed>(live: &mut K, desired: &K) {
    let want = desired.meta();
    let meta = live.meta_mut();
    meta.labels.extend(want.labels.clone());
    meta.annotations.extend(want.annotations.clone());
    meta.owner_references = want.owner_references.clone();
    K::copy_owned_fields(live, desired);
}

/// Equal ignoring status, type metadata and server-managed metadata.
pub fn semantically_equal<K: Managed>(a: &K, b: &K) -> bool {
    let (ma, mb) = (a.meta(), b.meta());
    if ma.labels != mb.labels
        || ma.annotations != mb.annotations
        || ma.owner_references != mb.owner_references
    {
        return false;
    }
    if let (Some(x), Some(y)) = (a.message_form(), b.message_form()) {
        return canonical_value(&x) == canonical_value(&y);
    }
    let strip = |object: &K| {
        let mut object = object.clone();
        object.clear_status();
        *object.meta_mut() = ObjectMeta::default();
        object
    };
    strip(a) == strip(b)
}

async fn apply_once<K: Managed>(
    cluster: &dyn ClusterClient,
    desired: &K,
) -> ClusterResult<ApplyOutcome> {
    let meta = desired.meta();
    match cluster
        .get_resource_opt::<K>(&meta.namespace, &meta.name)
        .await?
    {
        None => {
            let mut fresh = K::default();
            *fresh.meta_mut() = ObjectMeta::named(&meta.namespace, &meta.name);
            mutate(&mut fresh, desired);
            cluster.create_resource(&fresh).await?;
            Ok(ApplyOutcome::Created)
        }
        Some(live) => {
            let mut updated = live.clone();
            mutate(&mut updated, desired);
            if semantically_equal(&live, &updated) {
                return Ok(ApplyOutcome::Unchanged);
            }
            cluster.update_resource(&updated).await?;
            Ok(ApplyOutcome::Updated)
        }
    }
}

/// Create or update one object, retrying conflicts with a fresh read.
pub async fn apply_object<K: Managed>(
    cluster: &dyn ClusterClient,
    policy: &RetryPolicy,
    desired: &K,
) -> Result<ApplyOutcome> {
    let object = desired.object_ref();
    let outcome = retry_on_conflict(policy, &object, || apply_once(cluster, desired))
        .await
        .map_err(|source| Error::Apply {
            object: object.clone(),
            source,
        })?;
    emit_object_applied(&object, outcome.as_str());
    Ok(outcome)
}

pub async fn apply_desired(
    cluster: &dyn ClusterClient,
    policy: &RetryPolicy,
    desired: &DesiredObject,
) -> Result<ApplyOutcome> {
    match desired {
        DesiredObject::Secret(o) => apply_object(cluster, policy, o).await,
        DesiredObject::ServiceAccount(o) => apply_object(cluster, policy, o).await,
        DesiredObject::Deployment(o) => apply_object(cluster, policy, o).await,
        DesiredObject::Service(o) => apply_object(cluster, policy, o).await,
    }
}

/// Delete objects owned by `owner_uid` that are not in `desired`.
///
/// Every stale object is attempted; failures are reported together.
/// Objects already gone count as pruned.
pub async fn prune_owned(
    cluster: &dyn ClusterClient,
    owner_uid: &str,
    desired: &BTreeSet<ObjectRef>,
) -> Result<Vec<ObjectRef>> {
    if owner_uid.is_empty() {
        return Ok(Vec::new());
    }
    let mut pruned = Vec::new();
    let mut failures = Vec::new();
    for object in cluster.list_owned(owner_uid).await? {
        if !MANAGED_KINDS.contains(&object.kind.as_str()) || desired.contains(&object) {
            continue;
        }
        match cluster.delete(&object).await {
            Ok(()) => {
                emit_object_pruned(&object);
                pruned.push(object);
            }
            Err(err) if err.is_not_found() => pruned.push(object),
            Err(err) => failures.push(format!("{object}: {err}")),
        }
    }
    if !failures.is_empty() {
        return Err(Error::Prune { failures });
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_state::{MemoryCluster, OwnerReference};
    use std::collections::BTreeMap;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "dockhand.stevedores.org/v1alpha1".into(),
            kind: "Agent".into(),
            name: "helper".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn secret(value: &str) -> Secret {
        let mut meta = ObjectMeta::named("default", "helper");
        meta.labels.insert("app.kubernetes.io/managed-by".into(), "dockhand".into());
        meta.owner_references = vec![owner()];
        Secret {
            metadata: meta,
            data: BTreeMap::from([("config.json".to_string(), value.to_string())]),
            type_: None,
        }
    }

    #[tokio::test]
    async fn test_create_then_unchanged_then_update() {
        let cluster = MemoryCluster::new();
        let policy = RetryPolicy::default();

        let first = apply_object(&cluster, &policy, &secret("{}")).await.unwrap();
        assert_eq!(first, ApplyOutcome::Created);
        let second = apply_object(&cluster, &policy, &secret("{}")).await.unwrap();
        assert_eq!(second, ApplyOutcome::Unchanged);
        let third = apply_object(&cluster, &policy, &secret("{\"a\":1}"))
            .await
            .unwrap();
        assert_eq!(third, ApplyOutcome::Updated);

        let counts = cluster.write_counts().unwrap();
        assert_eq!((counts.creates, counts.updates), (1, 1));
    }

    #[tokio::test]
    async fn test_foreign_labels_survive_update() {
        let cluster = MemoryCluster::new();
        let mut live = secret("{}");
        live.metadata.labels.insert("team".into(), "blue".into());
        cluster.seed(&live).unwrap();

        apply_object(&cluster, &RetryPolicy::default(), &secret("{\"a\":1}"))
            .await
            .unwrap();
        let stored: Secret = cluster.get_resource("default", "helper").await.unwrap();
        assert_eq!(stored.metadata.labels["team"], "blue");
        assert_eq!(stored.data["config.json"], "{\"a\":1}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_are_retried() {
        let cluster = MemoryCluster::new();
        cluster.seed(&secret("{}")).unwrap();
        cluster
            .inject_conflicts(ObjectRef::new("Secret", "default", "helper"), 3)
            .unwrap();

        let outcome = apply_object(&cluster, &RetryPolicy::default(), &secret("{\"a\":1}"))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_exhaust_retries() {
        let cluster = MemoryCluster::new();
        cluster.seed(&secret("{}")).unwrap();
        cluster
            .inject_conflicts(ObjectRef::new("Secret", "default", "helper"), 10)
            .unwrap();

        let err = apply_object(&cluster, &RetryPolicy::default(), &secret("{\"a\":1}"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Apply { .. }));
        assert!(err.to_string().contains("Secret default/helper"));
    }

    #[test]
    fn test_deployment_compare_ignores_empty_fields() {
        let mut a = Deployment::default();
        a.spec.template.spec.node_selector = BTreeMap::new();
        let mut b = a.clone();
        b.status = Some(Default::default());
        assert!(semantically_equal(&a, &b));
        b.spec.replicas = Some(2);
        assert!(!semantically_equal(&a, &b));
    }

    #[tokio::test]
    async fn test_prune_only_stale_managed_objects() {
        let cluster = MemoryCluster::new();
        let keep = secret("{}");
        let mut stale = secret("{}");
        stale.metadata.name = "old".into();
        let mut foreign = dockhand_state::objects::ConfigMap::default();
        foreign.metadata = ObjectMeta::named("default", "notes");
        foreign.metadata.owner_references = vec![owner()];
        cluster.seed(&keep).unwrap();
        cluster.seed(&stale).unwrap();
        cluster.seed(&foreign).unwrap();

        let desired = BTreeSet::from([keep.object_ref()]);
        let pruned = prune_owned(&cluster, "uid-1", &desired).await.unwrap();
        assert_eq!(pruned, vec![ObjectRef::new("Secret", "default", "old")]);
        assert!(cluster
            .get_resource_opt::<dockhand_state::objects::ConfigMap>("default", "notes")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_prune_collects_failures() {
        let cluster = MemoryCluster::new();
        for name in ["a", "b", "c"] {
            let mut object = secret("{}");
            object.metadata.name = name.into();
            cluster.seed(&object).unwrap();
        }
        cluster
            .fail_deletes_of(ObjectRef::new("Secret", "default", "a"))
            .unwrap();
        cluster
            .fail_deletes_of(ObjectRef::new("Secret", "default", "c"))
            .unwrap();

        let err = prune_owned(&cluster, "uid-1", &BTreeSet::new())
            .await
            .unwrap_err();
        match err {
            Error::Prune { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures[0].contains("Secret default/a"));
                assert!(failures[1].contains("Secret default/c"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(cluster
            .get_resource_opt::<Secret>("default", "b")
            .await
            .unwrap()
            .is_none());
    }
}
