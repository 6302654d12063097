//! Contract tests for ClusterClient using the in-memory cluster.
//!
//! Any conforming implementation must pass these.

use dockhand_state::objects::{ConfigMap, Deployment, DeploymentStatus, Secret};
use dockhand_state::{
    ClusterClient, ClusterClientExt, ClusterError, MemoryCluster, ObjectMeta, ObjectRef,
    OwnerReference, Resource,
};

fn config_map(name: &str, value: &str) -> ConfigMap {
    let mut cm = ConfigMap {
        metadata: ObjectMeta::named("default", name),
        ..Default::default()
    };
    cm.data.insert("key".into(), value.into());
    cm
}

#[tokio::test]
async fn create_assigns_uid_version_and_generation() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_resource(&config_map("settings", "a"))
        .await
        .unwrap();

    assert!(!created.metadata.uid.is_empty());
    assert!(!created.metadata.resource_version.is_empty());
    assert_eq!(created.metadata.generation, 1);
    assert!(created.metadata.creation_timestamp.is_some());
}

#[tokio::test]
async fn create_twice_is_already_exists() {
    let cluster = MemoryCluster::new();
    cluster
        .create_resource(&config_map("settings", "a"))
        .await
        .unwrap();
    let err = cluster
        .create_resource(&config_map("settings", "b"))
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterError::AlreadyExists { .. }));
}

#[tokio::test]
async fn get_missing_is_not_found() {
    let cluster = MemoryCluster::new();
    let err = cluster
        .get_resource::<Secret>("default", "missing")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let none = cluster
        .get_resource_opt::<Secret>("default", "missing")
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn update_with_stale_version_conflicts() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_resource(&config_map("settings", "a"))
        .await
        .unwrap();

    let mut first = created.clone();
    first.data.insert("key".into(), "b".into());
    cluster.update_resource(&first).await.unwrap();

    let mut stale = created;
    stale.data.insert("key".into(), "c".into());
    let err = cluster.update_resource(&stale).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn update_bumps_generation_only_on_body_change() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_resource(&config_map("settings", "a"))
        .await
        .unwrap();

    let unchanged = cluster.update_resource(&created).await.unwrap();
    assert_eq!(unchanged.metadata.generation, 1);

    let mut changed = unchanged.clone();
    changed.data.insert("key".into(), "b".into());
    let changed = cluster.update_resource(&changed).await.unwrap();
    assert_eq!(changed.metadata.generation, 2);
}

#[tokio::test]
async fn update_preserves_status_and_update_status_preserves_spec() {
    let cluster = MemoryCluster::new();
    let mut deployment = Deployment {
        metadata: ObjectMeta::named("default", "agent-a"),
        ..Default::default()
    };
    deployment.spec.replicas = Some(1);
    let created = cluster.create_resource(&deployment).await.unwrap();

    let mut with_status = created.clone();
    with_status.status = Some(DeploymentStatus {
        replicas: 1,
        available_replicas: 1,
        ..Default::default()
    });
    with_status.spec.replicas = Some(9);
    let after_status = cluster.update_resource_status(&with_status).await.unwrap();
    assert_eq!(after_status.spec.replicas, Some(1));
    assert_eq!(after_status.status.as_ref().unwrap().available_replicas, 1);

    let mut spec_change = after_status.clone();
    spec_change.status = None;
    spec_change.spec.replicas = Some(3);
    let after_update = cluster.update_resource(&spec_change).await.unwrap();
    assert_eq!(after_update.spec.replicas, Some(3));
    assert!(after_update.status.is_some());
}

#[tokio::test]
async fn injected_conflicts_are_consumed() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_resource(&config_map("settings", "a"))
        .await
        .unwrap();
    cluster
        .inject_conflicts(created.object_ref(), 1)
        .unwrap();

    let err = cluster.update_resource(&created).await.unwrap_err();
    assert!(err.is_conflict());

    let fresh = cluster
        .get_resource::<ConfigMap>("default", "settings")
        .await
        .unwrap();
    cluster.update_resource(&fresh).await.unwrap();
}

#[tokio::test]
async fn list_owned_uses_owner_uid() {
    let cluster = MemoryCluster::new();
    let owner = OwnerReference {
        api_version: "dockhand.stevedores.org/v1alpha1".into(),
        kind: "Agent".into(),
        name: "agent-a".into(),
        uid: "uid-a".into(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };
    let mut owned = config_map("owned", "x");
    owned.metadata.owner_references.push(owner);
    cluster.create_resource(&owned).await.unwrap();
    cluster
        .create_resource(&config_map("unowned", "y"))
        .await
        .unwrap();

    let refs = cluster.list_owned("uid-a").await.unwrap();
    assert_eq!(refs, vec![ObjectRef::new("ConfigMap", "default", "owned")]);
}

#[tokio::test]
async fn failing_delete_reports_backend_error() {
    let cluster = MemoryCluster::new();
    let created = cluster
        .create_resource(&config_map("settings", "a"))
        .await
        .unwrap();
    cluster.fail_deletes_of(created.object_ref()).unwrap();

    let err = cluster.delete(&created.object_ref()).await.unwrap_err();
    assert!(matches!(err, ClusterError::Backend(_)));
    assert!(cluster
        .get_resource_opt::<ConfigMap>("default", "settings")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn list_filters_by_namespace() {
    let cluster = MemoryCluster::new();
    cluster
        .create_resource(&config_map("a", "1"))
        .await
        .unwrap();
    let mut other = config_map("b", "2");
    other.metadata.namespace = "other".into();
    cluster.create_resource(&other).await.unwrap();

    let all: Vec<ConfigMap> = cluster.list_resources(None).await.unwrap();
    assert_eq!(all.len(), 2);
    let scoped: Vec<ConfigMap> = cluster.list_resources(Some("other")).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].metadata.name, "b");
}
