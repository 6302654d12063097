//! Cluster client boundary.
//!
//! The engine never talks to a concrete API server; it goes through
//! [`ClusterClient`]. Guarantees every implementation must provide:
//! - `create` fails with `AlreadyExists` when the key is taken.
//! - `update` fails with `Conflict` when the caller's resource version is stale,
//!   and never changes `status`.
//! - `update_status` only changes `status`.
//! - `list_owned` returns every object whose owner references carry the UID.
//!
//! Watches, caches and leader election live outside this crate.

use async_trait::async_trait;

use crate::error::ClusterError;
use crate::meta::{DynamicObject, ObjectRef, Resource};

/// Result type for cluster operations
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object. Cluster-scoped kinds use an empty namespace.
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> ClusterResult<DynamicObject>;

    /// List objects of a kind, optionally restricted to one namespace.
    async fn list(&self, kind: &str, namespace: Option<&str>)
        -> ClusterResult<Vec<DynamicObject>>;

    async fn create(&self, object: DynamicObject) -> ClusterResult<DynamicObject>;

    async fn update(&self, object: DynamicObject) -> ClusterResult<DynamicObject>;

    async fn update_status(&self, object: DynamicObject) -> ClusterResult<DynamicObject>;

    async fn delete(&self, object: &ObjectRef) -> ClusterResult<()>;

    /// Secondary index: everything currently owned by `owner_uid`.
    async fn list_owned(&self, owner_uid: &str) -> ClusterResult<Vec<ObjectRef>>;
}

/// Typed helpers over any [`ClusterClient`].
#[async_trait]
pub trait ClusterClientExt: ClusterClient {
    async fn get_resource<K: Resource>(&self, namespace: &str, name: &str) -> ClusterResult<K> {
        let object = self.get(K::KIND, namespace, name).await?;
        Ok(object.into_resource()?)
    }

    /// Like [`ClusterClientExt::get_resource`] but maps `NotFound` to `None`.
    async fn get_resource_opt<K: Resource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<K>> {
        match self.get_resource::<K>(namespace, name).await {
            Ok(object) => Ok(Some(object)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn list_resources<K: Resource>(&self, namespace: Option<&str>) -> ClusterResult<Vec<K>> {
        self.list(K::KIND, namespace)
            .await?
            .into_iter()
            .map(|o| o.into_resource().map_err(ClusterError::from))
            .collect()
    }

    async fn create_resource<K: Resource>(&self, object: &K) -> ClusterResult<K> {
        let created = self.create(DynamicObject::from_resource(object)?).await?;
        Ok(created.into_resource()?)
    }

    async fn update_resource<K: Resource>(&self, object: &K) -> ClusterResult<K> {
        let updated = self.update(DynamicObject::from_resource(object)?).await?;
        Ok(updated.into_resource()?)
    }

    async fn update_resource_status<K: Resource>(&self, object: &K) -> ClusterResult<K> {
        let updated = self
            .update_status(DynamicObject::from_resource(object)?)
            .await?;
        Ok(updated.into_resource()?)
    }
}

impl<T: ClusterClient + ?Sized> ClusterClientExt for T {}
