//! In-memory implementations of the cluster and store traits
//!
//! `MemoryCluster` honours resource versions, generations and the owner
//! index the same way a real API server does, so the reconciler can be
//! exercised end to end without one. It also backs offline rendering in the
//! CLI. Fault injection hooks (`inject_conflicts`, `fail_deletes_of`) exist
//! for tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::cluster::{ClusterClient, ClusterResult};
use crate::error::{ClusterError, StorageError};
use crate::meta::{DynamicObject, ObjectRef, Resource};
use crate::store::{AgentRecord, ConfigStore, StorageResult, ToolServerRecord};

// ---------------------------------------------------------------------------
// MemoryCluster
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ClusterState {
    objects: BTreeMap<ObjectRef, DynamicObject>,
    next_version: u64,
    pending_conflicts: HashMap<ObjectRef, u32>,
    failing_deletes: BTreeSet<ObjectRef>,
    creates: u64,
    updates: u64,
    deletes: u64,
}

impl ClusterState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// Write counters, useful for asserting no-op reconciles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
}

/// In-memory cluster keyed by kind + namespace + name.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cluster pre-populated with `objects` (e.g. from a snapshot file).
    pub fn from_objects(objects: Vec<DynamicObject>) -> ClusterResult<Self> {
        let cluster = Self::new();
        {
            let mut state = cluster.lock()?;
            for object in objects {
                Self::insert_new(&mut state, object)?;
            }
        }
        Ok(cluster)
    }

    /// Insert or overwrite a typed object, bypassing version checks.
    pub fn seed<K: Resource>(&self, object: &K) -> ClusterResult<K> {
        let dynamic = DynamicObject::from_resource(object)?;
        let mut state = self.lock()?;
        state.objects.remove(&dynamic.object_ref());
        let stored = Self::insert_new(&mut state, dynamic)?;
        Ok(stored.into_resource()?)
    }

    /// Every stored object, ordered by kind/namespace/name.
    pub fn snapshot(&self) -> ClusterResult<Vec<DynamicObject>> {
        Ok(self.lock()?.objects.values().cloned().collect())
    }

    /// Make the next `count` updates of `object` fail with a conflict, as if
    /// another writer got there first.
    pub fn inject_conflicts(&self, object: ObjectRef, count: u32) -> ClusterResult<()> {
        self.lock()?.pending_conflicts.insert(object, count);
        Ok(())
    }

    /// Make every delete of `object` fail with a backend error.
    pub fn fail_deletes_of(&self, object: ObjectRef) -> ClusterResult<()> {
        self.lock()?.failing_deletes.insert(object);
        Ok(())
    }

    pub fn write_counts(&self) -> ClusterResult<WriteCounts> {
        let state = self.lock()?;
        Ok(WriteCounts {
            creates: state.creates,
            updates: state.updates,
            deletes: state.deletes,
        })
    }

    fn lock(&self) -> ClusterResult<MutexGuard<'_, ClusterState>> {
        self.state
            .lock()
            .map_err(|_| ClusterError::Backend("memory cluster lock poisoned".to_string()))
    }

    fn insert_new(
        state: &mut ClusterState,
        mut object: DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        if object.metadata.name.is_empty() {
            return Err(ClusterError::Invalid(format!(
                "{} object has no name",
                object.kind
            )));
        }
        let key = object.object_ref();
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists { object: key });
        }
        if object.metadata.uid.is_empty() {
            object.metadata.uid = uuid::Uuid::new_v4().to_string();
        }
        if object.metadata.generation == 0 {
            object.metadata.generation = 1;
        }
        if object.metadata.creation_timestamp.is_none() {
            object.metadata.creation_timestamp = Some(Utc::now());
        }
        object.metadata.resource_version = state.bump_version();
        state.objects.insert(key, object.clone());
        Ok(object)
    }

    fn without_status(object: &DynamicObject) -> serde_json::Map<String, Value> {
        let mut data = object.data.clone();
        data.remove("status");
        data
    }

    /// Shared version check for `update` and `update_status`.
    fn check_version(
        state: &mut ClusterState,
        key: &ObjectRef,
        given: &str,
    ) -> ClusterResult<DynamicObject> {
        let current = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                object: key.clone(),
            })?;

        if let Some(remaining) = state.pending_conflicts.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                let bumped = state.bump_version();
                if let Some(stored) = state.objects.get_mut(key) {
                    stored.metadata.resource_version = bumped.clone();
                }
                return Err(ClusterError::Conflict {
                    object: key.clone(),
                    given: given.to_string(),
                    current: bumped,
                });
            }
        }

        if !given.is_empty() && given != current.metadata.resource_version {
            return Err(ClusterError::Conflict {
                object: key.clone(),
                given: given.to_string(),
                current: current.metadata.resource_version,
            });
        }
        Ok(current)
    }
}

#[async_trait]
impl ClusterClient for MemoryCluster {
    async fn get(&self, kind: &str, namespace: &str, name: &str) -> ClusterResult<DynamicObject> {
        let key = ObjectRef::new(kind, namespace, name);
        let state = self.lock()?;
        state
            .objects
            .get(&key)
            .cloned()
            .ok_or(ClusterError::NotFound { object: key })
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
    ) -> ClusterResult<Vec<DynamicObject>> {
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .filter(|(key, _)| namespace.map_or(true, |ns| key.namespace == ns))
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, mut object: DynamicObject) -> ClusterResult<DynamicObject> {
        let mut state = self.lock()?;
        object.metadata.uid.clear();
        object.metadata.resource_version.clear();
        object.metadata.generation = 0;
        let created = Self::insert_new(&mut state, object)?;
        state.creates += 1;
        Ok(created)
    }

    async fn update(&self, mut object: DynamicObject) -> ClusterResult<DynamicObject> {
        let key = object.object_ref();
        let mut state = self.lock()?;
        let current = Self::check_version(&mut state, &key, &object.metadata.resource_version)?;

        match current.data.get("status") {
            Some(status) => {
                object.data.insert("status".into(), status.clone());
            }
            None => {
                object.data.remove("status");
            }
        }
        object.metadata.uid = current.metadata.uid.clone();
        object.metadata.creation_timestamp = current.metadata.creation_timestamp;
        object.metadata.generation = current.metadata.generation;
        if Self::without_status(&object) != Self::without_status(&current) {
            object.metadata.generation += 1;
        }
        object.metadata.resource_version = state.bump_version();
        state.objects.insert(key, object.clone());
        state.updates += 1;
        Ok(object)
    }

    async fn update_status(&self, object: DynamicObject) -> ClusterResult<DynamicObject> {
        let key = object.object_ref();
        let mut state = self.lock()?;
        let mut current =
            Self::check_version(&mut state, &key, &object.metadata.resource_version)?;

        match object.data.get("status") {
            Some(status) => {
                current.data.insert("status".into(), status.clone());
            }
            None => {
                current.data.remove("status");
            }
        }
        current.metadata.resource_version = state.bump_version();
        state.objects.insert(key, current.clone());
        state.updates += 1;
        Ok(current)
    }

    async fn delete(&self, object: &ObjectRef) -> ClusterResult<()> {
        let mut state = self.lock()?;
        if state.failing_deletes.contains(object) {
            return Err(ClusterError::Backend(format!(
                "delete of {object} rejected"
            )));
        }
        state
            .objects
            .remove(object)
            .ok_or_else(|| ClusterError::NotFound {
                object: object.clone(),
            })?;
        state.deletes += 1;
        Ok(())
    }

    async fn list_owned(&self, owner_uid: &str) -> ClusterResult<Vec<ObjectRef>> {
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|(_, object)| {
                object
                    .metadata
                    .owner_references
                    .iter()
                    .any(|owner| owner.uid == owner_uid)
            })
            .map(|(key, _)| key.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryConfigStore
// ---------------------------------------------------------------------------

/// In-memory config store backed by ordered maps.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    agents: Mutex<BTreeMap<String, AgentRecord>>,
    tool_servers: Mutex<BTreeMap<String, ToolServerRecord>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Backend("memory store lock poisoned".to_string())
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn store_agent(&self, record: AgentRecord) -> StorageResult<()> {
        let mut agents = self.agents.lock().map_err(poisoned)?;
        agents.insert(record.agent_id.clone(), record);
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRecord>> {
        let agents = self.agents.lock().map_err(poisoned)?;
        Ok(agents.get(agent_id).cloned())
    }

    async fn delete_agent(&self, agent_id: &str) -> StorageResult<()> {
        let mut agents = self.agents.lock().map_err(poisoned)?;
        agents.remove(agent_id);
        Ok(())
    }

    async fn list_agents(&self) -> StorageResult<Vec<AgentRecord>> {
        let agents = self.agents.lock().map_err(poisoned)?;
        Ok(agents.values().cloned().collect())
    }

    async fn store_tool_server(&self, record: ToolServerRecord) -> StorageResult<()> {
        let mut servers = self.tool_servers.lock().map_err(poisoned)?;
        servers.insert(record.server_id.clone(), record);
        Ok(())
    }

    async fn get_tool_server(&self, server_id: &str) -> StorageResult<Option<ToolServerRecord>> {
        let servers = self.tool_servers.lock().map_err(poisoned)?;
        Ok(servers.get(server_id).cloned())
    }
}
