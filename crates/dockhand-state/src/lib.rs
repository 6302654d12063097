//! Dockhand-State: cluster boundary and config persistence for Dockhand
//!
//! This crate owns everything the engine reads from or writes to outside of
//! its own process.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: a typed cluster object model, the cluster client seam with
//! optimistic concurrency, and the store that the agent runtime reads
//! translated configuration from.
//!
//! ## Key Components
//!
//! - `ClusterClient`: get/list/create/update/delete with resource versions and
//!   an owner-UID index
//! - `MemoryCluster`: in-memory cluster used by tests and offline rendering
//! - `ConfigStore`: translated agent and tool-server configuration
//! - `SurrealConfigStore`: SurrealDB backend for `ConfigStore`

pub mod cluster;
mod error;
pub mod fakes;
pub mod meta;
mod migrations;
pub mod objects;
pub mod store;
pub mod surreal_store;

pub use cluster::{ClusterClient, ClusterClientExt, ClusterResult};
pub use error::{ClusterError, StorageError};
pub use fakes::{MemoryCluster, MemoryConfigStore};
pub use meta::{
    find_condition, set_condition, Condition, ConditionStatus, DynamicObject, ObjectMeta,
    ObjectRef, OwnerReference, Resource,
};
pub use store::{AgentRecord, ConfigStore, StorageResult, ToolServerRecord};
pub use surreal_store::{StoreConfig, SurrealConfigStore};
