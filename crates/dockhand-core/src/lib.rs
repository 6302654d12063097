//! Dockhand Core Library
//!
//! Translates declarative `Agent` resources (and the ModelConfigs, tool
//! servers and secrets they reference) into the cluster objects that run
//! them, and reconciles those objects plus the runtime config store.
//!
//! ## Layer 1 - Translation & Reconciliation
//!
//! - `translate`: Agent → runtime config, capability card, desired objects
//! - `reconcile`: apply/prune with conflict retry, status conditions
//! - `discovery`: tool listing on remote MCP servers

pub mod api;
pub mod config;
pub mod deployment;
pub mod digest;
pub mod discovery;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod obs;
pub mod reconcile;
pub mod resolve;
pub mod telemetry;
pub mod translate;

/// Port every agent listens on and its Service exposes.
pub const AGENT_PORT: i32 = 8080;

pub use api::{Agent, AgentType, McpServer, ModelConfig, RemoteMcpServer};
pub use config::{ConfigError, ControllerConfig};
pub use deployment::{resolve_deployment, ResolvedDeployment};
pub use digest::{canonical_json, config_hash, secret_hash};
pub use discovery::{HttpToolLister, ToolLister};
pub use error::{Error, ErrorKind, RequeuePolicy, Result};
pub use graph::{validate_agent_graph, TranslationState, MAX_AGENT_DEPTH};
pub use manifest::{build_manifest, DesiredObject, Manifest};
pub use reconcile::{
    AgentReconciler, ApplyOutcome, ConfigStoreLock, ModelConfigReconciler, ReconcileOutcome,
    RetryPolicy, ToolServerReconciler,
};
pub use resolve::{resolve_headers, resolve_value};
pub use telemetry::init_tracing;
pub use translate::{AgentOutputs, AgentTranslator};
