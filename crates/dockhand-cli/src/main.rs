//! Dockhand CLI
//!
//! The `dockhand` command runs the translation and reconciliation engine
//! offline, against a JSON snapshot of cluster objects.
//!
//! ## Commands
//!
//! - `render`: Print the objects an Agent translates to
//! - `validate`: Check agent reference graphs for cycles and depth
//! - `reconcile`: Reconcile every ModelConfig and Agent in a snapshot
//! - `discover`: List the tools of a RemoteMCPServer

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use dockhand_core::api::split_reference;
use dockhand_core::{
    validate_agent_graph, Agent, AgentReconciler, AgentTranslator, ControllerConfig,
    HttpToolLister, ModelConfig, ModelConfigReconciler, RemoteMcpServer, RetryPolicy,
    ToolServerReconciler,
};
use dockhand_state::{
    ClusterClientExt, ConfigStore, DynamicObject, MemoryCluster, MemoryConfigStore, StoreConfig,
    SurrealConfigStore,
};

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dockhand agent translation and reconciliation engine", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the desired objects and runtime config of one Agent
    Render {
        /// Cluster snapshot (JSON array or List of objects)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Agent to render, as `name` or `namespace/name`
        agent: String,

        /// Write the rendering here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        controller: ControllerArgs,
    },

    /// Validate agent reference graphs
    Validate {
        /// Cluster snapshot (JSON array or List of objects)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Only validate this agent (`name` or `namespace/name`)
        agent: Option<String>,
    },

    /// Reconcile every ModelConfig and Agent in a snapshot
    Reconcile {
        /// Cluster snapshot (JSON array or List of objects)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Write the resulting cluster state here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Config store URL (in-memory store when omitted)
        #[arg(long, env = "DOCKHAND_STORE_URL")]
        store_url: Option<String>,

        #[command(flatten)]
        controller: ControllerArgs,
    },

    /// List the tools a RemoteMCPServer exposes
    Discover {
        /// Cluster snapshot (JSON array or List of objects)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Server to query, as `name` or `namespace/name`
        server: String,
    },
}

/// Controller settings; each flag falls back to its `DOCKHAND_*` variable.
#[derive(Args, Debug, Default, Clone)]
struct ControllerArgs {
    /// Registry of the agent runtime image
    #[arg(long, env = "DOCKHAND_IMAGE_REGISTRY")]
    image_registry: Option<String>,

    /// Repository of the agent runtime image
    #[arg(long, env = "DOCKHAND_IMAGE_REPOSITORY")]
    image_repository: Option<String>,

    /// Tag of the agent runtime image
    #[arg(long, env = "DOCKHAND_IMAGE_TAG")]
    image_tag: Option<String>,

    /// Pull policy for agent images
    #[arg(long, env = "DOCKHAND_IMAGE_PULL_POLICY")]
    image_pull_policy: Option<String>,

    /// Pull secret added to every declarative agent
    #[arg(long, env = "DOCKHAND_IMAGE_PULL_SECRET")]
    image_pull_secret: Option<String>,

    /// Proxy for tool and agent traffic inside the cluster
    #[arg(long, env = "DOCKHAND_PROXY_URL")]
    proxy_url: Option<String>,

    /// Cluster DNS domain
    #[arg(long, env = "DOCKHAND_CLUSTER_DOMAIN")]
    cluster_domain: Option<String>,

    /// Retries on write conflicts
    #[arg(long, env = "DOCKHAND_MAX_RETRIES")]
    max_retries: Option<u32>,
}

impl ControllerArgs {
    fn to_config(&self) -> Result<ControllerConfig> {
        let mut config = ControllerConfig::default();
        if let Some(v) = &self.image_registry {
            config = config.with_image_registry(v);
        }
        if let Some(v) = &self.image_repository {
            config = config.with_image_repository(v);
        }
        if let Some(v) = &self.image_tag {
            config = config.with_image_tag(v);
        }
        if let Some(v) = &self.image_pull_policy {
            config = config.with_image_pull_policy(v);
        }
        if let Some(v) = &self.image_pull_secret {
            config = config.with_default_image_pull_secret(v);
        }
        if let Some(v) = self.proxy_url.as_deref().filter(|v| !v.is_empty()) {
            config = config.with_proxy_url(v)?;
        }
        if let Some(v) = &self.cluster_domain {
            config = config.with_cluster_domain(v);
        }
        if let Some(max_retries) = self.max_retries {
            config = config.with_retry(RetryPolicy {
                max_retries,
                ..RetryPolicy::default()
            });
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dockhand_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Render {
            snapshot,
            agent,
            output,
            controller,
        } => {
            let cluster = load_snapshot(&snapshot)?;
            let rendered = cmd_render(&cluster, &agent, &controller.to_config()?).await?;
            write_json(&rendered, output.as_deref())
        }
        Commands::Validate { snapshot, agent } => {
            let cluster = load_snapshot(&snapshot)?;
            let reports = cmd_validate(&cluster, agent.as_deref()).await?;
            let failed = reports.iter().filter(|r| r.error.is_some()).count();
            for report in &reports {
                match &report.error {
                    None => println!("ok      {}", report.agent),
                    Some(err) => println!("invalid {}: {}", report.agent, err),
                }
            }
            if failed > 0 {
                bail!("{failed} of {} agent(s) failed validation", reports.len());
            }
            Ok(())
        }
        Commands::Reconcile {
            snapshot,
            output,
            store_url,
            controller,
        } => {
            let cluster = Arc::new(load_snapshot(&snapshot)?);
            let store: Arc<dyn ConfigStore> = match store_url {
                Some(url) => {
                    let config = StoreConfig {
                        url,
                        ..StoreConfig::from_env()
                    };
                    Arc::new(
                        SurrealConfigStore::connect(&config)
                            .await
                            .context("Failed to connect to config store")?,
                    )
                }
                None => Arc::new(MemoryConfigStore::new()),
            };
            let summary = cmd_reconcile(cluster.clone(), store, controller.to_config()?).await?;
            for line in &summary.results {
                match &line.error {
                    None => println!(
                        "{:<14} {:<32} changed={} pruned={}",
                        line.kind, line.object, line.changed, line.pruned
                    ),
                    Some(err) => println!("{:<14} {:<32} failed: {err}", line.kind, line.object),
                }
            }
            if let Some(path) = output {
                save_snapshot(&cluster, &path)?;
                info!(path = %path.display(), "wrote cluster snapshot");
            }
            if summary.failed > 0 {
                bail!("{} reconcile(s) failed", summary.failed);
            }
            Ok(())
        }
        Commands::Discover { snapshot, server } => {
            let cluster = Arc::new(load_snapshot(&snapshot)?);
            let tools = cmd_discover(cluster, &server).await?;
            write_json(&tools, None)
        }
    }
}

/// Load a snapshot file: a JSON array of objects, a `{"items": [...]}`
/// List, or a single object.
fn load_snapshot(path: &Path) -> Result<MemoryCluster> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot: {:?}", path))?;
    let value: Value =
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) if map.contains_key("items") => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => bail!("{:?}: items must be an array", path),
        },
        object @ Value::Object(_) => vec![object],
        _ => bail!("{:?}: expected an object or a list of objects", path),
    };
    let objects = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<DynamicObject>(item)
                .with_context(|| format!("{:?}: item {i} is not a cluster object", path))
        })
        .collect::<Result<Vec<_>>>()?;
    let count = objects.len();
    let cluster = MemoryCluster::from_objects(objects)
        .with_context(|| format!("Failed to load objects from {:?}", path))?;
    info!(path = %path.display(), objects = count, "loaded cluster snapshot");
    Ok(cluster)
}

fn save_snapshot(cluster: &MemoryCluster, path: &Path) -> Result<()> {
    let objects = cluster.snapshot()?;
    let content = serde_json::to_string_pretty(&objects)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
        }
        None => {
            println!("{content}");
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Rendered {
    agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    card: Option<Value>,
    objects: Vec<DynamicObject>,
}

/// Translate one agent without touching the snapshot.
async fn cmd_render(
    cluster: &MemoryCluster,
    reference: &str,
    config: &ControllerConfig,
) -> Result<Rendered> {
    let (ns, name) = split_reference(reference, "default");
    let agent: Agent = cluster
        .get_resource_opt(ns, name)
        .await?
        .with_context(|| format!("Agent {ns}/{name} not found in snapshot"))?;

    let outputs = AgentTranslator::new(cluster, config)
        .translate(&agent)
        .await
        .with_context(|| format!("Failed to translate Agent {ns}/{name}"))?;

    Ok(Rendered {
        agent: agent.identity(),
        config_hash: outputs.config_hash.map(|h| h.to_string()),
        config: outputs.config.as_ref().map(serde_json::to_value).transpose()?,
        card: outputs.card.as_ref().map(serde_json::to_value).transpose()?,
        objects: outputs
            .objects
            .iter()
            .map(|o| o.to_dynamic())
            .collect::<dockhand_core::Result<Vec<_>>>()?,
    })
}

#[derive(Debug)]
struct ValidationReport {
    agent: String,
    error: Option<String>,
}

async fn cmd_validate(
    cluster: &MemoryCluster,
    reference: Option<&str>,
) -> Result<Vec<ValidationReport>> {
    let agents: Vec<Agent> = match reference {
        Some(reference) => {
            let (ns, name) = split_reference(reference, "default");
            let agent = cluster
                .get_resource_opt(ns, name)
                .await?
                .with_context(|| format!("Agent {ns}/{name} not found in snapshot"))?;
            vec![agent]
        }
        None => cluster.list_resources(None).await?,
    };

    let mut reports = Vec::with_capacity(agents.len());
    for agent in &agents {
        let error = validate_agent_graph(cluster, agent)
            .await
            .err()
            .map(|e| e.to_string());
        reports.push(ValidationReport {
            agent: agent.identity(),
            error,
        });
    }
    Ok(reports)
}

#[derive(Debug)]
struct ReconcileLine {
    kind: &'static str,
    object: String,
    changed: usize,
    pruned: usize,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct ReconcileSummary {
    results: Vec<ReconcileLine>,
    failed: usize,
}

impl ReconcileSummary {
    fn record(
        &mut self,
        kind: &'static str,
        object: String,
        result: dockhand_core::Result<dockhand_core::ReconcileOutcome>,
    ) {
        let line = match result {
            Ok(outcome) => ReconcileLine {
                kind,
                object,
                changed: outcome.changed(),
                pruned: outcome.pruned.len(),
                error: None,
            },
            Err(err) => {
                warn!(kind, object = %object, error = %err, "reconcile failed");
                self.failed += 1;
                ReconcileLine {
                    kind,
                    object,
                    changed: 0,
                    pruned: 0,
                    error: Some(err.to_string()),
                }
            }
        };
        self.results.push(line);
    }
}

/// ModelConfigs go first so agents see fresh secret hashes.
async fn cmd_reconcile(
    cluster: Arc<MemoryCluster>,
    store: Arc<dyn ConfigStore>,
    config: ControllerConfig,
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();

    let models = ModelConfigReconciler::new(cluster.clone(), config.retry);
    for model in cluster.list_resources::<ModelConfig>(None).await? {
        let meta = &model.metadata;
        let result = models.reconcile(&meta.namespace, &meta.name).await;
        summary.record("ModelConfig", format!("{}/{}", meta.namespace, meta.name), result);
    }

    let agents = AgentReconciler::new(cluster.clone(), store, config);
    for agent in cluster.list_resources::<Agent>(None).await? {
        let result = agents
            .reconcile(&agent.metadata.namespace, &agent.metadata.name)
            .await;
        summary.record("Agent", agent.identity(), result);
    }
    Ok(summary)
}

/// Query a RemoteMCPServer and return the tools it lists.
async fn cmd_discover(
    cluster: Arc<MemoryCluster>,
    reference: &str,
) -> Result<Vec<dockhand_core::api::DiscoveredTool>> {
    let (ns, name) = split_reference(reference, "default");
    let reconciler = ToolServerReconciler::new(
        cluster.clone(),
        Arc::new(MemoryConfigStore::new()),
        Arc::new(HttpToolLister::new()),
        RetryPolicy::default(),
    );
    reconciler
        .reconcile(ns, name)
        .await
        .with_context(|| format!("Failed to discover tools of RemoteMCPServer {ns}/{name}"))?;

    let server: RemoteMcpServer = cluster
        .get_resource_opt(ns, name)
        .await?
        .with_context(|| format!("RemoteMCPServer {ns}/{name} not found in snapshot"))?;
    Ok(server.status.discovered_tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot_objects() -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {
                    "apiVersion": "dockhand.stevedores.org/v1alpha1",
                    "kind": "ModelConfig",
                    "metadata": {"name": "gpt", "namespace": "default"},
                    "spec": {
                        "model": "gpt-4o",
                        "provider": "OpenAI",
                        "apiKeySecret": "openai-key",
                        "apiKeySecretKey": "api-key",
                        "openAI": {}
                    }
                },
                {
                    "apiVersion": "v1",
                    "kind": "Secret",
                    "metadata": {"name": "openai-key", "namespace": "default"},
                    "data": {"api-key": "sk-test"}
                },
                {
                    "apiVersion": "dockhand.stevedores.org/v1alpha1",
                    "kind": "Agent",
                    "metadata": {"name": "helper", "namespace": "default"},
                    "spec": {
                        "type": "Declarative",
                        "description": "helps",
                        "declarative": {"systemMessage": "be helpful", "modelConfig": "gpt"}
                    }
                }
            ]
        })
    }

    fn write_snapshot(dir: &Path, value: &Value) -> PathBuf {
        let path = dir.join("snapshot.json");
        std::fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_render_from_list_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(temp_dir.path(), &snapshot_objects());
        let cluster = load_snapshot(&path).unwrap();

        let rendered = cmd_render(&cluster, "helper", &ControllerConfig::default())
            .await
            .unwrap();

        assert_eq!(rendered.agent, "default/helper");
        let kinds: Vec<_> = rendered.objects.iter().map(|o| o.kind.as_str()).collect();
        assert_eq!(kinds, ["Secret", "ServiceAccount", "Deployment", "Service"]);
        assert!(rendered.config_hash.is_some());
        assert_eq!(rendered.card.unwrap()["url"], "http://helper.default:8080/");
    }

    #[tokio::test]
    async fn test_render_missing_agent_fails() {
        let cluster = MemoryCluster::new();
        let err = cmd_render(&cluster, "team-a/ghost", &ControllerConfig::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Agent team-a/ghost not found"));
    }

    #[tokio::test]
    async fn test_validate_reports_cycles() {
        let temp_dir = tempfile::tempdir().unwrap();
        let agent = |name: &str, peer: &str| {
            json!({
                "apiVersion": "dockhand.stevedores.org/v1alpha1",
                "kind": "Agent",
                "metadata": {"name": name, "namespace": "default"},
                "spec": {
                    "type": "Declarative",
                    "declarative": {
                        "modelConfig": "gpt",
                        "tools": [{"type": "Agent", "agent": {"name": peer}}]
                    }
                }
            })
        };
        let path = write_snapshot(temp_dir.path(), &json!([agent("a", "b"), agent("b", "a")]));
        let cluster = load_snapshot(&path).unwrap();

        let reports = cmd_validate(&cluster, None).await.unwrap();

        assert_eq!(reports.len(), 2);
        for report in &reports {
            let error = report.error.as_deref().unwrap_or_default();
            assert!(error.contains("cycle detected"), "got {error:?}");
        }
    }

    #[tokio::test]
    async fn test_reconcile_snapshot_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(temp_dir.path(), &snapshot_objects());
        let cluster = Arc::new(load_snapshot(&path).unwrap());
        let store = Arc::new(MemoryConfigStore::new());

        let summary = cmd_reconcile(cluster.clone(), store.clone(), ControllerConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.failed, 0);
        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.results[1].changed, 4);
        assert!(store.get_agent("default/helper").await.unwrap().is_some());

        let out = temp_dir.path().join("out.json");
        save_snapshot(&cluster, &out).unwrap();
        let reloaded = load_snapshot(&out).unwrap();
        assert_eq!(reloaded.snapshot().unwrap().len(), 7);

        let again = cmd_reconcile(
            Arc::new(reloaded),
            store,
            ControllerConfig::default(),
        )
        .await
        .unwrap();
        assert!(again.results.iter().all(|r| r.changed == 0));
    }

    #[test]
    fn test_snapshot_rejects_non_objects() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = write_snapshot(temp_dir.path(), &json!(42));
        assert!(load_snapshot(&path).is_err());
    }

    #[test]
    fn test_controller_args_override_defaults() {
        let args = ControllerArgs {
            image_registry: Some("registry.local".into()),
            proxy_url: Some("http://proxy.dockhand:8080".into()),
            max_retries: Some(1),
            ..Default::default()
        };
        let config = args.to_config().unwrap();
        assert!(config.agent_image(None).starts_with("registry.local/"));
        assert!(config.proxy_url.is_some());
        assert_eq!(config.retry.max_retries, 1);

        let bad = ControllerArgs {
            proxy_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(bad.to_config().is_err());
    }
}
