//! Deployment resolution.
//!
//! Merges the user's deployment preferences with the controller's defaults
//! into one fully defaulted [`ResolvedDeployment`]. The manifest builder
//! never looks at the Agent's deployment spec directly.

use std::collections::BTreeMap;

use dockhand_state::objects::{
    EnvVar, LocalObjectReference, PodSecurityContext, ResourceRequirements, SecurityContext,
    Toleration, Volume, VolumeMount,
};

use crate::api::{
    Agent, AgentType, ByoAgentSpec, DeclarativeAgentSpec, ServiceAccountConfig,
    SharedDeploymentSpec,
};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::translate::model::TranslatedModel;
use crate::AGENT_PORT;

/// Where the config Secret is mounted and read from.
pub const CONFIG_MOUNT_PATH: &str = "/config";

/// Canonical deployment shape handed to the manifest builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedDeployment {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub port: i32,
    pub image_pull_policy: Option<String>,
    pub replicas: i32,
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
    /// Extra pod labels and annotations.
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub env: Vec<EnvVar>,
    pub resources: Option<ResourceRequirements>,
    pub node_selector: BTreeMap<String, String>,
    pub tolerations: Vec<Toleration>,
    pub affinity: Option<serde_json::Value>,
    pub security_context: Option<SecurityContext>,
    pub pod_security_context: Option<PodSecurityContext>,
    pub service_account_name: String,
    /// Present when Dockhand creates the service account itself.
    pub generated_service_account: Option<ServiceAccountConfig>,
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Requests/limits applied to declarative agents that specify none.
pub fn default_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: BTreeMap::from([
            ("cpu".to_string(), "100m".to_string()),
            ("memory".to_string(), "384Mi".to_string()),
        ]),
        limits: BTreeMap::from([
            ("cpu".to_string(), "2000m".to_string()),
            ("memory".to_string(), "1Gi".to_string()),
        ]),
    }
}

/// Resolve the deployment for `agent`. `model` carries the credential env
/// and volumes of a declarative agent's model.
pub fn resolve_deployment(
    agent: &Agent,
    config: &ControllerConfig,
    model: Option<&TranslatedModel>,
) -> Result<ResolvedDeployment> {
    match agent.spec.agent_type {
        AgentType::Declarative => {
            let spec = agent.spec.declarative.as_ref().ok_or_else(|| {
                Error::validation("declarative agent has no declarative spec")
            })?;
            resolve_declarative(agent, spec, config, model)
        }
        AgentType::Byo => {
            let spec = agent
                .spec
                .byo
                .as_ref()
                .ok_or_else(|| Error::validation("BYO agent has no byo spec"))?;
            resolve_byo(agent, spec, config)
        }
    }
}

pub fn resolve_declarative(
    agent: &Agent,
    spec: &DeclarativeAgentSpec,
    config: &ControllerConfig,
    model: Option<&TranslatedModel>,
) -> Result<ResolvedDeployment> {
    let deployment = spec.deployment.clone().unwrap_or_default();
    let mut resolved = shared(agent, &deployment.shared)?;

    resolved.image = config.agent_image(deployment.image_registry.as_deref());
    resolved.args = vec![
        "--host".to_string(),
        "0.0.0.0".to_string(),
        "--port".to_string(),
        AGENT_PORT.to_string(),
        "--filepath".to_string(),
        CONFIG_MOUNT_PATH.to_string(),
    ];
    if resolved.image_pull_policy.is_none() {
        resolved.image_pull_policy = config.image_pull_policy.clone();
    }
    if resolved.resources.is_none() {
        resolved.resources = Some(default_resources());
    }
    if let Some(secret) = &config.default_image_pull_secret {
        if !resolved.image_pull_secrets.iter().any(|s| &s.name == secret) {
            resolved.image_pull_secrets.push(LocalObjectReference {
                name: secret.clone(),
            });
        }
    }
    if let Some(model) = model {
        resolved.env.extend(model.env.iter().cloned());
        resolved.volumes.extend(model.volumes.iter().cloned());
        resolved.volume_mounts.extend(model.mounts.iter().cloned());
    }
    Ok(resolved)
}

pub fn resolve_byo(
    agent: &Agent,
    spec: &ByoAgentSpec,
    config: &ControllerConfig,
) -> Result<ResolvedDeployment> {
    let deployment = spec.deployment.clone().unwrap_or_default();
    if deployment.image.trim().is_empty() {
        return Err(Error::validation("image is required"));
    }
    let mut resolved = shared(agent, &deployment.shared)?;
    resolved.image = deployment.image;
    resolved.command = deployment.cmd.into_iter().collect();
    resolved.args = deployment.args;
    if resolved.image_pull_policy.is_none() {
        resolved.image_pull_policy = config.image_pull_policy.clone();
    }
    Ok(resolved)
}

/// Fields resolved identically for both agent types.
fn shared(agent: &Agent, spec: &SharedDeploymentSpec) -> Result<ResolvedDeployment> {
    let replicas = spec.replicas.unwrap_or(1);
    if replicas < 0 {
        return Err(Error::validation(format!(
            "replicas must not be negative, got {replicas}"
        )));
    }

    let external_name = spec
        .service_account_name
        .as_deref()
        .filter(|n| !n.is_empty());
    let (service_account_name, generated_service_account) =
        match (external_name, &spec.service_account_config) {
            (Some(_), Some(_)) => {
                return Err(Error::validation(
                    "serviceAccountName and serviceAccountConfig are mutually exclusive",
                ))
            }
            (Some(name), None) => (name.to_string(), None),
            (None, sa_config) => (
                agent.metadata.name.clone(),
                Some(sa_config.clone().unwrap_or_default()),
            ),
        };

    Ok(ResolvedDeployment {
        image: String::new(),
        command: Vec::new(),
        args: Vec::new(),
        port: AGENT_PORT,
        image_pull_policy: spec.image_pull_policy.clone(),
        replicas,
        volumes: spec.volumes.clone(),
        volume_mounts: spec.volume_mounts.clone(),
        labels: spec.labels.clone(),
        annotations: spec.annotations.clone(),
        env: spec.env.clone(),
        resources: spec.resources.clone().filter(|r| !r.is_empty()),
        node_selector: spec.node_selector.clone(),
        tolerations: spec.tolerations.clone(),
        affinity: spec.affinity.clone(),
        security_context: spec.security_context.clone(),
        pod_security_context: spec.pod_security_context.clone(),
        service_account_name,
        generated_service_account,
        image_pull_secrets: spec.image_pull_secrets.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AgentSpec, ByoDeploymentSpec, DeclarativeDeploymentSpec};
    use dockhand_state::ObjectMeta;

    fn declarative(deployment: Option<DeclarativeDeploymentSpec>) -> Agent {
        Agent {
            metadata: ObjectMeta::named("default", "helper"),
            spec: AgentSpec {
                agent_type: AgentType::Declarative,
                declarative: Some(DeclarativeAgentSpec {
                    model_config: "gpt".into(),
                    deployment,
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn byo(image: &str) -> Agent {
        Agent {
            metadata: ObjectMeta::named("default", "custom"),
            spec: AgentSpec {
                agent_type: AgentType::Byo,
                byo: Some(ByoAgentSpec {
                    deployment: Some(ByoDeploymentSpec {
                        image: image.into(),
                        cmd: Some("/bin/agent".into()),
                        args: vec!["--verbose".into()],
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_declarative_defaults() {
        let config = ControllerConfig::new()
            .with_image_tag("1.0.0")
            .with_default_image_pull_secret("regcred");
        let resolved = resolve_deployment(&declarative(None), &config, None).unwrap();

        assert_eq!(
            resolved.image,
            "ghcr.io/stevedores-org/dockhand/agent-runtime:1.0.0"
        );
        assert_eq!(resolved.port, 8080);
        assert_eq!(resolved.replicas, 1);
        assert_eq!(
            resolved.args,
            ["--host", "0.0.0.0", "--port", "8080", "--filepath", "/config"]
        );
        assert_eq!(resolved.resources, Some(default_resources()));
        assert_eq!(resolved.service_account_name, "helper");
        assert!(resolved.generated_service_account.is_some());
        assert_eq!(resolved.image_pull_secrets[0].name, "regcred");
    }

    #[test]
    fn test_user_resources_and_pull_secret_kept() {
        let config = ControllerConfig::new().with_default_image_pull_secret("regcred");
        let mut deployment = DeclarativeDeploymentSpec::default();
        deployment.shared.resources = Some(ResourceRequirements {
            limits: BTreeMap::from([("memory".to_string(), "4Gi".to_string())]),
            ..Default::default()
        });
        deployment.shared.image_pull_secrets = vec![LocalObjectReference {
            name: "regcred".into(),
        }];
        let resolved = resolve_deployment(&declarative(Some(deployment)), &config, None).unwrap();

        assert_eq!(resolved.resources.unwrap().limits["memory"], "4Gi");
        assert_eq!(resolved.image_pull_secrets.len(), 1);
    }

    #[test]
    fn test_service_account_conflict() {
        let mut deployment = DeclarativeDeploymentSpec::default();
        deployment.shared.service_account_name = Some("existing".into());
        deployment.shared.service_account_config = Some(ServiceAccountConfig::default());
        let err = resolve_deployment(&declarative(Some(deployment)), &ControllerConfig::new(), None)
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_external_service_account() {
        let mut deployment = DeclarativeDeploymentSpec::default();
        deployment.shared.service_account_name = Some("existing".into());
        let resolved =
            resolve_deployment(&declarative(Some(deployment)), &ControllerConfig::new(), None)
                .unwrap();
        assert_eq!(resolved.service_account_name, "existing");
        assert!(resolved.generated_service_account.is_none());
    }

    #[test]
    fn test_byo_requires_image() {
        let err = resolve_deployment(&byo(""), &ControllerConfig::new(), None).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("image is required"));
    }

    #[test]
    fn test_byo_has_no_generated_defaults() {
        let config = ControllerConfig::new().with_default_image_pull_secret("regcred");
        let resolved = resolve_deployment(&byo("example/agent:1"), &config, None).unwrap();
        assert_eq!(resolved.image, "example/agent:1");
        assert_eq!(resolved.command, ["/bin/agent"]);
        assert_eq!(resolved.args, ["--verbose"]);
        assert_eq!(resolved.replicas, 1);
        assert_eq!(resolved.port, 8080);
        assert!(resolved.resources.is_none());
        assert!(resolved.image_pull_secrets.is_empty());
    }
}
