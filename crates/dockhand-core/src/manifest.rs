//! Desired object set for one agent.
//!
//! Output order is fixed: config Secret (declarative only), ServiceAccount
//! (unless an existing one is used), Deployment, Service. Every object is
//! owned by the Agent and carries the standard labels.

use std::collections::BTreeMap;

use dockhand_state::objects::{
    Container, ContainerPort, Deployment, DeploymentSpec, DeploymentStrategy, EnvVar,
    HttpGetAction, IntOrString, LabelSelector, PodSpec, PodTemplateSpec, Probe,
    ProjectedVolumeSource, RollingUpdateDeployment, Secret, SecurityContext, Service,
    ServiceAccount, ServiceAccountTokenProjection, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeProjection,
};
use dockhand_state::{DynamicObject, ObjectMeta, ObjectRef, Resource};

use crate::api::Agent;
use crate::config::ControllerConfig;
use crate::deployment::{ResolvedDeployment, CONFIG_MOUNT_PATH};
use crate::digest::config_hash;
use crate::error::Result;
use crate::translate::runtime::{AgentCard, AgentConfig};

pub const CONFIG_KEY: &str = "config.json";
pub const CARD_KEY: &str = "agent-card.json";
pub const CONFIG_HASH_ANNOTATION: &str = "dockhand.stevedores.org/config-hash";
pub const AGENT_LABEL: &str = "dockhand.stevedores.org/agent";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "dockhand";

pub const MAIN_CONTAINER: &str = "agent";
pub const HEALTH_PATH: &str = "/health";
pub const CONFIG_VOLUME: &str = "config";
pub const TOKEN_VOLUME: &str = "dockhand-token";
pub const TOKEN_MOUNT_PATH: &str = "/var/run/secrets/tokens";
pub const TOKEN_EXPIRATION_SECONDS: i64 = 3600;
pub const SKILLS_VOLUME: &str = "skills";
pub const SKILLS_MOUNT_PATH: &str = "/skills";
pub const SKILLS_INIT_CONTAINER: &str = "skills-init";

/// One object the engine wants to exist.
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredObject {
    Secret(Secret),
    ServiceAccount(ServiceAccount),
    Deployment(Deployment),
    Service(Service),
}

impl DesiredObject {
    pub fn object_ref(&self) -> ObjectRef {
        match self {
            DesiredObject::Secret(o) => o.object_ref(),
            DesiredObject::ServiceAccount(o) => o.object_ref(),
            DesiredObject::Deployment(o) => o.object_ref(),
            DesiredObject::Service(o) => o.object_ref(),
        }
    }

    pub fn to_dynamic(&self) -> Result<DynamicObject> {
        Ok(match self {
            DesiredObject::Secret(o) => DynamicObject::from_resource(o)?,
            DesiredObject::ServiceAccount(o) => DynamicObject::from_resource(o)?,
            DesiredObject::Deployment(o) => DynamicObject::from_resource(o)?,
            DesiredObject::Service(o) => DynamicObject::from_resource(o)?,
        })
    }
}

/// Serialized runtime documents of a declarative agent.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeDocuments<'a> {
    pub config: &'a AgentConfig,
    pub card: &'a AgentCard,
    pub secret_hash: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub objects: Vec<DesiredObject>,
    /// Set for declarative agents only.
    pub config_hash: Option<u64>,
}

/// Labels every generated object carries.
pub fn standard_labels(agent: &Agent) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), agent.metadata.name.clone()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (AGENT_LABEL.to_string(), agent.metadata.name.clone()),
    ])
}

/// Labels pods are selected by. Stable for the life of the agent.
pub fn selector_labels(agent: &Agent) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), agent.metadata.name.clone()),
        (AGENT_LABEL.to_string(), agent.metadata.name.clone()),
    ])
}

fn owned_meta(agent: &Agent, labels: BTreeMap<String, String>) -> ObjectMeta {
    let mut meta = ObjectMeta::named(&agent.metadata.namespace, &agent.metadata.name);
    meta.labels = labels;
    meta.owner_references = vec![agent.controller_owner_ref()];
    meta
}

pub fn build_manifest(
    agent: &Agent,
    deployment: &ResolvedDeployment,
    runtime: Option<RuntimeDocuments<'_>>,
    config: &ControllerConfig,
) -> Result<Manifest> {
    let mut objects = Vec::with_capacity(4);
    let mut hash = None;

    if let Some(docs) = runtime {
        let config_json = serde_json::to_string(docs.config)?;
        let card_json = serde_json::to_string(docs.card)?;
        hash = Some(config_hash(
            config_json.as_bytes(),
            card_json.as_bytes(),
            docs.secret_hash,
        ));
        let mut secret = Secret {
            metadata: owned_meta(agent, standard_labels(agent)),
            ..Default::default()
        };
        secret.data.insert(CONFIG_KEY.to_string(), config_json);
        secret.data.insert(CARD_KEY.to_string(), card_json);
        objects.push(DesiredObject::Secret(secret));
    }

    if let Some(sa_config) = &deployment.generated_service_account {
        let mut labels = sa_config.labels.clone();
        labels.extend(standard_labels(agent));
        let mut meta = owned_meta(agent, labels);
        meta.name = deployment.service_account_name.clone();
        meta.annotations = sa_config.annotations.clone();
        objects.push(DesiredObject::ServiceAccount(ServiceAccount { metadata: meta }));
    }

    objects.push(DesiredObject::Deployment(workload(
        agent,
        deployment,
        hash,
        runtime.is_some(),
        config,
    )));
    objects.push(DesiredObject::Service(service(agent, deployment)));

    Ok(Manifest {
        objects,
        config_hash: hash,
    })
}

fn http_probe(port: i32, initial_delay: i32, period: i32) -> Probe {
    Probe {
        http_get: Some(HttpGetAction {
            path: HEALTH_PATH.to_string(),
            port,
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(15),
        failure_threshold: None,
    }
}

fn token_volume(audience: &str) -> Volume {
    Volume {
        name: TOKEN_VOLUME.to_string(),
        projected: Some(ProjectedVolumeSource {
            sources: vec![VolumeProjection {
                service_account_token: Some(ServiceAccountTokenProjection {
                    audience: audience.to_string(),
                    expiration_seconds: Some(TOKEN_EXPIRATION_SECONDS),
                    path: "token".to_string(),
                }),
            }],
        }),
        ..Default::default()
    }
}

fn workload(
    agent: &Agent,
    deployment: &ResolvedDeployment,
    hash: Option<u64>,
    has_config: bool,
    config: &ControllerConfig,
) -> Deployment {
    let skills = agent
        .spec
        .skills
        .as_ref()
        .map(|s| s.refs.as_slice())
        .unwrap_or_default();

    let mut volumes = deployment.volumes.clone();
    let mut mounts = deployment.volume_mounts.clone();
    if has_config {
        volumes.push(Volume::secret(CONFIG_VOLUME, &agent.metadata.name));
        mounts.push(VolumeMount::new(CONFIG_VOLUME, CONFIG_MOUNT_PATH).read_only());
    }
    volumes.push(token_volume(&config.token_audience));
    mounts.push(VolumeMount::new(TOKEN_VOLUME, TOKEN_MOUNT_PATH).read_only());

    let mut init_containers = Vec::new();
    let mut security_context = deployment.security_context.clone();
    if !skills.is_empty() {
        volumes.push(Volume::empty_dir(SKILLS_VOLUME));
        mounts.push(VolumeMount::new(SKILLS_VOLUME, SKILLS_MOUNT_PATH));
        let mut args = vec!["--dest".to_string(), SKILLS_MOUNT_PATH.to_string()];
        args.extend(skills.iter().cloned());
        init_containers.push(Container {
            name: SKILLS_INIT_CONTAINER.to_string(),
            image: config.skills_init_image(),
            image_pull_policy: deployment.image_pull_policy.clone(),
            args,
            volume_mounts: vec![VolumeMount::new(SKILLS_VOLUME, SKILLS_MOUNT_PATH)],
            ..Default::default()
        });
        let mut ctx = security_context.unwrap_or_default();
        ctx.privileged = Some(true);
        security_context = Some(ctx);
    }

    let mut env = vec![
        EnvVar::from_field("DOCKHAND_NAMESPACE", "metadata.namespace"),
        EnvVar::from_field("DOCKHAND_NAME", "metadata.name"),
    ];
    env.extend(deployment.env.iter().cloned());

    let container = Container {
        name: MAIN_CONTAINER.to_string(),
        image: deployment.image.clone(),
        image_pull_policy: deployment.image_pull_policy.clone(),
        command: deployment.command.clone(),
        args: deployment.args.clone(),
        ports: vec![ContainerPort {
            name: "http".to_string(),
            container_port: deployment.port,
            protocol: Some("TCP".to_string()),
        }],
        env,
        volume_mounts: mounts,
        resources: deployment.resources.clone(),
        readiness_probe: Some(http_probe(deployment.port, 15, 15)),
        liveness_probe: Some(http_probe(deployment.port, 60, 30)),
        security_context: security_context.filter(|c| c != &SecurityContext::default()),
    };

    let mut pod_labels = deployment.labels.clone();
    pod_labels.extend(standard_labels(agent));
    let mut pod_annotations = deployment.annotations.clone();
    if let Some(hash) = hash {
        pod_annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), hash.to_string());
    }

    Deployment {
        metadata: owned_meta(agent, standard_labels(agent)),
        spec: DeploymentSpec {
            replicas: Some(deployment.replicas),
            selector: LabelSelector {
                match_labels: selector_labels(agent),
            },
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    labels: pod_labels,
                    annotations: pod_annotations,
                    ..Default::default()
                },
                spec: PodSpec {
                    service_account_name: deployment.service_account_name.clone(),
                    init_containers,
                    containers: vec![container],
                    volumes,
                    image_pull_secrets: deployment.image_pull_secrets.clone(),
                    node_selector: deployment.node_selector.clone(),
                    tolerations: deployment.tolerations.clone(),
                    affinity: deployment.affinity.clone(),
                    security_context: deployment.pod_security_context.clone(),
                },
            },
            strategy: Some(DeploymentStrategy {
                type_: "RollingUpdate".to_string(),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::Int(0)),
                    max_surge: Some(IntOrString::Int(1)),
                }),
            }),
        },
        status: None,
    }
}

fn service(agent: &Agent, deployment: &ResolvedDeployment) -> Service {
    Service {
        metadata: owned_meta(agent, standard_labels(agent)),
        spec: ServiceSpec {
            selector: selector_labels(agent),
            ports: vec![ServicePort {
                name: "http".to_string(),
                port: deployment.port,
                target_port: Some(deployment.port),
                protocol: Some("TCP".to_string()),
                app_protocol: None,
            }],
            type_: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{AgentSpec, AgentType, SkillsSpec};
    use crate::deployment::default_resources;
    use crate::translate::runtime::{BaseModel, GeminiModel, RuntimeModel};
    use crate::AGENT_PORT;

    fn agent() -> Agent {
        let mut agent = Agent {
            metadata: ObjectMeta::named("default", "helper"),
            spec: AgentSpec {
                agent_type: AgentType::Declarative,
                ..Default::default()
            },
            ..Default::default()
        };
        agent.metadata.uid = "uid-helper".into();
        agent
    }

    fn resolved() -> ResolvedDeployment {
        ResolvedDeployment {
            image: "ghcr.io/x/runtime:1".into(),
            port: AGENT_PORT,
            replicas: 1,
            resources: Some(default_resources()),
            service_account_name: "helper".into(),
            generated_service_account: Some(Default::default()),
            ..Default::default()
        }
    }

    fn runtime_config() -> AgentConfig {
        AgentConfig {
            model: RuntimeModel::Gemini(GeminiModel {
                base: BaseModel {
                    model: "gemini-2.0-flash".into(),
                    ..Default::default()
                },
            }),
            description: String::new(),
            instruction: "be helpful".into(),
            http_tools: vec![],
            sse_tools: vec![],
            remote_agents: vec![],
            execute_code: None,
            stream: None,
        }
    }

    fn find_deployment(manifest: &Manifest) -> &Deployment {
        manifest
            .objects
            .iter()
            .find_map(|o| match o {
                DesiredObject::Deployment(d) => Some(d),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_declarative_manifest_order_and_ownership() {
        let config = runtime_config();
        let card = AgentCard::default();
        let manifest = build_manifest(
            &agent(),
            &resolved(),
            Some(RuntimeDocuments {
                config: &config,
                card: &card,
                secret_hash: &[],
            }),
            &ControllerConfig::new(),
        )
        .unwrap();

        let kinds: Vec<String> = manifest
            .objects
            .iter()
            .map(|o| o.object_ref().kind)
            .collect();
        assert_eq!(kinds, ["Secret", "ServiceAccount", "Deployment", "Service"]);
        for object in &manifest.objects {
            let dynamic = object.to_dynamic().unwrap();
            let owner = &dynamic.metadata.owner_references[0];
            assert_eq!(owner.uid, "uid-helper");
            assert_eq!(owner.controller, Some(true));
            assert_eq!(owner.block_owner_deletion, Some(true));
            assert_eq!(dynamic.metadata.labels[MANAGED_BY_LABEL], MANAGED_BY);
        }

        let deployment = find_deployment(&manifest);
        let annotation = &deployment.spec.template.metadata.annotations[CONFIG_HASH_ANNOTATION];
        assert_eq!(annotation, &manifest.config_hash.unwrap().to_string());
    }

    #[test]
    fn test_workload_shape() {
        let manifest = build_manifest(&agent(), &resolved(), None, &ControllerConfig::new()).unwrap();
        let deployment = find_deployment(&manifest);
        let pod = &deployment.spec.template.spec;
        let container = &pod.containers[0];

        assert_eq!(container.ports[0].container_port, 8080);
        assert_eq!(
            container.readiness_probe.as_ref().unwrap().http_get.as_ref().unwrap().path,
            "/health"
        );
        assert_eq!(container.env[0].name, "DOCKHAND_NAMESPACE");
        assert_eq!(container.env[1].name, "DOCKHAND_NAME");
        let token = pod.volumes.iter().find(|v| v.name == TOKEN_VOLUME).unwrap();
        let projection = token.projected.as_ref().unwrap().sources[0]
            .service_account_token
            .as_ref()
            .unwrap();
        assert_eq!(projection.audience, "dockhand");
        assert_eq!(projection.expiration_seconds, Some(3600));
        assert!(container
            .volume_mounts
            .iter()
            .any(|m| m.mount_path == TOKEN_MOUNT_PATH));

        let rolling = deployment
            .spec
            .strategy
            .as_ref()
            .unwrap()
            .rolling_update
            .as_ref()
            .unwrap();
        assert_eq!(rolling.max_unavailable, Some(IntOrString::Int(0)));
        assert_eq!(rolling.max_surge, Some(IntOrString::Int(1)));
        assert!(manifest.config_hash.is_none());
        assert!(container.security_context.is_none());
    }

    #[test]
    fn test_skills_add_init_container_and_privilege() {
        let mut agent = agent();
        agent.spec.skills = Some(SkillsSpec {
            refs: vec!["ghcr.io/acme/skill:1".into()],
        });
        let mut deployment = resolved();
        deployment.security_context = Some(SecurityContext {
            run_as_user: Some(1000),
            ..Default::default()
        });
        let manifest = build_manifest(&agent, &deployment, None, &ControllerConfig::new()).unwrap();
        let pod = &find_deployment(&manifest).spec.template.spec;

        let init = &pod.init_containers[0];
        assert_eq!(init.name, SKILLS_INIT_CONTAINER);
        assert!(init.image.ends_with(&format!("/skills-init:{}", env!("CARGO_PKG_VERSION"))));
        assert_eq!(init.args.last().unwrap(), "ghcr.io/acme/skill:1");
        assert!(pod.volumes.iter().any(|v| v.name == SKILLS_VOLUME && v.empty_dir.is_some()));

        let ctx = pod.containers[0].security_context.as_ref().unwrap();
        assert_eq!(ctx.privileged, Some(true));
        assert_eq!(ctx.run_as_user, Some(1000));
    }

    #[test]
    fn test_external_service_account_not_generated() {
        let mut deployment = resolved();
        deployment.service_account_name = "existing".into();
        deployment.generated_service_account = None;
        let manifest = build_manifest(&agent(), &deployment, None, &ControllerConfig::new()).unwrap();
        assert!(!manifest
            .objects
            .iter()
            .any(|o| matches!(o, DesiredObject::ServiceAccount(_))));
        assert_eq!(
            find_deployment(&manifest).spec.template.spec.service_account_name,
            "existing"
        );
    }

    #[test]
    fn test_service_selects_agent_pods() {
        let manifest = build_manifest(&agent(), &resolved(), None, &ControllerConfig::new()).unwrap();
        let service = manifest
            .objects
            .iter()
            .find_map(|o| match o {
                DesiredObject::Service(s) => Some(s),
                _ => None,
            })
            .unwrap();
        assert_eq!(service.spec.ports[0].port, 8080);
        assert_eq!(service.spec.ports[0].name, "http");
        assert_eq!(service.spec.selector, selector_labels(&agent()));
    }
}
