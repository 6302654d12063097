//! Controller-wide settings.
//!
//! Built from defaults, overridden with `with_*` builders or from
//! `DOCKHAND_*` environment variables.

use reqwest::Url;

use crate::reconcile::retry::RetryPolicy;

/// Image tag used when none is configured.
pub const DEFAULT_IMAGE_TAG: &str = env!("CARGO_PKG_VERSION");

/// Errors from reading controller configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid proxy url {value:?}: {reason}")]
    InvalidProxyUrl { value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Registry hosting the agent runtime and skills-init images.
    pub image_registry: String,
    /// Repository of the declarative agent runtime image.
    pub image_repository: String,
    pub image_tag: String,
    pub image_pull_policy: Option<String>,
    /// Pull secret appended to every declarative agent's pod.
    pub default_image_pull_secret: Option<String>,
    /// When set, tool and agent URLs that point inside the cluster are
    /// rewritten to go through this proxy.
    pub proxy_url: Option<Url>,
    pub cluster_domain: String,
    /// Audience of the projected service-account token.
    pub token_audience: String,
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            image_registry: "ghcr.io".to_string(),
            image_repository: "stevedores-org/dockhand/agent-runtime".to_string(),
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
            image_pull_policy: None,
            default_image_pull_secret: None,
            proxy_url: None,
            cluster_domain: "cluster.local".to_string(),
            token_audience: "dockhand".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image_registry(mut self, registry: impl Into<String>) -> Self {
        self.image_registry = registry.into();
        self
    }

    pub fn with_image_repository(mut self, repository: impl Into<String>) -> Self {
        self.image_repository = repository.into();
        self
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = tag.into();
        self
    }

    pub fn with_image_pull_policy(mut self, policy: impl Into<String>) -> Self {
        self.image_pull_policy = Some(policy.into());
        self
    }

    pub fn with_default_image_pull_secret(mut self, secret: impl Into<String>) -> Self {
        self.default_image_pull_secret = Some(secret.into());
        self
    }

    pub fn with_proxy_url(mut self, url: &str) -> Result<Self, ConfigError> {
        self.proxy_url = Some(parse_proxy_url(url)?);
        Ok(self)
    }

    pub fn with_cluster_domain(mut self, domain: impl Into<String>) -> Self {
        self.cluster_domain = domain.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Create from environment variables
    ///
    /// Reads (all optional):
    /// - DOCKHAND_IMAGE_REGISTRY
    /// - DOCKHAND_IMAGE_REPOSITORY
    /// - DOCKHAND_IMAGE_TAG
    /// - DOCKHAND_IMAGE_PULL_POLICY
    /// - DOCKHAND_IMAGE_PULL_SECRET
    /// - DOCKHAND_PROXY_URL
    /// - DOCKHAND_CLUSTER_DOMAIN
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("DOCKHAND_IMAGE_REGISTRY") {
            config.image_registry = v;
        }
        if let Ok(v) = std::env::var("DOCKHAND_IMAGE_REPOSITORY") {
            config.image_repository = v;
        }
        if let Ok(v) = std::env::var("DOCKHAND_IMAGE_TAG") {
            config.image_tag = v;
        }
        config.image_pull_policy = std::env::var("DOCKHAND_IMAGE_PULL_POLICY").ok();
        config.default_image_pull_secret = std::env::var("DOCKHAND_IMAGE_PULL_SECRET").ok();
        if let Ok(v) = std::env::var("DOCKHAND_PROXY_URL") {
            if !v.is_empty() {
                config.proxy_url = Some(parse_proxy_url(&v)?);
            }
        }
        if let Ok(v) = std::env::var("DOCKHAND_CLUSTER_DOMAIN") {
            config.cluster_domain = v;
        }
        Ok(config)
    }

    /// `<registry>/<repository>:<tag>` for declarative agents.
    pub fn agent_image(&self, registry_override: Option<&str>) -> String {
        let registry = registry_override
            .filter(|r| !r.is_empty())
            .unwrap_or(self.image_registry.as_str());
        format!("{registry}/{}:{}", self.image_repository, self.image_tag)
    }

    /// Image of the init container that pulls skills, a sibling of the
    /// runtime image.
    pub fn skills_init_image(&self) -> String {
        let prefix = self
            .image_repository
            .rsplit_once('/')
            .map(|(prefix, _)| prefix)
            .unwrap_or("");
        if prefix.is_empty() {
            format!("{}/skills-init:{}", self.image_registry, self.image_tag)
        } else {
            format!("{}/{prefix}/skills-init:{}", self.image_registry, self.image_tag)
        }
    }
}

fn parse_proxy_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidProxyUrl {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidProxyUrl {
            value: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.image_tag, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.cluster_domain, "cluster.local");
        assert!(config.proxy_url.is_none());
    }

    #[test]
    fn test_agent_image_honours_registry_override() {
        let config = ControllerConfig::new()
            .with_image_registry("registry.local")
            .with_image_tag("1.2.3");
        assert_eq!(
            config.agent_image(None),
            "registry.local/stevedores-org/dockhand/agent-runtime:1.2.3"
        );
        assert_eq!(
            config.agent_image(Some("mirror.internal")),
            "mirror.internal/stevedores-org/dockhand/agent-runtime:1.2.3"
        );
        assert_eq!(
            config.agent_image(Some("")),
            "registry.local/stevedores-org/dockhand/agent-runtime:1.2.3"
        );
    }

    #[test]
    fn test_skills_init_image_shares_repository_prefix() {
        let config = ControllerConfig::new().with_image_tag("0.3.0");
        assert_eq!(
            config.skills_init_image(),
            "ghcr.io/stevedores-org/dockhand/skills-init:0.3.0"
        );
        let flat = ControllerConfig::new()
            .with_image_repository("runtime")
            .with_image_tag("0.3.0");
        assert_eq!(flat.skills_init_image(), "ghcr.io/skills-init:0.3.0");
    }

    #[test]
    fn test_proxy_url_rejects_garbage() {
        let err = ControllerConfig::new().with_proxy_url("not a url").unwrap_err();
        assert!(err.to_string().contains("invalid proxy url"));
        let ok = ControllerConfig::new()
            .with_proxy_url("http://proxy.dockhand:8080")
            .unwrap();
        assert_eq!(ok.proxy_url.unwrap().host_str(), Some("proxy.dockhand"));
    }
}
