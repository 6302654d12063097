//! ModelConfig translation.
//!
//! Produces the runtime model descriptor plus the side channel the
//! deployment needs: credential env vars, credential/CA volumes and mounts,
//! and the secret hash recorded on the ModelConfig.

use dockhand_state::objects::{EnvVar, Secret, Volume, VolumeMount};
use dockhand_state::{ClusterClient, ClusterClientExt};
use tracing::debug;

use super::runtime::{
    AnthropicModel, AnthropicVertexAiModel, AzureOpenAiModel, BaseModel, BedrockModel,
    GeminiModel, GeminiVertexAiModel, OllamaModel, OpenAiModel, RuntimeModel,
};
use crate::api::{split_reference, ModelConfig, ModelConfigSpec, ModelProvider};
use crate::error::{Error, Result};

pub const TLS_VOLUME_NAME: &str = "tls-ca-cert";
pub const TLS_MOUNT_PATH: &str = "/etc/dockhand/tls";
pub const CREDS_VOLUME_NAME: &str = "google-creds";
pub const CREDS_MOUNT_PATH: &str = "/creds";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const BEDROCK_BEARER_TOKEN: &str = "AWS_BEARER_TOKEN_BEDROCK";

/// Result of translating one ModelConfig.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedModel {
    pub model: RuntimeModel,
    pub env: Vec<EnvVar>,
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
    /// Decoded `status.secretHash`; empty until the ModelConfig has been
    /// reconciled.
    pub secret_hash: Vec<u8>,
}

/// Translate the ModelConfig named by `reference` (`name` or
/// `namespace/name`) as seen from `namespace`.
pub async fn translate_model(
    cluster: &dyn ClusterClient,
    reference: &str,
    namespace: &str,
) -> Result<TranslatedModel> {
    let (ns, name) = split_reference(reference, namespace);
    let config = cluster
        .get_resource_opt::<ModelConfig>(ns, name)
        .await?
        .ok_or_else(|| Error::not_found("ModelConfig", format!("{ns}/{name}")))?;

    let secret_hash = if config.status.secret_hash.is_empty() {
        Vec::new()
    } else {
        hex::decode(&config.status.secret_hash).map_err(|e| {
            Error::resolution(
                format!("secret hash of ModelConfig {ns}/{name}"),
                e.to_string(),
            )
        })?
    };

    let mut out = TranslatedModel {
        model: RuntimeModel::Gemini(GeminiModel::default()),
        env: Vec::new(),
        volumes: Vec::new(),
        mounts: Vec::new(),
        secret_hash,
    };
    let base = base_model(&config.spec, &mut out);
    out.model = provider_model(cluster, ns, name, &config.spec, base, &mut out).await?;
    debug!(
        model_config = %format!("{ns}/{name}"),
        provider = config.spec.provider.as_str(),
        env = out.env.len(),
        "translated model config"
    );
    Ok(out)
}

/// Common descriptor fields, plus the CA volume when TLS names one.
fn base_model(spec: &ModelConfigSpec, out: &mut TranslatedModel) -> BaseModel {
    let mut base = BaseModel {
        model: spec.model.clone(),
        headers: spec.default_headers.clone(),
        ..Default::default()
    };
    if let Some(tls) = &spec.tls {
        base.tls_disable_verify = Some(tls.disable_verify);
        base.tls_disable_system_cas = Some(tls.disable_system_cas);
        if !tls.ca_cert_secret_ref.is_empty() && !tls.ca_cert_secret_key.is_empty() {
            base.tls_ca_cert_path = Some(format!("{TLS_MOUNT_PATH}/{}", tls.ca_cert_secret_key));
            out.volumes
                .push(Volume::secret(TLS_VOLUME_NAME, &tls.ca_cert_secret_ref));
            out.mounts
                .push(VolumeMount::new(TLS_VOLUME_NAME, TLS_MOUNT_PATH).read_only());
        }
    }
    base
}

fn missing_sub_config(provider: ModelProvider, ns: &str, name: &str) -> Error {
    Error::validation(format!(
        "ModelConfig {ns}/{name} uses provider {} but has no {} configuration",
        provider.as_str(),
        provider.as_str()
    ))
}

/// Whether an API key secret is configured. A secret without a key is an error.
fn has_api_key(spec: &ModelConfigSpec) -> Result<bool> {
    if spec.api_key_secret.is_empty() {
        return Ok(false);
    }
    if spec.api_key_secret_key.is_empty() {
        return Err(Error::validation(format!(
            "apiKeySecret {} is set without apiKeySecretKey",
            spec.api_key_secret
        )));
    }
    Ok(true)
}

/// Push `env_name` sourced from the API key secret, if one is configured.
fn api_key_env(spec: &ModelConfigSpec, env_name: &str, out: &mut TranslatedModel) -> Result<()> {
    if !has_api_key(spec)? {
        return Ok(());
    }
    out.env.push(EnvVar::from_secret(
        env_name,
        &spec.api_key_secret,
        &spec.api_key_secret_key,
    ));
    Ok(())
}

/// Parse a decimal sampling parameter such as `"0.7"`.
fn parse_float(field: &str, raw: Option<&String>) -> Result<Option<f64>> {
    raw.map(|s| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| Error::validation(format!("{field} must be a number, got {s:?}")))
    })
    .transpose()
}

/// Mount the service-account key for Vertex AI providers.
fn vertex_credentials(
    spec: &ModelConfigSpec,
    project_id: &str,
    location: &str,
    out: &mut TranslatedModel,
) -> Result<()> {
    if has_api_key(spec)? {
        out.volumes
            .push(Volume::secret(CREDS_VOLUME_NAME, &spec.api_key_secret));
        out.mounts
            .push(VolumeMount::new(CREDS_VOLUME_NAME, CREDS_MOUNT_PATH).read_only());
        out.env.push(EnvVar::literal(
            "GOOGLE_APPLICATION_CREDENTIALS",
            format!("{CREDS_MOUNT_PATH}/{}", spec.api_key_secret_key),
        ));
    }
    out.env
        .push(EnvVar::literal("GOOGLE_CLOUD_PROJECT", project_id));
    out.env
        .push(EnvVar::literal("GOOGLE_CLOUD_LOCATION", location));
    out.env
        .push(EnvVar::literal("GOOGLE_GENAI_USE_VERTEXAI", "true"));
    Ok(())
}

async fn provider_model(
    cluster: &dyn ClusterClient,
    ns: &str,
    name: &str,
    spec: &ModelConfigSpec,
    base: BaseModel,
    out: &mut TranslatedModel,
) -> Result<RuntimeModel> {
    let provider = spec.provider;
    let model = match provider {
        ModelProvider::OpenAi => {
            api_key_env(spec, "OPENAI_API_KEY", out)?;
            let cfg = spec.open_ai.clone().unwrap_or_default();
            RuntimeModel::OpenAi(OpenAiModel {
                base,
                base_url: cfg.base_url,
                organization: cfg.organization,
                temperature: parse_float("temperature", cfg.temperature.as_ref())?,
                max_tokens: cfg.max_tokens,
                top_p: parse_float("topP", cfg.top_p.as_ref())?,
                frequency_penalty: parse_float("frequencyPenalty", cfg.frequency_penalty.as_ref())?,
                presence_penalty: parse_float("presencePenalty", cfg.presence_penalty.as_ref())?,
                seed: cfg.seed,
                n: cfg.n,
                timeout: cfg.timeout,
                reasoning_effort: cfg.reasoning_effort,
            })
        }
        ModelProvider::AzureOpenAi => {
            let cfg = spec
                .azure_open_ai
                .as_ref()
                .ok_or_else(|| missing_sub_config(provider, ns, name))?;
            api_key_env(spec, "AZURE_OPENAI_API_KEY", out)?;
            out.env
                .push(EnvVar::literal("AZURE_OPENAI_ENDPOINT", &cfg.azure_endpoint));
            out.env
                .push(EnvVar::literal("OPENAI_API_VERSION", &cfg.api_version));
            RuntimeModel::AzureOpenAi(AzureOpenAiModel {
                base,
                azure_endpoint: cfg.azure_endpoint.clone(),
                api_version: cfg.api_version.clone(),
                azure_deployment: cfg.azure_deployment.clone(),
                azure_ad_token: cfg.azure_ad_token.clone(),
                temperature: parse_float("temperature", cfg.temperature.as_ref())?,
                max_tokens: cfg.max_tokens,
                top_p: parse_float("topP", cfg.top_p.as_ref())?,
            })
        }
        ModelProvider::Anthropic => {
            api_key_env(spec, "ANTHROPIC_API_KEY", out)?;
            let cfg = spec.anthropic.clone().unwrap_or_default();
            RuntimeModel::Anthropic(AnthropicModel {
                base,
                base_url: cfg.base_url,
                max_tokens: cfg.max_tokens,
                temperature: parse_float("temperature", cfg.temperature.as_ref())?,
                top_p: parse_float("topP", cfg.top_p.as_ref())?,
                top_k: cfg.top_k,
            })
        }
        ModelProvider::Gemini => {
            api_key_env(spec, "GOOGLE_API_KEY", out)?;
            RuntimeModel::Gemini(GeminiModel { base })
        }
        ModelProvider::GeminiVertexAi => {
            let cfg = spec
                .gemini_vertex_ai
                .as_ref()
                .ok_or_else(|| missing_sub_config(provider, ns, name))?;
            vertex_credentials(spec, &cfg.project_id, &cfg.location, out)?;
            RuntimeModel::GeminiVertexAi(GeminiVertexAiModel {
                base,
                project_id: cfg.project_id.clone(),
                location: cfg.location.clone(),
                temperature: parse_float("temperature", cfg.temperature.as_ref())?,
                top_p: parse_float("topP", cfg.top_p.as_ref())?,
                top_k: parse_float("topK", cfg.top_k.as_ref())?,
                max_output_tokens: cfg.max_output_tokens,
                candidate_count: cfg.candidate_count,
                response_mime_type: cfg.response_mime_type.clone(),
            })
        }
        ModelProvider::AnthropicVertexAi => {
            let cfg = spec
                .anthropic_vertex_ai
                .as_ref()
                .ok_or_else(|| missing_sub_config(provider, ns, name))?;
            vertex_credentials(spec, &cfg.project_id, &cfg.location, out)?;
            RuntimeModel::AnthropicVertexAi(AnthropicVertexAiModel {
                base,
                project_id: cfg.project_id.clone(),
                location: cfg.location.clone(),
                temperature: parse_float("temperature", cfg.temperature.as_ref())?,
                top_p: parse_float("topP", cfg.top_p.as_ref())?,
                top_k: parse_float("topK", cfg.top_k.as_ref())?,
                max_tokens: cfg.max_tokens,
            })
        }
        ModelProvider::Ollama => {
            let cfg = spec
                .ollama
                .as_ref()
                .ok_or_else(|| missing_sub_config(provider, ns, name))?;
            let host = if cfg.host.trim().is_empty() {
                DEFAULT_OLLAMA_HOST
            } else {
                cfg.host.as_str()
            };
            out.env.push(EnvVar::literal("OLLAMA_API_BASE", host));
            RuntimeModel::Ollama(OllamaModel {
                base,
                options: cfg.options.clone(),
            })
        }
        ModelProvider::Bedrock => {
            let cfg = spec
                .bedrock
                .as_ref()
                .ok_or_else(|| missing_sub_config(provider, ns, name))?;
            if cfg.region.is_empty() {
                return Err(Error::validation(format!(
                    "ModelConfig {ns}/{name}: bedrock region is required"
                )));
            }
            out.env.push(EnvVar::literal("AWS_REGION", &cfg.region));
            bedrock_credentials(cluster, ns, spec, out).await?;
            RuntimeModel::Bedrock(BedrockModel {
                base,
                region: cfg.region.clone(),
            })
        }
    };
    Ok(model)
}

/// Bedrock accepts either a bearer token or an access key pair. Which one is
/// used depends on what the secret actually holds.
async fn bedrock_credentials(
    cluster: &dyn ClusterClient,
    ns: &str,
    spec: &ModelConfigSpec,
    out: &mut TranslatedModel,
) -> Result<()> {
    if spec.api_key_secret.is_empty() {
        return Ok(());
    }
    let secret = cluster
        .get_resource_opt::<Secret>(ns, &spec.api_key_secret)
        .await?
        .ok_or_else(|| Error::not_found("Secret", format!("{ns}/{}", spec.api_key_secret)))?;
    let secret_name = spec.api_key_secret.as_str();

    if secret.data.contains_key(BEDROCK_BEARER_TOKEN) {
        out.env.push(EnvVar::from_secret(
            BEDROCK_BEARER_TOKEN,
            secret_name,
            BEDROCK_BEARER_TOKEN,
        ));
        return Ok(());
    }

    for key in ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"] {
        if !secret.data.contains_key(key) {
            return Err(Error::resolution(
                format!("bedrock credentials in Secret {ns}/{secret_name}"),
                format!("neither {BEDROCK_BEARER_TOKEN} nor {key} is present"),
            ));
        }
        out.env.push(EnvVar::from_secret(key, secret_name, key));
    }
    if secret.data.contains_key("AWS_SESSION_TOKEN") {
        out.env.push(EnvVar::from_secret(
            "AWS_SESSION_TOKEN",
            secret_name,
            "AWS_SESSION_TOKEN",
        ));
    }
    Ok(())
}
