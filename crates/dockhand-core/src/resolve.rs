//! Reference resolution: turn [`ValueRef`]s into concrete strings.

use std::collections::BTreeMap;

use dockhand_state::objects::{ConfigMap, Secret};
use dockhand_state::{ClusterClient, ClusterClientExt};
use tracing::debug;

use crate::api::{ValueRef, ValueSourceKind};
use crate::error::{Error, Result};

/// Resolve one value in `namespace`, returning `(name, value)`.
///
/// A literal wins over a source. With neither set the value is empty.
pub async fn resolve_value(
    cluster: &dyn ClusterClient,
    namespace: &str,
    value: &ValueRef,
) -> Result<(String, String)> {
    if !value.value.is_empty() {
        return Ok((value.name.clone(), value.value.clone()));
    }
    let Some(source) = &value.value_from else {
        return Ok((value.name.clone(), String::new()));
    };

    let (kind, data) = match source.kind {
        ValueSourceKind::ConfigMap => (
            "ConfigMap",
            cluster
                .get_resource_opt::<ConfigMap>(namespace, &source.name)
                .await?
                .map(|cm| cm.data),
        ),
        ValueSourceKind::Secret => (
            "Secret",
            cluster
                .get_resource_opt::<Secret>(namespace, &source.name)
                .await?
                .map(|s| s.data),
        ),
        ValueSourceKind::Unknown => {
            return Err(Error::validation(format!(
                "unknown source kind for value {}",
                value.name
            )))
        }
    };

    let data = data.ok_or_else(|| {
        Error::not_found(
            format!("value source {kind}"),
            format!("{namespace}/{}", source.name),
        )
    })?;
    let resolved = data.get(&source.key).cloned().ok_or_else(|| {
        Error::resolution(
            format!("value {}", value.name),
            format!(
                "key {:?} not found in {kind} {namespace}/{}",
                source.key, source.name
            ),
        )
    })?;
    debug!(name = %value.name, kind, source = %source.name, "resolved value from source");
    Ok((value.name.clone(), resolved))
}

/// Resolve a header list in order. Later entries replace earlier ones with
/// the same name; the first failure aborts.
pub async fn resolve_headers(
    cluster: &dyn ClusterClient,
    namespace: &str,
    headers: &[ValueRef],
) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();
    for header in headers {
        let (name, value) = resolve_value(cluster, namespace, header).await?;
        resolved.insert(name, value);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ValueSource;
    use crate::error::ErrorKind;
    use dockhand_state::{MemoryCluster, ObjectMeta};

    fn cluster_with_secret() -> MemoryCluster {
        let cluster = MemoryCluster::new();
        let mut secret = Secret {
            metadata: ObjectMeta::named("default", "creds"),
            ..Default::default()
        };
        secret.data.insert("token".into(), "s3cr3t".into());
        cluster.seed(&secret).unwrap();

        let mut cm = ConfigMap {
            metadata: ObjectMeta::named("default", "settings"),
            ..Default::default()
        };
        cm.data.insert("region".into(), "eu-west-1".into());
        cluster.seed(&cm).unwrap();
        cluster
    }

    #[tokio::test]
    async fn test_literal_wins_over_source() {
        let cluster = cluster_with_secret();
        let mut v = ValueRef::from_secret("Authorization", "creds", "token");
        v.value = "literal".into();
        let (name, value) = resolve_value(&cluster, "default", &v).await.unwrap();
        assert_eq!(name, "Authorization");
        assert_eq!(value, "literal");
    }

    #[tokio::test]
    async fn test_resolves_from_secret_and_config_map() {
        let cluster = cluster_with_secret();
        let (_, token) = resolve_value(
            &cluster,
            "default",
            &ValueRef::from_secret("Authorization", "creds", "token"),
        )
        .await
        .unwrap();
        assert_eq!(token, "s3cr3t");

        let region = ValueRef {
            name: "X-Region".into(),
            value: String::new(),
            value_from: Some(ValueSource {
                kind: ValueSourceKind::ConfigMap,
                name: "settings".into(),
                key: "region".into(),
            }),
        };
        let (_, value) = resolve_value(&cluster, "default", &region).await.unwrap();
        assert_eq!(value, "eu-west-1");
    }

    #[tokio::test]
    async fn test_empty_literal_without_source_is_empty() {
        let cluster = MemoryCluster::new();
        let (name, value) = resolve_value(&cluster, "default", &ValueRef::literal("X-Empty", ""))
            .await
            .unwrap();
        assert_eq!(name, "X-Empty");
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let cluster = MemoryCluster::new();
        let err = resolve_value(
            &cluster,
            "default",
            &ValueRef::from_secret("Authorization", "absent", "token"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("source Secret default/absent not found"));
    }

    #[tokio::test]
    async fn test_missing_key_names_object_and_key() {
        let cluster = cluster_with_secret();
        let err = resolve_value(
            &cluster,
            "default",
            &ValueRef::from_secret("Authorization", "creds", "nope"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);
        let msg = err.to_string();
        assert!(msg.contains("\"nope\""));
        assert!(msg.contains("Secret default/creds"));
    }

    #[tokio::test]
    async fn test_unknown_source_kind_fails() {
        let cluster = MemoryCluster::new();
        let v = ValueRef {
            name: "X".into(),
            value: String::new(),
            value_from: Some(ValueSource {
                kind: ValueSourceKind::Unknown,
                name: "vault".into(),
                key: "k".into(),
            }),
        };
        let err = resolve_value(&cluster, "default", &v).await.unwrap_err();
        assert!(err.to_string().contains("unknown source kind"));
    }

    #[tokio::test]
    async fn test_headers_later_entries_override() {
        let cluster = cluster_with_secret();
        let headers = vec![
            ValueRef::literal("X-Team", "a"),
            ValueRef::from_secret("Authorization", "creds", "token"),
            ValueRef::literal("X-Team", "b"),
        ];
        let resolved = resolve_headers(&cluster, "default", &headers).await.unwrap();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["X-Team"], "b");
        assert_eq!(resolved["Authorization"], "s3cr3t");
    }
}
