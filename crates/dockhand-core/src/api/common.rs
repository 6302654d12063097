//! Types shared between the Dockhand resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// API group of every Dockhand resource.
pub const API_GROUP: &str = "dockhand.stevedores.org";
/// `apiVersion` of every Dockhand resource.
pub const API_VERSION: &str = "dockhand.stevedores.org/v1alpha1";

/// A named configuration value: a literal, or a key looked up from a
/// ConfigMap or Secret in the referencing object's namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueSource>,
}

impl ValueRef {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            value_from: None,
        }
    }

    pub fn from_secret(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            value_from: Some(ValueSource {
                kind: ValueSourceKind::Secret,
                name: secret.into(),
                key: key.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSource {
    #[serde(rename = "type")]
    pub kind: ValueSourceKind,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSourceKind {
    ConfigMap,
    Secret,
    /// Anything this version does not understand.
    #[serde(other)]
    Unknown,
}

/// Reference to another object by kind, API group, name and namespace.
///
/// An empty namespace means "the referencing object's namespace".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl TypedReference {
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.namespace.is_empty() {
            default
        } else {
            &self.namespace
        }
    }
}

/// Split a `name` or `namespace/name` reference.
pub fn split_reference<'a>(reference: &'a str, default_namespace: &'a str) -> (&'a str, &'a str) {
    match reference.split_once('/') {
        Some((ns, name)) => (ns, name),
        None => (default_namespace, reference),
    }
}

/// Which namespaces may reference an object from outside its own namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedNamespaces {
    #[serde(default)]
    pub from: FromNamespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<NamespaceSelector>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FromNamespaces {
    All,
    #[default]
    Same,
    Selector,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl AllowedNamespaces {
    /// Whether a namespace carrying `source_labels` may reference the
    /// object. Same-namespace access is decided by the caller.
    pub fn admits(&self, source_labels: &BTreeMap<String, String>) -> bool {
        match self.from {
            FromNamespaces::All => true,
            FromNamespaces::Same => false,
            FromNamespaces::Selector => match &self.selector {
                Some(selector) => selector
                    .match_labels
                    .iter()
                    .all(|(k, v)| source_labels.get(k) == Some(v)),
                None => false,
            },
        }
    }
}

/// Status shared by the Dockhand resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<dockhand_state::Condition>,
}
