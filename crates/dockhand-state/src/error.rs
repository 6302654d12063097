//! Error types for dockhand-state

use thiserror::Error;

use crate::meta::ObjectRef;

/// Errors returned by a [`crate::ClusterClient`].
#[derive(Error, Debug)]
pub enum ClusterError {
    /// The addressed object does not exist
    #[error("{object} not found")]
    NotFound { object: ObjectRef },

    /// Create was called for an object that already exists
    #[error("{object} already exists")]
    AlreadyExists { object: ObjectRef },

    /// Optimistic-concurrency failure: the caller's resource version is stale
    #[error("conflict updating {object}: resource version {given} is stale (current {current})")]
    Conflict {
        object: ObjectRef,
        given: String,
        current: String,
    },

    /// The object was rejected before reaching the store
    #[error("invalid object: {0}")]
    Invalid(String),

    /// Converting between typed and dynamic objects failed
    #[error("object serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure
    #[error("cluster backend error: {0}")]
    Backend(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

/// Errors returned by a [`crate::ConfigStore`].
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection error
    #[error("store connection failed: {0}")]
    Connection(String),

    /// Query or backend failure
    #[error("store backend error: {0}")]
    Backend(String),

    /// Schema setup error
    #[error("store schema setup failed: {0}")]
    SchemaSetup(String),

    /// Record not found
    #[error("record not found: {id}")]
    NotFound { id: String },
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_error_displays_versions() {
        let err = ClusterError::Conflict {
            object: ObjectRef::new("Deployment", "default", "agent-a"),
            given: "3".to_string(),
            current: "5".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Deployment default/agent-a"));
        assert!(msg.contains("3"));
        assert!(msg.contains("5"));
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_error_displays_object() {
        let err = ClusterError::NotFound {
            object: ObjectRef::new("Secret", "team-a", "openai-key"),
        };
        assert_eq!(err.to_string(), "Secret team-a/openai-key not found");
        assert!(err.is_not_found());
    }
}
