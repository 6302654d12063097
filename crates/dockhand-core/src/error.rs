//! Engine error taxonomy.
//!
//! Every failure the engine reports funnels into [`Error`]. Callers that
//! decide on retries use [`Error::kind`] (which looks through [`Error::Context`]
//! wrappers) rather than matching variants directly.

use std::time::Duration;

use dockhand_state::{ClusterError, ObjectRef, StorageError};

/// Errors produced by translation and reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("cycle detected: agent {agent} is already on the path [{}]", .path.join(" -> "))]
    CycleDetected { agent: String, path: Vec<String> },

    #[error("recursion limit reached: agent {agent} is nested {depth} levels deep (limit {limit})")]
    RecursionLimit {
        agent: String,
        depth: usize,
        limit: usize,
    },

    #[error("agent {agent} cannot use itself as a tool (self reference)")]
    SelfReference { agent: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("failed to resolve {what}: {reason}")]
    Resolution { what: String, reason: String },

    #[error("cluster request failed: {0}")]
    Cluster(#[source] ClusterError),

    #[error("failed to apply {object}: {source}")]
    Apply {
        object: ObjectRef,
        #[source]
        source: ClusterError,
    },

    #[error("failed to prune {} object(s): {}", .failures.len(), .failures.join("; "))]
    Prune { failures: Vec<String> },

    #[error("config store error: {0}")]
    Store(#[from] StorageError),

    #[error("tool discovery failed for {url}: {reason}")]
    Discovery { url: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{object}: {source}")]
    Context {
        object: String,
        #[source]
        source: Box<Error>,
    },
}

/// Coarse classification used for status reporting and requeue decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The user's declaration is wrong; retrying without a change is pointless.
    Validation,
    NotFound,
    Resolution,
    /// Writing to the cluster or the store failed.
    Mutation,
    Internal,
}

/// What the caller should do after a failed reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeuePolicy {
    /// Wait for the resource to change.
    AwaitChange,
    /// Retry after the given delay.
    After(Duration),
}

/// Delay before retrying a non-validation failure.
pub const ERROR_REQUEUE_DELAY: Duration = Duration::from_secs(5);

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn resolution(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Resolution {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Wrap this error with the identity of the object being processed.
    pub fn context(self, object: impl Into<String>) -> Self {
        Error::Context {
            object: object.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_)
            | Error::CycleDetected { .. }
            | Error::RecursionLimit { .. }
            | Error::SelfReference { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Resolution { .. } | Error::Discovery { .. } => ErrorKind::Resolution,
            Error::Apply { .. } | Error::Prune { .. } | Error::Store(_) => ErrorKind::Mutation,
            Error::Cluster(e) if e.is_not_found() => ErrorKind::NotFound,
            Error::Cluster(_) | Error::Serialization(_) => ErrorKind::Internal,
            Error::Context { source, .. } => source.kind(),
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn requeue_policy(&self) -> RequeuePolicy {
        if self.is_validation() {
            RequeuePolicy::AwaitChange
        } else {
            RequeuePolicy::After(ERROR_REQUEUE_DELAY)
        }
    }
}

impl From<ClusterError> for Error {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotFound { object } => Error::NotFound {
                kind: object.kind.clone(),
                name: object.key(),
            },
            other => Error::Cluster(other),
        }
    }
}

/// Attach object context to a `Result`.
pub trait ResultExt<T> {
    fn with_object(self, object: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_object(self, object: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(object))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
