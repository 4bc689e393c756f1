//! Engine error types

use thiserror::Error;

/// Which half of the lifecycle an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reconcile,
    Delete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Reconcile => write!(f, "reconcile"),
            Phase::Delete => write!(f, "delete"),
        }
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The resource exists but carries no ownership marker for this cluster.
    /// Control flow branches on this variant; never match on its message.
    #[error("Resource is not owned by this cluster: {resource}")]
    NotOwned { resource: String },

    #[error("Operation on {resource} (service: {service}) failed: {message}")]
    OperationFailed {
        service: String,
        resource: String,
        message: String,
    },

    #[error("Invalid operation token: {0}")]
    InvalidToken(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("failed to {phase} {service}: {source}")]
    Reconcile {
        service: String,
        phase: Phase,
        #[source]
        source: Box<CloudError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] skyfold_config::ConfigError),
}

impl CloudError {
    /// Attach the service and lifecycle phase to an error
    pub fn context(self, service: impl Into<String>, phase: Phase) -> Self {
        CloudError::Reconcile {
            service: service.into(),
            phase,
            source: Box::new(self),
        }
    }

    /// The innermost error, past any context wrappers
    pub fn root(&self) -> &CloudError {
        match self {
            CloudError::Reconcile { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_owned(&self) -> bool {
        matches!(self.root(), CloudError::NotOwned { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), CloudError::ResourceNotFound(_))
    }

    /// Whether a later pass may succeed without any change to the desired state
    pub fn is_transient(&self) -> bool {
        matches!(
            self.root(),
            CloudError::Timeout(_) | CloudError::ApiError(_) | CloudError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
