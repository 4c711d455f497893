//! Error taxonomy for envstack deployments.
//!
//! Every variant is fatal to the orchestration run: nothing is retried and
//! resources applied before the failure are left in place.

use std::path::PathBuf;

use envstack_state::{ProviderError, ResourceKey, StateError};

/// Operation refused on a protected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedOperation {
    Delete,
    Replace,
}

impl std::fmt::Display for ProtectedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectedOperation::Delete => f.write_str("delete"),
            ProtectedOperation::Replace => f.write_str("replace"),
        }
    }
}

/// envstack deployment errors.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("secret material missing: {0}")]
    SecretMaterialMissing(String),

    #[error("cannot read template {path:?}: {source}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resource {key} is protected; refusing to {operation} it")]
    ProtectedResource {
        key: ResourceKey,
        operation: ProtectedOperation,
    },

    #[error("authentication failed for {key}: {message}")]
    Auth { key: ResourceKey, message: String },

    #[error("dependency cycle detected involving resources: {keys:?}")]
    DependencyCycle { keys: Vec<String> },

    #[error("resource not found in graph: {key}")]
    UnknownResource { key: String },

    #[error("provider error for {key}: {source}")]
    Provider {
        key: ResourceKey,
        #[source]
        source: ProviderError,
    },

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Classify a provider failure raised while handling `key`.
    pub fn from_provider(key: &ResourceKey, err: ProviderError) -> Self {
        match err {
            ProviderError::Auth(message) => DeployError::Auth {
                key: key.clone(),
                message,
            },
            ProviderError::MissingConfig { key: config_key } => DeployError::Configuration(
                format!("missing required configuration key: {}", config_key),
            ),
            source => DeployError::Provider {
                key: key.clone(),
                source,
            },
        }
    }
}

/// Result type for envstack operations.
pub type Result<T> = std::result::Result<T, DeployError>;
