//! Error types for envstack-state

use thiserror::Error;

/// Errors raised by provider capabilities (config, cluster, remote environments).
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A required configuration key is absent
    #[error("missing required configuration key: {key}")]
    MissingConfig { key: String },

    /// A configuration value is present but unusable
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    /// The provider rejected the request for lack of credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A referenced resource does not exist on the provider side
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    /// HTTP transport or API error
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by stack state persistence.
#[derive(Error, Debug)]
pub enum StateError {
    /// State file could not be read or written
    #[error("state IO failed for {environment}: {source}")]
    Io {
        environment: String,
        #[source]
        source: std::io::Error,
    },

    /// State file exists but is not valid JSON
    #[error("corrupt state for {environment}: {source}")]
    Corrupt {
        environment: String,
        #[source]
        source: serde_json::Error,
    },

    /// Environment name would escape the state directory
    #[error("invalid environment name for state file: {0:?}")]
    InvalidEnvironment(String),
}
