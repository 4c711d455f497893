//! Capability trait definitions for envstack
//!
//! These traits are the only surface the deployment core uses to reach the
//! outside world:
//! - `ConfigSource`: environment variables, stack configuration, secrets
//! - `NamespaceProvider`: cluster namespaces
//! - `SecretProvider`: cluster secrets (image-pull credentials)
//! - `RemoteEnvironmentProvider`: remote environment records (e.g. GitHub Environments)
//! - `ManifestApplier`: rendered workload manifests
//!
//! All provider traits are async and backend-agnostic. In-memory fakes are
//! provided for testing via the `fakes` module.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::secret::SecretValue;

/// Result type for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Resource identity
// ---------------------------------------------------------------------------

/// Stable identity key of a declared resource (e.g. `"ns-production"`).
///
/// Keys are what idempotent re-apply diffs on: the same key across two runs
/// refers to the same managed resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey(pub String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        ResourceKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of resource kinds envstack manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Namespace,
    PullCredential,
    RemoteEnvironmentRecord,
    RenderedWorkload,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::PullCredential => "pull_credential",
            ResourceKind::RemoteEnvironmentRecord => "remote_environment_record",
            ResourceKind::RenderedWorkload => "rendered_workload",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Handles returned by providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceHandle {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretHandle {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Repository the environment belongs to (the `repo` half of `owner/repo`)
    pub repository: String,
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadHandle {
    /// Manifest the objects were last applied from; informational only
    pub manifest_path: PathBuf,
    /// Namespace the objects live in
    #[serde(default)]
    pub namespace: String,
    /// Objects the provider reported as applied (e.g. `deployment.apps/hello-world`)
    pub objects: Vec<String>,
}

/// Any provider handle, as persisted in stack state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceHandle {
    Namespace(NamespaceHandle),
    Secret(SecretHandle),
    Environment(EnvironmentHandle),
    Workload(WorkloadHandle),
}

/// A secret to be materialized in a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRequest {
    pub name: String,
    pub namespace: String,
    /// Secret type, e.g. `kubernetes.io/dockerconfigjson`
    pub secret_type: String,
    /// String data entries; values stay opaque
    pub data: BTreeMap<String, SecretValue>,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Configuration source for a single environment.
///
/// `env_var` reads the process environment (or a stand-in), `get`/`require`
/// read stack configuration, `require_secret` reads encrypted/secret stack
/// configuration and never returns clear text outside a [`SecretValue`].
pub trait ConfigSource: Send + Sync {
    fn env_var(&self, name: &str) -> Option<String>;

    fn get(&self, key: &str) -> Option<String>;

    fn require(&self, key: &str) -> ProviderResult<String> {
        self.get(key).ok_or_else(|| ProviderError::MissingConfig {
            key: key.to_string(),
        })
    }

    fn get_secret(&self, key: &str) -> Option<SecretValue>;

    fn require_secret(&self, key: &str) -> ProviderResult<SecretValue> {
        self.get_secret(key)
            .ok_or_else(|| ProviderError::MissingConfig {
                key: key.to_string(),
            })
    }
}

#[async_trait]
pub trait NamespaceProvider: Send + Sync {
    /// Create the namespace if absent. Idempotent.
    async fn ensure_namespace(&self, name: &str, protect: bool) -> ProviderResult<NamespaceHandle>;

    /// Delete the namespace. No-op if absent.
    async fn delete_namespace(&self, handle: &NamespaceHandle) -> ProviderResult<()>;
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Create or update the secret. Fails with `NotFound` when the target
    /// namespace does not exist.
    async fn ensure_secret(
        &self,
        request: &SecretRequest,
        protect: bool,
        depends_on: &[ResourceKey],
    ) -> ProviderResult<SecretHandle>;

    async fn delete_secret(&self, handle: &SecretHandle) -> ProviderResult<()>;
}

#[async_trait]
pub trait RemoteEnvironmentProvider: Send + Sync {
    /// Create or update the remote environment record. Fails with `Auth` when
    /// the provider rejects the credentials.
    async fn ensure_environment(
        &self,
        name: &str,
        repository: &str,
        protect: bool,
    ) -> ProviderResult<EnvironmentHandle>;

    async fn delete_environment(&self, handle: &EnvironmentHandle) -> ProviderResult<()>;
}

#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Apply every object in the manifest file into `namespace`.
    async fn apply_manifest(
        &self,
        path: &std::path::Path,
        namespace: &str,
        protect: bool,
        depends_on: &[ResourceKey],
    ) -> ProviderResult<WorkloadHandle>;

    /// Delete the objects recorded in `handle`. Does not read the manifest
    /// file, which may no longer exist.
    async fn delete_manifest(&self, handle: &WorkloadHandle) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MapConfig(BTreeMap<String, String>);

    impl ConfigSource for MapConfig {
        fn env_var(&self, _name: &str) -> Option<String> {
            None
        }
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }
        fn get_secret(&self, _key: &str) -> Option<SecretValue> {
            None
        }
    }

    #[test]
    fn test_require_reports_missing_key() {
        let cfg = MapConfig(BTreeMap::new());
        let err = cfg.require("githubRepository").unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfig { key } if key == "githubRepository"));
    }

    #[test]
    fn test_require_secret_reports_missing_key() {
        let cfg = MapConfig(BTreeMap::new());
        assert!(cfg.require_secret("ghcrToken").is_err());
    }

    #[test]
    fn test_resource_handle_serializes_with_type_tag() {
        let handle = ResourceHandle::Namespace(NamespaceHandle {
            name: "hello-world-dev".to_string(),
        });
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["type"], "namespace");
        assert_eq!(json["name"], "hello-world-dev");
    }

    #[test]
    fn test_resource_kind_display() {
        assert_eq!(ResourceKind::PullCredential.to_string(), "pull_credential");
    }
}
