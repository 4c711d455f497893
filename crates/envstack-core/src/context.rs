//! Naming and environment resolution.
//!
//! Everything downstream (descriptors, rendered manifests, outputs) is derived
//! from one immutable [`DeployContext`]. Resolution is a pure function of the
//! environment name, the configuration source and the [`NamingConfig`]: the
//! same inputs always yield byte-identical names.

use std::str::FromStr;

use envstack_state::ConfigSource;
use serde::{Deserialize, Serialize};

use crate::error::{DeployError, Result};

/// Environments whose resources must survive a teardown.
pub const PROTECTED_ENVIRONMENTS: [&str; 2] = ["staging-main", "production"];

/// Environment variable CI sets to `owner/repo`.
pub const REPOSITORY_ENV_VAR: &str = "GITHUB_REPOSITORY";
/// Stack configuration fallback for [`REPOSITORY_ENV_VAR`].
pub const REPOSITORY_CONFIG_KEY: &str = "githubRepository";
/// Optional registry username override; defaults to the repository owner.
pub const REGISTRY_USERNAME_CONFIG_KEY: &str = "ghcrUsername";
/// Secret stack configuration holding the registry token.
pub const REGISTRY_TOKEN_CONFIG_KEY: &str = "ghcrToken";

/// Environment (stack) name.
///
/// The name becomes a file name component (rendered manifest, state file),
/// so it must be non-empty, free of path separators and must not start
/// with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentName(String);

impl EnvironmentName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DeployError::Configuration(
                "environment name must not be empty".to_string(),
            ));
        }
        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(DeployError::Configuration(format!(
                "environment name {:?} must not contain path separators or start with '.'",
                name
            )));
        }
        Ok(EnvironmentName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact, case-sensitive membership in [`PROTECTED_ENVIRONMENTS`].
    pub fn is_critical(&self) -> bool {
        PROTECTED_ENVIRONMENTS.contains(&self.0.as_str())
    }
}

impl std::fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `owner/repo`, split on the first `/` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub owner: String,
    pub repo: String,
}

impl RepositoryRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepositoryRef {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        let (owner, repo) = s.split_once('/').ok_or_else(|| {
            DeployError::Configuration(format!(
                "repository reference {:?} is not of the form owner/repo",
                s
            ))
        })?;
        if owner.is_empty() || repo.is_empty() {
            return Err(DeployError::Configuration(format!(
                "repository reference {:?} has an empty owner or repo",
                s
            )));
        }
        Ok(RepositoryRef {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

/// Registry host and namespace prefix used for derived names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConfig {
    pub registry_host: String,
    pub namespace_prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        NamingConfig {
            registry_host: "ghcr.io".to_string(),
            namespace_prefix: "hello-world".to_string(),
        }
    }
}

impl NamingConfig {
    /// `<registry-host>/<owner>/<repo>:<environment>`
    pub fn image_reference(
        &self,
        repository: &RepositoryRef,
        environment: &EnvironmentName,
    ) -> String {
        format!(
            "{}/{}/{}:{}",
            self.registry_host, repository.owner, repository.repo, environment
        )
    }

    /// `<prefix>-<environment>`
    pub fn namespace_name(&self, environment: &EnvironmentName) -> String {
        format!("{}-{}", self.namespace_prefix, environment)
    }
}

/// Resolved identity of one deployment. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployContext {
    environment: EnvironmentName,
    repository: RepositoryRef,
    image: String,
    namespace: String,
    registry_host: String,
    registry_username: String,
    critical: bool,
}

impl DeployContext {
    /// Resolve from a configuration source.
    ///
    /// The repository reference is read from `GITHUB_REPOSITORY`, falling back
    /// to the required `githubRepository` key; `ghcrUsername` optionally
    /// overrides the registry username.
    pub fn resolve(
        environment: &str,
        config: &dyn ConfigSource,
        naming: &NamingConfig,
    ) -> Result<Self> {
        let environment = EnvironmentName::new(environment)?;
        let repository = match config.env_var(REPOSITORY_ENV_VAR) {
            Some(value) if !value.is_empty() => value,
            _ => config.require(REPOSITORY_CONFIG_KEY).map_err(|_| {
                DeployError::Configuration(format!(
                    "repository reference not found: set {} or the {} config key",
                    REPOSITORY_ENV_VAR, REPOSITORY_CONFIG_KEY
                ))
            })?,
        };
        let repository: RepositoryRef = repository.parse()?;
        let username = config.get(REGISTRY_USERNAME_CONFIG_KEY);
        Ok(Self::from_parts(environment, repository, username, naming))
    }

    /// Build from already-parsed parts.
    pub fn from_parts(
        environment: EnvironmentName,
        repository: RepositoryRef,
        registry_username: Option<String>,
        naming: &NamingConfig,
    ) -> Self {
        let image = naming.image_reference(&repository, &environment);
        let namespace = naming.namespace_name(&environment);
        let registry_username = registry_username
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| repository.owner.clone());
        let critical = environment.is_critical();
        DeployContext {
            environment,
            repository,
            image,
            namespace,
            registry_host: naming.registry_host.clone(),
            registry_username,
            critical,
        }
    }

    pub fn environment(&self) -> &EnvironmentName {
        &self.environment
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn registry_host(&self) -> &str {
        &self.registry_host
    }

    pub fn registry_username(&self) -> &str {
        &self.registry_username
    }

    /// Whether every resource of this environment is protected.
    pub fn is_critical(&self) -> bool {
        self.critical
    }
}
