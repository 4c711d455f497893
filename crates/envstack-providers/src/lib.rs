//! envstack-providers: concrete adapters for envstack capabilities
//!
//! ## Layer 2 - Adapters
//!
//! Focus: talking to real systems behind the `envstack-state` traits.
//!
//! - [`EnvConfigSource`]: process environment + `envstack.<environment>.toml`
//! - [`KubectlCluster`]: namespaces, secrets and manifests via `kubectl`
//! - [`GithubEnvironments`]: deployment environments via the GitHub REST API

pub mod config;
pub mod github;
pub mod kubectl;

pub use config::{config_file_path, screaming_key, EnvConfigSource};
pub use github::{GithubConfig, GithubEnvironments};
pub use kubectl::{KubectlCluster, KubectlConfig, PROTECTED_ANNOTATION};
