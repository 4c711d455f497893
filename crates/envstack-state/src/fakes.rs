//! In-memory fakes for capability traits (testing only)
//!
//! Provides `MemoryConfigSource`, `MemoryCluster` and `MemoryStateStore`
//! that satisfy the trait contracts without any external system.
//! `MemoryCluster` records every call in order so tests can assert on
//! dependency ordering and protection flags.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::provider_traits::*;
use crate::secret::SecretValue;
use crate::stack_state::{StackState, StateResult, StateStore};

// ---------------------------------------------------------------------------
// MemoryConfigSource
// ---------------------------------------------------------------------------

/// Config source backed by three maps: env vars, plain config, secrets.
#[derive(Debug, Default, Clone)]
pub struct MemoryConfigSource {
    env: HashMap<String, String>,
    config: HashMap<String, String>,
    secrets: HashMap<String, SecretValue>,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.config.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_secret(mut self, key: &str, value: &str) -> Self {
        self.secrets.insert(key.to_string(), SecretValue::new(value));
        self
    }
}

impl ConfigSource for MemoryConfigSource {
    fn env_var(&self, name: &str) -> Option<String> {
        self.env.get(name).cloned()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).cloned()
    }

    fn get_secret(&self, key: &str) -> Option<SecretValue> {
        self.secrets.get(key).cloned()
    }
}

// ---------------------------------------------------------------------------
// MemoryCluster
// ---------------------------------------------------------------------------

/// A single provider call observed by [`MemoryCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    EnsureNamespace {
        name: String,
        protect: bool,
    },
    DeleteNamespace {
        name: String,
    },
    EnsureSecret {
        namespace: String,
        name: String,
        protect: bool,
        depends_on: Vec<ResourceKey>,
    },
    DeleteSecret {
        namespace: String,
        name: String,
    },
    EnsureEnvironment {
        name: String,
        repository: String,
        protect: bool,
    },
    DeleteEnvironment {
        name: String,
        repository: String,
    },
    ApplyManifest {
        path: String,
        namespace: String,
        protect: bool,
        depends_on: Vec<ResourceKey>,
    },
    DeleteManifest {
        namespace: String,
    },
}

impl ProviderCall {
    /// Short label used in ordering assertions, e.g. `"ensure_secret"`.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderCall::EnsureNamespace { .. } => "ensure_namespace",
            ProviderCall::DeleteNamespace { .. } => "delete_namespace",
            ProviderCall::EnsureSecret { .. } => "ensure_secret",
            ProviderCall::DeleteSecret { .. } => "delete_secret",
            ProviderCall::EnsureEnvironment { .. } => "ensure_environment",
            ProviderCall::DeleteEnvironment { .. } => "delete_environment",
            ProviderCall::ApplyManifest { .. } => "apply_manifest",
            ProviderCall::DeleteManifest { .. } => "delete_manifest",
        }
    }

    pub fn protect(&self) -> Option<bool> {
        match self {
            ProviderCall::EnsureNamespace { protect, .. }
            | ProviderCall::EnsureSecret { protect, .. }
            | ProviderCall::EnsureEnvironment { protect, .. }
            | ProviderCall::ApplyManifest { protect, .. } => Some(*protect),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    /// `(namespace, name)` → secret type
    secrets: BTreeMap<(String, String), String>,
    /// `(repository, environment)`
    environments: BTreeSet<(String, String)>,
    /// namespace → manifest path the workload was last applied from
    workloads: BTreeMap<String, String>,
    calls: Vec<ProviderCall>,
}

/// In-memory cluster + remote environment service.
///
/// Enforces the same referential rules a real cluster does: secrets and
/// workloads can only be created in an existing namespace, and deleting a
/// namespace deletes everything inside it.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
    reject_environment_auth: bool,
    fail_manifest: bool,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a namespace already exists outside envstack's control.
    pub fn with_existing_namespace(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string());
        self
    }

    /// Make every remote environment call fail with `ProviderError::Auth`.
    pub fn rejecting_environment_auth(mut self) -> Self {
        self.reject_environment_auth = true;
        self
    }

    /// Make every manifest apply fail with a command error.
    pub fn failing_manifest_apply(mut self) -> Self {
        self.fail_manifest = true;
        self
    }

    /// All calls observed so far, in order.
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Call labels in order.
    pub fn call_labels(&self) -> Vec<&'static str> {
        self.calls().iter().map(ProviderCall::label).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().unwrap().namespaces.contains(name)
    }

    pub fn has_secret(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .secrets
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub fn has_environment(&self, repository: &str, environment: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .environments
            .contains(&(repository.to_string(), environment.to_string()))
    }

    pub fn has_manifest(&self, path: &Path) -> bool {
        let path = path.display().to_string();
        self.state
            .lock()
            .unwrap()
            .workloads
            .values()
            .any(|p| *p == path)
    }

    pub fn has_workload(&self, namespace: &str) -> bool {
        self.state.lock().unwrap().workloads.contains_key(namespace)
    }
}

#[async_trait]
impl NamespaceProvider for MemoryCluster {
    async fn ensure_namespace(&self, name: &str, protect: bool) -> ProviderResult<NamespaceHandle> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ProviderCall::EnsureNamespace {
            name: name.to_string(),
            protect,
        });
        state.namespaces.insert(name.to_string());
        Ok(NamespaceHandle {
            name: name.to_string(),
        })
    }

    async fn delete_namespace(&self, handle: &NamespaceHandle) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ProviderCall::DeleteNamespace {
            name: handle.name.clone(),
        });
        state.namespaces.remove(&handle.name);
        state.secrets.retain(|(ns, _), _| ns != &handle.name);
        state.workloads.remove(&handle.name);
        Ok(())
    }
}

#[async_trait]
impl SecretProvider for MemoryCluster {
    async fn ensure_secret(
        &self,
        request: &SecretRequest,
        protect: bool,
        depends_on: &[ResourceKey],
    ) -> ProviderResult<SecretHandle> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ProviderCall::EnsureSecret {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            protect,
            depends_on: depends_on.to_vec(),
        });
        if !state.namespaces.contains(&request.namespace) {
            return Err(ProviderError::NotFound {
                resource: format!("namespace/{}", request.namespace),
            });
        }
        state.secrets.insert(
            (request.namespace.clone(), request.name.clone()),
            request.secret_type.clone(),
        );
        Ok(SecretHandle {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
        })
    }

    async fn delete_secret(&self, handle: &SecretHandle) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ProviderCall::DeleteSecret {
            namespace: handle.namespace.clone(),
            name: handle.name.clone(),
        });
        state
            .secrets
            .remove(&(handle.namespace.clone(), handle.name.clone()));
        Ok(())
    }
}

#[async_trait]
impl RemoteEnvironmentProvider for MemoryCluster {
    async fn ensure_environment(
        &self,
        name: &str,
        repository: &str,
        protect: bool,
    ) -> ProviderResult<EnvironmentHandle> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ProviderCall::EnsureEnvironment {
            name: name.to_string(),
            repository: repository.to_string(),
            protect,
        });
        if self.reject_environment_auth {
            return Err(ProviderError::Auth(
                "remote environment provider rejected credentials".to_string(),
            ));
        }
        state
            .environments
            .insert((repository.to_string(), name.to_string()));
        Ok(EnvironmentHandle {
            repository: repository.to_string(),
            environment: name.to_string(),
        })
    }

    async fn delete_environment(&self, handle: &EnvironmentHandle) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ProviderCall::DeleteEnvironment {
            name: handle.environment.clone(),
            repository: handle.repository.clone(),
        });
        if self.reject_environment_auth {
            return Err(ProviderError::Auth(
                "remote environment provider rejected credentials".to_string(),
            ));
        }
        state
            .environments
            .remove(&(handle.repository.clone(), handle.environment.clone()));
        Ok(())
    }
}

#[async_trait]
impl ManifestApplier for MemoryCluster {
    async fn apply_manifest(
        &self,
        path: &Path,
        namespace: &str,
        protect: bool,
        depends_on: &[ResourceKey],
    ) -> ProviderResult<WorkloadHandle> {
        let mut state = self.state.lock().unwrap();
        let display = path.display().to_string();
        state.calls.push(ProviderCall::ApplyManifest {
            path: display.clone(),
            namespace: namespace.to_string(),
            protect,
            depends_on: depends_on.to_vec(),
        });
        if self.fail_manifest {
            return Err(ProviderError::Command {
                command: format!("apply {}", display),
                status: 1,
                stderr: "simulated apply failure".to_string(),
            });
        }
        if !state.namespaces.contains(namespace) {
            return Err(ProviderError::NotFound {
                resource: format!("namespace/{}", namespace),
            });
        }
        state.workloads.insert(namespace.to_string(), display);
        Ok(WorkloadHandle {
            manifest_path: path.to_path_buf(),
            namespace: namespace.to_string(),
            objects: vec!["deployment.apps/hello-world".to_string()],
        })
    }

    async fn delete_manifest(&self, handle: &WorkloadHandle) -> ProviderResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(ProviderCall::DeleteManifest {
            namespace: handle.namespace.clone(),
        });
        state.workloads.remove(&handle.namespace);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// In-memory state store backed by a `HashMap<environment, StackState>`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, StackState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek for assertions.
    pub fn snapshot(&self, environment: &str) -> Option<StackState> {
        self.states.lock().unwrap().get(environment).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, environment: &str) -> StateResult<Option<StackState>> {
        Ok(self.snapshot(environment))
    }

    async fn save(&self, state: &StackState) -> StateResult<()> {
        self.states
            .lock()
            .unwrap()
            .insert(state.environment.clone(), state.clone());
        Ok(())
    }

    async fn remove(&self, environment: &str) -> StateResult<()> {
        self.states.lock().unwrap().remove(environment);
        Ok(())
    }
}
