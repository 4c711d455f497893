//! Resource descriptors and the builder that emits them.
//!
//! A [`DescriptorSet`] is the declarative statement of everything an
//! environment needs. The builder emits descriptors in dependency order:
//!
//! ```text
//! Namespace ──▶ PullCredential ──┐
//!                                ├──▶ RenderedWorkload
//! RemoteEnvironmentRecord ───────┘
//! ```
//!
//! Every descriptor carries the environment's criticality as its protection
//! flag, so a set is either fully protected or not protected at all.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use envstack_state::{ResourceKey, ResourceKind, SecretRequest, SecretValue};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::context::DeployContext;
use crate::error::{DeployError, Result};
use crate::graph::ResourceGraph;
use crate::template::RenderedManifest;

pub const PULL_SECRET_NAME: &str = "ghcr-pull-secret";
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Which optional resources a pipeline manages.
///
/// With `with_namespace = false` the namespace is assumed to exist already;
/// with `with_pull_credential = false` the image is assumed to be pullable
/// without a credential (e.g. a public package).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub with_namespace: bool,
    pub with_pull_credential: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self::full()
    }
}

impl FeatureFlags {
    /// Namespace, pull credential, remote environment and workload.
    pub fn full() -> Self {
        FeatureFlags {
            with_namespace: true,
            with_pull_credential: true,
        }
    }

    /// Remote environment and workload only.
    pub fn workload_only() -> Self {
        FeatureFlags {
            with_namespace: false,
            with_pull_credential: false,
        }
    }
}

/// Kind-specific payload of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Namespace {
        name: String,
    },
    PullCredential {
        request: SecretRequest,
    },
    RemoteEnvironmentRecord {
        environment: String,
        repository: String,
    },
    RenderedWorkload {
        manifest_path: PathBuf,
        namespace: String,
        manifest_digest: String,
    },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Namespace { .. } => ResourceKind::Namespace,
            ResourceSpec::PullCredential { .. } => ResourceKind::PullCredential,
            ResourceSpec::RemoteEnvironmentRecord { .. } => ResourceKind::RemoteEnvironmentRecord,
            ResourceSpec::RenderedWorkload { .. } => ResourceKind::RenderedWorkload,
        }
    }

    /// Provider-side identity. Two specs with different identities name
    /// different provider objects, so moving between them is a replacement.
    ///
    /// A workload is identified by its namespace: the rendered file is only
    /// where the objects come from, so moving it is not a replacement.
    pub fn identity(&self) -> String {
        match self {
            ResourceSpec::Namespace { name } => name.clone(),
            ResourceSpec::PullCredential { request } => {
                format!("{}/{}", request.namespace, request.name)
            }
            ResourceSpec::RemoteEnvironmentRecord {
                environment,
                repository,
            } => format!("{}:{}", repository, environment),
            ResourceSpec::RenderedWorkload { namespace, .. } => format!("{}/workload", namespace),
        }
    }

    /// Namespace the resource lives in, for namespaced kinds.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            ResourceSpec::PullCredential { request } => Some(&request.namespace),
            ResourceSpec::RenderedWorkload { namespace, .. } => Some(namespace),
            ResourceSpec::Namespace { .. } | ResourceSpec::RemoteEnvironmentRecord { .. } => None,
        }
    }

    /// SHA-256 hex over a canonical JSON rendering of the spec.
    ///
    /// Secret values enter as their own digests, so the fingerprint changes
    /// when a token rotates without the token ever being serialized.
    pub fn fingerprint(&self) -> String {
        let canonical = match self {
            ResourceSpec::Namespace { name } => json!({ "namespace": name }),
            ResourceSpec::PullCredential { request } => {
                let data: BTreeMap<&str, String> = request
                    .data
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.digest()))
                    .collect();
                json!({
                    "secret": {
                        "name": request.name,
                        "namespace": request.namespace,
                        "type": request.secret_type,
                        "data": data,
                    }
                })
            }
            ResourceSpec::RemoteEnvironmentRecord {
                environment,
                repository,
            } => json!({ "environment": environment, "repository": repository }),
            ResourceSpec::RenderedWorkload {
                namespace,
                manifest_digest,
                ..
            } => json!({
                "workload": namespace,
                "digest": manifest_digest,
            }),
        };
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A declared resource: identity key, payload, protection, dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub key: ResourceKey,
    pub spec: ResourceSpec,
    pub protect: bool,
    pub depends_on: Vec<ResourceKey>,
}

impl ResourceDescriptor {
    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }
}

/// Ordered, dependency-closed set of descriptors for one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSet {
    environment: String,
    descriptors: Vec<ResourceDescriptor>,
}

impl DescriptorSet {
    /// Validate and wrap descriptors.
    ///
    /// Rejects duplicate keys, dependencies that do not appear earlier in the
    /// list, and cycles.
    pub fn new(
        environment: impl Into<String>,
        descriptors: Vec<ResourceDescriptor>,
    ) -> Result<Self> {
        let mut seen: HashSet<&ResourceKey> = HashSet::new();
        for d in &descriptors {
            for dep in &d.depends_on {
                if !seen.contains(dep) {
                    return Err(DeployError::UnknownResource {
                        key: format!("{} (dependency of {})", dep, d.key),
                    });
                }
            }
            if !seen.insert(&d.key) {
                return Err(DeployError::Configuration(format!(
                    "duplicate resource key {}",
                    d.key
                )));
            }
        }
        let set = DescriptorSet {
            environment: environment.into(),
            descriptors,
        };
        set.graph()?;
        Ok(set)
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&ResourceDescriptor> {
        self.descriptors.iter().find(|d| &d.key == key)
    }

    pub fn by_kind(&self, kind: ResourceKind) -> Option<&ResourceDescriptor> {
        self.descriptors.iter().find(|d| d.kind() == kind)
    }

    /// Whether any declared resource lives in namespace `name`.
    pub fn uses_namespace(&self, name: &str) -> bool {
        self.descriptors
            .iter()
            .any(|d| d.spec.namespace() == Some(name))
    }

    /// Dependency graph over the set's keys.
    pub fn graph(&self) -> Result<ResourceGraph> {
        let mut graph = ResourceGraph::new();
        for d in &self.descriptors {
            graph.add_node(d.key.clone());
        }
        for d in &self.descriptors {
            for dep in &d.depends_on {
                graph.add_dependency(dep, &d.key)?;
            }
        }
        Ok(graph)
    }
}

/// Registry auth document for `kubernetes.io/dockerconfigjson` secrets.
pub fn docker_config_json(
    registry_host: &str,
    username: &str,
    token: &SecretValue,
) -> SecretValue {
    let auth = STANDARD.encode(format!("{}:{}", username, token.expose()));
    let mut auths = serde_json::Map::new();
    auths.insert(
        registry_host.to_string(),
        json!({
            "username": username,
            "password": token.expose(),
            "auth": auth,
        }),
    );
    SecretValue::new(json!({ "auths": auths }).to_string())
}

/// Key helpers; stable across runs for the same environment.
pub fn namespace_key(environment: &str) -> ResourceKey {
    ResourceKey::new(format!("ns-{}", environment))
}

pub fn pull_credential_key(environment: &str) -> ResourceKey {
    ResourceKey::new(format!("{}-{}", PULL_SECRET_NAME, environment))
}

pub fn remote_environment_key(environment: &str) -> ResourceKey {
    ResourceKey::new(format!("gh-env-{}", environment))
}

pub fn workload_key(environment: &str) -> ResourceKey {
    ResourceKey::new(format!("workload-{}", environment))
}

/// Emits the descriptor set for a resolved context.
pub struct DescriptorBuilder<'a> {
    ctx: &'a DeployContext,
    features: FeatureFlags,
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new(ctx: &'a DeployContext) -> Self {
        Self {
            ctx,
            features: FeatureFlags::default(),
        }
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Build the set. `token` is only required when the pull credential is
    /// enabled; a missing or empty token then fails with
    /// `SecretMaterialMissing`.
    pub fn build(
        &self,
        manifest: &RenderedManifest,
        token: Option<&SecretValue>,
    ) -> Result<DescriptorSet> {
        let env = self.ctx.environment().as_str();
        let protect = self.ctx.is_critical();
        let mut descriptors = Vec::with_capacity(4);

        let namespace = if self.features.with_namespace {
            let key = namespace_key(env);
            descriptors.push(ResourceDescriptor {
                key: key.clone(),
                spec: ResourceSpec::Namespace {
                    name: self.ctx.namespace().to_string(),
                },
                protect,
                depends_on: Vec::new(),
            });
            Some(key)
        } else {
            None
        };

        let credential = if self.features.with_pull_credential {
            let token = token.filter(|t| !t.is_empty()).ok_or_else(|| {
                DeployError::SecretMaterialMissing(format!(
                    "registry token for {} is required for the pull credential",
                    self.ctx.registry_host()
                ))
            })?;
            let mut data = BTreeMap::new();
            data.insert(
                DOCKER_CONFIG_JSON_KEY.to_string(),
                docker_config_json(
                    self.ctx.registry_host(),
                    self.ctx.registry_username(),
                    token,
                ),
            );
            let key = pull_credential_key(env);
            descriptors.push(ResourceDescriptor {
                key: key.clone(),
                spec: ResourceSpec::PullCredential {
                    request: SecretRequest {
                        name: PULL_SECRET_NAME.to_string(),
                        namespace: self.ctx.namespace().to_string(),
                        secret_type: DOCKER_CONFIG_JSON_TYPE.to_string(),
                        data,
                    },
                },
                protect,
                depends_on: namespace.into_iter().collect(),
            });
            Some(key)
        } else {
            None
        };

        let remote = remote_environment_key(env);
        descriptors.push(ResourceDescriptor {
            key: remote.clone(),
            spec: ResourceSpec::RemoteEnvironmentRecord {
                environment: env.to_string(),
                repository: self.ctx.repository().repo.clone(),
            },
            protect,
            depends_on: Vec::new(),
        });

        let mut workload_deps: Vec<ResourceKey> = credential.into_iter().collect();
        workload_deps.push(remote);
        descriptors.push(ResourceDescriptor {
            key: workload_key(env),
            spec: ResourceSpec::RenderedWorkload {
                manifest_path: manifest.path.clone(),
                namespace: self.ctx.namespace().to_string(),
                manifest_digest: manifest.digest(),
            },
            protect,
            depends_on: workload_deps,
        });

        DescriptorSet::new(env, descriptors)
    }
}
