//! Reconciliation: turning a descriptor set into applied resources.
//!
//! The [`Reconciler`] diffs a [`DescriptorSet`] against the environment's last
//! saved [`StackState`], then drives the provider capabilities wave by wave in
//! dependency order. Protection is enforced while planning, so a refused
//! replacement or deletion aborts before any provider is called.
//!
//! Replacements create the new object first. Superseded and stale objects are
//! retired only after every wave has been applied, walking the prior state in
//! reverse dependency order, so a dependency never goes before its dependents.
//!
//! Failures are not rolled back. State is saved after every wave, so the
//! next run sees exactly what was applied and completes the remainder.

use std::time::Instant;

use envstack_state::{
    ManifestApplier, NamespaceProvider, RemoteEnvironmentProvider, ResourceHandle, ResourceKey,
    ResourceKind, ResourceRecord, SecretProvider, StackState, StateStore,
};
use futures::future::join_all;
use serde::Serialize;

use crate::descriptor::{DescriptorSet, ResourceDescriptor, ResourceSpec};
use crate::error::{DeployError, ProtectedOperation, Result};
use crate::graph::ResourceGraph;
use crate::obs;

/// The provider capabilities a reconciler drives.
#[derive(Clone, Copy)]
pub struct Providers<'a> {
    pub namespaces: &'a dyn NamespaceProvider,
    pub secrets: &'a dyn SecretProvider,
    pub environments: &'a dyn RemoteEnvironmentProvider,
    pub manifests: &'a dyn ManifestApplier,
}

impl<'a> Providers<'a> {
    /// Use one backend for every capability.
    pub fn from_single<P>(provider: &'a P) -> Self
    where
        P: NamespaceProvider + SecretProvider + RemoteEnvironmentProvider + ManifestApplier,
    {
        Providers {
            namespaces: provider,
            secrets: provider,
            environments: provider,
            manifests: provider,
        }
    }
}

/// What happens to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    /// Identity changed: the new object is created, then the old one deleted
    Replace,
    Unchanged,
    Delete,
    /// No longer managed but still in use: dropped from state, left in place
    Release,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Replace => "replace",
            ChangeAction::Unchanged => "unchanged",
            ChangeAction::Delete => "delete",
            ChangeAction::Release => "release",
        }
    }
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    pub key: ResourceKey,
    pub kind: ResourceKind,
    pub action: ChangeAction,
    pub protect: bool,
}

/// Ordered changes for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub environment: String,
    /// Apply waves; changes within a wave have no edges between them
    pub waves: Vec<Vec<PlannedChange>>,
    /// Stale resources, in teardown order
    pub prunes: Vec<PlannedChange>,
}

impl Plan {
    /// All changes in execution order.
    pub fn changes(&self) -> impl Iterator<Item = &PlannedChange> {
        self.waves.iter().flatten().chain(self.prunes.iter())
    }

    pub fn count(&self, action: ChangeAction) -> usize {
        self.changes().filter(|c| c.action == action).count()
    }

    pub fn has_changes(&self) -> bool {
        self.changes().any(|c| c.action != ChangeAction::Unchanged)
    }
}

/// Outcome of a successful apply.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub environment: String,
    pub changes: Vec<PlannedChange>,
    pub state: StackState,
}

impl ApplyReport {
    pub fn action_of(&self, key: &ResourceKey) -> Option<ChangeAction> {
        self.changes.iter().find(|c| &c.key == key).map(|c| c.action)
    }

    pub fn changed_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.action != ChangeAction::Unchanged)
            .count()
    }

    pub fn unchanged_count(&self) -> usize {
        self.changes.len() - self.changed_count()
    }
}

/// Outcome of a successful teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyReport {
    pub environment: String,
    /// Deleted keys, in deletion order
    pub deleted: Vec<ResourceKey>,
}

/// Diff `set` against `prior` state.
///
/// A stale namespace that declared resources still live in is released
/// rather than deleted, since deleting it would take them along.
///
/// Fails with `ProtectedResource` when a protected prior resource would be
/// replaced (identity change) or deleted (no longer declared).
pub fn plan_changes(set: &DescriptorSet, prior: Option<&StackState>) -> Result<Plan> {
    let graph = set.graph()?;
    let mut waves = Vec::new();

    for level in graph.apply_levels()? {
        let mut wave = Vec::with_capacity(level.len());
        for key in level {
            let desc = lookup(set, &key)?;
            let action = match prior.and_then(|s| s.get(&key)) {
                None => ChangeAction::Create,
                Some(rec) if rec.identity != desc.spec.identity() => {
                    if rec.protect {
                        return Err(DeployError::ProtectedResource {
                            key,
                            operation: ProtectedOperation::Replace,
                        });
                    }
                    ChangeAction::Replace
                }
                Some(rec)
                    if rec.fingerprint != desc.spec.fingerprint()
                        || rec.protect != desc.protect
                        || rec.depends_on != desc.depends_on =>
                {
                    ChangeAction::Update
                }
                Some(_) => ChangeAction::Unchanged,
            };
            wave.push(PlannedChange {
                kind: desc.kind(),
                protect: desc.protect,
                key,
                action,
            });
        }
        waves.push(wave);
    }

    let mut prunes = Vec::new();
    if let Some(state) = prior {
        let stale = state.resources.values().filter(|r| set.get(&r.key).is_none());
        for key in ResourceGraph::from_records(stale)?.destroy_order()? {
            let Some(rec) = state.get(&key) else { continue };
            let in_use = rec.kind == ResourceKind::Namespace && set.uses_namespace(&rec.identity);
            let action = if in_use {
                ChangeAction::Release
            } else if rec.protect {
                return Err(DeployError::ProtectedResource {
                    key,
                    operation: ProtectedOperation::Delete,
                });
            } else {
                ChangeAction::Delete
            };
            prunes.push(PlannedChange {
                kind: rec.kind,
                protect: rec.protect,
                key,
                action,
            });
        }
    }

    Ok(Plan {
        environment: set.environment().to_string(),
        waves,
        prunes,
    })
}

fn lookup<'s>(set: &'s DescriptorSet, key: &ResourceKey) -> Result<&'s ResourceDescriptor> {
    set.get(key).ok_or_else(|| DeployError::UnknownResource {
        key: key.to_string(),
    })
}

/// Applies descriptor sets and tears environments down.
pub struct Reconciler<'a> {
    providers: Providers<'a>,
    store: &'a dyn StateStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(providers: Providers<'a>, store: &'a dyn StateStore) -> Self {
        Self { providers, store }
    }

    /// Plan without calling providers or writing state.
    pub async fn preview(&self, set: &DescriptorSet) -> Result<Plan> {
        let prior = self.store.load(set.environment()).await?;
        plan_changes(set, prior.as_ref())
    }

    /// Apply `set`, then retire what it replaced or no longer declares.
    pub async fn apply(&self, set: &DescriptorSet) -> Result<ApplyReport> {
        let started = Instant::now();
        let prior = self.store.load(set.environment()).await?;
        let plan = plan_changes(set, prior.as_ref())?;

        let mut state = prior
            .clone()
            .unwrap_or_else(|| StackState::new(set.environment()));
        let mut applied = Vec::new();

        for wave in &plan.waves {
            let results = join_all(wave.iter().map(|change| {
                let prior_record = prior.as_ref().and_then(|s| s.get(&change.key));
                self.apply_change(set, change, prior_record)
            }))
            .await;

            let mut first_err = None;
            for (change, result) in wave.iter().zip(results) {
                match result {
                    Ok(record) => {
                        obs::emit_resource_applied(
                            &change.key,
                            change.kind,
                            change.action.as_str(),
                            change.protect,
                        );
                        state.upsert(record);
                        applied.push(change.clone());
                    }
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
            self.store.save(&state).await?;
            if let Some(e) = first_err {
                return Err(e);
            }
        }

        if let Some(prior) = &prior {
            self.retire(&plan, prior, &mut state, &mut applied).await?;
        }

        let report = ApplyReport {
            environment: set.environment().to_string(),
            changes: applied,
            state,
        };
        obs::emit_deploy_finished(
            &report.environment,
            started.elapsed().as_millis() as u64,
            report.changed_count(),
            report.unchanged_count(),
        );
        Ok(report)
    }

    /// Delete every recorded resource of `environment` in reverse dependency
    /// order. Refuses up front, deleting nothing, if any record is protected.
    pub async fn destroy(&self, environment: &str) -> Result<DestroyReport> {
        let Some(mut state) = self.store.load(environment).await? else {
            return Ok(DestroyReport {
                environment: environment.to_string(),
                deleted: Vec::new(),
            });
        };

        if let Some(key) = state.protected_keys().into_iter().next() {
            return Err(DeployError::ProtectedResource {
                key,
                operation: ProtectedOperation::Delete,
            });
        }

        let order = ResourceGraph::from_records(state.resources.values())?.destroy_order()?;
        let mut deleted = Vec::with_capacity(order.len());
        for key in order {
            let Some(record) = state.get(&key).cloned() else {
                continue;
            };
            if let Err(e) = self.delete_handle(&record.key, &record.handle).await {
                self.store.save(&state).await?;
                return Err(e);
            }
            obs::emit_resource_deleted(&record.key, record.kind);
            state.remove(&key);
            deleted.push(key);
        }

        self.store.remove(environment).await?;
        Ok(DestroyReport {
            environment: environment.to_string(),
            deleted,
        })
    }

    /// Delete superseded handles of replaced resources and settle prunes,
    /// in reverse dependency order of the prior state.
    async fn retire(
        &self,
        plan: &Plan,
        prior: &StackState,
        state: &mut StackState,
        applied: &mut Vec<PlannedChange>,
    ) -> Result<()> {
        let replaced: Vec<&ResourceKey> = plan
            .waves
            .iter()
            .flatten()
            .filter(|c| c.action == ChangeAction::Replace)
            .map(|c| &c.key)
            .collect();

        for key in ResourceGraph::from_records(prior.resources.values())?.destroy_order()? {
            let Some(old) = prior.get(&key) else { continue };

            if let Some(prune) = plan.prunes.iter().find(|p| p.key == key) {
                if prune.action == ChangeAction::Delete {
                    self.delete_handle(&old.key, &old.handle).await?;
                    obs::emit_resource_deleted(&old.key, old.kind);
                } else {
                    obs::emit_resource_released(&old.key, old.kind);
                }
                state.remove(&key);
                self.store.save(state).await?;
                applied.push(prune.clone());
            } else if replaced.contains(&&key) {
                self.delete_handle(&old.key, &old.handle).await?;
                obs::emit_resource_deleted(&old.key, old.kind);
            }
        }
        Ok(())
    }

    async fn apply_change(
        &self,
        set: &DescriptorSet,
        change: &PlannedChange,
        prior: Option<&ResourceRecord>,
    ) -> Result<ResourceRecord> {
        let desc = lookup(set, &change.key)?;

        if let (ChangeAction::Unchanged, Some(record)) = (change.action, prior) {
            return Ok(record.clone());
        }

        let handle = self.ensure(desc).await?;

        Ok(ResourceRecord {
            key: desc.key.clone(),
            kind: desc.kind(),
            identity: desc.spec.identity(),
            fingerprint: desc.spec.fingerprint(),
            protect: desc.protect,
            depends_on: desc.depends_on.clone(),
            handle,
        })
    }

    async fn ensure(&self, desc: &ResourceDescriptor) -> Result<ResourceHandle> {
        let p = &self.providers;
        let handle = match &desc.spec {
            ResourceSpec::Namespace { name } => p
                .namespaces
                .ensure_namespace(name, desc.protect)
                .await
                .map(ResourceHandle::Namespace),
            ResourceSpec::PullCredential { request } => p
                .secrets
                .ensure_secret(request, desc.protect, &desc.depends_on)
                .await
                .map(ResourceHandle::Secret),
            ResourceSpec::RemoteEnvironmentRecord {
                environment,
                repository,
            } => p
                .environments
                .ensure_environment(environment, repository, desc.protect)
                .await
                .map(ResourceHandle::Environment),
            ResourceSpec::RenderedWorkload {
                manifest_path,
                namespace,
                ..
            } => p
                .manifests
                .apply_manifest(manifest_path, namespace, desc.protect, &desc.depends_on)
                .await
                .map(ResourceHandle::Workload),
        };
        handle.map_err(|e| DeployError::from_provider(&desc.key, e))
    }

    async fn delete_handle(&self, key: &ResourceKey, handle: &ResourceHandle) -> Result<()> {
        let p = &self.providers;
        let result = match handle {
            ResourceHandle::Namespace(h) => p.namespaces.delete_namespace(h).await,
            ResourceHandle::Secret(h) => p.secrets.delete_secret(h).await,
            ResourceHandle::Environment(h) => p.environments.delete_environment(h).await,
            ResourceHandle::Workload(h) => p.manifests.delete_manifest(h).await,
        };
        result.map_err(|e| DeployError::from_provider(key, e))
    }
}
