//! One orchestration pass for one environment.
//!
//! `up` resolves, renders, builds, applies and reports; `preview` stops after
//! planning; `destroy` tears down what state records. Each run carries a
//! fresh [`RunId`] in its `envstack.run` span.

use std::path::PathBuf;
use std::time::Instant;

use envstack_state::{ConfigSource, StateStore};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::context::{DeployContext, NamingConfig, REGISTRY_TOKEN_CONFIG_KEY};
use crate::descriptor::{DescriptorBuilder, DescriptorSet, FeatureFlags};
use crate::error::Result;
use crate::obs;
use crate::outputs::StackOutputs;
use crate::reconcile::{ApplyReport, DestroyReport, Plan, Providers, Reconciler};
use crate::template::render_to_file;

pub const DEFAULT_TEMPLATE_PATH: &str = "k8s/deployment.yaml";
pub const DEFAULT_RENDER_DIR: &str = "infra/rendered";

/// Identifier of one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub naming: NamingConfig,
    pub features: FeatureFlags,
    pub template_path: PathBuf,
    pub render_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            naming: NamingConfig::default(),
            features: FeatureFlags::default(),
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            render_dir: PathBuf::from(DEFAULT_RENDER_DIR),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub run_id: RunId,
    pub outputs: StackOutputs,
    pub report: ApplyReport,
}

#[derive(Debug, Clone)]
pub struct PreviewOutcome {
    pub run_id: RunId,
    pub outputs: StackOutputs,
    pub plan: Plan,
}

#[derive(Debug, Clone)]
pub struct DestroyOutcome {
    pub run_id: RunId,
    pub report: DestroyReport,
}

/// Resolved pipeline for a single environment.
pub struct Pipeline<'a> {
    ctx: DeployContext,
    config: PipelineConfig,
    source: &'a dyn ConfigSource,
    reconciler: Reconciler<'a>,
}

impl<'a> Pipeline<'a> {
    /// Resolve the deployment context. Fails with `Configuration` before
    /// anything is rendered or built when the repository reference is missing.
    pub fn new(
        environment: &str,
        source: &'a dyn ConfigSource,
        providers: Providers<'a>,
        store: &'a dyn StateStore,
        config: PipelineConfig,
    ) -> Result<Self> {
        let ctx = DeployContext::resolve(environment, source, &config.naming)?;
        Ok(Pipeline {
            ctx,
            config,
            source,
            reconciler: Reconciler::new(providers, store),
        })
    }

    pub fn context(&self) -> &DeployContext {
        &self.ctx
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn outputs(&self) -> StackOutputs {
        StackOutputs::from_context(&self.ctx)
    }

    /// Render the manifest and build the descriptor set.
    pub fn prepare(&self) -> Result<DescriptorSet> {
        let manifest = render_to_file(
            &self.config.template_path,
            &self.config.render_dir,
            &self.ctx,
        )?;
        let token = if self.config.features.with_pull_credential {
            self.source.get_secret(REGISTRY_TOKEN_CONFIG_KEY)
        } else {
            None
        };
        DescriptorBuilder::new(&self.ctx)
            .features(self.config.features)
            .build(&manifest, token.as_ref())
    }

    pub async fn up(&self) -> Result<DeployOutcome> {
        let run_id = RunId::new();
        let span = obs::run_span(&run_id.to_string(), self.ctx.environment().as_str());
        self.run("up", async {
            let set = self.prepare()?;
            let report = self.reconciler.apply(&set).await?;
            Ok(DeployOutcome {
                run_id,
                outputs: self.outputs(),
                report,
            })
        })
        .instrument(span)
        .await
    }

    pub async fn preview(&self) -> Result<PreviewOutcome> {
        let run_id = RunId::new();
        let span = obs::run_span(&run_id.to_string(), self.ctx.environment().as_str());
        self.run("preview", async {
            let set = self.prepare()?;
            let plan = self.reconciler.preview(&set).await?;
            Ok(PreviewOutcome {
                run_id,
                outputs: self.outputs(),
                plan,
            })
        })
        .instrument(span)
        .await
    }

    pub async fn destroy(&self) -> Result<DestroyOutcome> {
        let run_id = RunId::new();
        let span = obs::run_span(&run_id.to_string(), self.ctx.environment().as_str());
        self.run("destroy", async {
            let report = self
                .reconciler
                .destroy(self.ctx.environment().as_str())
                .await?;
            Ok(DestroyOutcome { run_id, report })
        })
        .instrument(span)
        .await
    }

    async fn run<T>(
        &self,
        operation: &str,
        work: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let env = self.ctx.environment().as_str();
        obs::emit_deploy_started(operation, env, self.ctx.is_critical());
        let started = Instant::now();
        let result = work.await;
        match &result {
            Ok(_) => tracing::debug!(
                operation = %operation,
                duration_ms = started.elapsed().as_millis() as u64,
                "run complete"
            ),
            Err(e) => obs::emit_deploy_failed(env, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envstack_state::fakes::{MemoryCluster, MemoryConfigSource, MemoryStateStore};

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_missing_repository_fails_before_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryConfigSource::new();
        let cluster = MemoryCluster::new();
        let store = MemoryStateStore::new();
        let config = PipelineConfig {
            render_dir: dir.path().join("rendered"),
            ..PipelineConfig::default()
        };
        let result = Pipeline::new(
            "dev",
            &source,
            Providers::from_single(&cluster),
            &store,
            config,
        );
        assert!(matches!(
            result,
            Err(crate::error::DeployError::Configuration(_))
        ));
        assert!(!dir.path().join("rendered").exists());
        assert!(cluster.calls().is_empty());
    }
}
