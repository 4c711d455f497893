//! envstack core library
//!
//! Resolves an environment's identity, renders its workload manifest, builds
//! the resource descriptor set and reconciles it against the providers.

pub mod context;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod obs;
pub mod outputs;
pub mod pipeline;
pub mod reconcile;
pub mod telemetry;
pub mod template;

pub use context::{DeployContext, EnvironmentName, NamingConfig, RepositoryRef};
pub use descriptor::{
    DescriptorBuilder, DescriptorSet, FeatureFlags, ResourceDescriptor, ResourceSpec,
};
pub use error::{DeployError, ProtectedOperation, Result};
pub use graph::ResourceGraph;
pub use outputs::StackOutputs;
pub use pipeline::{
    DeployOutcome, DestroyOutcome, Pipeline, PipelineConfig, PreviewOutcome, RunId,
};
pub use reconcile::{
    plan_changes, ApplyReport, ChangeAction, DestroyReport, Plan, PlannedChange, Providers,
    Reconciler,
};
pub use telemetry::init_tracing;
pub use template::{render, RenderedManifest, Substitutions};

/// envstack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
