//! Structured observability hooks for deployment runs.
//!
//! - Run-scoped tracing spans: [`run_span`] for async runs, the `RunSpan`
//!   RAII guard for synchronous ones
//! - Emission functions for lifecycle events: start, per-resource outcome
//!   (applied, deleted, released), finish, failure
//!
//! Secret material never reaches these functions; they take keys, kinds and
//! names only.

use envstack_state::{ResourceKey, ResourceKind};
use tracing::{info, warn};

/// The `envstack.run` span; attach it to async work with
/// `tracing::Instrument::instrument`.
pub fn run_span(run_id: &str, environment: &str) -> tracing::Span {
    tracing::info_span!("envstack.run", run_id = %run_id, environment = %environment)
}

/// RAII guard that enters a run-scoped span for the duration of a deployment.
///
/// ```ignore
/// let _span = RunSpan::enter("3f0c…", "production");
/// // every event below carries run_id and environment
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str, environment: &str) -> Self {
        Self {
            _span: run_span(run_id, environment).entered(),
        }
    }
}

/// Emit event: deployment started.
pub fn emit_deploy_started(operation: &str, environment: &str, critical: bool) {
    info!(
        event = "deploy.started",
        version = crate::VERSION,
        operation = %operation,
        environment = %environment,
        critical = critical,
    );
}

/// Emit event: one resource applied (or left unchanged).
pub fn emit_resource_applied(key: &ResourceKey, kind: ResourceKind, action: &str, protect: bool) {
    info!(
        event = "resource.applied",
        key = %key,
        kind = %kind,
        action = %action,
        protect = protect,
    );
}

/// Emit event: one resource deleted.
pub fn emit_resource_deleted(key: &ResourceKey, kind: ResourceKind) {
    info!(event = "resource.deleted", key = %key, kind = %kind);
}

/// Emit event: one resource dropped from state and left in place.
pub fn emit_resource_released(key: &ResourceKey, kind: ResourceKind) {
    info!(event = "resource.released", key = %key, kind = %kind);
}

/// Emit event: deployment finished.
pub fn emit_deploy_finished(environment: &str, duration_ms: u64, changed: usize, unchanged: usize) {
    info!(
        event = "deploy.finished",
        environment = %environment,
        duration_ms = duration_ms,
        changed = changed,
        unchanged = unchanged,
    );
}

/// Emit event: deployment aborted (warning level).
pub fn emit_deploy_failed(environment: &str, error: &dyn std::fmt::Display) {
    warn!(event = "deploy.failed", environment = %environment, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("run-1", "dev");
        emit_resource_applied(
            &ResourceKey::new("ns-dev"),
            ResourceKind::Namespace,
            "create",
            false,
        );
    }
}
