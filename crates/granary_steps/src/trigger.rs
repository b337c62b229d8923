//! Trigger runner: remote freshness probe, no output.

use crate::remote::Remote;
use crate::runner::{ExecutionContext, RunnerError, RunnerOutput, StepRunner};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Probes the declared upstream and nothing else. A trigger step exists
/// solely to fold the upstream's state into its fingerprint so dependents
/// rebuild when the resource changes; the build record committed after
/// this runner is the step's only trace in the catalog.
pub struct TriggerRunner {
    remote: Arc<dyn Remote>,
}

impl TriggerRunner {
    /// Runner probing through the given remote.
    #[must_use]
    pub fn new(remote: Arc<dyn Remote>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl StepRunner for TriggerRunner {
    async fn execute(&self, ctx: ExecutionContext) -> Result<RunnerOutput, RunnerError> {
        let source = ctx.declaration.source.clone().unwrap_or_default();
        let token = self.remote.probe(&source).await?;
        debug!(step = %ctx.address(), token = %token, "upstream probed");
        Ok(RunnerOutput::with_note(format!("probed `{source}`")))
    }
}
