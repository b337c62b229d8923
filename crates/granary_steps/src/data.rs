//! Data runner: execute a step's transformation and publish its dataset.

use crate::runner::{ExecutionContext, RunnerError, RunnerOutput, StepRunner};
use crate::transform::{TransformContext, TransformError, TransformRegistry};
use async_trait::async_trait;
use granary_catalog::EntryRef;
use tracing::info;

/// Default transform when a data step declares none.
const DEFAULT_TRANSFORM: &str = "passthrough";

/// Resolves the step's declared transform from the registry, invokes it
/// with handles to the resolved dependency entries, writes the produced
/// dataset into staging (both serialization formats), and validates the
/// result's structural well-formedness. Semantic correctness belongs to
/// the transform's author.
pub struct DataRunner {
    transforms: TransformRegistry,
}

impl DataRunner {
    /// Runner resolving transforms from the given registry.
    #[must_use]
    pub fn new(transforms: TransformRegistry) -> Self {
        Self { transforms }
    }
}

#[async_trait]
impl StepRunner for DataRunner {
    async fn execute(&self, ctx: ExecutionContext) -> Result<RunnerOutput, RunnerError> {
        let name = ctx
            .declaration
            .transform
            .as_deref()
            .unwrap_or(DEFAULT_TRANSFORM);
        let transform = self.transforms.get(name)?;

        let transform_ctx = TransformContext {
            declaration: &ctx.declaration,
            inputs: &ctx.inputs,
        };
        let dataset = transform
            .apply(&transform_ctx)
            .await
            .map_err(|e| match e {
                TransformError::Entry(entry) => RunnerError::Entry(entry),
                TransformError::Failed(reason) => RunnerError::Transform { reason },
            })?;

        dataset.validate()?;
        dataset.write_to(&ctx.staging_dir)?;

        // Both serializations must decode to the same tables before commit.
        EntryRef::new(ctx.staging_dir.clone()).validate()?;

        let rows: usize = dataset.tables.iter().map(|t| t.rows.len()).sum();
        info!(step = %ctx.address(), transform = name, tables = dataset.tables.len(), "dataset written");
        Ok(RunnerOutput::with_note(format!(
            "{} table(s), {} row(s) via `{}`",
            dataset.tables.len(),
            rows,
            name
        )))
    }
}
