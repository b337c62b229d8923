//! Publish runner: push a data step's entry into an external store.

use crate::runner::{ExecutionContext, RunnerError, RunnerOutput, StepRunner};
use crate::sink::UpsertSink;
use async_trait::async_trait;
use granary_core::StepKind;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Receipt written into the publish step's entry directory, recording
/// where and under which key the dataset went.
#[derive(Debug, Serialize)]
struct PublishReceipt<'a> {
    target: &'a str,
    key: &'a str,
    tables: usize,
}

/// Reads the upstream data dependency's catalog entry and pushes it
/// through the sink's idempotent upsert, keyed by the stable identifier
/// carried in the entry metadata (or the declaration's override). Which
/// sink a run targets is environment-scoped configuration.
pub struct PublishRunner {
    sink: Arc<dyn UpsertSink>,
}

impl PublishRunner {
    /// Runner pushing into the given sink.
    #[must_use]
    pub fn new(sink: Arc<dyn UpsertSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StepRunner for PublishRunner {
    async fn execute(&self, ctx: ExecutionContext) -> Result<RunnerOutput, RunnerError> {
        // The loader guarantees exactly one data dependency.
        let data_dep = ctx
            .declaration
            .dependencies
            .iter()
            .find(|d| d.kind() == StepKind::Data)
            .cloned()
            .ok_or_else(|| RunnerError::MissingInput {
                dependency: ctx.address().clone(),
            })?;

        let entry = ctx.input(&data_dep)?;
        let meta = entry.meta()?;

        let key = ctx
            .declaration
            .key
            .clone()
            .unwrap_or_else(|| meta.stable_id.clone());

        let mut tables = serde_json::Map::new();
        for name in entry.table_names()? {
            let table = entry.table(&name)?;
            tables.insert(name, serde_json::to_value(&table).unwrap_or_default());
        }
        let table_count = tables.len();

        let document = json!({
            "meta": meta,
            "tables": tables,
        });
        self.sink.upsert(&key, &document).await?;

        let receipt = PublishReceipt {
            target: self.sink.target(),
            key: &key,
            tables: table_count,
        };
        let receipt_path = ctx.staging_dir.join("receipt.json");
        let bytes = serde_json::to_vec_pretty(&receipt).unwrap_or_default();
        std::fs::write(&receipt_path, bytes).map_err(|source| RunnerError::Io {
            path: receipt_path,
            source,
        })?;

        info!(step = %ctx.address(), key = %key, target = self.sink.target(), "published");
        Ok(RunnerOutput::with_note(format!(
            "upserted `{}` into {}",
            key,
            self.sink.target()
        )))
    }
}
