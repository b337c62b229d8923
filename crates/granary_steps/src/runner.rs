//! The common step-runner contract.
//!
//! Every step kind executes behind the same interface: the engine stages a
//! directory, resolves dependency entry locations, and calls
//! `execute(ctx)`; the runner writes its output into the staged directory
//! and the engine commits or discards it. `RunnerSet::runner_for` is the
//! single point where a kind is turned into an execution strategy, which
//! keeps the scheduler kind-agnostic.

use crate::data::DataRunner;
use crate::publish::PublishRunner;
use crate::remote::{Remote, RemoteError};
use crate::sink::{SinkError, UpsertSink};
use crate::snapshot::SnapshotRunner;
use crate::transform::{RegistryError, TransformRegistry};
use crate::trigger::TriggerRunner;
use async_trait::async_trait;
use granary_catalog::{EntryError, EntryRef};
use granary_core::{RunId, StepAddress, StepKind};
use granary_graph::StepDeclaration;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Errors raised by step runners.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The upstream resource could not be fetched. Transient: safe to
    /// retry on a later invocation, nothing was committed.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] RemoteError),

    /// The fetched payload does not match the declared checksum.
    /// Non-retryable without operator intervention.
    #[error("Integrity check failed: expected sha256 {expected}, got {actual}")]
    Integrity {
        /// Declared checksum.
        expected: String,
        /// Checksum of the fetched bytes.
        actual: String,
    },

    /// A dependency entry the runner needs is missing from the catalog.
    #[error("Missing catalog entry for dependency {dependency}")]
    MissingInput {
        /// The absent dependency.
        dependency: StepAddress,
    },

    /// The declared transform is not registered.
    #[error(transparent)]
    UnknownTransform(#[from] RegistryError),

    /// The transformation logic failed; surfaced verbatim.
    #[error("Transform failed: {reason}")]
    Transform {
        /// The transform's own report.
        reason: String,
    },

    /// The produced entry is structurally malformed.
    #[error(transparent)]
    Entry(#[from] EntryError),

    /// The external upsert failed.
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Filesystem failure inside the staged directory.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Everything a runner sees for one execution.
pub struct ExecutionContext {
    /// The invocation this execution belongs to.
    pub run_id: RunId,
    /// The step's declaration.
    pub declaration: StepDeclaration,
    /// Resolved catalog entries of the step's dependencies, in
    /// declaration order.
    pub inputs: IndexMap<StepAddress, EntryRef>,
    /// Staged directory the runner writes into; committed by the engine
    /// on success, discarded on failure.
    pub staging_dir: PathBuf,
    /// Operator-selected environment name (e.g. `staging`).
    pub environment: String,
}

impl ExecutionContext {
    /// Create a context with no inputs.
    #[must_use]
    pub fn new(run_id: RunId, declaration: StepDeclaration, staging_dir: PathBuf) -> Self {
        Self {
            run_id,
            declaration,
            inputs: IndexMap::new(),
            staging_dir,
            environment: "staging".to_string(),
        }
    }

    /// Add a resolved dependency entry.
    #[must_use]
    pub fn with_input(mut self, address: StepAddress, entry: EntryRef) -> Self {
        self.inputs.insert(address, entry);
        self
    }

    /// Set the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// The address of the step being executed.
    #[must_use]
    pub fn address(&self) -> &StepAddress {
        &self.declaration.address
    }

    /// The resolved entry of one dependency.
    ///
    /// # Errors
    ///
    /// Returns `MissingInput` if the dependency was not resolved.
    pub fn input(&self, dependency: &StepAddress) -> Result<&EntryRef, RunnerError> {
        self.inputs
            .get(dependency)
            .ok_or_else(|| RunnerError::MissingInput {
                dependency: dependency.clone(),
            })
    }
}

/// What a successful execution reports back to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerOutput {
    /// One-line human note for the run summary (bytes fetched, rows
    /// written, documents upserted).
    pub note: Option<String>,
}

impl RunnerOutput {
    /// Output with a summary note.
    #[must_use]
    pub fn with_note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
        }
    }
}

/// The execution contract every step kind implements.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute one step. Implementations write only into
    /// `ctx.staging_dir`; the engine owns commit and discard.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError`; the engine marks the step failed and
    /// cascades to its dependents.
    async fn execute(&self, ctx: ExecutionContext) -> Result<RunnerOutput, RunnerError>;
}

/// The full set of runners for one invocation, one per step kind.
#[derive(Clone)]
pub struct RunnerSet {
    snapshot: Arc<SnapshotRunner>,
    data: Arc<DataRunner>,
    trigger: Arc<TriggerRunner>,
    publish: Arc<PublishRunner>,
}

impl RunnerSet {
    /// Build the runner set from the invocation's collaborators.
    #[must_use]
    pub fn new(
        remote: Arc<dyn Remote>,
        transforms: TransformRegistry,
        sink: Arc<dyn UpsertSink>,
    ) -> Self {
        Self {
            snapshot: Arc::new(SnapshotRunner::new(Arc::clone(&remote))),
            data: Arc::new(DataRunner::new(transforms)),
            trigger: Arc::new(TriggerRunner::new(remote)),
            publish: Arc::new(PublishRunner::new(sink)),
        }
    }

    /// The single kind-dispatch point.
    #[must_use]
    pub fn runner_for(&self, kind: StepKind) -> Arc<dyn StepRunner> {
        match kind {
            StepKind::Snapshot => Arc::clone(&self.snapshot) as Arc<dyn StepRunner>,
            StepKind::Data => Arc::clone(&self.data) as Arc<dyn StepRunner>,
            StepKind::Trigger => Arc::clone(&self.trigger) as Arc<dyn StepRunner>,
            StepKind::Publish => Arc::clone(&self.publish) as Arc<dyn StepRunner>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticRemote;
    use crate::sink::MemorySink;

    fn addr(s: &str) -> StepAddress {
        StepAddress::parse(s).unwrap()
    }

    fn runner_set() -> RunnerSet {
        RunnerSet::new(
            Arc::new(StaticRemote::new()),
            TransformRegistry::with_builtins(),
            Arc::new(MemorySink::new("staging")),
        )
    }

    #[test]
    fn test_dispatch_covers_every_kind() {
        let set = runner_set();
        for kind in StepKind::ALL {
            let _runner = set.runner_for(kind);
        }
    }

    #[test]
    fn test_context_missing_input() {
        let ctx = ExecutionContext::new(
            RunId::new(),
            StepDeclaration::new(addr("data://garden/x")),
            PathBuf::from("/tmp/stage"),
        );
        let err = ctx.input(&addr("snapshot://src/a")).unwrap_err();
        assert!(matches!(err, RunnerError::MissingInput { .. }));
    }
}
