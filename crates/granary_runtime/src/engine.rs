//! The build engine.
//!
//! One coordinator task owns the plan's state machine; stale steps are
//! dispatched into a bounded `JoinSet` worker pool and their completion
//! events drive the scheduler. A step's runner is never invoked before
//! every dependency has reached a terminal success state (or was fresh).
//! Workers block only inside runner `execute` calls; the coordinator
//! blocks only when all workers are busy or nothing is ready.

use crate::freshness::{FreshnessEngine, FreshnessError, FreshnessReport};
use crate::plan::ExecutionPlan;
use crate::scheduler::Scheduler;
use crate::summary::RunSummary;
use granary_catalog::{BuildRecordStore, CommitError, Publisher, StagedEntry};
use granary_core::{RunId, StepAddress};
use granary_graph::{Selection, StepGraph};
use granary_steps::{
    ExecutionContext, Remote, RunnerError, RunnerOutput, RunnerSet, TransformRegistry, UpsertSink,
};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default worker-pool size; conservative toward shared external
/// resources such as a downstream database.
const DEFAULT_WORKERS: usize = 4;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size; at least 1.
    pub workers: usize,
    /// Operator-selected environment name handed to publish sinks.
    pub environment: String,
    /// Patterns whose matching steps are treated as stale regardless of
    /// their fingerprints.
    pub force: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            environment: "staging".to_string(),
            force: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Set the worker pool size (clamped to at least 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Add a force pattern.
    #[must_use]
    pub fn with_force(mut self, pattern: impl Into<String>) -> Self {
        self.force.push(pattern.into());
        self
    }
}

/// Errors fatal to a whole invocation. Per-step failures are not errors;
/// they surface through the run summary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The catalog could not be opened.
    #[error(transparent)]
    Commit(#[from] CommitError),

    /// Freshness evaluation failed.
    #[error(transparent)]
    Freshness(#[from] FreshnessError),

    /// A worker task died outside the runner contract.
    #[error("Worker failure: {message}")]
    Worker {
        /// Join error detail.
        message: String,
    },
}

/// The incremental build engine for one invocation.
///
/// Holds the validated graph and explicit handles to the catalog stores;
/// nothing here is global state. Opened once per invocation, dropped at
/// the end.
pub struct BuildEngine {
    graph: StepGraph,
    publisher: Publisher,
    records: BuildRecordStore,
    runners: RunnerSet,
    remote: Arc<dyn Remote>,
    config: EngineConfig,
}

impl BuildEngine {
    /// Open an engine over a catalog root.
    ///
    /// # Errors
    ///
    /// Returns `Commit` if the catalog root cannot be prepared.
    pub fn open(
        graph: StepGraph,
        catalog_root: &Path,
        remote: Arc<dyn Remote>,
        transforms: TransformRegistry,
        sink: Arc<dyn UpsertSink>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let publisher = Publisher::open(catalog_root)?;
        let records = BuildRecordStore::open(catalog_root);
        let runners = RunnerSet::new(Arc::clone(&remote), transforms, sink);
        Ok(Self {
            graph,
            publisher,
            records,
            runners,
            remote,
            config,
        })
    }

    /// The validated graph this engine drives.
    #[must_use]
    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Evaluate freshness and build the execution plan for a selection,
    /// without dispatching anything. Dry runs stop here; real runs execute
    /// exactly this plan (idempotent planning).
    ///
    /// # Errors
    ///
    /// Returns `Freshness` on a build-record read failure.
    pub async fn plan(
        &self,
        selection: &Selection,
    ) -> Result<(ExecutionPlan, FreshnessReport), EngineError> {
        let report = FreshnessEngine::classify(
            &self.graph,
            &self.records,
            self.remote.as_ref(),
            &self.config.force,
        )
        .await?;
        let plan = ExecutionPlan::build(&self.graph, &report, selection);
        Ok((plan, report))
    }

    /// Compute and report the plan without executing it.
    ///
    /// # Errors
    ///
    /// Same as [`plan`](Self::plan).
    pub async fn dry_run(&self, selection: &Selection) -> Result<RunSummary, EngineError> {
        let run_id = RunId::new();
        let (plan, report) = self.plan(selection).await?;
        for failure in report.probe_failures() {
            warn!(step = %failure.step, reason = %failure.reason, "probe failed");
        }
        Ok(RunSummary::from_plan(run_id, &plan))
    }

    /// Execute the plan for a selection with the configured worker pool.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` only for invocation-fatal conditions;
    /// individual step failures end up in the summary.
    pub async fn run(
        &self,
        selection: &Selection,
        cancel: CancellationToken,
    ) -> Result<RunSummary, EngineError> {
        let run_id = RunId::new();
        let (plan, report) = self.plan(selection).await?;
        info!(
            run = %run_id,
            steps = plan.len(),
            stale = plan.runnable().len(),
            workers = self.config.workers,
            "starting run"
        );

        let mut scheduler = Scheduler::new(&self.graph, plan);
        let mut join_set: JoinSet<(StepAddress, Result<RunnerOutput, RunnerError>)> =
            JoinSet::new();
        let mut staged: IndexMap<StepAddress, StagedEntry> = IndexMap::new();
        let mut notes: IndexMap<StepAddress, String> = IndexMap::new();
        let mut queue: VecDeque<StepAddress> = VecDeque::new();
        let workers = self.config.workers.max(1);
        let mut cancelled = false;

        loop {
            if cancel.is_cancelled() && !cancelled {
                cancelled = true;
                info!(run = %run_id, "cancellation requested; draining in-flight steps");
                queue.clear();
                scheduler.cancel_waiting();
            }
            if !cancelled {
                queue.extend(scheduler.take_ready());
            }

            while join_set.len() < workers {
                let Some(address) = queue.pop_front() else {
                    break;
                };
                match self.dispatch(run_id, &address, &mut join_set, &mut staged) {
                    Ok(()) => scheduler.start(&address),
                    Err(e) => scheduler.fail(&address, e.to_string()),
                }
            }

            if join_set.is_empty() {
                if queue.is_empty() {
                    break;
                }
                continue;
            }

            match join_set.join_next().await {
                Some(Ok((address, result))) => {
                    self.settle(&mut scheduler, &mut staged, &mut notes, &report, address, result);
                }
                Some(Err(e)) => {
                    return Err(EngineError::Worker {
                        message: e.to_string(),
                    });
                }
                None => break,
            }
        }

        let final_plan = scheduler.into_plan();
        let summary = RunSummary::from_executed(run_id, &final_plan, &notes);
        info!(
            run = %run_id,
            succeeded = summary.succeeded_count(),
            failed = summary.failed_count(),
            "run finished"
        );
        Ok(summary)
    }

    /// Stage a directory, resolve dependency entries, and hand the step to
    /// a worker. Errors here fail the step, not the run.
    fn dispatch(
        &self,
        run_id: RunId,
        address: &StepAddress,
        join_set: &mut JoinSet<(StepAddress, Result<RunnerOutput, RunnerError>)>,
        staged: &mut IndexMap<StepAddress, StagedEntry>,
    ) -> Result<(), String> {
        // Plan members always come from the graph.
        let Some(decl) = self.graph.get(address).cloned() else {
            return Err(format!("step {address} missing from graph"));
        };

        let entry = self
            .publisher
            .stage(address)
            .map_err(|e| format!("staging failed: {e}"))?;
        let mut ctx = ExecutionContext::new(run_id, decl.clone(), entry.dir().to_path_buf())
            .with_environment(self.config.environment.clone());
        for dep in &decl.dependencies {
            if let Some(dep_entry) = self.publisher.entry(dep) {
                ctx = ctx.with_input(dep.clone(), dep_entry);
            }
        }

        let runner = self.runners.runner_for(address.kind());
        let task_address = address.clone();
        join_set.spawn(async move {
            let result = runner.execute(ctx).await;
            (task_address, result)
        });
        staged.insert(address.clone(), entry);
        Ok(())
    }

    /// Apply one completion event: commit on success, discard on failure.
    fn settle(
        &self,
        scheduler: &mut Scheduler,
        staged: &mut IndexMap<StepAddress, StagedEntry>,
        notes: &mut IndexMap<StepAddress, String>,
        report: &FreshnessReport,
        address: StepAddress,
        result: Result<RunnerOutput, RunnerError>,
    ) {
        let Some(entry) = staged.shift_remove(&address) else {
            scheduler.fail(&address, "staging handle lost");
            return;
        };

        match result {
            Ok(output) => {
                let Some(fingerprint) = report.fingerprint(&address) else {
                    self.publisher.discard(entry);
                    scheduler.fail(&address, "no fingerprint computed");
                    return;
                };
                match self.publisher.commit(entry, fingerprint) {
                    Ok(_) => {
                        if let Some(note) = output.note {
                            notes.insert(address.clone(), note);
                        }
                        scheduler.complete(&address);
                    }
                    Err(e) => {
                        // Prior entry and record are untouched by a failed
                        // commit; the step just reports failed.
                        scheduler.fail(&address, format!("commit failed: {e}"));
                    }
                }
            }
            Err(e) => {
                self.publisher.discard(entry);
                scheduler.fail(&address, e.to_string());
            }
        }
    }
}
