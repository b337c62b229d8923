//! Execution plans.
//!
//! A plan is created fresh for every invocation and never persisted: the
//! target closure (targets plus their transitive dependencies) in
//! topological order, each step tracked through a small state machine.
//! Stale steps start `Pending`; fresh steps are terminal `Skipped` from
//! the start, and steps blocked by a failure become `Skipped` without
//! ever running.

use crate::freshness::FreshnessReport;
use granary_core::StepAddress;
use granary_graph::{Selection, StepGraph};
use indexmap::{IndexMap, IndexSet};
use std::fmt;

/// Why a step was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The step's fingerprint matches its build record.
    Fresh,
    /// A transitive dependency failed; the step never ran.
    BlockedByFailure {
        /// The failed dependency that blocked this step.
        dependency: StepAddress,
    },
    /// The operator cancelled the run before this step was dispatched.
    Cancelled,
}

/// Per-step state machine:
/// `Pending -> Ready -> Running -> {Succeeded, Failed}`; `Skipped` is
/// terminal and assigned to steps that never run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepState {
    /// Waiting for dependencies.
    Pending,
    /// All dependencies satisfied; waiting for a worker.
    Ready,
    /// A worker is executing the step.
    Running,
    /// The runner finished and the entry was committed.
    Succeeded,
    /// The runner or the commit failed.
    Failed {
        /// The error, verbatim.
        error: String,
    },
    /// The step never ran.
    Skipped {
        /// Why it was skipped.
        reason: SkipReason,
    },
}

impl StepState {
    /// Whether this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed { .. } | Self::Skipped { .. }
        )
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed { error } => write!(f, "failed: {}", error),
            Self::Skipped { reason } => match reason {
                SkipReason::Fresh => write!(f, "skipped (fresh)"),
                SkipReason::BlockedByFailure { dependency } => {
                    write!(f, "skipped (blocked by failed dependency {})", dependency)
                }
                SkipReason::Cancelled => write!(f, "skipped (cancelled)"),
            },
        }
    }
}

/// The per-invocation execution plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    states: IndexMap<StepAddress, StepState>,
}

impl ExecutionPlan {
    /// Build the minimal plan for a selection: every selected step plus
    /// its transitive dependencies, in topological order. Stale steps are
    /// `Pending`; fresh ones are terminal `Skipped (fresh)`.
    #[must_use]
    pub fn build(graph: &StepGraph, report: &FreshnessReport, selection: &Selection) -> Self {
        let mut closure: IndexSet<StepAddress> = IndexSet::new();
        for target in selection.targets() {
            closure.extend(graph.ancestors(target));
            closure.insert(target.clone());
        }

        let mut states = IndexMap::new();
        for address in graph.topo_order() {
            if !closure.contains(&address) {
                continue;
            }
            let state = if report.is_stale(&address) {
                StepState::Pending
            } else {
                StepState::Skipped {
                    reason: SkipReason::Fresh,
                }
            };
            states.insert(address, state);
        }

        Self { states }
    }

    /// The state of one step, if it is in the plan.
    #[must_use]
    pub fn state(&self, address: &StepAddress) -> Option<&StepState> {
        self.states.get(address)
    }

    /// Set a step's state. Callers (the scheduler) own transition rules.
    pub(crate) fn set_state(&mut self, address: &StepAddress, state: StepState) {
        if let Some(slot) = self.states.get_mut(address) {
            *slot = state;
        }
    }

    /// Every step in the plan with its state, topological order.
    pub fn iter(&self) -> impl Iterator<Item = (&StepAddress, &StepState)> {
        self.states.iter()
    }

    /// Whether the plan contains a step.
    #[must_use]
    pub fn contains(&self, address: &StepAddress) -> bool {
        self.states.contains_key(address)
    }

    /// Steps selected to execute this invocation (not yet terminal), in
    /// topological order. Empty on a fully fresh catalog.
    #[must_use]
    pub fn runnable(&self) -> Vec<StepAddress> {
        self.states
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// Whether every step has reached a terminal state.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.states.values().all(StepState::is_terminal)
    }

    /// Number of steps in the plan (including skipped ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the plan is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freshness::FreshnessEngine;
    use granary_catalog::{BuildRecordStore, Publisher};
    use granary_graph::{GraphLoader, StepDeclaration};
    use granary_steps::StaticRemote;

    fn addr(s: &str) -> StepAddress {
        StepAddress::parse(s).unwrap()
    }

    fn graph() -> StepGraph {
        GraphLoader::load(vec![
            StepDeclaration::new(addr("snapshot://src/a")).with_source("src-a"),
            StepDeclaration::new(addr("data://mid/b")).with_dependency(addr("snapshot://src/a")),
            StepDeclaration::new(addr("data://out/c")).with_dependency(addr("data://mid/b")),
            StepDeclaration::new(addr("data://other/d")),
        ])
        .unwrap()
    }

    async fn report(root: &std::path::Path, remote: &StaticRemote) -> FreshnessReport {
        let records = BuildRecordStore::open(root);
        FreshnessEngine::classify(&graph(), &records, remote, &[])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_plan_includes_stale_ancestors() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = StaticRemote::new();
        remote.put("src-a", b"v1".to_vec());

        let graph = graph();
        let report = report(tmp.path(), &remote).await;
        let selection =
            Selection::resolve(&graph, &["data://out/c".to_string()], false).unwrap();
        let plan = ExecutionPlan::build(&graph, &report, &selection);

        let runnable = plan.runnable();
        assert_eq!(
            runnable,
            vec![addr("snapshot://src/a"), addr("data://mid/b"), addr("data://out/c")]
        );
        assert!(!plan.contains(&addr("data://other/d")));
    }

    #[tokio::test]
    async fn test_fresh_steps_enter_plan_as_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = StaticRemote::new();
        remote.put("src-a", b"v1".to_vec());
        let graph = graph();

        // Commit everything, then re-plan: nothing runnable.
        let first = report(tmp.path(), &remote).await;
        let publisher = Publisher::open(tmp.path()).unwrap();
        for step in ["snapshot://src/a", "data://mid/b", "data://out/c", "data://other/d"] {
            let address = addr(step);
            let staged = publisher.stage(&address).unwrap();
            publisher
                .commit(staged, first.fingerprint(&address).unwrap())
                .unwrap();
        }

        let second = report(tmp.path(), &remote).await;
        let selection = Selection::resolve(&graph, &[], false).unwrap();
        let plan = ExecutionPlan::build(&graph, &second, &selection);

        assert!(plan.runnable().is_empty());
        assert!(plan.is_complete());
        assert_eq!(
            plan.state(&addr("data://out/c")),
            Some(&StepState::Skipped {
                reason: SkipReason::Fresh
            })
        );
    }

    #[tokio::test]
    async fn test_plan_topological_order() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = StaticRemote::new();
        remote.put("src-a", b"v1".to_vec());
        let graph = graph();

        let report = report(tmp.path(), &remote).await;
        let selection = Selection::resolve(&graph, &[], false).unwrap();
        let plan = ExecutionPlan::build(&graph, &report, &selection);

        let order: Vec<_> = plan.iter().map(|(a, _)| a.clone()).collect();
        let pos = |a: &StepAddress| order.iter().position(|x| x == a).unwrap();
        assert!(pos(&addr("snapshot://src/a")) < pos(&addr("data://mid/b")));
        assert!(pos(&addr("data://mid/b")) < pos(&addr("data://out/c")));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(StepState::Pending.to_string(), "pending");
        assert_eq!(
            StepState::Skipped {
                reason: SkipReason::BlockedByFailure {
                    dependency: addr("data://mid/b")
                }
            }
            .to_string(),
            "skipped (blocked by failed dependency data://mid/b)"
        );
    }
}
