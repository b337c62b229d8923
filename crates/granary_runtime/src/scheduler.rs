//! The scheduling state machine.
//!
//! The scheduler owns the plan's per-step states and the transition rules.
//! It never blocks and never runs anything itself: the engine asks it for
//! ready steps, dispatches them to workers, and feeds completion events
//! back. A failure cascades to every transitive dependent still waiting;
//! independent branches are untouched. Among mutually independent ready
//! steps no ordering is guaranteed; the deterministic iteration here is a
//! convenience for planning output, not a contract.

use crate::plan::{ExecutionPlan, SkipReason, StepState};
use granary_core::StepAddress;
use granary_graph::StepGraph;
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

/// Drives an [`ExecutionPlan`] through its state machine.
#[derive(Debug)]
pub struct Scheduler {
    plan: ExecutionPlan,
    dependencies: IndexMap<StepAddress, Vec<StepAddress>>,
    dependents: IndexMap<StepAddress, IndexSet<StepAddress>>,
}

impl Scheduler {
    /// Build a scheduler for a plan, taking edge information from the
    /// graph restricted to plan members.
    #[must_use]
    pub fn new(graph: &StepGraph, plan: ExecutionPlan) -> Self {
        let mut dependencies = IndexMap::new();
        let mut dependents: IndexMap<StepAddress, IndexSet<StepAddress>> = IndexMap::new();

        for (address, _) in plan.iter() {
            let deps: Vec<StepAddress> = graph
                .dependencies(address)
                .iter()
                .filter(|d| plan.contains(d))
                .cloned()
                .collect();
            for dep in &deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(address.clone());
            }
            dependencies.insert(address.clone(), deps);
        }

        Self {
            plan,
            dependencies,
            dependents,
        }
    }

    /// Whether every dependency of a step has reached a satisfying
    /// terminal state (`Succeeded`, or skipped as fresh).
    fn dependencies_satisfied(&self, address: &StepAddress) -> bool {
        self.dependencies
            .get(address)
            .map(|deps| {
                deps.iter().all(|dep| {
                    matches!(
                        self.plan.state(dep),
                        Some(StepState::Succeeded)
                            | Some(StepState::Skipped {
                                reason: SkipReason::Fresh
                            })
                    )
                })
            })
            .unwrap_or(true)
    }

    /// Move every satisfied `Pending` step to `Ready` and return them.
    pub fn take_ready(&mut self) -> Vec<StepAddress> {
        let ready: Vec<StepAddress> = self
            .plan
            .iter()
            .filter(|(addr, state)| {
                matches!(state, StepState::Pending) && self.dependencies_satisfied(addr)
            })
            .map(|(addr, _)| addr.clone())
            .collect();

        for addr in &ready {
            self.plan.set_state(addr, StepState::Ready);
        }
        ready
    }

    /// Mark a step as dispatched to a worker.
    pub fn start(&mut self, address: &StepAddress) {
        debug!(step = %address, "running");
        self.plan.set_state(address, StepState::Running);
    }

    /// Completion event: the step succeeded and its entry is committed.
    pub fn complete(&mut self, address: &StepAddress) {
        debug!(step = %address, "succeeded");
        self.plan.set_state(address, StepState::Succeeded);
    }

    /// Completion event: the step failed. Every transitive dependent that
    /// has not run yet is skipped as blocked, without invoking its runner.
    pub fn fail(&mut self, address: &StepAddress, error: impl Into<String>) {
        let error = error.into();
        debug!(step = %address, error = %error, "failed");
        self.plan.set_state(address, StepState::Failed { error });

        let mut stack: Vec<StepAddress> = self
            .dependents
            .get(address)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(dependent) = stack.pop() {
            match self.plan.state(&dependent) {
                Some(StepState::Pending) | Some(StepState::Ready) => {
                    self.plan.set_state(
                        &dependent,
                        StepState::Skipped {
                            reason: SkipReason::BlockedByFailure {
                                dependency: address.clone(),
                            },
                        },
                    );
                    if let Some(next) = self.dependents.get(&dependent) {
                        stack.extend(next.iter().cloned());
                    }
                }
                _ => {}
            }
        }
    }

    /// Cancellation: skip everything that has not been dispatched.
    /// In-flight steps are left to finish naturally.
    pub fn cancel_waiting(&mut self) {
        let waiting: Vec<StepAddress> = self
            .plan
            .iter()
            .filter(|(_, state)| matches!(state, StepState::Pending | StepState::Ready))
            .map(|(addr, _)| addr.clone())
            .collect();
        for addr in waiting {
            self.plan.set_state(
                &addr,
                StepState::Skipped {
                    reason: SkipReason::Cancelled,
                },
            );
        }
    }

    /// The plan being driven.
    #[must_use]
    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Consume the scheduler, returning the final plan.
    #[must_use]
    pub fn into_plan(self) -> ExecutionPlan {
        self.plan
    }

    /// Whether every step has reached a terminal state.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.plan.is_complete()
    }

    /// Whether any step failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.plan
            .iter()
            .any(|(_, state)| matches!(state, StepState::Failed { .. }))
    }
}
