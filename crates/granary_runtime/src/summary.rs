//! Run summaries.
//!
//! The user-visible report of an invocation: one line per step in plan
//! order. Dry-run summaries have the identical shape but describe a plan
//! rather than completed work.

use crate::plan::{ExecutionPlan, SkipReason, StepState};
use granary_core::{RunId, StepAddress};
use indexmap::IndexMap;
use std::fmt;

/// The final outcome of one step in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Dry run only: the step would execute.
    WouldRun,
    /// The step ran and its entry was committed.
    Succeeded {
        /// Runner note (bytes fetched, rows written).
        note: Option<String>,
    },
    /// The step ran and failed.
    Failed {
        /// The error, verbatim.
        error: String,
    },
    /// The step's fingerprint matched its build record.
    SkippedFresh,
    /// A transitive dependency failed before the step could run.
    SkippedBlocked {
        /// The failed dependency.
        dependency: StepAddress,
    },
    /// The run was cancelled before the step was dispatched.
    Cancelled,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldRun => write!(f, "would run"),
            Self::Succeeded { note: Some(note) } => write!(f, "ran/succeeded ({})", note),
            Self::Succeeded { note: None } => write!(f, "ran/succeeded"),
            Self::Failed { error } => write!(f, "ran/failed ({})", error),
            Self::SkippedFresh => write!(f, "skipped (fresh)"),
            Self::SkippedBlocked { dependency } => {
                write!(f, "skipped (blocked by failed dependency {})", dependency)
            }
            Self::Cancelled => write!(f, "skipped (cancelled)"),
        }
    }
}

/// Summary of one invocation.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// The invocation this summarizes.
    pub run_id: RunId,
    /// Whether this is a dry-run plan rather than a report of work.
    pub dry_run: bool,
    outcomes: IndexMap<StepAddress, StepOutcome>,
}

impl RunSummary {
    /// Summary of a dry run: pending steps become `WouldRun`.
    #[must_use]
    pub fn from_plan(run_id: RunId, plan: &ExecutionPlan) -> Self {
        let outcomes = plan
            .iter()
            .map(|(addr, state)| (addr.clone(), Self::planned_outcome(state)))
            .collect();
        Self {
            run_id,
            dry_run: true,
            outcomes,
        }
    }

    /// Summary of an executed run, with runner notes merged in.
    #[must_use]
    pub fn from_executed(
        run_id: RunId,
        plan: &ExecutionPlan,
        notes: &IndexMap<StepAddress, String>,
    ) -> Self {
        let outcomes = plan
            .iter()
            .map(|(addr, state)| {
                (
                    addr.clone(),
                    Self::executed_outcome(state, notes.get(addr).cloned()),
                )
            })
            .collect();
        Self {
            run_id,
            dry_run: false,
            outcomes,
        }
    }

    fn planned_outcome(state: &StepState) -> StepOutcome {
        match state {
            StepState::Skipped {
                reason: SkipReason::Fresh,
            } => StepOutcome::SkippedFresh,
            _ => StepOutcome::WouldRun,
        }
    }

    fn executed_outcome(state: &StepState, note: Option<String>) -> StepOutcome {
        match state {
            StepState::Succeeded => StepOutcome::Succeeded { note },
            StepState::Failed { error } => StepOutcome::Failed {
                error: error.clone(),
            },
            StepState::Skipped {
                reason: SkipReason::Fresh,
            } => StepOutcome::SkippedFresh,
            StepState::Skipped {
                reason: SkipReason::BlockedByFailure { dependency },
            } => StepOutcome::SkippedBlocked {
                dependency: dependency.clone(),
            },
            StepState::Skipped {
                reason: SkipReason::Cancelled,
            } => StepOutcome::Cancelled,
            // Pending/Ready/Running only appear if the engine stopped
            // early; report them as cancelled rather than invent a state.
            _ => StepOutcome::Cancelled,
        }
    }

    /// Outcome per step, in plan order.
    pub fn iter(&self) -> impl Iterator<Item = (&StepAddress, &StepOutcome)> {
        self.outcomes.iter()
    }

    /// The outcome for one step.
    #[must_use]
    pub fn outcome(&self, address: &StepAddress) -> Option<&StepOutcome> {
        self.outcomes.get(address)
    }

    /// Number of failed steps.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, StepOutcome::Failed { .. }))
            .count()
    }

    /// Number of succeeded steps.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, StepOutcome::Succeeded { .. }))
            .count()
    }

    /// Whether the invocation should exit zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_count() == 0
    }

    /// Total steps reported.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether nothing was in the plan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "Plan for {} ({} step(s)):", self.run_id, self.len())?;
        } else {
            writeln!(f, "Run {} ({} step(s)):", self.run_id, self.len())?;
        }
        for (address, outcome) in &self.outcomes {
            writeln!(f, "  {:<60} {}", address.to_string(), outcome)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> StepAddress {
        StepAddress::parse(s).unwrap()
    }

    #[test]
    fn test_outcome_lines() {
        assert_eq!(
            StepOutcome::Succeeded { note: None }.to_string(),
            "ran/succeeded"
        );
        assert_eq!(
            StepOutcome::Failed {
                error: "boom".to_string()
            }
            .to_string(),
            "ran/failed (boom)"
        );
        assert_eq!(StepOutcome::SkippedFresh.to_string(), "skipped (fresh)");
        assert_eq!(
            StepOutcome::SkippedBlocked {
                dependency: addr("data://mid/b")
            }
            .to_string(),
            "skipped (blocked by failed dependency data://mid/b)"
        );
    }

    #[test]
    fn test_success_counting() {
        let mut outcomes = IndexMap::new();
        outcomes.insert(addr("data://a/x"), StepOutcome::Succeeded { note: None });
        outcomes.insert(
            addr("data://a/y"),
            StepOutcome::Failed {
                error: "e".to_string(),
            },
        );
        let summary = RunSummary {
            run_id: RunId::new(),
            dry_run: false,
            outcomes,
        };
        assert_eq!(summary.succeeded_count(), 1);
        assert_eq!(summary.failed_count(), 1);
        assert!(!summary.is_success());
    }
}
