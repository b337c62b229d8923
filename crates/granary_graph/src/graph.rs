//! The validated step graph.
//!
//! Built by the [`GraphLoader`](crate::loader::GraphLoader); by the time a
//! `StepGraph` exists, every dependency resolves and the edge set is
//! acyclic. All iteration orders are deterministic (insertion order for
//! registry walks, topological order for scheduling).

use crate::declaration::StepDeclaration;
use granary_core::StepAddress;
use indexmap::{IndexMap, IndexSet};

/// A validated directed acyclic graph of steps.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    /// Registry: address -> declaration, in declaration order.
    steps: IndexMap<StepAddress, StepDeclaration>,
    /// Reverse edges: address -> steps that depend on it.
    dependents: IndexMap<StepAddress, IndexSet<StepAddress>>,
}

impl StepGraph {
    /// Construct from already-validated parts. Only the loader calls this.
    pub(crate) fn from_parts(
        steps: IndexMap<StepAddress, StepDeclaration>,
        dependents: IndexMap<StepAddress, IndexSet<StepAddress>>,
    ) -> Self {
        Self { steps, dependents }
    }

    /// Look up a declaration by address.
    #[must_use]
    pub fn get(&self, address: &StepAddress) -> Option<&StepDeclaration> {
        self.steps.get(address)
    }

    /// Whether the graph contains the address.
    #[must_use]
    pub fn contains(&self, address: &StepAddress) -> bool {
        self.steps.contains_key(address)
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All steps in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&StepAddress, &StepDeclaration)> {
        self.steps.iter()
    }

    /// All addresses in declaration order.
    pub fn addresses(&self) -> impl Iterator<Item = &StepAddress> {
        self.steps.keys()
    }

    /// Direct dependencies of a step.
    #[must_use]
    pub fn dependencies(&self, address: &StepAddress) -> &[StepAddress] {
        self.steps
            .get(address)
            .map(|d| d.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Direct dependents of a step.
    #[must_use]
    pub fn dependents(&self, address: &StepAddress) -> Vec<&StepAddress> {
        self.dependents
            .get(address)
            .map(|set| set.iter().collect())
            .unwrap_or_default()
    }

    /// All transitive dependencies of a step (not including the step).
    #[must_use]
    pub fn ancestors(&self, address: &StepAddress) -> IndexSet<StepAddress> {
        let mut out = IndexSet::new();
        let mut stack: Vec<StepAddress> = self.dependencies(address).to_vec();
        while let Some(dep) = stack.pop() {
            if out.insert(dep.clone()) {
                stack.extend(self.dependencies(&dep).iter().cloned());
            }
        }
        out
    }

    /// All transitive dependents of a step (not including the step).
    #[must_use]
    pub fn descendants(&self, address: &StepAddress) -> IndexSet<StepAddress> {
        let mut out = IndexSet::new();
        let mut stack: Vec<StepAddress> =
            self.dependents(address).into_iter().cloned().collect();
        while let Some(dep) = stack.pop() {
            if out.insert(dep.clone()) {
                stack.extend(self.dependents(&dep).into_iter().cloned());
            }
        }
        out
    }

    /// Addresses in topological order: every step appears after all of its
    /// dependencies. Kahn's algorithm over the validated edge set; ties are
    /// broken by declaration order, so the result is deterministic.
    #[must_use]
    pub fn topo_order(&self) -> Vec<StepAddress> {
        let mut in_degree: IndexMap<&StepAddress, usize> = self
            .steps
            .iter()
            .map(|(addr, decl)| (addr, decl.dependencies.len()))
            .collect();

        let mut order = Vec::with_capacity(self.steps.len());
        let mut ready: Vec<&StepAddress> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(addr, _)| *addr)
            .collect();

        // Pop from the front to preserve declaration order among peers.
        while !ready.is_empty() {
            let addr = ready.remove(0);
            order.push(addr.clone());
            if let Some(dependents) = self.dependents.get(addr) {
                for dependent in dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push(dependent);
                        }
                    }
                }
            }
        }

        debug_assert_eq!(order.len(), self.steps.len());
        order
    }
}
