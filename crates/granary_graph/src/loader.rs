//! Graph loading and validation.
//!
//! Turns a set of step declarations into a validated [`StepGraph`].
//! Definition errors found here are fatal to the whole invocation: the
//! graph cannot be trusted, so nothing executes.

use crate::declaration::StepDeclaration;
use crate::graph::StepGraph;
use granary_core::{StepAddress, StepKind};
use indexmap::{IndexMap, IndexSet};

/// Errors raised while loading a graph from declarations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The same address was declared twice.
    #[error("Duplicate step declaration: {step}")]
    DuplicateStep {
        /// The duplicated address.
        step: StepAddress,
    },

    /// A declared dependency does not exist in the declaration set.
    #[error("Step {step} depends on unknown step {dependency}")]
    UnknownDependency {
        /// The declaring step.
        step: StepAddress,
        /// The missing dependency address.
        dependency: StepAddress,
    },

    /// The edge set contains a cycle.
    #[error("Dependency cycle: {}", format_cycle(.cycle))]
    CyclicGraph {
        /// One concrete cycle, in dependency order; the first address is
        /// repeated at the end.
        cycle: Vec<StepAddress>,
    },

    /// A declaration is structurally invalid for its kind.
    #[error("Invalid declaration for {step}: {reason}")]
    InvalidDeclaration {
        /// The offending step.
        step: StepAddress,
        /// Why it was rejected.
        reason: String,
    },
}

fn format_cycle(cycle: &[StepAddress]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Builds validated graphs from declarations.
pub struct GraphLoader;

impl GraphLoader {
    /// Load a graph from a set of declarations.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStep`, `UnknownDependency`, `InvalidDeclaration`,
    /// or `CyclicGraph` (naming one concrete cycle) when the declaration
    /// set is not a well-formed DAG.
    pub fn load(declarations: Vec<StepDeclaration>) -> Result<StepGraph, GraphError> {
        let mut steps: IndexMap<StepAddress, StepDeclaration> =
            IndexMap::with_capacity(declarations.len());

        for decl in declarations {
            Self::validate_declaration(&decl)?;
            let address = decl.address.clone();
            if steps.insert(address.clone(), decl).is_some() {
                return Err(GraphError::DuplicateStep { step: address });
            }
        }

        // Resolve edges; every declared dependency must exist.
        let mut dependents: IndexMap<StepAddress, IndexSet<StepAddress>> = IndexMap::new();
        for (address, decl) in &steps {
            for dependency in &decl.dependencies {
                if !steps.contains_key(dependency) {
                    return Err(GraphError::UnknownDependency {
                        step: address.clone(),
                        dependency: dependency.clone(),
                    });
                }
                dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(address.clone());
            }
        }

        Self::check_acyclic(&steps, &dependents)?;

        Ok(StepGraph::from_parts(steps, dependents))
    }

    /// Kind-specific structural checks.
    fn validate_declaration(decl: &StepDeclaration) -> Result<(), GraphError> {
        let invalid = |reason: &str| GraphError::InvalidDeclaration {
            step: decl.address.clone(),
            reason: reason.to_string(),
        };

        match decl.kind() {
            StepKind::Snapshot | StepKind::Trigger => {
                if decl.source.is_none() {
                    return Err(invalid("missing upstream source"));
                }
                if !decl.dependencies.is_empty() {
                    return Err(invalid("upstream steps cannot declare dependencies"));
                }
            }
            StepKind::Data => {
                if decl.checksum.is_some() {
                    return Err(invalid("checksum is only meaningful on snapshot steps"));
                }
            }
            StepKind::Publish => {
                let data_deps = decl
                    .dependencies
                    .iter()
                    .filter(|d| d.kind() == StepKind::Data)
                    .count();
                if data_deps != 1 {
                    return Err(invalid("publish steps read exactly one data dependency"));
                }
            }
        }
        Ok(())
    }

    /// Kahn's algorithm: peel zero-in-degree steps; anything left over sits
    /// on a cycle, and one concrete cycle is recovered for the error.
    fn check_acyclic(
        steps: &IndexMap<StepAddress, StepDeclaration>,
        dependents: &IndexMap<StepAddress, IndexSet<StepAddress>>,
    ) -> Result<(), GraphError> {
        let mut in_degree: IndexMap<&StepAddress, usize> = steps
            .iter()
            .map(|(addr, decl)| (addr, decl.dependencies.len()))
            .collect();

        let mut ready: Vec<&StepAddress> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(addr, _)| *addr)
            .collect();

        let mut peeled = 0usize;
        while let Some(addr) = ready.pop() {
            peeled += 1;
            if let Some(deps) = dependents.get(addr) {
                for dependent in deps {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push(dependent);
                        }
                    }
                }
            }
        }

        if peeled == steps.len() {
            return Ok(());
        }

        // Recover a concrete cycle: walk dependency edges restricted to the
        // un-peeled residue until an address repeats.
        let residue: IndexSet<&StepAddress> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(addr, _)| *addr)
            .collect();

        let mut cycle = Vec::new();
        let mut seen: IndexSet<&StepAddress> = IndexSet::new();
        let mut current = *residue
            .first()
            .unwrap_or_else(|| unreachable!("residue is non-empty when peeled < len"));

        loop {
            if !seen.insert(current) {
                // Trim the tail leading into the loop.
                let start = cycle
                    .iter()
                    .position(|a| a == current)
                    .unwrap_or(0);
                let mut cycle: Vec<StepAddress> = cycle.split_off(start);
                cycle.push(current.clone());
                return Err(GraphError::CyclicGraph { cycle });
            }
            cycle.push(current.clone());

            current = steps
                .get(current)
                .and_then(|decl| {
                    decl.dependencies
                        .iter()
                        .find(|dep| residue.contains(dep))
                })
                .unwrap_or_else(|| {
                    unreachable!("every residue step keeps at least one residue dependency")
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> StepAddress {
        StepAddress::parse(s).unwrap()
    }

    fn snapshot(s: &str) -> StepDeclaration {
        StepDeclaration::new(addr(s)).with_source("file:///fixture")
    }

    #[test]
    fn test_load_valid_graph() {
        let graph = GraphLoader::load(vec![
            snapshot("snapshot://src/a"),
            StepDeclaration::new(addr("data://mid/b")).with_dependency(addr("snapshot://src/a")),
        ])
        .unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_duplicate_step() {
        let err = GraphLoader::load(vec![snapshot("snapshot://src/a"), snapshot("snapshot://src/a")])
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateStep { .. }));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = GraphLoader::load(vec![
            StepDeclaration::new(addr("data://mid/b")).with_dependency(addr("snapshot://src/a")),
        ])
        .unwrap_err();
        match err {
            GraphError::UnknownDependency { step, dependency } => {
                assert_eq!(step, addr("data://mid/b"));
                assert_eq!(dependency, addr("snapshot://src/a"));
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_detected_and_named() {
        let err = GraphLoader::load(vec![
            StepDeclaration::new(addr("data://x/a")).with_dependency(addr("data://x/c")),
            StepDeclaration::new(addr("data://x/b")).with_dependency(addr("data://x/a")),
            StepDeclaration::new(addr("data://x/c")).with_dependency(addr("data://x/b")),
        ])
        .unwrap_err();
        match err {
            GraphError::CyclicGraph { cycle } => {
                // First and last entries close the loop; every member is on it.
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.len() >= 4);
                for step in &["data://x/a", "data://x/b", "data://x/c"] {
                    assert!(cycle.contains(&addr(step)), "{step} missing from {cycle:?}");
                }
            }
            other => panic!("expected CyclicGraph, got {other:?}"),
        }
    }

    #[test]
    fn test_self_cycle() {
        let err = GraphLoader::load(vec![
            StepDeclaration::new(addr("data://x/a")).with_dependency(addr("data://x/a")),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::CyclicGraph { .. }));
    }

    #[test]
    fn test_acyclic_graph_with_cycle_elsewhere_still_fails() {
        let err = GraphLoader::load(vec![
            snapshot("snapshot://src/a"),
            StepDeclaration::new(addr("data://x/b")).with_dependency(addr("data://x/c")),
            StepDeclaration::new(addr("data://x/c")).with_dependency(addr("data://x/b")),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::CyclicGraph { .. }));
    }

    #[test]
    fn test_snapshot_requires_source() {
        let err = GraphLoader::load(vec![StepDeclaration::new(addr("snapshot://src/a"))])
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidDeclaration { .. }));
    }

    #[test]
    fn test_snapshot_rejects_dependencies() {
        let err = GraphLoader::load(vec![
            snapshot("snapshot://src/a"),
            snapshot("snapshot://src/b").with_dependency(addr("snapshot://src/a")),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidDeclaration { .. }));
    }

    #[test]
    fn test_publish_requires_one_data_dependency() {
        let err = GraphLoader::load(vec![
            StepDeclaration::new(addr("publish://grapher/x")),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::InvalidDeclaration { .. }));
    }

    #[test]
    fn test_error_display_names_cycle_members() {
        let err = GraphLoader::load(vec![
            StepDeclaration::new(addr("data://x/a")).with_dependency(addr("data://x/b")),
            StepDeclaration::new(addr("data://x/b")).with_dependency(addr("data://x/a")),
        ])
        .unwrap_err();
        let s = err.to_string();
        assert!(s.contains("data://x/a"));
        assert!(s.contains("->"));
    }
}
