//! Target selection.
//!
//! Resolves operator-supplied target patterns (exact addresses or
//! substrings) against a loaded graph. The engine downstream always works
//! on the fully resolved address set this produces.

use crate::graph::StepGraph;
use granary_core::StepAddress;
use indexmap::IndexSet;

/// Errors raised while resolving target patterns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    /// A pattern matched no step in the graph.
    #[error("No step matches pattern `{pattern}`")]
    NoMatch {
        /// The pattern that matched nothing.
        pattern: String,
    },
}

/// A resolved selection of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    targets: IndexSet<StepAddress>,
}

impl Selection {
    /// Resolve patterns against the graph.
    ///
    /// An empty pattern list selects every step (full-catalog build).
    /// Private steps are only selectable directly when `include_private`
    /// is set; they always remain reachable as dependencies of public
    /// steps regardless.
    ///
    /// # Errors
    ///
    /// Returns `NoMatch` for any pattern that resolves to zero steps.
    pub fn resolve(
        graph: &StepGraph,
        patterns: &[String],
        include_private: bool,
    ) -> Result<Self, SelectError> {
        let selectable = |addr: &StepAddress| {
            include_private
                || graph
                    .get(addr)
                    .map(|decl| !decl.private)
                    .unwrap_or(false)
        };

        let mut targets = IndexSet::new();

        if patterns.is_empty() {
            targets.extend(graph.addresses().filter(|&a| selectable(a)).cloned());
            return Ok(Self { targets });
        }

        for pattern in patterns {
            let mut matched = false;
            for addr in graph.addresses() {
                if addr.matches(pattern) && selectable(addr) {
                    targets.insert(addr.clone());
                    matched = true;
                }
            }
            if !matched {
                return Err(SelectError::NoMatch {
                    pattern: pattern.clone(),
                });
            }
        }

        Ok(Self { targets })
    }

    /// The resolved target addresses, in graph order.
    #[must_use]
    pub fn targets(&self) -> &IndexSet<StepAddress> {
        &self.targets
    }

    /// Number of selected steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether nothing was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::StepDeclaration;
    use crate::loader::GraphLoader;

    fn addr(s: &str) -> StepAddress {
        StepAddress::parse(s).unwrap()
    }

    fn graph() -> StepGraph {
        GraphLoader::load(vec![
            StepDeclaration::new(addr("snapshot://eia/2024/raw")).with_source("file:///raw"),
            StepDeclaration::new(addr("data://garden/energy/2024/consumption"))
                .with_dependency(addr("snapshot://eia/2024/raw")),
            StepDeclaration::new(addr("data://garden/minerals/2024/ores"))
                .with_dependency(addr("snapshot://eia/2024/raw"))
                .private(),
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_patterns_select_all_public() {
        let sel = Selection::resolve(&graph(), &[], false).unwrap();
        assert_eq!(sel.len(), 2);
        assert!(!sel.targets().contains(&addr("data://garden/minerals/2024/ores")));
    }

    #[test]
    fn test_empty_patterns_with_private() {
        let sel = Selection::resolve(&graph(), &[], true).unwrap();
        assert_eq!(sel.len(), 3);
    }

    #[test]
    fn test_substring_pattern() {
        let sel = Selection::resolve(&graph(), &["energy".to_string()], false).unwrap();
        assert_eq!(sel.len(), 1);
        assert!(sel.targets().contains(&addr("data://garden/energy/2024/consumption")));
    }

    #[test]
    fn test_exact_pattern() {
        let sel =
            Selection::resolve(&graph(), &["snapshot://eia/2024/raw".to_string()], false).unwrap();
        assert_eq!(sel.len(), 1);
    }

    #[test]
    fn test_no_match_is_error() {
        let err = Selection::resolve(&graph(), &["nonexistent".to_string()], false).unwrap_err();
        assert!(matches!(err, SelectError::NoMatch { .. }));
    }

    #[test]
    fn test_private_not_directly_selectable() {
        let err = Selection::resolve(&graph(), &["minerals".to_string()], false).unwrap_err();
        assert!(matches!(err, SelectError::NoMatch { .. }));

        let sel = Selection::resolve(&graph(), &["minerals".to_string()], true).unwrap();
        assert_eq!(sel.len(), 1);
    }
}
