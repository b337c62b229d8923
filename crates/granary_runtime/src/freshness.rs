//! Freshness classification.
//!
//! Walks the graph in topological order, computes every step's fingerprint
//! from its declaration, its dependencies' fingerprints, and (for steps
//! that watch an upstream) a remote probe, and compares against the
//! persisted build record. A dependent is always at least as stale as its
//! most-stale dependency: downstream artifacts never silently go out of
//! sync with upstream data. Remote probes are the only non-deterministic
//! input; a probe failure classifies the step stale and is reported, never
//! fatal.

use granary_catalog::{BuildRecordStore, RecordError};
use granary_core::{Fingerprint, StepAddress};
use granary_graph::StepGraph;
use granary_steps::Remote;
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Per-step classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The persisted record matches the computed fingerprint.
    Fresh,
    /// No record, fingerprint mismatch, stale ancestor, probe failure, or
    /// operator force.
    Stale,
}

/// A reported (non-fatal) probe failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    /// The step whose upstream could not be probed.
    pub step: StepAddress,
    /// The declared upstream location.
    pub source: String,
    /// Failure detail.
    pub reason: String,
}

/// Result of one freshness evaluation.
#[derive(Debug, Clone, Default)]
pub struct FreshnessReport {
    fingerprints: IndexMap<StepAddress, Fingerprint>,
    staleness: IndexMap<StepAddress, Freshness>,
    probe_failures: Vec<ProbeFailure>,
}

impl FreshnessReport {
    /// The computed fingerprint for a step.
    #[must_use]
    pub fn fingerprint(&self, address: &StepAddress) -> Option<Fingerprint> {
        self.fingerprints.get(address).copied()
    }

    /// Whether a step was classified stale. Unknown steps read as fresh.
    #[must_use]
    pub fn is_stale(&self, address: &StepAddress) -> bool {
        matches!(self.staleness.get(address), Some(Freshness::Stale))
    }

    /// Stale addresses, in topological order.
    pub fn stale(&self) -> impl Iterator<Item = &StepAddress> {
        self.staleness
            .iter()
            .filter(|(_, f)| matches!(f, Freshness::Stale))
            .map(|(addr, _)| addr)
    }

    /// Number of stale steps.
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.stale().count()
    }

    /// Probe failures observed during evaluation.
    #[must_use]
    pub fn probe_failures(&self) -> &[ProbeFailure] {
        &self.probe_failures
    }
}

/// Errors fatal to a freshness evaluation.
#[derive(Debug, thiserror::Error)]
pub enum FreshnessError {
    /// The build record store failed (beyond simple absence).
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Computes fingerprints and staleness for a whole graph.
pub struct FreshnessEngine;

impl FreshnessEngine {
    /// Classify every step in the graph.
    ///
    /// `force_patterns` mark matching steps stale regardless of their
    /// fingerprints.
    ///
    /// # Errors
    ///
    /// Returns `Record` if a build record exists but cannot be read;
    /// probe failures are collected in the report instead.
    pub async fn classify(
        graph: &StepGraph,
        records: &BuildRecordStore,
        remote: &dyn Remote,
        force_patterns: &[String],
    ) -> Result<FreshnessReport, FreshnessError> {
        let mut report = FreshnessReport::default();

        for address in graph.topo_order() {
            let decl = match graph.get(&address) {
                Some(decl) => decl,
                None => continue,
            };

            let mut probe_failed = false;
            let probe = if address.kind().probes_upstream() {
                let source = decl.source.clone().unwrap_or_default();
                match remote.probe(&source).await {
                    Ok(token) => Some(token),
                    Err(e) => {
                        warn!(step = %address, error = %e, "probe failed; assuming stale");
                        report.probe_failures.push(ProbeFailure {
                            step: address.clone(),
                            source,
                            reason: e.to_string(),
                        });
                        probe_failed = true;
                        None
                    }
                }
            } else {
                None
            };

            let dep_fingerprints: Vec<Fingerprint> = decl
                .dependencies
                .iter()
                .filter_map(|dep| report.fingerprint(dep))
                .collect();
            let fingerprint =
                Fingerprint::compose(&decl.canonical_bytes(), &dep_fingerprints, probe.as_ref());

            // Monotonic propagation is asserted explicitly as well as
            // inherited through fingerprint composition: a stale ancestor
            // makes every descendant stale even when hashes coincide.
            let stale_dependency = decl.dependencies.iter().any(|dep| report.is_stale(dep));
            let forced = force_patterns.iter().any(|p| address.matches(p));
            let recorded = records.fingerprint(&address)?;

            let stale = forced
                || probe_failed
                || stale_dependency
                || recorded != Some(fingerprint);

            debug!(
                step = %address,
                stale,
                forced,
                stale_dependency,
                "classified"
            );

            report.fingerprints.insert(address.clone(), fingerprint);
            report.staleness.insert(
                address,
                if stale { Freshness::Stale } else { Freshness::Fresh },
            );
        }

        Ok(report)
    }
}
