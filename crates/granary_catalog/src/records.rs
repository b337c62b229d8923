//! Build records.
//!
//! A build record is the persisted last-known-good state of one step: its
//! fingerprint at last successful execution, where the output lives, and
//! when it completed. Records live inside the entry directory they
//! describe (`_record.json`) and are committed by the same rename that
//! installs the entry, so the two can never disagree. A failed run never
//! touches them; the next invocation re-evaluates staleness from the last
//! good baseline.

use crate::layout::{RECORD_FILE, entry_dir};
use chrono::{DateTime, Utc};
use granary_core::{Fingerprint, StepAddress};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors raised by the build record store.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Filesystem failure while reading a record.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A record file exists but does not decode.
    #[error("Corrupt build record at {path}: {reason}")]
    Corrupt {
        /// The record path.
        path: PathBuf,
        /// Decode failure detail.
        reason: String,
    },
}

/// Persisted per-step build state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// The step this record belongs to.
    pub address: StepAddress,
    /// Fingerprint at last successful execution.
    pub fingerprint: Fingerprint,
    /// Where the output was published, relative to the catalog root.
    pub output: String,
    /// Completion time of the last successful execution.
    pub completed_at: DateTime<Utc>,
}

/// Read access to the build records persisted in a catalog.
///
/// The store is a handle threaded through the freshness engine and the
/// publisher; it holds no state beyond the root path.
#[derive(Debug, Clone)]
pub struct BuildRecordStore {
    root: PathBuf,
}

impl BuildRecordStore {
    /// Open a store over a catalog root. The root need not exist yet (a
    /// first run has no records).
    #[must_use]
    pub fn open(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The catalog root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the record for a step, if one was ever committed.
    ///
    /// # Errors
    ///
    /// Returns `Io` for filesystem failures other than absence, `Corrupt`
    /// if the file exists but does not decode.
    pub fn get(&self, address: &StepAddress) -> Result<Option<BuildRecord>, RecordError> {
        let path = entry_dir(&self.root, address).join(RECORD_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RecordError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| RecordError::Corrupt {
                path,
                reason: e.to_string(),
            })
    }

    /// The last-successful fingerprint for a step, if any.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub fn fingerprint(&self, address: &StepAddress) -> Result<Option<Fingerprint>, RecordError> {
        Ok(self.get(address)?.map(|r| r.fingerprint))
    }
}
