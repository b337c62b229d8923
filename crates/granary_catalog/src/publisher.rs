//! The catalog publisher.
//!
//! Runners write into a staged directory; on success the publisher writes
//! the build record into that directory and installs the whole thing with
//! a single atomic rename. A crash before the rename leaves the previous
//! entry and record fully intact; after it, both are fully replaced. There
//! is no window where an entry's content and its recorded fingerprint
//! disagree. No locking across steps is needed: the graph's dependency
//! ordering already prevents two writers from touching the same entry.

use crate::entry::EntryRef;
use crate::layout::{RECORD_FILE, STAGING_DIR, entry_dir};
use crate::records::BuildRecord;
use chrono::Utc;
use granary_core::{Fingerprint, StepAddress};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Errors raised while staging or committing entries.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    /// Filesystem failure; the previous entry and record are unchanged.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Record serialization failure.
    #[error("Failed to encode build record for {step}: {reason}")]
    Encode {
        /// The step being committed.
        step: StepAddress,
        /// Encoder detail.
        reason: String,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CommitError + '_ {
    move |source| CommitError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A staged, not-yet-committed entry directory.
#[derive(Debug)]
pub struct StagedEntry {
    address: StepAddress,
    dir: PathBuf,
}

impl StagedEntry {
    /// The step this staging belongs to.
    #[must_use]
    pub fn address(&self) -> &StepAddress {
        &self.address
    }

    /// The staged directory runners write into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Writes catalog entries and build records, atomically per step.
#[derive(Debug, Clone)]
pub struct Publisher {
    root: PathBuf,
}

impl Publisher {
    /// Open a publisher over a catalog root, creating it if needed and
    /// sweeping any staging directories abandoned by a previous crash.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the root cannot be created or the sweep fails.
    pub fn open(root: &Path) -> Result<Self, CommitError> {
        let staging = root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging).map_err(io_err(&staging))?;

        for dent in std::fs::read_dir(&staging).map_err(io_err(&staging))? {
            let dent = dent.map_err(io_err(&staging))?;
            warn!(path = %dent.path().display(), "sweeping abandoned staging directory");
            std::fs::remove_dir_all(dent.path()).map_err(io_err(&dent.path()))?;
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// The catalog root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh staging directory for a step.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be created.
    pub fn stage(&self, address: &StepAddress) -> Result<StagedEntry, CommitError> {
        let dir = self
            .root
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        Ok(StagedEntry {
            address: address.clone(),
            dir,
        })
    }

    /// Commit a staged entry: write the build record into the staged
    /// directory, then install it at the step's canonical location with a
    /// single rename. The previous entry, if any, is moved aside first and
    /// deleted after the install.
    ///
    /// # Errors
    ///
    /// Returns `Encode` or `Io`; on error the previous entry and record
    /// are left untouched (the staged directory may remain and is swept at
    /// next open).
    pub fn commit(
        &self,
        staged: StagedEntry,
        fingerprint: Fingerprint,
    ) -> Result<BuildRecord, CommitError> {
        let final_dir = entry_dir(&self.root, &staged.address);
        let output = final_dir
            .strip_prefix(&self.root)
            .unwrap_or(&final_dir)
            .to_string_lossy()
            .into_owned();

        let record = BuildRecord {
            address: staged.address.clone(),
            fingerprint,
            output,
            completed_at: Utc::now(),
        };

        let record_path = staged.dir.join(RECORD_FILE);
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| CommitError::Encode {
            step: staged.address.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&record_path, bytes).map_err(io_err(&record_path))?;

        if let Some(parent) = final_dir.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        // Move the previous entry aside; rename cannot replace a non-empty
        // directory. A crash between the two renames leaves no entry and no
        // record, which re-plans the step as stale on the next run.
        let retired = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.old", uuid::Uuid::new_v4()));
        let had_previous = final_dir.exists();
        if had_previous {
            std::fs::rename(&final_dir, &retired).map_err(io_err(&final_dir))?;
        }

        if let Err(source) = std::fs::rename(&staged.dir, &final_dir) {
            // Restore the previous entry so the last-good state survives.
            if had_previous {
                let _ = std::fs::rename(&retired, &final_dir);
            }
            return Err(CommitError::Io {
                path: final_dir,
                source,
            });
        }

        if had_previous {
            if let Err(e) = std::fs::remove_dir_all(&retired) {
                warn!(path = %retired.display(), error = %e, "failed to delete retired entry");
            }
        }

        debug!(step = %record.address, fingerprint = %record.fingerprint, "committed entry");
        Ok(record)
    }

    /// Discard a staged entry without committing.
    pub fn discard(&self, staged: StagedEntry) {
        if let Err(e) = std::fs::remove_dir_all(&staged.dir) {
            warn!(path = %staged.dir.display(), error = %e, "failed to discard staging");
        }
    }

    /// Handle to the committed entry for a step, if one exists.
    #[must_use]
    pub fn entry(&self, address: &StepAddress) -> Option<EntryRef> {
        let dir = entry_dir(&self.root, address);
        dir.is_dir().then(|| EntryRef::new(dir))
    }
}
