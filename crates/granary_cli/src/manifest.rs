//! Manifest loading.
//!
//! The manifest is a JSON document listing step declarations. The richer
//! declarative templating of upstream metadata systems is out of scope;
//! this file is the engine's whole input surface.

use granary_graph::StepDeclaration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Errors raised while loading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest file could not be read.
    #[error("Cannot read manifest {path}: {source}")]
    Io {
        /// The manifest path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest did not parse.
    #[error("Cannot parse manifest {path}: {reason}")]
    Parse {
        /// The manifest path.
        path: PathBuf,
        /// Parser detail (includes malformed addresses).
        reason: String,
    },
}

/// The manifest document.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    /// All declared steps.
    pub steps: Vec<StepDeclaration>,
}

/// Load a manifest from disk.
///
/// # Errors
///
/// Returns `Io` or `Parse`.
pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
    let bytes = std::fs::read(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ManifestError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_core::StepKind;

    #[test]
    fn test_load_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("steps.json");
        std::fs::write(
            &path,
            r#"{
                "steps": [
                    {"address": "snapshot://eia/2024/raw", "source": "file:///raw.csv"},
                    {"address": "data://garden/energy/2024", "dependencies": ["snapshot://eia/2024/raw"]}
                ]
            }"#,
        )
        .unwrap();

        let manifest = load(&path).unwrap();
        assert_eq!(manifest.steps.len(), 2);
        assert_eq!(manifest.steps[0].kind(), StepKind::Snapshot);
    }

    #[test]
    fn test_malformed_address_is_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("steps.json");
        std::fs::write(&path, r#"{"steps": [{"address": "nope"}]}"#).unwrap();
        assert!(matches!(load(&path), Err(ManifestError::Parse { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(&tmp.path().join("absent.json")),
            Err(ManifestError::Io { .. })
        ));
    }
}
