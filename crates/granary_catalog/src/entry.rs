//! Catalog entries: dataset metadata and tables.
//!
//! A published entry is a directory holding one `dataset.json` metadata
//! document plus zero or more tables, each stored in two logically
//! equivalent serialization formats (JSON and MessagePack) for consumer
//! flexibility. The engine validates structural well-formedness after a
//! data step runs, never semantic correctness.

use crate::codec::{self, CodecError};
use crate::layout::{META_FILE, PAYLOAD_DIR};
use granary_core::{Hash, StepAddress};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors raised while reading or validating entries.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    /// Filesystem failure while reading an entry.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Metadata document missing or undecodable.
    #[error("Invalid metadata document at {path}: {reason}")]
    InvalidMeta {
        /// The metadata path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// Structural validation failure.
    #[error("Malformed dataset `{name}`: {reason}")]
    Malformed {
        /// Dataset or table name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Table codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Provenance recorded with every entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// The step that produced this entry.
    pub step: StepAddress,
    /// Upstream location, for snapshot-derived entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Content hash of the fetched payload, for snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<Hash>,
    /// Upstream probe token observed at fetch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<String>,
    /// Addresses of the inputs this entry was derived from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<StepAddress>,
}

impl Provenance {
    /// Provenance naming only the producing step.
    #[must_use]
    pub fn for_step(step: StepAddress) -> Self {
        Self {
            step,
            source: None,
            content_hash: None,
            probe: None,
            inputs: Vec::new(),
        }
    }
}

/// The metadata document stored as `dataset.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMeta {
    /// Dataset short name (last address segment by convention).
    pub name: String,
    /// Dataset version (release segment by convention).
    pub version: String,
    /// Stable identifier for external upserts.
    pub stable_id: String,
    /// Where this data came from.
    pub provenance: Provenance,
}

/// One table: named columns and rows of JSON values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name; becomes the file stem on disk.
    pub name: String,
    /// Column names, unique and non-empty.
    pub columns: Vec<String>,
    /// Row-major data; every row has exactly `columns.len()` values.
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Table {
    /// Create an empty table with the given columns.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row.
    pub fn push_row(&mut self, row: Vec<serde_json::Value>) {
        self.rows.push(row);
    }

    /// Structural validation: non-empty unique columns, consistent widths.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` describing the first violation found.
    pub fn validate(&self) -> Result<(), EntryError> {
        let malformed = |reason: String| EntryError::Malformed {
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(malformed("empty table name".to_string()));
        }
        if self.columns.is_empty() {
            return Err(malformed("no columns".to_string()));
        }
        for (i, col) in self.columns.iter().enumerate() {
            if col.is_empty() {
                return Err(malformed(format!("column {} has an empty name", i)));
            }
            if self.columns[..i].contains(col) {
                return Err(malformed(format!("duplicate column `{}`", col)));
            }
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(malformed(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }
}

/// A complete dataset: metadata plus tables, as produced by a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// The metadata document.
    pub meta: DatasetMeta,
    /// The tables.
    pub tables: Vec<Table>,
}

impl Dataset {
    /// Structural validation of the whole dataset.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for empty names, duplicate table names, or any
    /// table-level violation.
    pub fn validate(&self) -> Result<(), EntryError> {
        if self.meta.name.is_empty() {
            return Err(EntryError::Malformed {
                name: self.meta.name.clone(),
                reason: "empty dataset name".to_string(),
            });
        }
        if self.meta.stable_id.is_empty() {
            return Err(EntryError::Malformed {
                name: self.meta.name.clone(),
                reason: "empty stable identifier".to_string(),
            });
        }
        for (i, table) in self.tables.iter().enumerate() {
            if self.tables[..i].iter().any(|t| t.name == table.name) {
                return Err(EntryError::Malformed {
                    name: self.meta.name.clone(),
                    reason: format!("duplicate table `{}`", table.name),
                });
            }
            table.validate()?;
        }
        Ok(())
    }

    /// Write the dataset into a directory: metadata plus every table in
    /// both formats.
    ///
    /// # Errors
    ///
    /// Returns `Io` or codec errors; the directory may be partially
    /// written on failure (callers stage and discard).
    pub fn write_to(&self, dir: &Path) -> Result<(), EntryError> {
        let meta_path = dir.join(META_FILE);
        let bytes = serde_json::to_vec_pretty(&self.meta).map_err(|e| EntryError::InvalidMeta {
            path: meta_path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&meta_path, bytes).map_err(|source| EntryError::Io {
            path: meta_path,
            source,
        })?;
        for table in &self.tables {
            codec::write_table(dir, table)?;
        }
        Ok(())
    }
}

/// Handle to a committed catalog entry on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRef {
    dir: PathBuf,
}

impl EntryRef {
    /// Wrap an entry directory.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The entry directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the metadata document.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the document is missing, `InvalidMeta` if it does
    /// not decode.
    pub fn meta(&self) -> Result<DatasetMeta, EntryError> {
        let path = self.dir.join(META_FILE);
        let bytes = std::fs::read(&path).map_err(|source| EntryError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| EntryError::InvalidMeta {
            path,
            reason: e.to_string(),
        })
    }

    /// Names of the tables stored in this entry, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the directory cannot be listed.
    pub fn table_names(&self) -> Result<Vec<String>, EntryError> {
        let mut names = Vec::new();
        let read_dir = std::fs::read_dir(&self.dir).map_err(|source| EntryError::Io {
            path: self.dir.clone(),
            source,
        })?;
        for dent in read_dir {
            let dent = dent.map_err(|source| EntryError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = dent.path();
            if path.extension().and_then(|e| e.to_str()) == Some(codec::JSON_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if stem != "dataset" && !stem.starts_with('_') {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load one table (JSON form).
    ///
    /// # Errors
    ///
    /// Returns codec errors if the table is missing or undecodable.
    pub fn table(&self, name: &str) -> Result<Table, EntryError> {
        Ok(codec::read_table_json(&self.dir, name)?)
    }

    /// Paths of content-addressed payload files, for snapshot entries.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the payload directory exists but cannot be listed.
    pub fn payload_paths(&self) -> Result<Vec<PathBuf>, EntryError> {
        let dir = self.dir.join(PAYLOAD_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        let read_dir = std::fs::read_dir(&dir).map_err(|source| EntryError::Io {
            path: dir.clone(),
            source,
        })?;
        for dent in read_dir {
            let dent = dent.map_err(|source| EntryError::Io {
                path: dir.clone(),
                source,
            })?;
            paths.push(dent.path());
        }
        paths.sort();
        Ok(paths)
    }

    /// Validate structural well-formedness of the committed entry: the
    /// metadata document decodes and every table decodes identically from
    /// both serialization formats.
    ///
    /// # Errors
    ///
    /// Returns the first structural violation found.
    pub fn validate(&self) -> Result<(), EntryError> {
        let meta = self.meta()?;
        for name in self.table_names()? {
            let json = codec::read_table_json(&self.dir, &name)?;
            json.validate()?;
            let mpk = codec::read_table_mpk(&self.dir, &name)?;
            if json != mpk {
                return Err(EntryError::Malformed {
                    name: meta.name.clone(),
                    reason: format!("table `{}` differs between serializations", name),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> DatasetMeta {
        DatasetMeta {
            name: "consumption".to_string(),
            version: "2024".to_string(),
            stable_id: "energy/2024/consumption".to_string(),
            provenance: Provenance::for_step(
                StepAddress::parse("data://garden/energy/2024/consumption").unwrap(),
            ),
        }
    }

    fn table() -> Table {
        let mut t = Table::new(
            "consumption",
            vec!["country".to_string(), "year".to_string(), "ej".to_string()],
        );
        t.push_row(vec![json!("FRA"), json!(2024), json!(9.1)]);
        t.push_row(vec![json!("DEU"), json!(2024), json!(12.3)]);
        t
    }

    #[test]
    fn test_table_validate_ok() {
        assert!(table().validate().is_ok());
    }

    #[test]
    fn test_table_validate_rejects_ragged_rows() {
        let mut t = table();
        t.push_row(vec![json!("GBR")]);
        assert!(matches!(t.validate(), Err(EntryError::Malformed { .. })));
    }

    #[test]
    fn test_table_validate_rejects_duplicate_columns() {
        let t = Table::new("t", vec!["a".to_string(), "a".to_string()]);
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_table_validate_rejects_empty_columns() {
        let t = Table::new("t", vec![]);
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_dataset_validate_rejects_duplicate_tables() {
        let ds = Dataset {
            meta: meta(),
            tables: vec![table(), table()],
        };
        assert!(ds.validate().is_err());
    }

    #[test]
    fn test_dataset_write_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let ds = Dataset {
            meta: meta(),
            tables: vec![table()],
        };
        ds.validate().unwrap();
        ds.write_to(tmp.path()).unwrap();

        let entry = EntryRef::new(tmp.path().to_path_buf());
        assert_eq!(entry.meta().unwrap(), ds.meta);
        assert_eq!(entry.table_names().unwrap(), vec!["consumption"]);
        assert_eq!(entry.table("consumption").unwrap(), ds.tables[0]);
        entry.validate().unwrap();
    }

    #[test]
    fn test_entry_validate_detects_divergent_formats() {
        let tmp = tempfile::tempdir().unwrap();
        let ds = Dataset {
            meta: meta(),
            tables: vec![table()],
        };
        ds.write_to(tmp.path()).unwrap();

        // Corrupt the JSON side only.
        let mut broken = table();
        broken.rows.clear();
        let path = tmp.path().join("consumption.json");
        std::fs::write(&path, serde_json::to_vec(&broken).unwrap()).unwrap();

        let entry = EntryRef::new(tmp.path().to_path_buf());
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_payload_paths_empty_without_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = EntryRef::new(tmp.path().to_path_buf());
        assert!(entry.payload_paths().unwrap().is_empty());
    }
}
