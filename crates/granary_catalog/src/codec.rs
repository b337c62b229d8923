//! Table serialization codecs.
//!
//! Every table is written twice: once as JSON (human-inspectable) and once
//! as MessagePack (compact, for programmatic consumers). The two files are
//! logically equivalent; entry validation checks they decode to the same
//! table.

use crate::entry::Table;
use std::path::{Path, PathBuf};

/// File extension of the JSON serialization.
pub const JSON_EXT: &str = "json";

/// File extension of the MessagePack serialization.
pub const MPK_EXT: &str = "mpk";

/// Errors raised by the table codecs.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Filesystem failure.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failure.
    #[error("Codec error on {path}: {reason}")]
    Codec {
        /// The path involved.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CodecError + '_ {
    move |source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write a table into `dir` in both serialization formats.
///
/// # Errors
///
/// Returns `Io` or `Codec` on failure; the JSON file may exist without its
/// MessagePack twin if the second write fails (callers stage and discard).
pub fn write_table(dir: &Path, table: &Table) -> Result<(), CodecError> {
    let json_path = dir.join(format!("{}.{}", table.name, JSON_EXT));
    let bytes = serde_json::to_vec_pretty(table).map_err(|e| CodecError::Codec {
        path: json_path.clone(),
        reason: e.to_string(),
    })?;
    std::fs::write(&json_path, bytes).map_err(io_err(&json_path))?;

    let mpk_path = dir.join(format!("{}.{}", table.name, MPK_EXT));
    let bytes = rmp_serde::to_vec_named(table).map_err(|e| CodecError::Codec {
        path: mpk_path.clone(),
        reason: e.to_string(),
    })?;
    std::fs::write(&mpk_path, bytes).map_err(io_err(&mpk_path))?;

    Ok(())
}

/// Read the JSON serialization of a table.
///
/// # Errors
///
/// Returns `Io` if the file is missing, `Codec` if it does not decode.
pub fn read_table_json(dir: &Path, name: &str) -> Result<Table, CodecError> {
    let path = dir.join(format!("{}.{}", name, JSON_EXT));
    let bytes = std::fs::read(&path).map_err(io_err(&path))?;
    serde_json::from_slice(&bytes).map_err(|e| CodecError::Codec {
        path,
        reason: e.to_string(),
    })
}

/// Read the MessagePack serialization of a table.
///
/// # Errors
///
/// Returns `Io` if the file is missing, `Codec` if it does not decode.
pub fn read_table_mpk(dir: &Path, name: &str) -> Result<Table, CodecError> {
    let path = dir.join(format!("{}.{}", name, MPK_EXT));
    let bytes = std::fs::read(&path).map_err(io_err(&path))?;
    rmp_serde::from_slice(&bytes).map_err(|e| CodecError::Codec {
        path,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> Table {
        let mut t = Table::new("pop", vec!["country".to_string(), "pop".to_string()]);
        t.push_row(vec![json!("KEN"), json!(54_000_000)]);
        t
    }

    #[test]
    fn test_both_formats_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let t = table();
        write_table(tmp.path(), &t).unwrap();

        assert_eq!(read_table_json(tmp.path(), "pop").unwrap(), t);
        assert_eq!(read_table_mpk(tmp.path(), "pop").unwrap(), t);
    }

    #[test]
    fn test_missing_table_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_table_json(tmp.path(), "absent"),
            Err(CodecError::Io { .. })
        ));
    }

    #[test]
    fn test_garbage_is_codec_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("bad.json"), b"not json").unwrap();
        assert!(matches!(
            read_table_json(tmp.path(), "bad"),
            Err(CodecError::Codec { .. })
        ));
    }
}
