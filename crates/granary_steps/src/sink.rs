//! External upsert sinks.
//!
//! A `publish` step pushes a data step's catalog entry into an external
//! consuming system. That system is specified only by its idempotent
//! upsert contract: create-if-absent, update-if-present, keyed by a stable
//! identifier. Which concrete sink a run targets (staging vs production)
//! is operator-supplied configuration, never part of a step declaration.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Errors raised by upsert sinks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The external system rejected or failed the upsert.
    #[error("Upsert to {target} failed for key `{key}`: {reason}")]
    Upsert {
        /// The sink target name.
        target: String,
        /// The upsert key.
        key: String,
        /// Failure detail.
        reason: String,
    },
}

/// An external consuming system's upsert surface.
#[async_trait]
pub trait UpsertSink: Send + Sync {
    /// Human-readable target name (e.g. `staging`, `production`).
    fn target(&self) -> &str;

    /// Create-or-update the document stored under `key`. Must be
    /// idempotent: upserting the same document twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Upsert` on failure; no partial state may remain visible.
    async fn upsert(&self, key: &str, document: &serde_json::Value) -> Result<(), SinkError>;
}

/// Sink writing one JSON file per key into a directory. Stands in for the
/// downstream store in local setups; the upsert is a plain
/// create-or-replace, which is idempotent by construction.
#[derive(Debug)]
pub struct DirSink {
    target: String,
    dir: PathBuf,
}

impl DirSink {
    /// Sink writing under `dir`, reported as `target` in summaries.
    #[must_use]
    pub fn new(target: impl Into<String>, dir: PathBuf) -> Self {
        Self {
            target: target.into(),
            dir,
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        // Keys are slash-delimited stable ids; keep them readable on disk.
        let name: String = key
            .chars()
            .map(|c| if c == '/' { '_' } else { c })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl UpsertSink for DirSink {
    fn target(&self) -> &str {
        &self.target
    }

    async fn upsert(&self, key: &str, document: &serde_json::Value) -> Result<(), SinkError> {
        let err = |reason: String| SinkError::Upsert {
            target: self.target.clone(),
            key: key.to_string(),
            reason,
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| err(e.to_string()))?;
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| err(e.to_string()))?;
        tokio::fs::write(self.key_path(key), bytes)
            .await
            .map_err(|e| err(e.to_string()))
    }
}

/// In-memory sink for tests; remembers every upserted document and counts
/// writes so idempotency can be asserted.
#[derive(Debug, Default)]
pub struct MemorySink {
    target: String,
    documents: Mutex<IndexMap<String, serde_json::Value>>,
    upserts: Mutex<usize>,
}

impl MemorySink {
    /// Empty sink reported as `target`.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            documents: Mutex::new(IndexMap::new()),
            upserts: Mutex::new(0),
        }
    }

    /// The document stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .expect("sink lock poisoned")
            .get(key)
            .cloned()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().expect("sink lock poisoned").len()
    }

    /// Whether the sink is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total upsert calls observed.
    #[must_use]
    pub fn upsert_count(&self) -> usize {
        *self.upserts.lock().expect("sink lock poisoned")
    }
}

#[async_trait]
impl UpsertSink for MemorySink {
    fn target(&self) -> &str {
        &self.target
    }

    async fn upsert(&self, key: &str, document: &serde_json::Value) -> Result<(), SinkError> {
        *self.upserts.lock().expect("sink lock poisoned") += 1;
        self.documents
            .lock()
            .expect("sink lock poisoned")
            .insert(key.to_string(), document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dir_sink_create_then_update() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = DirSink::new("staging", tmp.path().to_path_buf());

        sink.upsert("energy/2024", &json!({"v": 1})).await.unwrap();
        sink.upsert("energy/2024", &json!({"v": 2})).await.unwrap();

        let path = tmp.path().join("energy_2024.json");
        let doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(doc, json!({"v": 2}));
    }

    #[tokio::test]
    async fn test_memory_sink_counts_upserts() {
        let sink = MemorySink::new("staging");
        sink.upsert("k", &json!(1)).await.unwrap();
        sink.upsert("k", &json!(1)).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.upsert_count(), 2);
        assert_eq!(sink.get("k"), Some(json!(1)));
    }
}
