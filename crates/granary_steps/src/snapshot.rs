//! Snapshot runner: pin a raw external resource into the catalog.

use crate::remote::Remote;
use crate::runner::{ExecutionContext, RunnerError, RunnerOutput, StepRunner};
use async_trait::async_trait;
use granary_catalog::layout::{META_FILE, PAYLOAD_DIR};
use granary_catalog::{DatasetMeta, Provenance};
use granary_core::{ContentAddress, Hash};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

/// Fetches the declared upstream resource, verifies integrity against the
/// declared checksum when one is pinned, and writes the payload
/// content-addressed into the staged entry with provenance metadata.
pub struct SnapshotRunner {
    remote: Arc<dyn Remote>,
}

impl SnapshotRunner {
    /// Runner fetching through the given remote.
    #[must_use]
    pub fn new(remote: Arc<dyn Remote>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl StepRunner for SnapshotRunner {
    async fn execute(&self, ctx: ExecutionContext) -> Result<RunnerOutput, RunnerError> {
        // The loader guarantees a source on snapshot steps.
        let source = ctx.declaration.source.clone().unwrap_or_default();

        let bytes = self.remote.fetch(&source).await?;

        if let Some(declared) = &ctx.declaration.checksum {
            let actual = hex::encode(Sha256::digest(&bytes));
            if &actual != declared {
                return Err(RunnerError::Integrity {
                    expected: declared.clone(),
                    actual,
                });
            }
        }

        let payload_dir = ctx.staging_dir.join(PAYLOAD_DIR);
        std::fs::create_dir_all(&payload_dir).map_err(|source| RunnerError::Io {
            path: payload_dir.clone(),
            source,
        })?;

        let content = ContentAddress::from_data(&bytes);
        let payload_path = payload_dir.join(content.file_name());
        std::fs::write(&payload_path, &bytes).map_err(|source| RunnerError::Io {
            path: payload_path,
            source,
        })?;

        let address = ctx.address();
        let segments: Vec<&str> = address.segments().collect();
        let meta = DatasetMeta {
            name: segments.last().copied().unwrap_or("snapshot").to_string(),
            version: segments
                .len()
                .checked_sub(2)
                .and_then(|i| segments.get(i))
                .copied()
                .unwrap_or("latest")
                .to_string(),
            stable_id: address.path().to_string(),
            provenance: Provenance {
                step: address.clone(),
                source: Some(source),
                content_hash: Some(Hash::compute(&bytes)),
                probe: Some(content.hash().to_hex()),
                inputs: Vec::new(),
            },
        };

        let meta_path = ctx.staging_dir.join(META_FILE);
        let encoded = serde_json::to_vec_pretty(&meta).map_err(|e| {
            RunnerError::Entry(granary_catalog::EntryError::InvalidMeta {
                path: meta_path.clone(),
                reason: e.to_string(),
            })
        })?;
        std::fs::write(&meta_path, encoded).map_err(|source| RunnerError::Io {
            path: meta_path,
            source,
        })?;

        info!(step = %address, bytes = bytes.len(), "snapshot pinned");
        Ok(RunnerOutput::with_note(format!(
            "pinned {} bytes as {}",
            bytes.len(),
            content
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StaticRemote;
    use granary_catalog::EntryRef;
    use granary_core::{RunId, StepAddress};
    use granary_graph::StepDeclaration;

    fn ctx(decl: StepDeclaration, dir: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(RunId::new(), decl, dir.to_path_buf())
    }

    fn declaration() -> StepDeclaration {
        StepDeclaration::new(StepAddress::parse("snapshot://eia/2024/raw").unwrap())
            .with_source("src")
    }

    #[tokio::test]
    async fn test_fetch_writes_payload_and_meta() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(StaticRemote::new());
        remote.put("src", b"a,b\n1,2\n".to_vec());
        let runner = SnapshotRunner::new(remote);

        let out = runner.execute(ctx(declaration(), tmp.path())).await.unwrap();
        assert!(out.note.unwrap().contains("8 bytes"));

        let entry = EntryRef::new(tmp.path().to_path_buf());
        let meta = entry.meta().unwrap();
        assert_eq!(meta.name, "raw");
        assert_eq!(meta.version, "2024");
        assert!(meta.provenance.content_hash.unwrap().verify(b"a,b\n1,2\n"));

        let payloads = entry.payload_paths().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(std::fs::read(&payloads[0]).unwrap(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_integrity_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(StaticRemote::new());
        remote.put("src", b"tampered".to_vec());
        let runner = SnapshotRunner::new(remote);

        let decl = declaration().with_checksum(hex::encode(Sha256::digest(b"original")));
        let err = runner.execute(ctx(decl, tmp.path())).await.unwrap_err();
        assert!(matches!(err, RunnerError::Integrity { .. }));
    }

    #[tokio::test]
    async fn test_integrity_match_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(StaticRemote::new());
        remote.put("src", b"payload".to_vec());
        let runner = SnapshotRunner::new(remote);

        let decl = declaration().with_checksum(hex::encode(Sha256::digest(b"payload")));
        assert!(runner.execute(ctx(decl, tmp.path())).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_fetch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = Arc::new(StaticRemote::new());
        remote.fail("src", "connection refused");
        let runner = SnapshotRunner::new(remote);

        let err = runner.execute(ctx(declaration(), tmp.path())).await.unwrap_err();
        assert!(matches!(err, RunnerError::Fetch(_)));
    }
}
