//! Upstream remotes.
//!
//! A [`Remote`] is the boundary to external publishers: it can fetch a
//! resource's bytes and probe its current state cheaply. Probing is the
//! only non-deterministic input to freshness evaluation; everything else
//! is a pure function of known values. Transport details (HTTP, cloud
//! buckets) live behind this trait.

use async_trait::async_trait;
use granary_core::{Hash, ProbeToken};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Errors raised by remote operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The resource could not be reached or read.
    #[error("Upstream unavailable: {source_location}: {reason}")]
    Unavailable {
        /// The declared upstream location.
        source_location: String,
        /// Failure detail.
        reason: String,
    },

    /// The probe or fetch timed out.
    #[error("Upstream timed out: {source_location}")]
    Timeout {
        /// The declared upstream location.
        source_location: String,
    },
}

/// Access to an upstream resource: cheap state probes and full fetches.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Probe the resource's current state. The returned token (ETag,
    /// commit hash, content checksum) must change whenever the resource
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Timeout`; the freshness engine treats
    /// either as "assume stale" and reports it.
    async fn probe(&self, source_location: &str) -> Result<ProbeToken, RemoteError>;

    /// Fetch the resource's bytes.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Timeout`.
    async fn fetch(&self, source_location: &str) -> Result<Vec<u8>, RemoteError>;
}

/// Remote over the local filesystem. Sources are plain paths or
/// `file://` URLs; the probe token is the content hash, so a source is
/// exactly as stale as its bytes.
#[derive(Debug, Default)]
pub struct FsRemote {
    base: Option<PathBuf>,
}

impl FsRemote {
    /// Remote resolving sources as absolute or cwd-relative paths.
    #[must_use]
    pub fn new() -> Self {
        Self { base: None }
    }

    /// Remote resolving relative sources against a base directory.
    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self { base: Some(base) }
    }

    fn resolve(&self, source_location: &str) -> PathBuf {
        let path = source_location
            .strip_prefix("file://")
            .unwrap_or(source_location);
        match &self.base {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }
}

#[async_trait]
impl Remote for FsRemote {
    async fn probe(&self, source_location: &str) -> Result<ProbeToken, RemoteError> {
        let bytes = self.fetch(source_location).await?;
        Ok(ProbeToken::new(Hash::compute(&bytes).to_hex()))
    }

    async fn fetch(&self, source_location: &str) -> Result<Vec<u8>, RemoteError> {
        let path = self.resolve(source_location);
        tokio::fs::read(&path)
            .await
            .map_err(|e| RemoteError::Unavailable {
                source_location: source_location.to_string(),
                reason: e.to_string(),
            })
    }
}

/// In-memory remote for tests and fixtures. Contents can be swapped
/// between runs to simulate upstream changes, and individual sources can
/// be made to fail.
#[derive(Debug, Default)]
pub struct StaticRemote {
    contents: RwLock<HashMap<String, Vec<u8>>>,
    failing: RwLock<HashMap<String, String>>,
}

impl StaticRemote {
    /// Empty remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a source's contents.
    pub fn put(&self, source_location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.contents
            .write()
            .expect("remote lock poisoned")
            .insert(source_location.into(), bytes.into());
    }

    /// Make a source fail with the given reason.
    pub fn fail(&self, source_location: impl Into<String>, reason: impl Into<String>) {
        self.failing
            .write()
            .expect("remote lock poisoned")
            .insert(source_location.into(), reason.into());
    }

    /// Clear a failure injected with [`fail`](Self::fail).
    pub fn heal(&self, source_location: &str) {
        self.failing
            .write()
            .expect("remote lock poisoned")
            .remove(source_location);
    }

    fn check_failing(&self, source_location: &str) -> Result<(), RemoteError> {
        if let Some(reason) = self
            .failing
            .read()
            .expect("remote lock poisoned")
            .get(source_location)
        {
            return Err(RemoteError::Unavailable {
                source_location: source_location.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Remote for StaticRemote {
    async fn probe(&self, source_location: &str) -> Result<ProbeToken, RemoteError> {
        self.check_failing(source_location)?;
        let bytes = self.fetch(source_location).await?;
        Ok(ProbeToken::new(Hash::compute(&bytes).to_hex()))
    }

    async fn fetch(&self, source_location: &str) -> Result<Vec<u8>, RemoteError> {
        self.check_failing(source_location)?;
        self.contents
            .read()
            .expect("remote lock poisoned")
            .get(source_location)
            .cloned()
            .ok_or_else(|| RemoteError::Unavailable {
                source_location: source_location.to_string(),
                reason: "no such source".to_string(),
            })
    }
}
