//! Content-addressed local-disk tier.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::durable::whole_secs;
use crate::errors::{NexusError, NexusResult};

#[derive(Debug, Serialize, Deserialize)]
struct LocalEnvelope {
    key: String,
    ttl_secs: u64,
    value: String,
}

/// A value read back from disk together with its age.
#[derive(Debug, Clone)]
pub(crate) struct LocalEntry {
    pub(crate) value: Bytes,
    pub(crate) age: Duration,
    pub(crate) ttl: Duration,
}

impl LocalEntry {
    pub(crate) fn is_fresh(&self) -> bool {
        self.age < self.ttl
    }

    pub(crate) fn within_stale_window(&self) -> bool {
        self.age < self.ttl.saturating_mul(2)
    }
}

/// One JSON file per key under `dir`, named by the SHA-256 of the key.
///
/// Age is taken from the file's modification time, so entries survive
/// process restarts.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file that holds `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    pub(crate) async fn read(&self, key: &str) -> NexusResult<Option<LocalEntry>> {
        self.read_at(key, SystemTime::now()).await
    }

    pub(crate) async fn read_at(&self, key: &str, now: SystemTime) -> NexusResult<Option<LocalEntry>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = tokio::fs::metadata(&path).await?.modified()?;

        let envelope: LocalEnvelope = serde_json::from_slice(&raw)?;
        if envelope.key != key {
            return Ok(None);
        }
        let value = BASE64
            .decode(envelope.value.as_bytes())
            .map_err(|e| NexusError::Serialization {
                message: e.to_string(),
            })?;

        let entry = LocalEntry {
            value: Bytes::from(value),
            age: now.duration_since(modified).unwrap_or_default(),
            ttl: Duration::from_secs(envelope.ttl_secs),
        };

        if !entry.within_stale_window() {
            self.remove(key).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub(crate) async fn write(&self, key: &str, value: &[u8], ttl: Duration) -> NexusResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let envelope = LocalEnvelope {
            key: key.to_string(),
            ttl_secs: whole_secs(ttl),
            value: BASE64.encode(value),
        };
        tokio::fs::write(self.path_for(key), serde_json::to_vec(&envelope)?).await?;
        Ok(())
    }

    pub(crate) async fn remove(&self, key: &str) -> NexusResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
