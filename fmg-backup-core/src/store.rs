//! # store: filesystem artifact storage
//!
//! Layout: `<root>/<domain>/<device>_<YYYY-MM-DD_HH-MM-SS>.conf`.
//!
//! Writes are two-phase. [`FsArtifactStore::stage`] writes the content to a temporary file
//! in the target directory and fsyncs it. [`FsArtifactStore::commit`] renames it onto the
//! final path. A crash between the two leaves only an orphaned temporary file, never a
//! partial artifact. Writes to the same key are serialised with a per-key async lock.

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::contract::{ArtifactKey, ArtifactStore, WriteOutcome};
use crate::error::StoreError;

pub const ARTIFACT_EXTENSION: &str = "conf";

/// Storage-safe rendering of a revision timestamp, e.g. `2025-03-05_00-00-00`.
pub const TIMESTAMP_FILE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[/\\:*?"<>|%\x00-\x1f\x7f]"#).expect("static regex is valid"))
}

/// Makes a controller-supplied name usable as one path component.
///
/// Unsafe characters (and `%` itself) are percent-encoded, so distinct names always map
/// to distinct components.
pub fn sanitize_component(name: &str) -> Result<String, StoreError> {
    if name.trim().is_empty() || name == "." || name == ".." {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    let encoded = unsafe_chars().replace_all(name, |caps: &regex::Captures| {
        caps[0]
            .bytes()
            .map(|b| format!("%{b:02X}"))
            .collect::<String>()
    });
    Ok(encoded.into_owned())
}

/// A fully written, fsynced temporary file waiting to be committed.
pub struct StagedArtifact {
    temp: NamedTempFile,
    final_path: PathBuf,
    digest: String,
}

impl StagedArtifact {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}

fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Holds a per-key lock entry. The map entry goes away with the last lease, whichever
/// way the write future ends.
struct KeyLease<'a> {
    store: &'a FsArtifactStore,
    path: PathBuf,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl KeyLease<'_> {
    async fn acquire(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .store
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map and this lease are the only holders.
        if locks
            .get(&self.path)
            .is_some_and(|l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2)
        {
            locks.remove(&self.path);
        }
    }
}

pub struct FsArtifactStore {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of the artifact for `key`.
    pub fn artifact_path(&self, key: &ArtifactKey) -> Result<PathBuf, StoreError> {
        let domain = sanitize_component(&key.domain)?;
        let device = sanitize_component(&key.device)?;
        let file_name = format!(
            "{}_{}.{}",
            device,
            key.timestamp.format(TIMESTAMP_FILE_FORMAT),
            ARTIFACT_EXTENSION
        );
        Ok(self.root.join(domain).join(file_name))
    }

    fn lease_key(&self, path: PathBuf) -> KeyLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks.entry(path.clone()).or_default().clone();
        KeyLease {
            store: self,
            path,
            lock,
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Phase one: write `content` to a temporary file next to the final path.
    pub async fn stage(&self, key: &ArtifactKey, content: &[u8]) -> Result<StagedArtifact, StoreError> {
        let final_path = self.artifact_path(key)?;
        let dir = final_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let prefix = format!(
            ".{}.",
            final_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let digest = sha256_hex(content);
        let bytes = content.to_vec();
        let temp = tokio::task::spawn_blocking(move || -> Result<NamedTempFile, StoreError> {
            let mut temp = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".part")
                .tempfile_in(&dir)
                .map_err(|e| StoreError::io(&dir, e))?;
            temp.write_all(&bytes)
                .and_then(|_| temp.as_file().sync_all())
                .map_err(|e| StoreError::io(temp.path(), e))?;
            Ok(temp)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        debug!(temp = %temp.path().display(), path = %final_path.display(), "Staged artifact");
        Ok(StagedArtifact {
            temp,
            final_path,
            digest,
        })
    }

    /// Phase two: atomically move a staged artifact into place.
    ///
    /// An existing artifact is never replaced. Identical content yields
    /// [`WriteOutcome::Unchanged`], different content a [`StoreError::Conflict`].
    pub async fn commit(&self, staged: StagedArtifact) -> Result<WriteOutcome, StoreError> {
        let StagedArtifact {
            temp,
            final_path,
            digest,
        } = staged;

        if tokio::fs::try_exists(&final_path)
            .await
            .map_err(|e| StoreError::io(&final_path, e))?
        {
            let existing = tokio::fs::read(&final_path)
                .await
                .map_err(|e| StoreError::io(&final_path, e))?;
            let existing_digest = sha256_hex(&existing);
            return if existing_digest == digest {
                debug!(path = %final_path.display(), "Artifact already present with identical content");
                Ok(WriteOutcome::Unchanged)
            } else {
                warn!(
                    path = %final_path.display(),
                    existing = %existing_digest,
                    incoming = %digest,
                    "Artifact exists with different content; keeping the existing file"
                );
                Err(StoreError::Conflict {
                    path: final_path,
                    existing: existing_digest,
                    incoming: digest,
                })
            };
        }

        let target = final_path.clone();
        tokio::task::spawn_blocking(move || {
            temp.persist_noclobber(&target)
                .map(|_| ())
                .map_err(|e| StoreError::io(&target, e.error))
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))??;

        info!(path = %final_path.display(), sha256 = %digest, "Configuration saved");
        Ok(WriteOutcome::Written)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        let path = self.artifact_path(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn write(&self, key: &ArtifactKey, content: &[u8]) -> Result<WriteOutcome, StoreError> {
        let path = self.artifact_path(key)?;
        let lease = self.lease_key(path);
        let result = {
            let _guard = lease.acquire().await;
            match self.stage(key, content).await {
                Ok(staged) => self.commit(staged).await,
                Err(e) => Err(e),
            }
        };
        drop(lease);
        if let Err(e) = &result {
            error!(key = %key, error = %e, "Failed to write artifact");
        }
        result
    }
}
