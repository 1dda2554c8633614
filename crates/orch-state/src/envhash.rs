//! Environment Hasher (C11): a single fingerprint over every lockfile in
//! the workspace, binding a worker's recorded environment to the one the
//! supervisor installed at Stage 0.5.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::StateError;
use crate::state::EnvironmentRecord;

/// Hash value used when no lockfile is present.
pub const NO_LOCK: &str = "no-lock";

/// Number of leading hex characters kept from the full digest.
const HASH_PREFIX_LEN: usize = 8;

/// Compute the environment fingerprint for `root`: every basename in
/// `lockfile_names` that exists directly under `root`, in the order
/// given, hashed as `<filename>` then its raw bytes, truncated to the
/// first [`HASH_PREFIX_LEN`] hex characters of SHA-256.
///
/// # Errors
///
/// [`StateError::Io`] if a lockfile that exists can't be read.
pub async fn compute(root: &Path, lockfile_names: &[String]) -> Result<EnvironmentRecord, StateError> {
    let mut present = Vec::new();
    for name in lockfile_names {
        let path = root.join(name);
        if tokio::fs::metadata(&path).await.is_ok() {
            present.push(name.clone());
        }
    }

    if present.is_empty() {
        return Ok(EnvironmentRecord {
            hash: NO_LOCK.to_string(),
            lockfiles: Vec::new(),
            recorded_at: Some(chrono::Utc::now()),
        });
    }

    let mut hasher = Sha256::new();
    for name in &present {
        let path = root.join(name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| StateError::Io { path: path.display().to_string(), source })?;
        hasher.update(name.as_bytes());
        hasher.update(&bytes);
    }
    let digest = hasher.finalize();
    let hash = hex::encode(digest)[..HASH_PREFIX_LEN].to_string();

    Ok(EnvironmentRecord { hash, lockfiles: present, recorded_at: Some(chrono::Utc::now()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_workspace_hashes_to_no_lock() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let record = compute(dir.path(), &["Cargo.lock".to_string()]).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(record.hash, NO_LOCK);
        assert!(record.lockfiles.is_empty());
    }

    #[tokio::test]
    async fn hash_is_deterministic_for_same_content() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        tokio::fs::write(dir.path().join("Cargo.lock"), b"lockfile contents").await.unwrap_or_else(|e| panic!("{e}"));

        let names = vec!["Cargo.lock".to_string()];
        let first = compute(dir.path(), &names).await.unwrap_or_else(|e| panic!("{e}"));
        let second = compute(dir.path(), &names).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(first.hash, second.hash);
        assert_eq!(first.hash.len(), 8);
    }

    #[tokio::test]
    async fn hash_changes_when_content_changes() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let names = vec!["Cargo.lock".to_string()];

        tokio::fs::write(dir.path().join("Cargo.lock"), b"v1").await.unwrap_or_else(|e| panic!("{e}"));
        let first = compute(dir.path(), &names).await.unwrap_or_else(|e| panic!("{e}"));

        tokio::fs::write(dir.path().join("Cargo.lock"), b"v2").await.unwrap_or_else(|e| panic!("{e}"));
        let second = compute(dir.path(), &names).await.unwrap_or_else(|e| panic!("{e}"));

        assert_ne!(first.hash, second.hash);
    }

    #[tokio::test]
    async fn only_present_lockfiles_are_recorded() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        tokio::fs::write(dir.path().join("Cargo.lock"), b"present").await.unwrap_or_else(|e| panic!("{e}"));

        let names = vec!["Cargo.lock".to_string(), "pnpm-lock.yaml".to_string()];
        let record = compute(dir.path(), &names).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(record.lockfiles, vec!["Cargo.lock".to_string()]);
    }
}
