//! Local filesystem object store.
//!
//! Writes go to a temp file in the target directory, are fsynced, then
//! persisted with no-clobber semantics: concurrent writers of one key race
//! safely and exactly one rename wins.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::fs;

use super::{validate_key, ContentStore, PutOutcome, SignedUrl, UrlSigner};
use crate::error::{MediaError, MediaResult};

/// Object store rooted at a local directory
pub struct FsContentStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn object_path(&self, key: &str) -> MediaResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Blocking write-then-persist; runs on the blocking pool
fn persist_no_clobber(path: &Path, bytes: &[u8]) -> MediaResult<PutOutcome> {
    let parent = path
        .parent()
        .ok_or_else(|| MediaError::TransientIo(format!("No parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    if path.exists() {
        return Ok(PutOutcome::AlreadyPresent);
    }

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(PutOutcome::Created),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(PutOutcome::AlreadyPresent)
        }
        Err(e) => Err(e.error.into()),
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    fn name(&self) -> &str {
        "fs"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> MediaResult<PutOutcome> {
        let path = self.object_path(key)?;
        let bytes = bytes.to_vec();

        let outcome = tokio::task::spawn_blocking(move || persist_no_clobber(&path, &bytes))
            .await
            .map_err(|e| MediaError::TransientIo(format!("Store write task failed: {}", e)))??;

        tracing::debug!(key, ?outcome, "Stored object");
        Ok(outcome)
    }

    async fn get(&self, key: &str) -> MediaResult<Vec<u8>> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MediaError::NotFound(format!("object {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        let path = self.object_path(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> MediaResult<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> MediaResult<SignedUrl> {
        if !self.exists(key).await? {
            return Err(MediaError::NotFound(format!("object {}", key)));
        }
        Ok(self.signer.sign(key, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(temp: &TempDir) -> FsContentStore {
        FsContentStore::new(
            temp.path().join("objects"),
            UrlSigner::new("http://localhost/media", "secret"),
        )
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        let outcome = store.put("user-1/h/thumb.webp", b"bytes").await.unwrap();
        assert_eq!(outcome, PutOutcome::Created);
        assert_eq!(store.get("user-1/h/thumb.webp").await.unwrap(), b"bytes");
        assert!(temp.path().join("objects/user-1/h/thumb.webp").exists());
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        store.put("k/a.webp", b"first").await.unwrap();
        let second = store.put("k/a.webp", b"second").await.unwrap();

        assert_eq!(second, PutOutcome::AlreadyPresent);
        assert_eq!(store.get("k/a.webp").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_concurrent_puts_create_once() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(store(&temp));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put("race/obj.png", b"same").await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() == PutOutcome::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(matches!(
            store.get("nope/x.webp").await,
            Err(MediaError::NotFound(_))
        ));
        assert!(matches!(
            store.signed_url("nope/x.webp", Duration::from_secs(5)).await,
            Err(MediaError::NotFound(_))
        ));
        assert!(store.delete("nope/x.webp").await.is_ok());
    }

    #[tokio::test]
    async fn test_signed_url_verifies() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.put("u/h/v.webp", b"x").await.unwrap();

        let signed = store.signed_url("u/h/v.webp", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.signer().verify(&signed.url).as_deref(), Some("u/h/v.webp"));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        assert!(matches!(
            store.put("../escape.webp", b"x").await,
            Err(MediaError::InvalidInput(_))
        ));
    }
}
