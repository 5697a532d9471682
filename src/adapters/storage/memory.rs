//! In-memory object store, used by tests and local tooling.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{validate_key, ContentStore, PutOutcome, SignedUrl, UrlSigner};
use crate::error::{MediaError, MediaResult};

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    writes: u64,
}

/// Object store held in a map
pub struct MemoryContentStore {
    inner: Mutex<Inner>,
    signer: UrlSigner,
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new(UrlSigner::new("memory://media", "memory"))
    }
}

impl MemoryContentStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            signer,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of puts that actually wrote bytes
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> MediaResult<PutOutcome> {
        validate_key(key)?;
        let mut inner = self.lock();
        if inner.objects.contains_key(key) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        inner.objects.insert(key.to_string(), bytes.to_vec());
        inner.writes += 1;
        Ok(PutOutcome::Created)
    }

    async fn get(&self, key: &str) -> MediaResult<Vec<u8>> {
        self.lock()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(format!("object {}", key)))
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        Ok(self.lock().objects.contains_key(key))
    }

    async fn delete(&self, key: &str) -> MediaResult<()> {
        self.lock().objects.remove(key);
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> MediaResult<SignedUrl> {
        if !self.lock().objects.contains_key(key) {
            return Err(MediaError::NotFound(format!("object {}", key)));
        }
        Ok(self.signer.sign(key, ttl))
    }
}
