//! Content-addressed object storage.
//!
//! Keys are derived from content, so two writers of the same key always
//! carry the same bytes: `put` is first-writer-wins and a collision is a
//! successful no-op rather than an overwrite.

pub mod fs;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};

use crate::error::{InvalidInput, MediaResult};

pub use fs::FsContentStore;
pub use memory::MemoryContentStore;

/// Result of a `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Bytes were written
    Created,
    /// Key already held (identical) content
    AlreadyPresent,
}

/// A time-bounded access URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Trait for object storage backends
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Write bytes if the key is absent
    async fn put(&self, key: &str, bytes: &[u8]) -> MediaResult<PutOutcome>;

    /// Read bytes, or `NotFound`
    async fn get(&self, key: &str) -> MediaResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> MediaResult<bool>;

    /// Remove an object; removing a missing key succeeds
    async fn delete(&self, key: &str) -> MediaResult<()>;

    /// Issue a URL granting read access until `now + ttl`
    async fn signed_url(&self, key: &str, ttl: Duration) -> MediaResult<SignedUrl>;
}

/// Reject keys that could escape the store root
pub fn validate_key(key: &str) -> MediaResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");

    if bad {
        return Err(InvalidInput::InvalidStorageKey(key.to_string()).into());
    }
    Ok(())
}

/// Everything but RFC 3986 unreserved characters is escaped in a key segment
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, KEY_SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// HMAC-style URL signer: sha256(secret, key, expiry)
#[derive(Debug, Clone)]
pub struct UrlSigner {
    base_url: String,
    secret: String,
}

impl UrlSigner {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Sign a key relative to a given instant
    pub fn sign_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> SignedUrl {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let expires_at = now + ttl;
        let expires = expires_at.timestamp();

        SignedUrl {
            url: format!(
                "{}/{}?expires={}&signature={}",
                self.base_url,
                encode_key(key),
                expires,
                self.signature(key, expires)
            ),
            expires_at,
        }
    }

    pub fn sign(&self, key: &str, ttl: Duration) -> SignedUrl {
        self.sign_at(key, ttl, Utc::now())
    }

    /// Check a URL produced by this signer; returns the object key if valid
    pub fn verify_at(&self, url: &str, now: DateTime<Utc>) -> Option<String> {
        let rest = url.strip_prefix(&self.base_url)?.strip_prefix('/')?;
        let (encoded, query) = rest.split_once('?')?;
        let key = percent_decode_str(encoded).decode_utf8().ok()?;

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = Some(v),
                _ => {}
            }
        }

        let expires = expires?;
        if now.timestamp() > expires || signature? != self.signature(&key, expires) {
            return None;
        }
        Some(key.into_owned())
    }

    pub fn verify(&self, url: &str) -> Option<String> {
        self.verify_at(url, Utc::now())
    }
}
