//! Media assets and their lifecycle state.
//!
//! An asset is the owner-scoped identity of one uploaded image. Its id is
//! derived from the content hash, so identical bytes uploaded twice by the
//! same owner always resolve to the same asset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA256 of the raw uploaded bytes (64 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Wrap an already-computed hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset identifier: SHA256("{owner}:{content_hash}")[0:16] as hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    /// Derive the asset id for an owner's upload
    pub fn derive(owner_user_id: &str, content_hash: &ContentHash) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(owner_user_id.as_bytes());
        hasher.update(b":");
        hasher.update(content_hash.as_str().as_bytes());
        let result = hasher.finalize();
        Self(hex::encode(&result[..16]))
    }

    /// Wrap an id received from a caller
    pub fn parse(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Recorded, generation not started
    Pending,

    /// Variants are being generated
    Processing,

    /// All variants stored and readable
    Ready,

    /// Terminal failure (a fresh submit restarts it)
    Failed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Processing => "processing",
            AssetStatus::Ready => "ready",
            AssetStatus::Failed => "failed",
        }
    }

    /// Check whether a state machine edge is legal
    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        use AssetStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }

    /// Whether no pipeline is expected to move this asset any further
    pub fn is_settled(&self) -> bool {
        matches!(self, AssetStatus::Ready | AssetStatus::Failed)
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssetStatus::Pending),
            "processing" => Ok(AssetStatus::Processing),
            "ready" => Ok(AssetStatus::Ready),
            "failed" => Ok(AssetStatus::Failed),
            other => Err(format!("unknown asset status: {}", other)),
        }
    }
}

/// An uploaded image owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub id: AssetId,

    pub owner_user_id: String,

    pub content_hash: ContentHash,

    pub status: AssetStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Last failure reason, kept for diagnostics on FAILED assets
    pub last_error: Option<String>,
}

impl MediaAsset {
    /// Create a new PENDING asset
    pub fn new(owner_user_id: impl Into<String>, content_hash: ContentHash) -> Self {
        let owner_user_id = owner_user_id.into();
        let now = Utc::now();
        Self {
            id: AssetId::derive(&owner_user_id, &content_hash),
            owner_user_id,
            content_hash,
            status: AssetStatus::Pending,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }
}
