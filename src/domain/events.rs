//! Completion events announced to downstream consumers.
//!
//! Events are immutable. The idempotency key is the asset id, so a
//! consumer that sees the same key twice can drop the duplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::asset::{AssetId, MediaAsset};
use super::derivative::Derivative;

/// One derivative entry inside a completion event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantEntry {
    pub variant: String,
    pub storage_key: String,
    pub checksum: String,
}

impl From<&Derivative> for VariantEntry {
    fn from(derivative: &Derivative) -> Self {
        Self {
            variant: derivative.variant.clone(),
            storage_key: derivative.storage_key.clone(),
            checksum: derivative.checksum.clone(),
        }
    }
}

/// Emitted when an asset's derivatives become readable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub asset_id: AssetId,

    /// Partition key on the bus
    pub owner_user_id: String,

    pub variants: Vec<VariantEntry>,

    pub occurred_at: DateTime<Utc>,

    /// Always equal to the asset id
    pub idempotency_key: String,
}

impl CompletionEvent {
    /// Build the event for an asset and its current derivatives
    pub fn new(asset: &MediaAsset, derivatives: &[Derivative]) -> Self {
        Self {
            asset_id: asset.id.clone(),
            owner_user_id: asset.owner_user_id.clone(),
            variants: derivatives.iter().map(VariantEntry::from).collect(),
            occurred_at: Utc::now(),
            idempotency_key: asset.id.to_string(),
        }
    }

    /// Partition key (events of one user stay ordered)
    pub fn partition_key(&self) -> &str {
        &self.owner_user_id
    }
}
