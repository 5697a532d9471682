//! Persistence for assets and derivative records.
//!
//! Repositories store plain value types; the orchestrator owns every
//! state decision and uses the repository only to record it.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::domain::{AssetId, AssetStatus, Derivative, MediaAsset};
use crate::error::MediaResult;

pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

/// Trait for asset metadata repositories
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn get_asset(&self, id: &AssetId) -> MediaResult<Option<MediaAsset>>;

    /// Insert the asset unless one with the same id exists; returns the stored row
    async fn create_if_absent(&self, asset: MediaAsset) -> MediaResult<MediaAsset>;

    /// Record a status change (and the failure reason, if any).
    ///
    /// Edges the asset lifecycle does not allow fail with `Busy`, carrying
    /// the status the asset is actually in.
    async fn set_status(
        &self,
        id: &AssetId,
        status: AssetStatus,
        last_error: Option<String>,
    ) -> MediaResult<MediaAsset>;

    /// Upsert derivative records, one per (asset, variant)
    async fn save_derivatives(&self, derivatives: &[Derivative]) -> MediaResult<()>;

    async fn get_derivative(&self, id: &AssetId, variant: &str) -> MediaResult<Option<Derivative>>;

    /// All derivatives of an asset, ordered by variant name
    async fn list_derivatives(&self, id: &AssetId) -> MediaResult<Vec<Derivative>>;

    /// Remove an asset and its derivative records; false if it did not exist
    async fn delete_asset(&self, id: &AssetId) -> MediaResult<bool>;
}
