//! In-memory repository, used by tests and ephemeral setups.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::AssetRepository;
use crate::domain::{AssetId, AssetStatus, Derivative, MediaAsset};
use crate::error::{MediaError, MediaResult};

#[derive(Default)]
struct Tables {
    assets: HashMap<AssetId, MediaAsset>,
    derivatives: BTreeMap<(AssetId, String), Derivative>,
}

#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn asset_count(&self) -> usize {
        self.lock().assets.len()
    }
}

#[async_trait]
impl AssetRepository for MemoryRepository {
    async fn get_asset(&self, id: &AssetId) -> MediaResult<Option<MediaAsset>> {
        Ok(self.lock().assets.get(id).cloned())
    }

    async fn create_if_absent(&self, asset: MediaAsset) -> MediaResult<MediaAsset> {
        let mut tables = self.lock();
        Ok(tables
            .assets
            .entry(asset.id.clone())
            .or_insert(asset)
            .clone())
    }

    async fn set_status(
        &self,
        id: &AssetId,
        status: AssetStatus,
        last_error: Option<String>,
    ) -> MediaResult<MediaAsset> {
        let mut tables = self.lock();
        let asset = tables
            .assets
            .get_mut(id)
            .ok_or_else(|| MediaError::NotFound(format!("asset {}", id)))?;
        if !asset.status.can_transition_to(status) {
            return Err(MediaError::Busy {
                asset_id: id.clone(),
                status: asset.status,
            });
        }
        asset.status = status;
        asset.last_error = last_error;
        asset.updated_at = Utc::now();
        Ok(asset.clone())
    }

    async fn save_derivatives(&self, derivatives: &[Derivative]) -> MediaResult<()> {
        let mut tables = self.lock();
        for d in derivatives {
            tables
                .derivatives
                .insert((d.asset_id.clone(), d.variant.clone()), d.clone());
        }
        Ok(())
    }

    async fn get_derivative(&self, id: &AssetId, variant: &str) -> MediaResult<Option<Derivative>> {
        Ok(self
            .lock()
            .derivatives
            .get(&(id.clone(), variant.to_string()))
            .cloned())
    }

    async fn list_derivatives(&self, id: &AssetId) -> MediaResult<Vec<Derivative>> {
        Ok(self
            .lock()
            .derivatives
            .iter()
            .filter(|((asset_id, _), _)| asset_id == id)
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn delete_asset(&self, id: &AssetId) -> MediaResult<bool> {
        let mut tables = self.lock();
        tables.derivatives.retain(|(asset_id, _), _| asset_id != id);
        Ok(tables.assets.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentHash;

    #[tokio::test]
    async fn test_create_if_absent_keeps_first_row() {
        let repo = MemoryRepository::new();
        let asset = MediaAsset::new("user-1", ContentHash::of(b"x"));

        let first = repo.create_if_absent(asset.clone()).await.unwrap();
        repo.set_status(&asset.id, AssetStatus::Processing, None)
            .await
            .unwrap();
        let second = repo.create_if_absent(asset.clone()).await.unwrap();

        assert_eq!(first.status, AssetStatus::Pending);
        assert_eq!(second.status, AssetStatus::Processing);
        assert_eq!(repo.asset_count(), 1);
    }

    #[tokio::test]
    async fn test_set_status_on_missing_asset() {
        let repo = MemoryRepository::new();
        let result = repo
            .set_status(&AssetId::parse("missing"), AssetStatus::Ready, None)
            .await;
        assert!(matches!(result, Err(MediaError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_status_rejects_illegal_edges() {
        let repo = MemoryRepository::new();
        let asset = MediaAsset::new("user-1", ContentHash::of(b"x"));
        repo.create_if_absent(asset.clone()).await.unwrap();

        let skipped = repo.set_status(&asset.id, AssetStatus::Ready, None).await;
        assert!(matches!(
            skipped,
            Err(MediaError::Busy {
                status: AssetStatus::Pending,
                ..
            })
        ));

        repo.set_status(&asset.id, AssetStatus::Processing, None).await.unwrap();
        repo.set_status(&asset.id, AssetStatus::Ready, None).await.unwrap();

        let reopened = repo.set_status(&asset.id, AssetStatus::Processing, None).await;
        assert!(matches!(
            reopened,
            Err(MediaError::Busy {
                status: AssetStatus::Ready,
                ..
            })
        ));
        assert_eq!(
            repo.get_asset(&asset.id).await.unwrap().unwrap().status,
            AssetStatus::Ready
        );
    }
}
