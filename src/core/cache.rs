//! Metadata cache: (asset, variant) → storage key and signed URL.
//!
//! Entries are recomputable from the repository and the content store, so
//! a miss just rebuilds one. Every replacement stamps its key with a fresh
//! epoch from a shared clock, and every invalidation drops the key and
//! raises the floor that absent keys report. A recomputation only installs
//! its result if the epoch it started under is still current, so a slow
//! reader never re-installs a URL that a regeneration superseded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::flight::SingleFlight;
use crate::adapters::{AssetRepository, ContentStore};
use crate::domain::{AssetId, Derivative};
use crate::error::{MediaError, MediaResult};

/// Resolved access URL for one derivative
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantUrl {
    pub asset_id: AssetId,
    pub variant: String,
    pub storage_key: String,
    pub checksum: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Cache key: `{assetId}:{variant}`
pub fn cache_key(asset_id: &AssetId, variant: &str) -> String {
    format!("{}:{}", asset_id, variant)
}

/// Slots beyond this count trigger a sweep of expired entries
const SWEEP_THRESHOLD: usize = 4096;

struct Slot {
    epoch: u64,
    value: VariantUrl,
    deadline: Instant,
}

#[derive(Default)]
struct Slots {
    entries: HashMap<String, Slot>,
    /// Bumped by every replace and invalidate
    clock: u64,
    /// Epoch reported for keys with no slot
    floor: u64,
}

impl Slots {
    fn epoch_of(&self, key: &str) -> u64 {
        self.entries.get(key).map_or(self.floor, |slot| slot.epoch)
    }

    fn sweep(&mut self, now: Instant) {
        self.entries.retain(|_, slot| slot.deadline > now);
    }
}

type Recompute = SingleFlight<(String, u64), MediaResult<VariantUrl>>;

pub struct MetadataCache {
    repository: Arc<dyn AssetRepository>,
    store: Arc<dyn ContentStore>,
    ttl: Duration,
    url_ttl: Duration,
    slots: Mutex<Slots>,
    flights: Arc<Recompute>,
}

impl MetadataCache {
    pub fn new(
        repository: Arc<dyn AssetRepository>,
        store: Arc<dyn ContentStore>,
        ttl: Duration,
        url_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            store,
            ttl,
            url_ttl,
            slots: Mutex::new(Slots::default()),
            flights: Arc::new(SingleFlight::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entry lifetime: the configured TTL, cut short by the URL's own expiry
    fn deadline(&self, expires_at: DateTime<Utc>) -> Instant {
        let until_expiry = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        Instant::now() + self.ttl.min(until_expiry)
    }

    /// Number of live (unexpired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .entries
            .values()
            .filter(|slot| slot.deadline > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value, or a single-flighted recompute on miss/expiry
    pub async fn read(self: &Arc<Self>, asset_id: &AssetId, variant: &str) -> MediaResult<VariantUrl> {
        let key = cache_key(asset_id, variant);

        let epoch = {
            let slots = self.lock();
            match slots.entries.get(&key) {
                Some(slot) if slot.deadline > Instant::now() && slot.value.expires_at > Utc::now() => {
                    debug!(key = %key, "Cache hit");
                    return Ok(slot.value.clone());
                }
                _ => slots.epoch_of(&key),
            }
        };

        debug!(key = %key, epoch, "Cache miss, recomputing");
        let cache = Arc::clone(self);
        let asset_id = asset_id.clone();
        let variant = variant.to_string();
        let flight_key = (key.clone(), epoch);

        let flight = self.flights.join_or_start(flight_key, move || async move {
            let value = cache.recompute(&asset_id, &variant).await?;
            cache.install(&key, epoch, &value);
            Ok::<_, MediaError>(value)
        });

        flight
            .wait()
            .await
            .unwrap_or_else(|| Err(MediaError::TransientIo("cache recompute aborted".to_string())))
    }

    async fn recompute(&self, asset_id: &AssetId, variant: &str) -> MediaResult<VariantUrl> {
        let derivative = self
            .repository
            .get_derivative(asset_id, variant)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("variant {} of asset {}", variant, asset_id)))?;
        self.resolve(&derivative).await
    }

    async fn resolve(&self, derivative: &Derivative) -> MediaResult<VariantUrl> {
        let signed = self
            .store
            .signed_url(&derivative.storage_key, self.url_ttl)
            .await?;

        Ok(VariantUrl {
            asset_id: derivative.asset_id.clone(),
            variant: derivative.variant.clone(),
            storage_key: derivative.storage_key.clone(),
            checksum: derivative.checksum.clone(),
            url: signed.url,
            expires_at: signed.expires_at,
        })
    }

    /// Install only if no invalidation happened since `epoch` was read
    fn install(&self, key: &str, epoch: u64, value: &VariantUrl) {
        let deadline = self.deadline(value.expires_at);
        let mut slots = self.lock();
        let current = slots.epoch_of(key);
        if current != epoch {
            debug!(key, epoch, current, "Dropping superseded recompute");
            return;
        }

        if slots.entries.len() >= SWEEP_THRESHOLD {
            slots.sweep(Instant::now());
        }
        slots.entries.insert(
            key.to_string(),
            Slot {
                epoch,
                value: value.clone(),
                deadline,
            },
        );
    }

    /// Atomically point the key at a new derivative
    pub async fn replace(&self, derivative: &Derivative) -> MediaResult<VariantUrl> {
        let value = self.resolve(derivative).await?;
        let key = cache_key(&derivative.asset_id, &derivative.variant);
        let deadline = self.deadline(value.expires_at);

        let mut slots = self.lock();
        slots.clock += 1;
        let epoch = slots.clock;
        slots.entries.insert(
            key,
            Slot {
                epoch,
                value: value.clone(),
                deadline,
            },
        );
        Ok(value)
    }

    /// Drop the entry now; in-flight recomputes for it will not install
    pub fn invalidate(&self, asset_id: &AssetId, variant: &str) {
        let key = cache_key(asset_id, variant);
        let mut slots = self.lock();
        slots.clock += 1;
        slots.floor = slots.clock;
        slots.entries.remove(&key);
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.lock().entries.len()
    }
}
