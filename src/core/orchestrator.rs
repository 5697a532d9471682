//! Per-asset pipeline orchestration.
//!
//! Drives each asset through `PENDING → PROCESSING → READY | FAILED`.
//! Concurrent submits of one asset collapse into a single detached
//! pipeline; a per-asset lock serializes that pipeline with regeneration
//! and deletion. Variants fan out on the blocking pool and fan back in
//! before the asset becomes READY.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::cache::{MetadataCache, VariantUrl};
use super::flight::SingleFlight;
use super::gateway::validate_owner;
use super::generator::DerivativeGenerator;
use super::publisher::EventPublisher;
use super::retry::RetryPolicy;
use crate::adapters::storage::PutOutcome;
use crate::adapters::{AssetRepository, ContentStore};
use crate::domain::{
    source_key, storage_key, AssetId, AssetStatus, CompletionEvent, ContentHash, Derivative,
    MediaAsset, VariantSpec,
};
use crate::error::{InvalidInput, MediaError, MediaResult};

/// What a caller learns from `submit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub asset_id: AssetId,
    pub status: AssetStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// The wait ended before the pipeline settled; it keeps running
    pub timed_out: bool,
}

impl SubmitOutcome {
    fn of(asset: &MediaAsset, timed_out: bool) -> Self {
        Self {
            asset_id: asset.id.clone(),
            status: asset.status,
            last_error: asset.last_error.clone(),
            timed_out,
        }
    }
}

/// Tracks in-flight work so shutdown can wait for it
#[derive(Default)]
struct Drain {
    closed: AtomicBool,
    active: AtomicUsize,
    idle: Notify,
}

struct DrainToken(Arc<Drain>);

impl Drop for DrainToken {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl Drain {
    fn enter(self: &Arc<Self>) -> DrainToken {
        self.active.fetch_add(1, Ordering::SeqCst);
        DrainToken(Arc::clone(self))
    }

    fn try_enter(self: &Arc<Self>) -> MediaResult<DrainToken> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::ShuttingDown);
        }
        Ok(self.enter())
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// One async mutex per asset id
#[derive(Default)]
struct AssetLocks {
    locks: Mutex<HashMap<AssetId, Arc<AsyncMutex<()>>>>,
}

impl AssetLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<AssetId, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry(&self, asset_id: &AssetId) -> Arc<AsyncMutex<()>> {
        let mut map = self.map();
        if map.len() > 1024 {
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(map.entry(asset_id.clone()).or_default())
    }

    async fn acquire(&self, asset_id: &AssetId) -> OwnedMutexGuard<()> {
        self.entry(asset_id).lock_owned().await
    }

    fn try_acquire(&self, asset_id: &AssetId) -> Option<OwnedMutexGuard<()>> {
        self.entry(asset_id).try_lock_owned().ok()
    }

    fn forget(&self, asset_id: &AssetId) {
        self.map().remove(asset_id);
    }
}

/// Collaborators shared by the orchestrator and its detached pipelines
struct PipelineContext {
    repository: Arc<dyn AssetRepository>,
    store: Arc<dyn ContentStore>,
    generator: Arc<dyn DerivativeGenerator>,
    cache: Arc<MetadataCache>,
    publisher: Arc<EventPublisher>,
    variants: Vec<VariantSpec>,
    retry: RetryPolicy,
    locks: AssetLocks,
}

/// Per-asset state machine and concurrency control
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    flights: Arc<SingleFlight<AssetId, MediaResult<MediaAsset>>>,
    drain: Arc<Drain>,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<dyn AssetRepository>,
        store: Arc<dyn ContentStore>,
        generator: Arc<dyn DerivativeGenerator>,
        cache: Arc<MetadataCache>,
        publisher: Arc<EventPublisher>,
        variants: Vec<VariantSpec>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ctx: Arc::new(PipelineContext {
                repository,
                store,
                generator,
                cache,
                publisher,
                variants,
                retry,
                locks: AssetLocks::default(),
            }),
            flights: Arc::new(SingleFlight::new()),
            drain: Arc::new(Drain::default()),
        }
    }

    pub fn variants(&self) -> &[VariantSpec] {
        &self.ctx.variants
    }

    /// Whether new work is still accepted
    pub fn is_accepting(&self) -> bool {
        !self.drain.closed.load(Ordering::SeqCst)
    }

    /// Number of pipelines and regenerations currently running
    pub fn active(&self) -> usize {
        self.drain.active.load(Ordering::SeqCst)
    }

    /// Register an upload and wait up to `timeout` for it to settle.
    ///
    /// READY assets return immediately. Otherwise the caller joins the
    /// asset's in-flight pipeline, starting one if none is running. A
    /// timed-out wait returns the current status without cancelling the
    /// pipeline.
    #[instrument(skip(self, bytes), fields(owner = %owner_user_id, content_hash = %content_hash))]
    pub async fn submit(
        &self,
        owner_user_id: &str,
        content_hash: &ContentHash,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> MediaResult<SubmitOutcome> {
        if !self.is_accepting() {
            return Err(MediaError::ShuttingDown);
        }
        validate_owner(owner_user_id)?;

        let asset_id = AssetId::derive(owner_user_id, content_hash);
        if let Some(asset) = self.ctx.repository.get_asset(&asset_id).await? {
            if asset.status == AssetStatus::Ready {
                debug!(asset_id = %asset_id, "Already ready");
                return Ok(SubmitOutcome::of(&asset, false));
            }
        }

        let asset = self
            .ctx
            .repository
            .create_if_absent(MediaAsset::new(owner_user_id, content_hash.clone()))
            .await?;
        if asset.status == AssetStatus::Ready {
            return Ok(SubmitOutcome::of(&asset, false));
        }

        let ctx = Arc::clone(&self.ctx);
        let drain = Arc::clone(&self.drain);
        let pipeline_id = asset_id.clone();
        let flight = self.flights.join_or_start(asset_id.clone(), move || {
            let token = drain.enter();
            async move {
                let _token = token;
                ctx.process(&pipeline_id, Arc::new(bytes)).await
            }
        });

        if flight.is_leader() {
            info!(asset_id = %asset_id, "Dispatched pipeline");
        } else {
            debug!(asset_id = %asset_id, "Joined in-flight pipeline");
        }

        match tokio::time::timeout(timeout, flight.wait()).await {
            Ok(Some(Ok(asset))) => Ok(SubmitOutcome::of(&asset, false)),
            Ok(Some(Err(MediaError::AssetFailed { .. }))) | Ok(None) => {
                let asset = self.status(&asset_id).await?;
                Ok(SubmitOutcome::of(&asset, false))
            }
            Ok(Some(Err(e))) => Err(e),
            Err(_) => {
                warn!(
                    asset_id = %asset_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Submit wait timed out, pipeline continues"
                );
                let asset = self.status(&asset_id).await?;
                Ok(SubmitOutcome::of(&asset, !asset.status.is_settled()))
            }
        }
    }

    /// Produce a fresh revision of one variant and swap readers onto it
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn regenerate(&self, asset_id: &AssetId, variant: &str) -> MediaResult<Derivative> {
        let _token = self.drain.try_enter()?;
        let spec = self
            .ctx
            .variant(variant)
            .cloned()
            .ok_or_else(|| InvalidInput::UnknownVariant(variant.to_string()))?;

        let _lock = self.ctx.locks.acquire(asset_id).await;
        let asset = self.status(asset_id).await?;
        if asset.status != AssetStatus::Ready {
            return Err(MediaError::NotReady {
                asset_id: asset.id,
                status: asset.status,
            });
        }

        let revision = self
            .ctx
            .repository
            .get_derivative(asset_id, variant)
            .await?
            .map(|d| d.revision + 1)
            .unwrap_or(0);

        let key = source_key(&asset.owner_user_id, &asset.content_hash);
        let source = self
            .ctx
            .retry
            .run("store_get", |_| self.ctx.store.get(&key))
            .await
            .map_err(|(e, _)| e)?;

        let derivative = self
            .ctx
            .produce(&asset, Arc::new(source), spec, revision)
            .await?;
        self.ctx
            .repository
            .save_derivatives(std::slice::from_ref(&derivative))
            .await?;
        // Readers must miss rather than see the superseded key if the swap fails
        self.ctx.cache.invalidate(asset_id, variant);
        if let Err((e, attempts)) = self
            .ctx
            .retry
            .run("cache_replace", |_| self.ctx.cache.replace(&derivative))
            .await
        {
            warn!(
                variant,
                attempts,
                error = %e,
                "Cache swap failed, readers will recompute from the new record"
            );
        }

        let derivatives = self.ctx.ordered(self.ctx.repository.list_derivatives(asset_id).await?);
        self.ctx.announce(&asset, &derivatives).await;

        info!(
            variant,
            revision,
            storage_key = %derivative.storage_key,
            "Variant regenerated"
        );
        Ok(derivative)
    }

    /// Current asset record
    pub async fn status(&self, asset_id: &AssetId) -> MediaResult<MediaAsset> {
        self.ctx
            .repository
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("asset {}", asset_id)))
    }

    /// Signed URL for one variant of a READY asset
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn variant_url(&self, asset_id: &AssetId, variant: &str) -> MediaResult<VariantUrl> {
        self.require_ready(asset_id).await?;
        self.ctx.cache.read(asset_id, variant).await
    }

    /// Signed URLs for every variant of a READY asset
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn asset_urls(&self, asset_id: &AssetId) -> MediaResult<Vec<VariantUrl>> {
        self.require_ready(asset_id).await?;

        let derivatives = self.ctx.ordered(self.ctx.repository.list_derivatives(asset_id).await?);
        let mut urls = Vec::with_capacity(derivatives.len());
        for derivative in &derivatives {
            urls.push(self.ctx.cache.read(asset_id, &derivative.variant).await?);
        }
        Ok(urls)
    }

    /// Remove an asset: records first, then cache entries, then objects
    #[instrument(skip(self), fields(asset_id = %asset_id))]
    pub async fn delete(&self, asset_id: &AssetId) -> MediaResult<()> {
        let _token = self.drain.try_enter()?;
        let busy = || MediaError::Busy {
            asset_id: asset_id.clone(),
            status: AssetStatus::Processing,
        };

        if self.flights.contains(asset_id) {
            return Err(busy());
        }
        let _lock = self.ctx.locks.try_acquire(asset_id).ok_or_else(|| busy())?;

        let asset = self.status(asset_id).await?;
        if asset.status == AssetStatus::Processing {
            return Err(busy());
        }

        let derivatives = self.ctx.repository.list_derivatives(asset_id).await?;
        self.ctx.repository.delete_asset(asset_id).await?;

        let mut keys = vec![source_key(&asset.owner_user_id, &asset.content_hash)];
        for derivative in &derivatives {
            self.ctx.cache.invalidate(asset_id, &derivative.variant);
            keys.extend((0..=derivative.revision).map(|revision| {
                storage_key(
                    &asset.owner_user_id,
                    &asset.content_hash,
                    &derivative.variant,
                    derivative.format,
                    revision,
                )
            }));
        }

        for key in &keys {
            self.ctx
                .retry
                .run("store_delete", |_| self.ctx.store.delete(key))
                .await
                .map_err(|(e, _)| e)?;
        }

        self.ctx.locks.forget(asset_id);
        info!(objects = keys.len(), "Asset deleted");
        Ok(())
    }

    /// Stop accepting work and wait for in-flight pipelines to finish
    pub async fn shutdown(&self) {
        self.drain.closed.store(true, Ordering::SeqCst);
        info!(active = self.active(), "Draining in-flight work");
        self.drain.wait_idle().await;
        info!("Orchestrator drained");
    }

    async fn require_ready(&self, asset_id: &AssetId) -> MediaResult<MediaAsset> {
        let asset = self.status(asset_id).await?;
        if asset.status != AssetStatus::Ready {
            return Err(MediaError::NotReady {
                asset_id: asset.id,
                status: asset.status,
            });
        }
        Ok(asset)
    }
}

impl PipelineContext {
    fn variant(&self, name: &str) -> Option<&VariantSpec> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// Sort derivatives into configured variant order
    fn ordered(&self, mut derivatives: Vec<Derivative>) -> Vec<Derivative> {
        let position = |name: &str| {
            self.variants
                .iter()
                .position(|v| v.name == name)
                .unwrap_or(usize::MAX)
        };
        derivatives.sort_by(|a, b| {
            position(&a.variant)
                .cmp(&position(&b.variant))
                .then_with(|| a.variant.cmp(&b.variant))
        });
        derivatives
    }

    /// Full pipeline for one asset; runs detached under the asset lock
    #[instrument(skip(self, source), fields(asset_id = %asset_id))]
    async fn process(self: &Arc<Self>, asset_id: &AssetId, source: Arc<Vec<u8>>) -> MediaResult<MediaAsset> {
        let _lock = self.locks.acquire(asset_id).await;

        let asset = self
            .repository
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(format!("asset {}", asset_id)))?;

        let asset = match asset.status {
            AssetStatus::Ready => return Ok(asset),
            AssetStatus::Processing => {
                warn!("Asset was left processing, resuming");
                asset
            }
            AssetStatus::Pending | AssetStatus::Failed => {
                self.repository
                    .set_status(asset_id, AssetStatus::Processing, None)
                    .await?
            }
        };

        info!(variants = self.variants.len(), "Generating derivatives");
        let derivatives = match self.generate_and_record(&asset, source).await {
            Ok(derivatives) => derivatives,
            Err(e) => return self.fail(asset_id, e).await,
        };

        let asset = self
            .repository
            .set_status(asset_id, AssetStatus::Ready, None)
            .await?;

        for derivative in &derivatives {
            if let Err(e) = self.cache.replace(derivative).await {
                warn!(variant = %derivative.variant, error = %e, "Cache warm-up failed");
            }
        }
        self.announce(&asset, &derivatives).await;

        info!("Asset ready");
        Ok(asset)
    }

    /// Generate and store every variant, keep the source, then record derivatives
    async fn generate_and_record(
        self: &Arc<Self>,
        asset: &MediaAsset,
        source: Arc<Vec<u8>>,
    ) -> MediaResult<Vec<Derivative>> {
        let variants: Vec<(VariantSpec, u32)> =
            self.variants.iter().cloned().map(|spec| (spec, 0)).collect();
        let derivatives = self.produce_all(asset, Arc::clone(&source), variants).await?;

        let key = source_key(&asset.owner_user_id, &asset.content_hash);
        self.put_with_retry(&key, &source).await?;

        self.repository.save_derivatives(&derivatives).await?;
        Ok(derivatives)
    }

    /// Fan out one task per variant; the first failure cancels the rest
    async fn produce_all(
        self: &Arc<Self>,
        asset: &MediaAsset,
        source: Arc<Vec<u8>>,
        variants: Vec<(VariantSpec, u32)>,
    ) -> MediaResult<Vec<Derivative>> {
        let mut tasks = JoinSet::new();
        for (spec, revision) in variants {
            let ctx = Arc::clone(self);
            let asset = asset.clone();
            let source = Arc::clone(&source);
            tasks.spawn(async move { ctx.produce(&asset, source, spec, revision).await });
        }

        let mut derivatives = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => Err(MediaError::Encode(format!("Variant task failed: {}", e))),
            };
            match result {
                Ok(derivative) => derivatives.push(derivative),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(self.ordered(derivatives))
    }

    /// Generate one variant on the blocking pool and store it
    async fn produce(
        &self,
        asset: &MediaAsset,
        source: Arc<Vec<u8>>,
        spec: VariantSpec,
        revision: u32,
    ) -> MediaResult<Derivative> {
        let variant = spec.name.clone();
        let generator = Arc::clone(&self.generator);
        let image = tokio::task::spawn_blocking(move || generator.generate(&source, &spec))
            .await
            .map_err(|e| MediaError::Encode(format!("Generator task failed: {}", e)))??;

        let key = storage_key(
            &asset.owner_user_id,
            &asset.content_hash,
            &variant,
            image.format,
            revision,
        );
        let outcome = self.put_with_retry(&key, &image.bytes).await?;
        debug!(variant = %variant, key = %key, ?outcome, "Stored derivative");

        Ok(Derivative {
            asset_id: asset.id.clone(),
            variant,
            format: image.format,
            width: image.width,
            height: image.height,
            storage_key: key,
            checksum: image.checksum,
            size_bytes: image.bytes.len() as u64,
            revision,
            generated_at: Utc::now(),
        })
    }

    async fn put_with_retry(&self, key: &str, bytes: &[u8]) -> MediaResult<PutOutcome> {
        self.retry
            .run("store_put", |_| self.store.put(key, bytes))
            .await
            .map_err(|(e, attempts)| {
                warn!(key, attempts, error = %e, "Store write gave up");
                e
            })
    }

    /// Record terminal FAILED and hand every waiter the reason
    async fn fail(&self, asset_id: &AssetId, cause: MediaError) -> MediaResult<MediaAsset> {
        let reason = cause.to_string();
        error!(code = cause.code(), error = %reason, "Pipeline failed");

        self.repository
            .set_status(asset_id, AssetStatus::Failed, Some(reason.clone()))
            .await?;
        Err(MediaError::AssetFailed {
            asset_id: asset_id.clone(),
            reason,
        })
    }

    /// Publish the completion event; delivery failure never rolls back READY
    async fn announce(&self, asset: &MediaAsset, derivatives: &[Derivative]) {
        let event = CompletionEvent::new(asset, derivatives);
        if let Err(e) = self.publisher.publish(event).await {
            error!(
                asset_id = %asset.id,
                code = e.code(),
                error = %e,
                "Completion event not delivered, asset stays ready"
            );
        }
    }
}
