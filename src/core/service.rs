//! Service graph: wires adapters into the pipeline from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::cache::MetadataCache;
use super::gateway::IngestGateway;
use super::generator::{DerivativeGenerator, ImageGenerator};
use super::orchestrator::Orchestrator;
use super::publisher::EventPublisher;
use crate::adapters::{
    AssetRepository, ContentStore, EventBus, FsContentStore, OutboxBus, SqliteRepository,
    UrlSigner, WebhookBus,
};
use crate::config::{PublisherKind, ResolvedConfig};

/// The assembled pipeline
pub struct MediaService {
    gateway: IngestGateway,
    orchestrator: Arc<Orchestrator>,
    cache: Arc<MetadataCache>,
}

impl MediaService {
    /// Build the on-disk graph: SQLite repository, filesystem store and
    /// the configured bus, all under the state directory.
    pub fn open(config: &ResolvedConfig) -> Result<Self> {
        config.validate()?;

        let repository = SqliteRepository::open(&config.database_path())
            .with_context(|| format!("Failed to open database: {}", config.database_path().display()))?;

        let signer = UrlSigner::new(&config.urls.base_url, &config.urls.signing_secret);
        let store = FsContentStore::new(&config.objects_dir, signer);

        let bus: Arc<dyn EventBus> = match config.publisher.kind {
            PublisherKind::Outbox => Arc::new(OutboxBus::new(config.outbox_dir())),
            PublisherKind::Webhook => {
                let url = config
                    .publisher
                    .webhook_url
                    .clone()
                    .context("Webhook publisher requires publisher.webhook_url")?;
                Arc::new(WebhookBus::new(url))
            }
        };

        info!(
            home = %config.home.display(),
            objects = %config.objects_dir.display(),
            bus = bus.name(),
            "Opening media service"
        );

        Ok(Self::assemble(
            config,
            Arc::new(repository),
            Arc::new(store),
            bus,
            Arc::new(ImageGenerator::new().with_jpeg_quality(config.jpeg_quality)),
        ))
    }

    /// Wire explicit backends together
    pub fn assemble(
        config: &ResolvedConfig,
        repository: Arc<dyn AssetRepository>,
        store: Arc<dyn ContentStore>,
        bus: Arc<dyn EventBus>,
        generator: Arc<dyn DerivativeGenerator>,
    ) -> Self {
        let cache = Arc::new(MetadataCache::new(
            Arc::clone(&repository),
            Arc::clone(&store),
            config.cache_ttl,
            config.urls.ttl,
        ));
        let publisher = Arc::new(EventPublisher::new(
            bus,
            config.publisher.partitions,
            config.publisher.retry.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            repository,
            store,
            generator,
            Arc::clone(&cache),
            publisher,
            config.variants.clone(),
            config.retry.clone(),
        ));
        let gateway = IngestGateway::new(
            Arc::clone(&orchestrator),
            &config.limits,
            config.submit_timeout,
        );

        Self {
            gateway,
            orchestrator,
            cache,
        }
    }

    pub fn gateway(&self) -> &IngestGateway {
        &self.gateway
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Stop intake and drain running pipelines
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
