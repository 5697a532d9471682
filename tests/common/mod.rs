//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};

use usermedia::adapters::storage::{PutOutcome, SignedUrl};
use usermedia::adapters::{ContentStore, MemoryBus, MemoryContentStore, MemoryRepository};
use usermedia::config::ResolvedConfig;
use usermedia::core::{DerivativeGenerator, GeneratedImage, ImageGenerator, MediaService, RetryPolicy};
use usermedia::domain::VariantSpec;
use usermedia::{MediaError, MediaResult};

/// Gradient JPEG of the given size
pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 90))
        .unwrap();
    buf
}

/// Real generator that counts calls per variant and can be slowed down
pub struct CountingGenerator {
    inner: ImageGenerator,
    delay: Duration,
    calls: Mutex<HashMap<String, u32>>,
}

impl CountingGenerator {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            inner: ImageGenerator::new(),
            delay,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self, variant: &str) -> u32 {
        self.calls.lock().unwrap().get(variant).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }
}

impl DerivativeGenerator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    fn generate(&self, source: &[u8], spec: &VariantSpec) -> MediaResult<GeneratedImage> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(spec.name.clone())
            .or_insert(0) += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.inner.generate(source, spec)
    }
}

/// Memory store whose first `failures` puts fail transiently
pub struct FlakyStore {
    inner: MemoryContentStore,
    failures_left: AtomicU32,
    put_attempts: AtomicU32,
    sign_failures_left: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryContentStore::default(),
            failures_left: AtomicU32::new(failures),
            put_attempts: AtomicU32::new(0),
            sign_failures_left: AtomicU32::new(0),
        }
    }

    /// Make the next `n` signing calls fail transiently
    pub fn fail_next_signs(&self, n: u32) {
        self.sign_failures_left.store(n, Ordering::SeqCst);
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn put_attempts(&self) -> u32 {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryContentStore {
        &self.inner
    }
}

#[async_trait]
impl ContentStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> MediaResult<PutOutcome> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MediaError::TransientIo("connection reset".to_string()));
        }
        self.inner.put(key, bytes).await
    }

    async fn get(&self, key: &str) -> MediaResult<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> MediaResult<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> MediaResult<()> {
        self.inner.delete(key).await
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> MediaResult<SignedUrl> {
        let failing = self
            .sign_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MediaError::TransientIo("signer unavailable".to_string()));
        }
        self.inner.signed_url(key, ttl).await
    }
}

/// Defaults with immediate retries so tests never sleep on backoff
pub fn test_config() -> ResolvedConfig {
    let mut config = ResolvedConfig::with_home(PathBuf::from("/nonexistent/usermedia"));
    config.retry = RetryPolicy::immediate(3);
    config.publisher.retry = RetryPolicy::immediate(2);
    config.submit_timeout = Duration::from_secs(10);
    config
}

/// A service over in-memory backends, with handles on each backend
pub struct Harness {
    pub service: Arc<MediaService>,
    pub repository: Arc<MemoryRepository>,
    pub store: Arc<MemoryContentStore>,
    pub bus: Arc<MemoryBus>,
}

pub fn memory_service(generator: Arc<dyn DerivativeGenerator>) -> Harness {
    memory_service_with(test_config(), generator)
}

pub fn memory_service_with(config: ResolvedConfig, generator: Arc<dyn DerivativeGenerator>) -> Harness {
    let repository = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryContentStore::default());
    let bus = Arc::new(MemoryBus::new());

    let service = MediaService::assemble(
        &config,
        repository.clone(),
        store.clone(),
        bus.clone(),
        generator,
    );

    Harness {
        service: Arc::new(service),
        repository,
        store,
        bus,
    }
}

/// Service over a caller-provided store
pub fn service_with_store(
    config: ResolvedConfig,
    store: Arc<dyn ContentStore>,
    generator: Arc<dyn DerivativeGenerator>,
) -> (Arc<MediaService>, Arc<MemoryBus>) {
    let bus = Arc::new(MemoryBus::new());
    let service = MediaService::assemble(
        &config,
        Arc::new(MemoryRepository::new()),
        store,
        bus.clone(),
        generator,
    );
    (Arc::new(service), bus)
}

/// Config with a single variant, for exact attempt counting
pub fn single_variant_config() -> ResolvedConfig {
    let mut config = test_config();
    config.variants = vec![VariantSpec::defaults().remove(0)];
    config
}
