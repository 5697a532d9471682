//! Regeneration Integration Tests
//!
//! After a regeneration returns, every reader sees the new storage key.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{memory_service, sample_jpeg, service_with_store, test_config, CountingGenerator, FlakyStore};
use usermedia::{AssetStatus, ContentHash, MediaError};

const WAIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_regenerate_swaps_cached_url() {
    let generator = Arc::new(CountingGenerator::new());
    let h = memory_service(generator.clone());
    let bytes = sample_jpeg(300, 200);
    let hash = ContentHash::of(&bytes);

    let outcome = h
        .service
        .orchestrator()
        .submit("user-8", &hash, bytes, WAIT)
        .await
        .unwrap();
    let orchestrator = h.service.orchestrator();

    let before = orchestrator
        .variant_url(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();
    assert_eq!(before.storage_key, format!("user-8/{}/thumb-64.webp", hash));

    let derivative = orchestrator
        .regenerate(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();
    assert_eq!(derivative.revision, 1);
    assert_eq!(derivative.storage_key, format!("user-8/{}/thumb-64.r1.webp", hash));
    // same source, same generator, same bytes
    assert_eq!(derivative.checksum, before.checksum);
    assert_eq!(generator.calls("thumb-64"), 2);

    let mut reads = Vec::new();
    for _ in 0..10 {
        let orchestrator = Arc::clone(orchestrator);
        let asset_id = outcome.asset_id.clone();
        reads.push(tokio::spawn(async move {
            orchestrator.variant_url(&asset_id, "thumb-64").await.unwrap()
        }));
    }
    for read in reads {
        assert_eq!(read.await.unwrap().storage_key, derivative.storage_key);
    }

    // superseded object stays readable until its URLs expire
    assert!(h.store.keys().contains(&before.storage_key));

    let events = h.bus.events();
    assert_eq!(events.len(), 2);
    let latest = events
        .iter()
        .flat_map(|e| e.variants.iter())
        .filter(|v| v.variant == "thumb-64")
        .map(|v| v.storage_key.clone())
        .collect::<Vec<_>>();
    assert!(latest.contains(&derivative.storage_key));
}

#[tokio::test]
async fn test_regenerate_twice_increments_revision() {
    let h = memory_service(Arc::new(CountingGenerator::new()));
    let bytes = sample_jpeg(80, 80);
    let outcome = h
        .service
        .orchestrator()
        .submit("user-8", &ContentHash::of(&bytes), bytes, WAIT)
        .await
        .unwrap();

    let orchestrator = h.service.orchestrator();
    orchestrator.regenerate(&outcome.asset_id, "thumb-256").await.unwrap();
    let second = orchestrator.regenerate(&outcome.asset_id, "thumb-256").await.unwrap();

    assert_eq!(second.revision, 2);
    let url = orchestrator
        .variant_url(&outcome.asset_id, "thumb-256")
        .await
        .unwrap();
    assert!(url.storage_key.ends_with("thumb-256.r2.webp"));
}

#[tokio::test]
async fn test_regenerate_requires_ready_asset() {
    let h = memory_service(Arc::new(CountingGenerator::new()));
    let bytes = b"not an image".to_vec();
    let outcome = h
        .service
        .orchestrator()
        .submit("user-8", &ContentHash::of(&bytes), bytes, WAIT)
        .await
        .unwrap();
    assert_eq!(outcome.status, AssetStatus::Failed);

    let result = h
        .service
        .orchestrator()
        .regenerate(&outcome.asset_id, "thumb-64")
        .await;
    assert!(matches!(
        result,
        Err(MediaError::NotReady {
            status: AssetStatus::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_regenerate_retries_signing_during_swap() {
    let store = Arc::new(FlakyStore::new(0));
    let (service, bus) = service_with_store(test_config(), store.clone(), Arc::new(CountingGenerator::new()));
    let bytes = sample_jpeg(120, 90);
    let outcome = service
        .orchestrator()
        .submit("user-1", &ContentHash::of(&bytes), bytes, WAIT)
        .await
        .unwrap();
    let orchestrator = service.orchestrator();
    let before = orchestrator
        .variant_url(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();

    store.fail_next_signs(1);
    let derivative = orchestrator
        .regenerate(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();

    let after = orchestrator
        .variant_url(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();
    assert_ne!(after.storage_key, before.storage_key);
    assert_eq!(after.storage_key, derivative.storage_key);
    assert_eq!(bus.events().len(), 2);
}

#[tokio::test]
async fn test_failed_swap_never_serves_superseded_key() {
    let store = Arc::new(FlakyStore::new(0));
    let (service, bus) = service_with_store(test_config(), store.clone(), Arc::new(CountingGenerator::new()));
    let bytes = sample_jpeg(120, 90);
    let outcome = service
        .orchestrator()
        .submit("user-1", &ContentHash::of(&bytes), bytes, WAIT)
        .await
        .unwrap();
    let orchestrator = service.orchestrator();
    let before = orchestrator
        .variant_url(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();

    // every signing attempt of the swap fails
    store.fail_next_signs(test_config().retry.max_attempts);
    let derivative = orchestrator
        .regenerate(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();

    let after = orchestrator
        .variant_url(&outcome.asset_id, "thumb-64")
        .await
        .unwrap();
    assert_ne!(after.storage_key, before.storage_key);
    assert_eq!(after.storage_key, derivative.storage_key);

    let urls = orchestrator.asset_urls(&outcome.asset_id).await.unwrap();
    let thumb = urls.iter().find(|u| u.variant == "thumb-64").unwrap();
    assert_eq!(thumb.storage_key, derivative.storage_key);
    assert_eq!(bus.events().len(), 2);
}
