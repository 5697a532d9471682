//! In-memory bus with optional fault injection.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Envelope, EventBus};
use crate::domain::CompletionEvent;
use crate::error::{MediaError, MediaResult};

#[derive(Default)]
struct Inner {
    partitions: BTreeMap<u32, Vec<Envelope>>,
    failures_remaining: u32,
    attempts: u32,
}

/// Bus that keeps delivered envelopes per partition
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `n` sends fail with a transient error
    pub fn fail_next(&self, n: u32) {
        self.lock().failures_remaining = n;
    }

    /// Total send attempts, including failed ones
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Every delivered event, in partition then arrival order
    pub fn events(&self) -> Vec<CompletionEvent> {
        self.lock()
            .partitions
            .values()
            .flatten()
            .map(|envelope| envelope.event.clone())
            .collect()
    }

    pub fn partition(&self, partition: u32) -> Vec<Envelope> {
        self.lock()
            .partitions
            .get(&partition)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn send(&self, envelope: &Envelope) -> MediaResult<()> {
        let mut inner = self.lock();
        inner.attempts += 1;

        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(MediaError::TransientIo("broker unavailable".to_string()));
        }

        inner
            .partitions
            .entry(envelope.partition)
            .or_default()
            .push(envelope.clone());
        Ok(())
    }
}
