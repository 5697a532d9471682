//! Message bus transports for completion events.
//!
//! A transport delivers one event to one partition. Retries, backoff and
//! the partition choice live in [`crate::core::EventPublisher`]; transports
//! only report whether a failure is worth retrying.

pub mod memory;
pub mod outbox;
pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::CompletionEvent;
use crate::error::MediaResult;

pub use memory::MemoryBus;
pub use outbox::OutboxBus;
pub use webhook::WebhookBus;

/// Trait for bus transports
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Deliver one envelope; transient failures surface as `TransientIo`
    async fn send(&self, envelope: &Envelope) -> MediaResult<()>;
}

/// Wire envelope around a completion event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique per delivery attempt sequence; consumers dedup on the event's idempotency key
    pub message_id: Uuid,
    pub partition: u32,
    pub published_at: DateTime<Utc>,
    pub event: CompletionEvent,
}

impl Envelope {
    pub fn new(event: CompletionEvent, partitions: u32) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            partition: partition_for(event.partition_key(), partitions),
            published_at: Utc::now(),
            event,
        }
    }
}

/// Stable partition for a key: the same owner always lands on the same partition
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    if partitions <= 1 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % partitions as u64) as u32
}
