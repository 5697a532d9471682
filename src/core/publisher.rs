//! At-least-once completion event publishing.

use std::sync::Arc;

use tracing::{info, instrument};

use super::retry::RetryPolicy;
use crate::adapters::bus::{Envelope, EventBus};
use crate::domain::CompletionEvent;
use crate::error::{MediaError, MediaResult};

/// Partitions events by owner and retries transient bus failures
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    partitions: u32,
    retry: RetryPolicy,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, partitions: u32, retry: RetryPolicy) -> Self {
        Self {
            bus,
            partitions: partitions.max(1),
            retry,
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Deliver the event, or `PublishFailed` once the attempt budget is spent.
    ///
    /// Every attempt resends the same envelope, so consumers see one
    /// message id however many times it lands.
    #[instrument(skip(self, event), fields(asset_id = %event.asset_id, bus = self.bus.name()))]
    pub async fn publish(&self, event: CompletionEvent) -> MediaResult<Envelope> {
        let envelope = Envelope::new(event, self.partitions);

        match self
            .retry
            .run("publish", |_| self.bus.send(&envelope))
            .await
        {
            Ok(()) => {
                info!(
                    partition = envelope.partition,
                    message_id = %envelope.message_id,
                    "Published completion event"
                );
                Ok(envelope)
            }
            Err((MediaError::PublishFailed { reason, .. }, attempts)) => {
                Err(MediaError::PublishFailed { attempts, reason })
            }
            Err((e, attempts)) => Err(MediaError::PublishFailed {
                attempts,
                reason: e.to_string(),
            }),
        }
    }
}
