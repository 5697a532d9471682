//! Adapter interfaces for external systems.
//!
//! Each concern is a trait with interchangeable backends: object storage,
//! the asset repository and the message bus.

pub mod bus;
pub mod repository;
pub mod storage;

pub use bus::{EventBus, MemoryBus, OutboxBus, WebhookBus};
pub use repository::{AssetRepository, MemoryRepository, SqliteRepository};
pub use storage::{ContentStore, FsContentStore, MemoryContentStore, SignedUrl, UrlSigner};
