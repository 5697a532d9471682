//! Core pipeline logic.
//!
//! This module contains:
//! - Orchestrator: per-asset state machine, single-flight, retries
//! - Gateway: upload validation in front of the orchestrator
//! - Generator: decode/resize/encode of derivatives
//! - Cache: signed URL cache with epoch-guarded recompute
//! - Publisher: partitioned, retried completion events
//! - Service: explicit wiring of all of the above

pub mod cache;
pub mod flight;
pub mod gateway;
pub mod generator;
pub mod orchestrator;
pub mod publisher;
pub mod retry;
pub mod service;

// Re-export commonly used types
pub use cache::{cache_key, MetadataCache, VariantUrl};
pub use flight::{Flight, SingleFlight};
pub use gateway::{validate_owner, IngestGateway, UploadRequest, UploadValidator};
pub use generator::{checksum, sniff_format, DerivativeGenerator, GeneratedImage, ImageGenerator};
pub use orchestrator::{Orchestrator, SubmitOutcome};
pub use publisher::EventPublisher;
pub use retry::RetryPolicy;
pub use service::MediaService;
