//! usermedia - Profile image derivative pipeline
//!
//! Takes an uploaded image, produces resized and re-encoded variants,
//! stores them content-addressably, serves them through a signed URL
//! cache and announces completion on a message bus.
//!
//! # Architecture
//!
//! Control flows leaves-last:
//! - Ingest gateway validates the upload and hashes it
//! - Orchestrator drives the per-asset state machine
//! - Generator produces each variant on the blocking pool
//! - Content store persists bytes first-writer-wins
//! - Metadata cache hands out signed URLs
//! - Event publisher announces READY assets, at least once
//!
//! # Modules
//!
//! - `adapters`: Storage, repository and bus backends
//! - `core`: Orchestration logic (Orchestrator, Cache, Publisher, Gateway)
//! - `domain`: Data structures (MediaAsset, Derivative, CompletionEvent)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Ingest an avatar and wait for its variants
//! usermedia ingest avatar.jpg --owner user-42
//!
//! # Fetch a signed URL for one variant
//! usermedia url <asset-id> thumb-64
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use core::{IngestGateway, MediaService, Orchestrator, SubmitOutcome, UploadRequest, VariantUrl};
pub use domain::{AssetId, AssetStatus, CompletionEvent, ContentHash, Derivative, MediaAsset, VariantSpec};
pub use error::{InvalidInput, MediaError, MediaResult};
