//! Domain types for the media pipeline.
//!
//! This module contains the core data structures:
//! - Asset: owner-scoped upload identity and lifecycle
//! - Derivative: variant specs and generated outputs
//! - Events: completion notifications for downstream consumers

pub mod asset;
pub mod derivative;
pub mod events;

// Re-export commonly used types
pub use asset::{AssetId, AssetStatus, ContentHash, MediaAsset};
pub use derivative::{source_key, storage_key, Derivative, ImageFormat, VariantSpec};
pub use events::{CompletionEvent, VariantEntry};
