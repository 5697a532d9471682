//! Error taxonomy for the media pipeline.
//!
//! Every error is `Clone` so a single pipeline failure can be handed to
//! every caller waiting on the same in-flight operation.

use thiserror::Error;

use crate::domain::{AssetId, AssetStatus};

/// Result alias used across the library
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors surfaced by the pipeline and its adapters
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// Caller error, never retried
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),

    /// Storage or bus hiccup, safe to retry
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Object, asset or derivative does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Asset exists but derivatives are not readable yet
    #[error("Asset {asset_id} is not ready (status: {status})")]
    NotReady { asset_id: AssetId, status: AssetStatus },

    /// Source or target format the generator cannot handle
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode source image: {0}")]
    Decode(String),

    #[error("Failed to encode derivative: {0}")]
    Encode(String),

    /// Completion event could not be delivered within the attempt budget
    #[error("Publish failed after {attempts} attempts: {reason}")]
    PublishFailed { attempts: u32, reason: String },

    /// Pipeline reached terminal FAILED; carries the last failure reason
    #[error("Asset {asset_id} failed: {reason}")]
    AssetFailed { asset_id: AssetId, reason: String },

    /// Operation conflicts with the asset's current state
    #[error("Asset {asset_id} is busy (status: {status})")]
    Busy { asset_id: AssetId, status: AssetStatus },

    /// Metadata repository failure
    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Service is shutting down")]
    ShuttingDown,
}

impl MediaError {
    /// Whether the operation may succeed if attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaError::TransientIo(_))
    }

    /// Stable service error code, shared with the HTTP layer
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::InvalidInput(_) => "USR-1001",
            MediaError::UnsupportedFormat(_)
            | MediaError::Decode(_)
            | MediaError::Encode(_)
            | MediaError::AssetFailed { .. } => "USR-1002",
            MediaError::NotFound(_) => "USR-2003",
            MediaError::NotReady { .. } | MediaError::Busy { .. } => "USR-3000",
            MediaError::TransientIo(_) | MediaError::Repository(_) => "USR-7000",
            MediaError::PublishFailed { .. } | MediaError::ShuttingDown => "USR-9000",
        }
    }
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => MediaError::NotFound(err.to_string()),
            _ => MediaError::TransientIo(err.to_string()),
        }
    }
}

/// Reasons an upload is rejected before any processing happens
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("owner identity is missing")]
    MissingOwner,

    #[error("owner identity is not a valid key segment: {0:?}")]
    InvalidOwner(String),

    #[error("file is empty")]
    EmptyFile,

    #[error("file too large: {actual} > {limit} bytes")]
    TooLarge { actual: u64, limit: u64 },

    #[error("MIME type could not be determined")]
    MimeUndetermined,

    #[error("malformed MIME type: {0}")]
    MimeInvalid(String),

    #[error("expected an image MIME type, got {0}")]
    NotAnImage(String),

    #[error("MIME type not allowed: {0}")]
    MimeNotAllowed(String),

    #[error("file extension could not be determined: {0}")]
    ExtensionUndetermined(String),

    #[error("unsupported file extension: {0}")]
    ExtensionUnsupported(String),

    #[error("extension {extension} does not match MIME type {mime}")]
    ExtensionMimeMismatch { extension: String, mime: String },

    #[error("content looks like {detected}, declared as {declared}")]
    ContentMismatch { detected: String, declared: String },

    #[error("unknown variant: {0}")]
    UnknownVariant(String),

    #[error("invalid storage key: {0}")]
    InvalidStorageKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(MediaError::TransientIo("reset".into()).is_retryable());
        assert!(!MediaError::Decode("bad header".into()).is_retryable());
        assert!(!MediaError::NotFound("k".into()).is_retryable());
        assert!(!MediaError::InvalidInput(InvalidInput::EmptyFile).is_retryable());
    }

    #[test]
    fn test_io_error_classification() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(MediaError::from(missing), MediaError::NotFound(_)));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(MediaError::from(reset).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            MediaError::InvalidInput(InvalidInput::EmptyFile).code(),
            "USR-1001"
        );
        assert_eq!(MediaError::NotFound("x".into()).code(), "USR-2003");
        assert_eq!(MediaError::TransientIo("x".into()).code(), "USR-7000");
    }
}
