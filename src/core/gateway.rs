//! Ingest gateway: validates uploads before they reach the orchestrator.
//!
//! Every rejection is a distinct [`InvalidInput`] reason so callers can
//! report exactly what was wrong with the upload.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use glob::Pattern;
use tracing::{info, instrument, warn};

use super::generator::sniff_format;
use super::orchestrator::{Orchestrator, SubmitOutcome};
use crate::config::UploadLimits;
use crate::domain::{ContentHash, ImageFormat};
use crate::error::{InvalidInput, MediaResult};

const MAX_OWNER_LEN: usize = 128;

/// A raw upload as received from the caller
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_user_id: String,
    pub bytes: Vec<u8>,
    /// Declared content type, e.g. `image/jpeg`
    pub mime_type: String,
    /// Original file name, when the caller has one
    pub file_name: Option<String>,
}

impl UploadRequest {
    pub fn new(owner_user_id: impl Into<String>, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            owner_user_id: owner_user_id.into(),
            bytes,
            mime_type: mime_type.into(),
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Upload validator compiled from [`UploadLimits`]
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_upload_bytes: u64,
    allowed: Vec<Pattern>,
}

impl UploadValidator {
    pub fn new(limits: &UploadLimits) -> Self {
        let allowed = limits
            .allowed_mime_types
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "Ignoring invalid MIME pattern");
                    None
                }
            })
            .collect();

        Self {
            max_upload_bytes: limits.max_upload_bytes,
            allowed,
        }
    }

    /// Check an upload; returns the normalized MIME type
    pub fn validate(&self, request: &UploadRequest) -> Result<String, InvalidInput> {
        validate_owner(&request.owner_user_id)?;

        let size = request.bytes.len() as u64;
        if size == 0 {
            return Err(InvalidInput::EmptyFile);
        }
        if size > self.max_upload_bytes {
            return Err(InvalidInput::TooLarge {
                actual: size,
                limit: self.max_upload_bytes,
            });
        }

        let mime = self.validate_mime(&request.mime_type)?;

        if let Some(file_name) = &request.file_name {
            validate_extension(file_name, &mime)?;
        }

        if let (Some(detected), Some(declared)) =
            (sniff_format(&request.bytes), ImageFormat::from_mime(&mime))
        {
            if detected != declared {
                return Err(InvalidInput::ContentMismatch {
                    detected: detected.mime_type().to_string(),
                    declared: mime,
                });
            }
        }

        Ok(mime)
    }

    fn validate_mime(&self, raw: &str) -> Result<String, InvalidInput> {
        let mime = normalize_mime(raw);
        if mime.is_empty() {
            return Err(InvalidInput::MimeUndetermined);
        }

        let (kind, subtype) = mime
            .split_once('/')
            .ok_or_else(|| InvalidInput::MimeInvalid(mime.clone()))?;
        if kind.is_empty() || subtype.is_empty() || subtype.contains('/') {
            return Err(InvalidInput::MimeInvalid(mime));
        }
        if kind != "image" {
            return Err(InvalidInput::NotAnImage(mime));
        }
        if !self.allowed.iter().any(|pattern| pattern.matches(&mime)) {
            return Err(InvalidInput::MimeNotAllowed(mime));
        }

        Ok(mime)
    }
}

/// Owner ids become the first segment of every storage key
pub fn validate_owner(owner: &str) -> Result<(), InvalidInput> {
    if owner.trim().is_empty() {
        return Err(InvalidInput::MissingOwner);
    }

    let bad = owner.len() > MAX_OWNER_LEN
        || owner == "."
        || owner == ".."
        || owner != owner.trim()
        || owner
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(InvalidInput::InvalidOwner(owner.to_string()));
    }
    Ok(())
}

/// Lowercase and strip parameters (`image/JPEG; q=1` → `image/jpeg`)
fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn validate_extension(file_name: &str, mime: &str) -> Result<(), InvalidInput> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .ok_or_else(|| InvalidInput::ExtensionUndetermined(file_name.to_string()))?
        .to_ascii_lowercase();

    let by_extension = ImageFormat::from_extension(&extension)
        .ok_or_else(|| InvalidInput::ExtensionUnsupported(extension.clone()))?;

    if ImageFormat::from_mime(mime) != Some(by_extension) {
        return Err(InvalidInput::ExtensionMimeMismatch {
            extension,
            mime: mime.to_string(),
        });
    }
    Ok(())
}

/// Front door of the pipeline
pub struct IngestGateway {
    orchestrator: Arc<Orchestrator>,
    validator: UploadValidator,
    timeout: Duration,
}

impl IngestGateway {
    pub fn new(orchestrator: Arc<Orchestrator>, limits: &UploadLimits, timeout: Duration) -> Self {
        Self {
            orchestrator,
            validator: UploadValidator::new(limits),
            timeout,
        }
    }

    pub fn validator(&self) -> &UploadValidator {
        &self.validator
    }

    /// Validate, hash and submit with the configured wait
    pub async fn ingest(&self, request: UploadRequest) -> MediaResult<SubmitOutcome> {
        self.ingest_with_timeout(request, self.timeout).await
    }

    #[instrument(skip(self, request), fields(owner = %request.owner_user_id, size = request.bytes.len()))]
    pub async fn ingest_with_timeout(
        &self,
        request: UploadRequest,
        timeout: Duration,
    ) -> MediaResult<SubmitOutcome> {
        let mime = match self.validator.validate(&request) {
            Ok(mime) => mime,
            Err(reason) => {
                warn!(reason = %reason, "Upload rejected");
                return Err(reason.into());
            }
        };

        let content_hash = ContentHash::of(&request.bytes);
        info!(mime = %mime, content_hash = %content_hash, "Upload accepted");

        self.orchestrator
            .submit(&request.owner_user_id, &content_hash, request.bytes, timeout)
            .await
    }
}
