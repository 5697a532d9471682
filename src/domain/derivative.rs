//! Variant specifications and the derivatives generated from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::asset::{AssetId, ContentHash};

/// Encodings the generator can read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageFormat {
    Webp,
    Png,
    Jpeg,
}

impl ImageFormat {
    /// File extension used in storage keys
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "webp",
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/webp" => Some(ImageFormat::Webp),
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().to_ascii_lowercase().as_str() {
            "webp" => Some(ImageFormat::Webp),
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" | "jpe" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unknown image format: {}", s))
    }
}

/// Target shape of one derivative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSpec {
    /// Variant name, e.g. "thumb-64"
    pub name: String,

    /// Longest side in pixels; None keeps the source dimensions
    #[serde(default)]
    pub max_side: Option<u32>,

    /// Output encoding
    pub format: ImageFormat,
}

impl VariantSpec {
    pub fn new(name: impl Into<String>, max_side: Option<u32>, format: ImageFormat) -> Self {
        Self {
            name: name.into(),
            max_side,
            format,
        }
    }

    /// Default variant set: two square-bounded thumbnails and a full-size WebP
    pub fn defaults() -> Vec<VariantSpec> {
        vec![
            VariantSpec::new("thumb-64", Some(64), ImageFormat::Webp),
            VariantSpec::new("thumb-256", Some(256), ImageFormat::Webp),
            VariantSpec::new("webp-orig", None, ImageFormat::Webp),
        ]
    }
}

/// Storage key for a derivative.
///
/// Revision 0 lives at `{owner}/{hash}/{variant}.{ext}`; regenerated
/// revisions get `.r{n}` before the extension so they never collide with
/// an earlier object.
pub fn storage_key(
    owner_user_id: &str,
    content_hash: &ContentHash,
    variant: &str,
    format: ImageFormat,
    revision: u32,
) -> String {
    if revision == 0 {
        format!(
            "{}/{}/{}.{}",
            owner_user_id,
            content_hash,
            variant,
            format.extension()
        )
    } else {
        format!(
            "{}/{}/{}.r{}.{}",
            owner_user_id,
            content_hash,
            variant,
            revision,
            format.extension()
        )
    }
}

/// Key of the retained source bytes, used to regenerate variants
pub fn source_key(owner_user_id: &str, content_hash: &ContentHash) -> String {
    format!("{}/{}/source", owner_user_id, content_hash)
}

/// A generated and durably stored variant of an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivative {
    pub asset_id: AssetId,

    pub variant: String,

    pub format: ImageFormat,

    pub width: u32,

    pub height: u32,

    /// Content-addressed object key
    pub storage_key: String,

    /// SHA256 of the encoded bytes
    pub checksum: String,

    pub size_bytes: u64,

    /// 0 for the first generation, incremented on each regeneration
    pub revision: u32,

    pub generated_at: DateTime<Utc>,
}
