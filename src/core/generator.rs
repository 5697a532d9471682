//! Derivative generation: decode, resize, re-encode.
//!
//! Generation is a pure function of the source bytes and the variant
//! spec. Encoders are configured deterministically (lossless WebP, fixed
//! JPEG quality) so the same input always yields byte-identical output,
//! which the content-addressed storage keys depend on.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError};
use sha2::{Digest, Sha256};

use crate::domain::{ImageFormat, VariantSpec};
use crate::error::{MediaError, MediaResult};

/// Output of one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    /// SHA256 of `bytes` as hex
    pub checksum: String,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
}

/// Trait for derivative generators.
///
/// Implementations must be deterministic and hold no state shared between
/// calls; the orchestrator runs them in parallel on the blocking pool.
pub trait DerivativeGenerator: Send + Sync {
    /// Human-readable generator name
    fn name(&self) -> &str;

    /// Produce the derivative for one variant
    fn generate(&self, source: &[u8], spec: &VariantSpec) -> MediaResult<GeneratedImage>;
}

/// SHA256 hex digest of encoded bytes
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Detect the encoding of raw bytes from their magic number
pub fn sniff_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        _ => None,
    }
}

/// Generator backed by the `image` crate
#[derive(Debug, Clone)]
pub struct ImageGenerator {
    /// JPEG output quality (1-100)
    jpeg_quality: u8,
    filter: FilterType,
}

impl Default for ImageGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageGenerator {
    pub fn new() -> Self {
        Self {
            jpeg_quality: 85,
            filter: FilterType::Lanczos3,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    fn decode(&self, source: &[u8]) -> MediaResult<DynamicImage> {
        let format = image::guess_format(source)
            .map_err(|e| MediaError::UnsupportedFormat(e.to_string()))?;

        if !matches!(
            format,
            image::ImageFormat::Png | image::ImageFormat::Jpeg | image::ImageFormat::WebP
        ) {
            return Err(MediaError::UnsupportedFormat(format!("{:?}", format)));
        }

        image::load_from_memory_with_format(source, format).map_err(|e| match e {
            ImageError::Unsupported(u) => MediaError::UnsupportedFormat(u.to_string()),
            other => MediaError::Decode(other.to_string()),
        })
    }

    /// Fit within max_side x max_side keeping aspect ratio; never upscale
    fn fit(&self, image: DynamicImage, max_side: Option<u32>) -> DynamicImage {
        match max_side {
            Some(max) if image.width() > max || image.height() > max => {
                image.resize(max, max, self.filter)
            }
            _ => image,
        }
    }

    fn encode(&self, image: &DynamicImage, format: ImageFormat) -> MediaResult<Vec<u8>> {
        let mut buf = Vec::new();

        let result = match format {
            ImageFormat::Webp => DynamicImage::ImageRgba8(image.to_rgba8())
                .write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
            ImageFormat::Png => DynamicImage::ImageRgba8(image.to_rgba8())
                .write_with_encoder(PngEncoder::new(&mut buf)),
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality)),
        };

        result.map_err(|e| MediaError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

impl DerivativeGenerator for ImageGenerator {
    fn name(&self) -> &str {
        "image"
    }

    fn generate(&self, source: &[u8], spec: &VariantSpec) -> MediaResult<GeneratedImage> {
        let decoded = self.decode(source)?;
        let fitted = self.fit(decoded, spec.max_side);
        let bytes = self.encode(&fitted, spec.format)?;

        tracing::debug!(
            variant = %spec.name,
            format = %spec.format,
            in_bytes = source.len(),
            out_bytes = bytes.len(),
            width = fitted.width(),
            height = fitted.height(),
            "Generated derivative"
        );

        Ok(GeneratedImage {
            checksum: checksum(&bytes),
            width: fitted.width(),
            height: fitted.height(),
            format: spec.format,
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_with_encoder(PngEncoder::new(&mut buf))
            .unwrap();
        buf
    }

    #[test]
    fn test_resize_keeps_aspect_ratio() {
        let source = sample_png(400, 200);
        let spec = VariantSpec::new("thumb-64", Some(64), ImageFormat::Webp);

        let out = ImageGenerator::new().generate(&source, &spec).unwrap();

        assert_eq!((out.width, out.height), (64, 32));
        assert_eq!(sniff_format(&out.bytes), Some(ImageFormat::Webp));
        assert_eq!(out.checksum, checksum(&out.bytes));
    }

    #[test]
    fn test_small_images_are_not_upscaled() {
        let source = sample_png(40, 30);
        let spec = VariantSpec::new("thumb-256", Some(256), ImageFormat::Png);

        let out = ImageGenerator::new().generate(&source, &spec).unwrap();
        assert_eq!((out.width, out.height), (40, 30));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let source = sample_png(300, 300);
        let generator = ImageGenerator::new();

        for spec in VariantSpec::defaults() {
            let a = generator.generate(&source, &spec).unwrap();
            let b = generator.generate(&source, &spec).unwrap();
            assert_eq!(a.checksum, b.checksum, "variant {}", spec.name);
        }
    }

    #[test]
    fn test_jpeg_output() {
        let source = sample_png(100, 50);
        let spec = VariantSpec::new("jpeg-small", Some(50), ImageFormat::Jpeg);

        let out = ImageGenerator::new().generate(&source, &spec).unwrap();
        assert_eq!(sniff_format(&out.bytes), Some(ImageFormat::Jpeg));
        assert_eq!((out.width, out.height), (50, 25));
    }

    #[test]
    fn test_jpeg_quality_changes_output() {
        let source = sample_png(256, 256);
        let spec = VariantSpec::new("jpeg-full", None, ImageFormat::Jpeg);

        let low = ImageGenerator::new().with_jpeg_quality(10).generate(&source, &spec).unwrap();
        let high = ImageGenerator::new().with_jpeg_quality(95).generate(&source, &spec).unwrap();
        assert!(low.bytes.len() < high.bytes.len());
    }

    #[test]
    fn test_unknown_bytes_are_unsupported() {
        let spec = VariantSpec::defaults().remove(0);
        let result = ImageGenerator::new().generate(b"definitely not an image", &spec);
        assert!(matches!(result, Err(MediaError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_truncated_png_fails_to_decode() {
        let mut source = sample_png(64, 64);
        source.truncate(40);

        let spec = VariantSpec::defaults().remove(0);
        let result = ImageGenerator::new().generate(&source, &spec);
        assert!(matches!(
            result,
            Err(MediaError::Decode(_)) | Err(MediaError::UnsupportedFormat(_))
        ));
    }
}
