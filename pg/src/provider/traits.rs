//! ImageProvider trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::domain::{
    BatchGenerationResult, GenerationRequest, GenerationResult, ImageFormat, ImageQuality, ImageSize, ProviderType,
    ValidationIssue, ValidationResult,
};

/// Smallest byte length accepted as a real image
pub const MIN_IMAGE_BYTES: usize = 1024;

/// Largest byte length accepted (50 MiB)
pub const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;

/// A PNG's IEND chunk must appear within this many trailing bytes
const PNG_TRAILER_WINDOW: usize = 50;

/// Uniform interface over remote image generation backends
///
/// `generate` never returns an error for ordinary provider failures: the
/// failure is reported as `success = false` with a classified
/// [`GenerationError`](super::GenerationError). Rate limiting and retries live
/// in the orchestrator, not in implementations.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Unique configured name
    fn name(&self) -> &str;

    /// Configuration this provider was built from
    fn config(&self) -> &ProviderConfig;

    /// Generate a single image
    async fn generate(&self, request: &GenerationRequest) -> GenerationResult;

    /// Generate several images one after another
    ///
    /// Parallelism belongs to the worker pool so that rate limiting stays
    /// centralized per provider.
    async fn batch_generate(&self, requests: &[GenerationRequest]) -> BatchGenerationResult {
        debug!(provider = %self.name(), count = requests.len(), "ImageProvider::batch_generate: called");
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.generate(request).await);
        }
        BatchGenerationResult::from_results(results)
    }

    /// Cheap structural checks on generated bytes
    fn validate(&self, image_bytes: &[u8], prompt: &str) -> ValidationResult {
        debug!(provider = %self.name(), len = image_bytes.len(), prompt_len = prompt.len(), "ImageProvider::validate: called");
        validate_image_bytes(image_bytes)
    }

    /// Validate several `(bytes, prompt)` pairs
    fn validate_batch(&self, images: &[(&[u8], &str)]) -> Vec<ValidationResult> {
        images
            .iter()
            .map(|(bytes, prompt)| self.validate(bytes, prompt))
            .collect()
    }

    /// Estimated USD cost for `num_images` at the given size/quality
    fn estimate_cost(&self, num_images: usize, size: Option<ImageSize>, quality: Option<ImageQuality>) -> f64 {
        let _ = (size, quality);
        self.config().cost_per_image * num_images as f64
    }

    /// Static description of this provider
    fn info(&self) -> ProviderInfo {
        ProviderInfo::from_config(self.config())
    }
}

/// Provider description for listings and fallback decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub provider_type: ProviderType,
    pub quality: ImageQuality,
    pub default_size: ImageSize,
    pub rate_limit: u32,
    pub timeout_ms: u64,
    pub max_retries: Option<u32>,
    pub cost_per_image: f64,
}

impl ProviderInfo {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            name: config.name.clone(),
            provider_type: config.provider_type,
            quality: config.default_quality,
            default_size: config.default_size,
            rate_limit: config.rate_limit,
            timeout_ms: config.timeout_ms,
            max_retries: config.max_retries,
            cost_per_image: config.cost_per_image,
        }
    }
}

/// Structural checks: non-empty, between [`MIN_IMAGE_BYTES`] and
/// [`MAX_IMAGE_BYTES`], PNG or JPEG header, PNG ending in an IEND chunk
pub fn validate_image_bytes(image_bytes: &[u8]) -> ValidationResult {
    if image_bytes.is_empty() {
        return ValidationResult {
            score: 0.0,
            is_valid: false,
            ..ValidationResult::from_issues(vec![ValidationIssue::error("EMPTY_IMAGE", "Image is empty")], vec![])
        };
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if image_bytes.len() < MIN_IMAGE_BYTES {
        errors.push(ValidationIssue::error(
            "TOO_SMALL",
            format!("Image too small: {} bytes", image_bytes.len()),
        ));
    }

    if image_bytes.len() > MAX_IMAGE_BYTES {
        errors.push(ValidationIssue::error(
            "TOO_LARGE",
            format!("Image too large: {} bytes", image_bytes.len()),
        ));
    }

    match ImageFormat::detect(image_bytes) {
        Some(ImageFormat::Png) => {
            let tail = &image_bytes[image_bytes.len().saturating_sub(PNG_TRAILER_WINDOW)..];
            if !tail.windows(4).any(|w| w == b"IEND") {
                errors.push(ValidationIssue::error(
                    "CORRUPTED_PNG",
                    "PNG file appears corrupted (missing IEND)",
                ));
            }
        }
        Some(ImageFormat::Jpeg) => {}
        Some(ImageFormat::Webp) => warnings.push(ValidationIssue::warning(
            "UNUSUAL_FORMAT",
            "WebP image; downstream composition expects PNG or JPEG",
        )),
        None => errors.push(ValidationIssue::error(
            "INVALID_FORMAT",
            "Invalid image format (expected PNG or JPEG)",
        )),
    }

    ValidationResult::from_issues(errors, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(len: usize) -> Vec<u8> {
        let trailer = b"\0\0\0\0IEND\xaeB`\x82";
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.resize(len - trailer.len(), 0);
        bytes.extend_from_slice(trailer);
        bytes
    }

    #[test]
    fn test_valid_png() {
        let result = validate_image_bytes(&png(4096));
        assert!(result.is_valid);
        assert_eq!(result.score, 1.0);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_empty_image_invalid() {
        let result = validate_image_bytes(&[]);
        assert!(!result.is_valid);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.errors[0].code, "EMPTY_IMAGE");
    }

    #[test]
    fn test_small_png_is_borderline_invalid() {
        let result = validate_image_bytes(&png(100));
        assert!(!result.is_valid);
        assert_eq!(result.score, 0.5);
        assert_eq!(result.errors[0].code, "TOO_SMALL");
    }

    #[test]
    fn test_garbage_bytes() {
        let result = validate_image_bytes(&vec![7u8; 2048]);
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].code, "INVALID_FORMAT");

        let tiny_garbage = validate_image_bytes(b"hello");
        assert_eq!(tiny_garbage.score, 0.0);
        assert_eq!(tiny_garbage.errors.len(), 2);
    }

    #[test]
    fn test_truncated_png_is_corrupted() {
        let mut bytes = png(4096);
        bytes.truncate(4000);
        let result = validate_image_bytes(&bytes);
        assert!(!result.is_valid);
        assert_eq!(result.errors[0].code, "CORRUPTED_PNG");

        // IEND buried far from the end does not count
        let mut padded = png(4096);
        padded.resize(8192, 0);
        assert_eq!(validate_image_bytes(&padded).errors[0].code, "CORRUPTED_PNG");
    }

    #[test]
    fn test_oversized_image() {
        let mut jpeg = b"\xff\xd8\xff\xe0".to_vec();
        jpeg.resize(MAX_IMAGE_BYTES + 1, 0);
        let result = validate_image_bytes(&jpeg);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, "TOO_LARGE");
    }

    #[test]
    fn test_jpeg_accepted_webp_warned() {
        let mut jpeg = b"\xff\xd8\xff\xe0".to_vec();
        jpeg.resize(2048, 0);
        assert!(validate_image_bytes(&jpeg).is_valid);

        let mut webp = b"RIFF\0\0\0\0WEBPVP8 ".to_vec();
        webp.resize(2048, 0);
        let result = validate_image_bytes(&webp);
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }
}
