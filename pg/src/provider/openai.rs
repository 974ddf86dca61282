//! DALL-E 3 adapter for the OpenAI images API

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::http::{build_client, decode_image, post_json, require_api_key};
use super::{ErrorKind, GenerationError, ImageProvider, ProviderError};
use crate::config::ProviderConfig;
use crate::domain::{GenerationRequest, GenerationResult, ImageQuality, ImageSize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "dall-e-3";
const DEFAULT_STYLE: &str = "vivid";

/// Sizes DALL-E 3 accepts
pub const ALLOWED_SIZES: [ImageSize; 3] = [ImageSize::Square1024, ImageSize::Landscape1792, ImageSize::Portrait1792];

/// OpenAI image generation client
pub struct OpenAiImageProvider {
    config: ProviderConfig,
    api_key: String,
    base_url: String,
    model: String,
    http: Client,
}

impl OpenAiImageProvider {
    /// Create a provider from configuration
    ///
    /// Fails when no API key can be resolved.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        debug!(name = %config.name, "OpenAiImageProvider::from_config: called");
        let api_key = require_api_key(config)?;
        let http = build_client(config)?;

        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            config: config.clone(),
            api_key,
            http,
        })
    }

    fn resolve(&self, request: &GenerationRequest) -> (ImageSize, ImageQuality) {
        (
            request.size.unwrap_or(self.config.default_size),
            request.quality.unwrap_or(self.config.default_quality),
        )
    }

    /// Build the images API payload, rejecting sizes the model cannot render
    fn build_request_body(&self, request: &GenerationRequest) -> Result<serde_json::Value, GenerationError> {
        let (size, quality) = self.resolve(request);
        debug!(%size, %quality, "OpenAiImageProvider::build_request_body: called");

        if !ALLOWED_SIZES.contains(&size) {
            let allowed: Vec<String> = ALLOWED_SIZES.iter().map(|s| s.to_string()).collect();
            return Err(GenerationError::new(
                ErrorKind::UnsupportedParameter,
                format!("Size {} not supported by DALL-E 3. Allowed sizes: {}", size, allowed.join(", ")),
            ));
        }

        Ok(serde_json::json!({
            "model": self.model,
            "prompt": request.prompt,
            "n": 1,
            "size": size.to_string(),
            "quality": if quality.is_hd() { "hd" } else { "standard" },
            "style": request.param_str("style").unwrap_or(DEFAULT_STYLE),
            "response_format": "b64_json",
        }))
    }

    fn parse_response(
        &self,
        request: &GenerationRequest,
        response: ImagesResponse,
    ) -> Result<GenerationResult, GenerationError> {
        let (size, quality) = self.resolve(request);
        let Some(image) = response.data.into_iter().next() else {
            return Err(GenerationError::new(ErrorKind::MalformedResponse, "Response contained no images"));
        };
        let Some(encoded) = image.b64_json else {
            return Err(GenerationError::new(ErrorKind::MalformedResponse, "Response image has no b64_json"));
        };
        let bytes = decode_image(&encoded)?;

        let mut result = GenerationResult::success(
            &self.config.name,
            &request.prompt,
            bytes,
            self.estimate_cost(1, Some(size), Some(quality)),
        )
        .with_metadata("model", self.model.as_str())
        .with_metadata("size", size.to_string())
        .with_metadata("quality", quality.as_str());
        if let Some(revised) = image.revised_prompt {
            result = result.with_metadata("revised_prompt", revised);
        }
        Ok(result)
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        debug!(name = %self.config.name, prompt_len = request.prompt.len(), "OpenAiImageProvider::generate: called");
        let started = Instant::now();

        let outcome = match self.build_request_body(request) {
            Ok(body) => {
                let url = format!("{}/v1/images/generations", self.base_url);
                match post_json::<ImagesResponse>(&self.http, &url, &self.api_key, &body).await {
                    Ok(response) => self.parse_response(request, response),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(result) => {
                info!(name = %self.config.name, cost = result.cost, "Generated image");
                result
            }
            Err(error) => {
                debug!(name = %self.config.name, %error, "OpenAiImageProvider::generate: failed");
                GenerationResult::failure(&self.config.name, &request.prompt, error)
            }
        };
        result.with_latency(started.elapsed())
    }

    fn estimate_cost(&self, num_images: usize, size: Option<ImageSize>, quality: Option<ImageQuality>) -> f64 {
        let size = size.unwrap_or(self.config.default_size);
        let hd = quality.unwrap_or(self.config.default_quality).is_hd();

        let per_image = match size {
            ImageSize::Square1024 if hd => 0.08,
            ImageSize::Square1024 => 0.04,
            ImageSize::Landscape1792 | ImageSize::Portrait1792 if hd => 0.12,
            ImageSize::Landscape1792 | ImageSize::Portrait1792 => 0.08,
            _ => self.config.cost_per_image,
        };
        per_image * num_images as f64
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
    revised_prompt: Option<String>,
}
