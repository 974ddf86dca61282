//! Stable Diffusion XL adapter for the Stability AI REST API

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::http::{build_client, decode_image, post_json, require_api_key};
use super::{ErrorKind, GenerationError, ImageProvider, ProviderError};
use crate::config::ProviderConfig;
use crate::domain::{GenerationRequest, GenerationResult, ImageQuality, ImageSize};

const DEFAULT_BASE_URL: &str = "https://api.stability.ai";
const DEFAULT_ENGINE: &str = "stable-diffusion-xl-1024-v1-0";
const DEFAULT_STEPS: u64 = 30;
const DEFAULT_CFG_SCALE: f64 = 7.5;
const STANDARD_COST: f64 = 0.04;

/// Stability AI text-to-image client
pub struct StabilityProvider {
    config: ProviderConfig,
    api_key: String,
    base_url: String,
    engine: String,
    http: Client,
}

impl StabilityProvider {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        debug!(name = %config.name, "StabilityProvider::from_config: called");
        let api_key = require_api_key(config)?;
        let http = build_client(config)?;

        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            engine: config.model.clone().unwrap_or_else(|| DEFAULT_ENGINE.to_string()),
            config: config.clone(),
            api_key,
            http,
        })
    }

    fn build_request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let size = request.size.unwrap_or(self.config.default_size);
        let (width, height) = size.dimensions();
        let steps = request.param_u64("steps").unwrap_or(DEFAULT_STEPS);
        let cfg_scale = request.param_f64("cfg_scale").unwrap_or(DEFAULT_CFG_SCALE);
        debug!(%size, steps, cfg_scale, "StabilityProvider::build_request_body: called");

        let mut text_prompts = vec![serde_json::json!({"text": request.prompt, "weight": 1.0})];
        if let Some(negative) = request.param_str("negative_prompt").filter(|n| !n.is_empty()) {
            text_prompts.push(serde_json::json!({"text": negative, "weight": -1.0}));
        }

        let mut body = serde_json::json!({
            "text_prompts": text_prompts,
            "cfg_scale": cfg_scale,
            "height": height,
            "width": width,
            "steps": steps,
            "samples": 1,
        });
        if let Some(preset) = request.param_str("style_preset") {
            body["style_preset"] = serde_json::json!(preset);
        }
        body
    }

    fn parse_response(
        &self,
        request: &GenerationRequest,
        response: TextToImageResponse,
    ) -> Result<GenerationResult, GenerationError> {
        let size = request.size.unwrap_or(self.config.default_size);
        let quality = request.quality.unwrap_or(self.config.default_quality);
        let Some(artifact) = response.artifacts.into_iter().next() else {
            return Err(GenerationError::new(ErrorKind::MalformedResponse, "No artifacts in response"));
        };
        let bytes = decode_image(&artifact.base64)?;

        let mut result = GenerationResult::success(
            &self.config.name,
            &request.prompt,
            bytes,
            self.estimate_cost(1, Some(size), Some(quality)),
        )
        .with_metadata("engine", self.engine.as_str())
        .with_metadata("size", size.to_string());
        if let Some(seed) = artifact.seed {
            result = result.with_metadata("seed", seed);
        }
        if let Some(reason) = artifact.finish_reason {
            result = result.with_metadata("finish_reason", reason);
        }
        Ok(result)
    }
}

#[async_trait]
impl ImageProvider for StabilityProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        debug!(name = %self.config.name, prompt_len = request.prompt.len(), "StabilityProvider::generate: called");
        let started = Instant::now();
        let url = format!("{}/v1/generation/{}/text-to-image", self.base_url, self.engine);
        let body = self.build_request_body(request);

        let result = match post_json::<TextToImageResponse>(&self.http, &url, &self.api_key, &body)
            .await
            .and_then(|response| self.parse_response(request, response))
        {
            Ok(result) => {
                info!(name = %self.config.name, cost = result.cost, "Generated image");
                result
            }
            Err(error) => {
                debug!(name = %self.config.name, %error, "StabilityProvider::generate: failed");
                GenerationResult::failure(&self.config.name, &request.prompt, error)
            }
        };
        result.with_latency(started.elapsed())
    }

    fn estimate_cost(&self, num_images: usize, _size: Option<ImageSize>, quality: Option<ImageQuality>) -> f64 {
        let per_image = match quality.unwrap_or(self.config.default_quality) {
            ImageQuality::Standard => STANDARD_COST,
            _ => self.config.cost_per_image,
        };
        per_image * num_images as f64
    }
}

#[derive(Debug, Deserialize)]
struct TextToImageResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Artifact {
    base64: String,
    seed: Option<u64>,
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderType;
    use crate::provider::http::test_server;
    use crate::provider::mock::mock_png;
    use base64::Engine;

    fn provider(base_url: &str) -> StabilityProvider {
        StabilityProvider {
            config: ProviderConfig {
                name: "sdxl".to_string(),
                provider_type: ProviderType::Sdxl,
                cost_per_image: 0.06,
                ..Default::default()
            },
            api_key: "sk-test".to_string(),
            base_url: base_url.to_string(),
            engine: DEFAULT_ENGINE.to_string(),
            http: test_server::client(),
        }
    }

    #[test]
    fn test_build_request_body_defaults() {
        let body = provider("http://unused").build_request_body(&GenerationRequest::new("a forest"));
        assert_eq!(body["text_prompts"].as_array().unwrap().len(), 1);
        assert_eq!(body["text_prompts"][0]["text"], "a forest");
        assert_eq!(body["steps"], 30);
        assert_eq!(body["cfg_scale"], 7.5);
        assert_eq!(body["width"], 1024);
        assert_eq!(body["height"], 1024);
        assert_eq!(body["samples"], 1);
        assert!(body.get("style_preset").is_none());
    }

    #[test]
    fn test_build_request_body_with_params() {
        let request = GenerationRequest::new("a forest")
            .with_size(ImageSize::Landscape1024)
            .with_param("negative_prompt", "blurry")
            .with_param("style_preset", "comic-book")
            .with_param("steps", 50)
            .with_param("cfg_scale", 9.0);
        let body = provider("http://unused").build_request_body(&request);

        assert_eq!(body["text_prompts"][1]["text"], "blurry");
        assert_eq!(body["text_prompts"][1]["weight"], -1.0);
        assert_eq!(body["style_preset"], "comic-book");
        assert_eq!(body["steps"], 50);
        assert_eq!(body["cfg_scale"], 9.0);
        assert_eq!(body["width"], 1024);
        assert_eq!(body["height"], 768);
    }

    #[test]
    fn test_pricing() {
        let provider = provider("http://unused");
        assert_eq!(provider.estimate_cost(1, None, Some(ImageQuality::Standard)), 0.04);
        assert_eq!(provider.estimate_cost(1, None, Some(ImageQuality::Hd)), 0.06);
        assert!((provider.estimate_cost(10, None, None) - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_generate_success() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(mock_png());
        let body = serde_json::json!({
            "artifacts": [{"base64": encoded, "seed": 42, "finishReason": "SUCCESS"}]
        });
        let (base, server) = test_server::serve_once(200, body.to_string()).await;

        let result = provider(&base).generate(&GenerationRequest::new("a forest")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metadata["seed"], 42);
        assert_eq!(result.metadata["finish_reason"], "SUCCESS");
        assert!(provider(&base).validate(result.image_bytes.as_deref().unwrap(), "a forest").is_valid);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/generation/stable-diffusion-xl-1024-v1-0/text-to-image"));
    }

    #[tokio::test]
    async fn test_generate_classifies_failures() {
        let (base, server) = test_server::serve_once(429, r#"{"message":"slow down"}"#.to_string()).await;
        let result = provider(&base).generate(&GenerationRequest::new("a forest")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RateLimited));
        assert!(result.error_message().unwrap().contains("slow down"));
        server.await.unwrap();

        let (base, server) = test_server::serve_once(200, r#"{"artifacts":[]}"#.to_string()).await;
        let result = provider(&base).generate(&GenerationRequest::new("a forest")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::MalformedResponse));
        server.await.unwrap();
    }
}
