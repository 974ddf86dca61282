//! OpenRouter adapter
//!
//! OpenRouter exposes image models through its chat completions endpoint:
//! the request asks for the `image` modality and the reply carries the image
//! as a base64 data URL on the assistant message.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::http::{build_client, decode_image, post_json, require_api_key};
use super::{ErrorKind, GenerationError, ImageProvider, ProviderError};
use crate::config::ProviderConfig;
use crate::domain::{GenerationRequest, GenerationResult, ImageQuality, ImageSize};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "google/gemini-2.5-flash-image";
const DEFAULT_COST_PER_IMAGE: f64 = 0.02;

/// Longest slice of assistant text quoted when no image came back
const MAX_CONTENT_ECHO: usize = 200;

/// OpenRouter chat-completions image client
pub struct OpenRouterImageProvider {
    config: ProviderConfig,
    api_key: String,
    base_url: String,
    model: String,
    http: Client,
}

impl OpenRouterImageProvider {
    /// Create a provider from configuration
    ///
    /// A non-positive `cost-per-image` falls back to the Gemini image price.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        debug!(name = %config.name, "OpenRouterImageProvider::from_config: called");
        let api_key = require_api_key(config)?;
        let http = build_client(config)?;

        let mut config = config.clone();
        if config.cost_per_image <= 0.0 {
            config.cost_per_image = DEFAULT_COST_PER_IMAGE;
        }

        Ok(Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            config,
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

    fn build_request_body(&self, request: &GenerationRequest) -> serde_json::Value {
        let (size, _) = self.resolve(request);
        debug!(%size, "OpenRouterImageProvider::build_request_body: called");

        serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "modalities": ["image", "text"],
            "image_config": {"aspect_ratio": aspect_ratio(size)},
        })
    }

    fn parse_response(
        &self,
        request: &GenerationRequest,
        response: ChatResponse,
    ) -> Result<GenerationResult, GenerationError> {
        let (size, quality) = self.resolve(request);
        let Some(choice) = response.choices.into_iter().next() else {
            return Err(GenerationError::new(ErrorKind::MalformedResponse, "No choices in response"));
        };

        let message = choice.message;
        let Some(image) = message.images.into_iter().next() else {
            let content = message.content.unwrap_or_default();
            let echoed: String = content.chars().take(MAX_CONTENT_ECHO).collect();
            return Err(GenerationError::new(
                ErrorKind::MalformedResponse,
                format!("No images in response. Content: {}", echoed),
            ));
        };
        if image.image_url.url.is_empty() {
            return Err(GenerationError::new(ErrorKind::MalformedResponse, "No image URL in response"));
        }

        let bytes = decode_image(strip_data_url(&image.image_url.url))?;
        Ok(GenerationResult::success(
            &self.config.name,
            &request.prompt,
            bytes,
            self.estimate_cost(1, Some(size), Some(quality)),
        )
        .with_metadata("model", self.model.as_str())
        .with_metadata("size", size.to_string())
        .with_metadata("quality", quality.as_str()))
    }
}

/// Reduced `W:H` ratio for a size, e.g. `1024x768` -> `4:3`
fn aspect_ratio(size: ImageSize) -> String {
    let (width, height) = size.dimensions();
    let divisor = gcd(width, height).max(1);
    format!("{}:{}", width / divisor, height / divisor)
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Payload of a `data:image/...;base64,` URL; bare base64 passes through
fn strip_data_url(url: &str) -> &str {
    if url.starts_with("data:")
        && let Some((_, payload)) = url.split_once(',')
    {
        return payload;
    }
    url
}

#[async_trait]
impl ImageProvider for OpenRouterImageProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        debug!(name = %self.config.name, model = %self.model, "OpenRouterImageProvider::generate: called");
        let started = Instant::now();

        let body = self.build_request_body(request);
        let url = format!("{}/chat/completions", self.base_url);
        let outcome = match post_json::<ChatResponse>(&self.http, &url, &self.api_key, &body).await {
            Ok(response) => self.parse_response(request, response),
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(result) => {
                info!(name = %self.config.name, cost = result.cost, "Generated image");
                result
            }
            Err(error) => {
                debug!(name = %self.config.name, %error, "OpenRouterImageProvider::generate: failed");
                GenerationResult::failure(&self.config.name, &request.prompt, error)
            }
        };
        result.with_latency(started.elapsed())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
    #[serde(default)]
    images: Vec<ImagePart>,
}

#[derive(Debug, Deserialize)]
struct ImagePart {
    image_url: ImageUrl,
}

#[derive(Debug, Deserialize)]
struct ImageUrl {
    #[serde(default)]
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ImageFormat, ProviderType};
    use crate::provider::http::test_server;
    use crate::provider::mock::mock_png;
    use base64::Engine;

    fn provider(base_url: &str) -> OpenRouterImageProvider {
        OpenRouterImageProvider {
            config: ProviderConfig {
                name: "openrouter".to_string(),
                provider_type: ProviderType::OpenRouter,
                cost_per_image: DEFAULT_COST_PER_IMAGE,
                ..Default::default()
            },
            api_key: "sk-or-test".to_string(),
            base_url: base_url.to_string(),
            model: DEFAULT_MODEL.to_string(),
            http: test_server::client(),
        }
    }

    fn reply_with_image(url: &str) -> String {
        serde_json::json!({
            "id": "gen-1",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "",
                    "images": [{"type": "image_url", "image_url": {"url": url}}]
                }
            }]
        })
        .to_string()
    }

    #[test]
    fn test_aspect_ratio_is_reduced() {
        assert_eq!(aspect_ratio(ImageSize::Square1024), "1:1");
        assert_eq!(aspect_ratio(ImageSize::Landscape1024), "4:3");
        assert_eq!(aspect_ratio(ImageSize::Portrait1024), "3:4");
        assert_eq!(aspect_ratio(ImageSize::Landscape1792), "7:4");
        assert_eq!(aspect_ratio(ImageSize::Portrait1792), "4:7");
    }

    #[test]
    fn test_build_request_body() {
        let provider = provider("http://unused");
        let body = provider.build_request_body(&GenerationRequest::new("a harbor").with_size(ImageSize::Landscape1024));

        assert_eq!(body["model"], "google/gemini-2.5-flash-image");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "a harbor");
        assert_eq!(body["modalities"], serde_json::json!(["image", "text"]));
        assert_eq!(body["image_config"]["aspect_ratio"], "4:3");
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,AAEC"), "AAEC");
        assert_eq!(strip_data_url("AAEC"), "AAEC");
    }

    #[tokio::test]
    async fn test_generate_decodes_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(mock_png());
        let (base, server) =
            test_server::serve_once(200, reply_with_image(&format!("data:image/png;base64,{}", encoded))).await;

        let result = provider(&base)
            .generate(&GenerationRequest::new("a cat").with_size(ImageSize::Portrait1792))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.image_bytes.as_deref(), Some(mock_png().as_slice()));
        assert_eq!(result.format, Some(ImageFormat::Png));
        assert_eq!(result.cost, 0.02);
        assert_eq!(result.metadata["model"], DEFAULT_MODEL);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /chat/completions"));
        let sent = test_server::request_json(&raw);
        assert_eq!(sent["image_config"]["aspect_ratio"], "4:7");
        assert_eq!(sent["messages"][0]["content"], "a cat");
    }

    #[tokio::test]
    async fn test_text_only_reply_is_malformed() {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "I cannot draw that"}}]
        });
        let (base, server) = test_server::serve_once(200, body.to_string()).await;
        let result = provider(&base).generate(&GenerationRequest::new("a cat")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::MalformedResponse));
        assert!(result.error_message().unwrap().contains("I cannot draw that"));
        server.await.unwrap();

        let (base, server) = test_server::serve_once(200, r#"{"choices":[]}"#.to_string()).await;
        let result = provider(&base).generate(&GenerationRequest::new("a cat")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::MalformedResponse));
        assert!(result.error_message().unwrap().contains("No choices"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_classifies_http_errors() {
        let (base, server) =
            test_server::serve_once(429, r#"{"error":{"message":"Rate limit exceeded","code":429}}"#.to_string()).await;
        let result = provider(&base).generate(&GenerationRequest::new("a cat")).await;
        assert_eq!(result.error_kind(), Some(ErrorKind::RateLimited));
        assert!(result.error_message().unwrap().contains("Rate limit exceeded"));
        assert_eq!(result.cost, 0.0);
        server.await.unwrap();
    }

    #[test]
    fn test_from_config_defaults() {
        let config = ProviderConfig {
            name: "or".to_string(),
            provider_type: ProviderType::OpenRouter,
            api_key: Some("sk-or-inline".to_string()),
            base_url: Some("http://localhost:9000/api/v1/".to_string()),
            cost_per_image: 0.0,
            ..Default::default()
        };
        let provider = OpenRouterImageProvider::from_config(&config).unwrap();
        assert_eq!(provider.base_url, "http://localhost:9000/api/v1");
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert!((provider.estimate_cost(3, None, None) - 0.06).abs() < 1e-9);
        assert_eq!(provider.info().cost_per_image, 0.02);

        let priced = ProviderConfig {
            cost_per_image: 0.05,
            model: Some("black-forest-labs/flux".to_string()),
            ..config
        };
        let provider = OpenRouterImageProvider::from_config(&priced).unwrap();
        assert_eq!(provider.model, "black-forest-labs/flux");
        assert_eq!(provider.estimate_cost(1, None, None), 0.05);
    }
}
