//! HTTP plumbing shared by the remote adapters
//!
//! Adapters never retry here; every failure is classified once and handed
//! back to the orchestrator.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ErrorKind, GenerationError, ProviderError};
use crate::config::ProviderConfig;

/// Longest raw body echoed into an error message
const MAX_ERROR_BODY: usize = 200;

/// Build a client with the provider's request timeout
pub(crate) fn build_client(config: &ProviderConfig) -> Result<Client, ProviderError> {
    debug!(name = %config.name, timeout_ms = config.timeout_ms, "build_client: called");
    Ok(Client::builder().timeout(config.timeout()).build()?)
}

/// Resolve the key for a remote provider or fail construction
pub(crate) fn require_api_key(config: &ProviderConfig) -> Result<String, ProviderError> {
    config.resolve_api_key().ok_or_else(|| ProviderError::MissingApiKey {
        provider: config.name.clone(),
        env_var: config.api_key_env_name(),
    })
}

/// POST a JSON body with bearer auth and decode a JSON reply
pub(crate) async fn post_json<T: DeserializeOwned>(
    http: &Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> Result<T, GenerationError> {
    debug!(%url, "post_json: called");
    let response = http
        .post(url)
        .bearer_auth(api_key)
        .header("accept", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| {
            debug!(error = %e, "post_json: transport error");
            GenerationError::from_transport(&e)
        })?;

    let status = response.status().as_u16();
    let text = response.text().await.map_err(|e| GenerationError::from_transport(&e))?;

    if !(200..300).contains(&status) {
        let kind = ErrorKind::from_status(status, &text);
        debug!(status, %kind, "post_json: API error");
        return Err(GenerationError::new(
            kind,
            format!("HTTP {}: {}", status, extract_error_message(&text)),
        ));
    }

    serde_json::from_str(&text).map_err(|e| {
        debug!(error = %e, "post_json: unparseable body");
        GenerationError::new(ErrorKind::MalformedResponse, format!("Invalid response body: {}", e))
    })
}

/// Decode a base64 image payload
pub(crate) fn decode_image(encoded: &str) -> Result<Vec<u8>, GenerationError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| GenerationError::new(ErrorKind::MalformedResponse, format!("Invalid base64 image: {}", e)))
}

/// Pull a readable message out of an error payload
///
/// Understands OpenAI's `{"error": {"message"}}` and Stability's
/// `{"message"}` shapes; anything else is echoed, truncated.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("message"))
            .or_else(|| json.get("error"))
            .and_then(|v| v.as_str());
        if let Some(message) = message {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_openai_message() {
        let body = r#"{"error":{"message":"Your prompt was rejected","type":"invalid_request_error"}}"#;
        assert_eq!(extract_error_message(body), "Your prompt was rejected");
    }

    #[test]
    fn test_extract_stability_message() {
        let body = r#"{"id":"abc","name":"unauthorized","message":"missing authorization header"}"#;
        assert_eq!(extract_error_message(body), "missing authorization header");
    }

    #[test]
    fn test_extract_plain_text_truncated() {
        assert_eq!(extract_error_message("  "), "empty response body");
        assert_eq!(extract_error_message("Bad Gateway"), "Bad Gateway");

        let long = "x".repeat(500);
        let message = extract_error_message(&long);
        assert_eq!(message.len(), MAX_ERROR_BODY + 3);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn test_decode_image() {
        assert_eq!(decode_image("AAEC").unwrap(), vec![0, 1, 2]);
        let err = decode_image("not base64!").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_require_api_key() {
        let config = ProviderConfig {
            api_key: Some("sk-inline".to_string()),
            ..ProviderConfig::mock("remote")
        };
        assert_eq!(require_api_key(&config).unwrap(), "sk-inline");

        let missing = ProviderConfig {
            api_key_env: Some("PANELGEN_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..ProviderConfig::mock("remote")
        };
        assert!(matches!(
            require_api_key(&missing),
            Err(ProviderError::MissingApiKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_post_json_classifies_status() {
        let cases = [
            (401, ErrorKind::AuthFailed),
            (429, ErrorKind::RateLimited),
            (503, ErrorKind::TransientServerError),
            (404, ErrorKind::MalformedResponse),
        ];
        for (status, expected) in cases {
            let (base, server) = test_server::serve_once(status, r#"{"message":"nope"}"#.to_string()).await;
            let err = post_json::<serde_json::Value>(&test_server::client(), &base, "sk", &serde_json::json!({}))
                .await
                .unwrap_err();
            assert_eq!(err.kind, expected, "status {}", status);
            assert!(err.message.contains("nope"));
            server.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_post_json_sends_bearer_and_body() {
        let (base, server) = test_server::serve_once(200, r#"{"ok":true}"#.to_string()).await;
        let reply: serde_json::Value = post_json(
            &test_server::client(),
            &format!("{}/v1/thing", base),
            "sk-secret",
            &serde_json::json!({"prompt": "a cat"}),
        )
        .await
        .unwrap();
        assert_eq!(reply["ok"], true);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/thing"));
        assert!(raw.to_lowercase().contains("authorization: bearer sk-secret"));
        assert_eq!(test_server::request_json(&raw)["prompt"], "a cat");
    }

    #[tokio::test]
    async fn test_post_json_unparseable_success_body() {
        let (base, server) = test_server::serve_once(200, "<html>".to_string()).await;
        let err = post_json::<serde_json::Value>(&test_server::client(), &base, "sk", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        server.await.unwrap();
    }
}
