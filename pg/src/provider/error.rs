//! Provider error types and failure classification

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed generation attempt
///
/// The retry policy and fallback selector act on this, never on the message
/// text, so adapters must map every failure to the narrowest kind they can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    AuthFailed,
    Timeout,
    TransientServerError,
    MalformedResponse,
    UnsupportedParameter,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        Self::RateLimited,
        Self::AuthFailed,
        Self::Timeout,
        Self::TransientServerError,
        Self::MalformedResponse,
        Self::UnsupportedParameter,
        Self::Unknown,
    ];

    /// Kinds that may succeed if the same request is repeated later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::TransientServerError)
    }

    /// Kinds that will fail again against the same provider no matter what
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::MalformedResponse | Self::UnsupportedParameter
        )
    }

    /// Classify a non-2xx HTTP status
    ///
    /// `body` is the raw error payload; 400/422 responses naming a request
    /// parameter are reported as `UnsupportedParameter`.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => Self::AuthFailed,
            429 => Self::RateLimited,
            408 => Self::Timeout,
            500..=599 => Self::TransientServerError,
            400 | 422 if mentions_parameter(body) => Self::UnsupportedParameter,
            _ => Self::MalformedResponse,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::AuthFailed => "auth_failed",
            Self::Timeout => "timeout",
            Self::TransientServerError => "transient_server_error",
            Self::MalformedResponse => "malformed_response",
            Self::UnsupportedParameter => "unsupported_parameter",
            Self::Unknown => "unknown",
        }
    }
}

fn mentions_parameter(body: &str) -> bool {
    let lower = body.to_lowercase();
    ["param", "size", "quality", "unsupported", "invalid_value", "not supported"]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown error kind: {}", s))
    }
}

/// A classified generation failure carried inside a `GenerationResult`
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() || err.is_request() {
            ErrorKind::TransientServerError
        } else if err.is_decode() || err.is_body() {
            ErrorKind::MalformedResponse
        } else {
            ErrorKind::Unknown
        };
        Self::new(kind, format!("Network error: {}", err))
    }
}

/// Errors raised while constructing providers
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("No API key found for provider '{provider}'. Set the {env_var} environment variable or api-key in config")]
    MissingApiKey { provider: String, env_var: String },

    #[error("Duplicate provider name: {0}")]
    DuplicateName(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ErrorKind::from_status(401, ""), ErrorKind::AuthFailed);
        assert_eq!(ErrorKind::from_status(403, ""), ErrorKind::AuthFailed);
        assert_eq!(ErrorKind::from_status(429, ""), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(408, ""), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_status(500, ""), ErrorKind::TransientServerError);
        assert_eq!(ErrorKind::from_status(503, "overloaded"), ErrorKind::TransientServerError);
        assert_eq!(ErrorKind::from_status(404, "not found"), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_bad_request_naming_parameter() {
        let body = r#"{"error":{"message":"Invalid value for 'size'","param":"size"}}"#;
        assert_eq!(ErrorKind::from_status(400, body), ErrorKind::UnsupportedParameter);
        assert_eq!(ErrorKind::from_status(400, "{\"error\":\"nope\"}"), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_transient_and_permanent_are_disjoint() {
        for kind in ErrorKind::ALL {
            assert!(!(kind.is_transient() && kind.is_permanent()), "{kind} is both");
        }
        assert!(!ErrorKind::Unknown.is_transient());
        assert!(!ErrorKind::Unknown.is_permanent());
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        assert_eq!("transient_server_error".parse::<ErrorKind>().unwrap(), ErrorKind::TransientServerError);
        assert!("server_error".parse::<ErrorKind>().is_err());
    }

    #[test]
    fn test_generation_error_display() {
        let err = GenerationError::new(ErrorKind::AuthFailed, "Invalid API key");
        assert_eq!(err.to_string(), "auth_failed: Invalid API key");
    }
}
