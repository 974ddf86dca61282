//! Generation, validation and downstream outcome values

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::image::ImageFormat;
use crate::provider::{ErrorKind, GenerationError};

/// Result of one provider invocation (or of a whole task, once terminal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(with = "base64_bytes", default, skip_serializing_if = "Option::is_none")]
    pub image_bytes: Option<Vec<u8>>,
    pub format: Option<ImageFormat>,
    /// Name of the provider that produced this result
    pub provider: String,
    pub prompt: String,
    /// USD
    pub cost: f64,
    pub latency_ms: u64,
    pub error: Option<GenerationError>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub generated_at: DateTime<Utc>,
}

impl GenerationResult {
    /// A successful result; the format is sniffed from the bytes
    pub fn success(provider: impl Into<String>, prompt: impl Into<String>, image_bytes: Vec<u8>, cost: f64) -> Self {
        Self {
            success: true,
            format: ImageFormat::detect(&image_bytes),
            image_bytes: Some(image_bytes),
            provider: provider.into(),
            prompt: prompt.into(),
            cost,
            latency_ms: 0,
            error: None,
            metadata: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    /// A failed result carrying a classified error
    pub fn failure(provider: impl Into<String>, prompt: impl Into<String>, error: GenerationError) -> Self {
        Self {
            success: false,
            image_bytes: None,
            format: None,
            provider: provider.into(),
            prompt: prompt.into(),
            cost: 0.0,
            latency_ms: 0,
            error: Some(error),
            metadata: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Classified failure kind, if any
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Human-readable error message, if any
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}

/// Aggregate of a sequential batch of generations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchGenerationResult {
    pub total_requested: usize,
    pub total_success: usize,
    pub total_failed: usize,
    pub total_cost: f64,
    pub results: Vec<GenerationResult>,
    pub generated_at: DateTime<Utc>,
}

impl BatchGenerationResult {
    pub fn from_results(results: Vec<GenerationResult>) -> Self {
        let total_success = results.iter().filter(|r| r.success).count();
        Self {
            total_requested: results.len(),
            total_success,
            total_failed: results.len() - total_success,
            total_cost: results.iter().map(|r| r.cost).sum(),
            results,
            generated_at: Utc::now(),
        }
    }
}

/// How serious a validation finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationSeverity {
    /// Acceptable but worth noting
    Warning,
    /// Should be regenerated
    Error,
}

/// One validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub severity: ValidationSeverity,
}

impl ValidationIssue {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Outcome of structural image validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// 0.0 to 1.0
    pub score: f64,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub checked_at: DateTime<Utc>,
}

impl ValidationResult {
    /// Score the findings: -0.5 per error, -0.1 per warning, valid above 0.5
    pub fn from_issues(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        let score = (1.0 - 0.5 * errors.len() as f64 - 0.1 * warnings.len() as f64).clamp(0.0, 1.0);
        Self {
            is_valid: score > 0.5,
            score,
            errors,
            warnings,
            checked_at: Utc::now(),
        }
    }
}

/// Aggregate view over several validation results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub validity_rate: f64,
    pub average_score: f64,
    /// Error code -> occurrences
    pub error_types: BTreeMap<String, usize>,
    /// Warning code -> occurrences
    pub warning_types: BTreeMap<String, usize>,
}

impl ValidationSummary {
    pub fn from_results(results: &[ValidationResult]) -> Self {
        let total = results.len();
        let valid = results.iter().filter(|r| r.is_valid).count();
        let (validity_rate, average_score) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                valid as f64 / total as f64,
                results.iter().map(|r| r.score).sum::<f64>() / total as f64,
            )
        };

        let mut error_types = BTreeMap::new();
        let mut warning_types = BTreeMap::new();
        for result in results {
            for issue in &result.errors {
                *error_types.entry(issue.code.clone()).or_insert(0) += 1;
            }
            for issue in &result.warnings {
                *warning_types.entry(issue.code.clone()).or_insert(0) += 1;
            }
        }

        Self {
            total,
            valid,
            invalid: total - valid,
            validity_rate,
            average_score,
            error_types,
            warning_types,
        }
    }
}

/// Per-panel record handed to the downstream image storage collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelOutcome {
    pub panel_id: String,
    pub success: bool,
    #[serde(with = "base64_bytes", default)]
    pub image_bytes: Option<Vec<u8>>,
    pub provider: Option<String>,
    pub cost: f64,
    pub error: Option<String>,
}

/// Serde helper: `Option<Vec<u8>>` as an optional base64 string
pub(crate) mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
