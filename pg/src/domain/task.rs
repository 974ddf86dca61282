//! Generation task lifecycle record

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::image::{ImageQuality, ImageSize};
use super::result::{GenerationResult, PanelOutcome};

/// Lifecycle status of a generation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What to generate; shared by tasks, the orchestrator and providers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Primary provider; the first configured provider when absent
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub size: Option<ImageSize>,
    #[serde(default)]
    pub quality: Option<ImageQuality>,
    /// Provider-specific parameters (style, steps, cfg_scale, ...)
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_name = Some(provider.into());
        self
    }

    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_quality(mut self, quality: ImageQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }
}

/// Input for enqueueing one task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Generated (UUID v7) when absent
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

impl TaskSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            task_id: None,
            request: GenerationRequest::new(prompt),
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_request(mut self, request: GenerationRequest) -> Self {
        self.request = request;
        self
    }
}

/// One generation request tracked from enqueue to terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    pub task_id: String,
    pub request: GenerationRequest,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<GenerationResult>,
    pub error: Option<String>,
}

impl GenerationTask {
    /// Build a pending task, assigning an id if the spec has none
    pub fn from_spec(spec: TaskSpec) -> Self {
        let task_id = spec.task_id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        debug!(%task_id, "GenerationTask::from_spec: called");
        Self {
            task_id,
            request: spec.request,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// pending -> processing; false if the task was not pending
    pub fn begin(&mut self) -> bool {
        if self.status != TaskStatus::Pending {
            debug!(task_id = %self.task_id, status = %self.status, "GenerationTask::begin: not pending");
            return false;
        }
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    /// processing -> completed/failed; false if the task was not processing
    pub fn finish(&mut self, result: GenerationResult) -> bool {
        if self.status != TaskStatus::Processing {
            debug!(task_id = %self.task_id, status = %self.status, "GenerationTask::finish: not processing");
            return false;
        }
        self.status = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.error = if result.success {
            None
        } else {
            Some(
                result
                    .error_message()
                    .unwrap_or_else(|| "Generation failed without an error message".to_string()),
            )
        };
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        true
    }

    /// Downstream view of this task; meaningful once terminal
    pub fn outcome(&self) -> PanelOutcome {
        PanelOutcome {
            panel_id: self.task_id.clone(),
            success: self.status == TaskStatus::Completed,
            image_bytes: self.result.as_ref().and_then(|r| r.image_bytes.clone()),
            provider: self.result.as_ref().map(|r| r.provider.clone()),
            cost: self.result.as_ref().map(|r| r.cost).unwrap_or(0.0),
            error: self.error.clone(),
        }
    }
}
