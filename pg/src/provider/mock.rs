//! Scripted in-process provider
//!
//! Selected with `type: mock` in configuration. Tests use it to drive the
//! orchestrator through exact failure sequences.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ErrorKind, GenerationError, ImageProvider};
use crate::config::ProviderConfig;
use crate::domain::{GenerationRequest, GenerationResult};

/// One scripted outcome; serialized as `success` or an error kind name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MockStep {
    Succeed,
    Fail(ErrorKind),
}

impl TryFrom<String> for MockStep {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "success" | "succeed" | "ok" => Ok(Self::Succeed),
            other => other.parse::<ErrorKind>().map(Self::Fail),
        }
    }
}

impl From<MockStep> for String {
    fn from(step: MockStep) -> Self {
        match step {
            MockStep::Succeed => "success".to_string(),
            MockStep::Fail(kind) => kind.to_string(),
        }
    }
}

/// Provider that replays a script of outcomes
///
/// Once the script runs out the last step repeats; an empty script always
/// succeeds.
pub struct MockProvider {
    config: ProviderConfig,
    script: Vec<MockStep>,
    latency: Duration,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(config: ProviderConfig) -> Self {
        debug!(name = %config.name, script_len = config.mock_script.len(), "MockProvider::new: called");
        Self {
            script: config.mock_script.clone(),
            latency: Duration::from_millis(config.mock_latency_ms),
            config,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Always succeeds
    pub fn succeeding(name: &str) -> Self {
        Self::new(ProviderConfig::mock(name))
    }

    /// Always fails with `kind`
    pub fn failing(name: &str, kind: ErrorKind) -> Self {
        Self::scripted(name, vec![MockStep::Fail(kind)])
    }

    pub fn scripted(name: &str, script: Vec<MockStep>) -> Self {
        let mut config = ProviderConfig::mock(name);
        config.mock_script = script;
        Self::new(config)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_config(mut self, f: impl FnOnce(&mut ProviderConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Number of `generate` calls so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn step(&self, idx: usize) -> MockStep {
        self.script
            .get(idx)
            .or_else(|| self.script.last())
            .copied()
            .unwrap_or(MockStep::Succeed)
    }
}

/// A small but structurally valid PNG payload: signature, padding, IEND chunk
pub fn mock_png() -> Vec<u8> {
    const IEND: &[u8] = b"\0\0\0\0IEND\xaeB`\x82";
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.resize(2048 - IEND.len(), 0);
    bytes.extend_from_slice(IEND);
    bytes
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let step = self.step(idx);
        debug!(name = %self.config.name, idx, ?step, "MockProvider::generate: called");

        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let result = match step {
            MockStep::Succeed => GenerationResult::success(
                &self.config.name,
                &request.prompt,
                mock_png(),
                self.estimate_cost(1, request.size, request.quality),
            )
            .with_metadata("call", idx as u64),
            MockStep::Fail(kind) => GenerationResult::failure(
                &self.config.name,
                &request.prompt,
                GenerationError::new(kind, format!("mock failure on call {}", idx + 1)),
            ),
        };
        result.with_latency(started.elapsed())
    }
}
