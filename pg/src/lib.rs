//! panelgen - Concurrent panel image generation
//!
//! panelgen sits between a producer of image-generation tasks (one per comic
//! panel) and a set of interchangeable remote image providers. Tasks are
//! dispatched to a bounded pool of async workers; every provider call passes a
//! per-provider sliding-window rate limiter, transient failures are retried
//! with exponential backoff, and a task whose primary provider gives up gets
//! exactly one attempt against an alternate chosen by the fallback strategy.
//!
//! # Modules
//!
//! - [`domain`] - Tasks, requests, results and image parameters
//! - [`provider`] - `ImageProvider` trait, mock and HTTP adapters
//! - [`ratelimit`] - Per-provider sliding-window limiter
//! - [`retry`] - Backoff and retry/give-up decisions
//! - [`fallback`] - Alternate provider selection
//! - [`orchestrator`] - Retry and fallback around one request
//! - [`queue`] - Task queue, registry and worker pool
//! - [`stats`] - Aggregate statistics
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod fallback;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod stats;

pub use config::{Config, ProviderConfig, QueueConfig};
pub use domain::{
    GenerationRequest, GenerationResult, GenerationTask, ImageQuality, ImageSize, PanelOutcome, TaskSpec, TaskStatus,
};
pub use fallback::{FallbackSelector, FallbackStrategy};
pub use orchestrator::{OrchestratorError, RetryFallbackOrchestrator};
pub use provider::{ErrorKind, GenerationError, ImageProvider, MockProvider, ProviderError};
pub use queue::{QueueError, QueueStatus, WorkerPool};
pub use ratelimit::{RateLimitError, RateLimiter};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use stats::{StatisticsAggregator, StatisticsSnapshot};
