//! Retry policy with deterministic exponential backoff
//!
//! After every failed attempt the orchestrator asks [`RetryPolicy::decide`]
//! whether to wait and try the same provider again or give up and hand over
//! to the fallback selector. The delay for attempt `n` (0-based index of the
//! attempt that just failed) is `initial_backoff * backoff_factor^n`, capped
//! at `max_backoff`. There is no jitter at this layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::ErrorKind;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Exponential growth factor
    #[serde(rename = "backoff-factor")]
    pub backoff_factor: f64,

    /// First retry delay in milliseconds
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Delay cap in milliseconds
    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Error kinds eligible for retry; only transient kinds are honored
    #[serde(rename = "retryable-errors")]
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            retryable_errors: vec![
                ErrorKind::RateLimited,
                ErrorKind::Timeout,
                ErrorKind::TransientServerError,
            ],
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff_ms = saturating_millis(delay);
        self
    }

    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff_ms = saturating_millis(delay);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }
}

fn saturating_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then attempt the same provider again
    Retry { delay: Duration },
    /// Stop retrying this provider
    GiveUp { reason: GiveUpReason },
}

/// Why the policy gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The error kind is never retried against the same provider
    NonRetryable(ErrorKind),
    /// The retry budget is spent
    Exhausted { attempts: u32 },
}

impl std::fmt::Display for GiveUpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonRetryable(kind) => write!(f, "non-retryable error ({})", kind),
            Self::Exhausted { attempts } => write!(f, "retries exhausted after {} attempts", attempts),
        }
    }
}

/// Retry/give-up state machine
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        debug!(?config, "RetryPolicy::new: called");
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// A copy of this policy with a provider-specific retry budget
    pub fn with_max_retries(&self, max_retries: Option<u32>) -> Self {
        match max_retries {
            Some(max_retries) => Self::new(self.config.clone().with_max_retries(max_retries)),
            None => self.clone(),
        }
    }

    /// Delay before retrying after the failed attempt `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max = self.config.max_backoff();
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.config.initial_backoff().as_secs_f64() * self.config.backoff_factor.powi(exponent);

        if !secs.is_finite() || secs < 0.0 || secs > max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether `kind` may be retried at all
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        kind.is_transient() && self.config.retryable_errors.contains(&kind)
    }

    /// Decide what follows the failed attempt `attempt` (0-based)
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        debug!(%kind, attempt, max_retries = self.config.max_retries, "RetryPolicy::decide: called");

        let budget = match kind {
            ErrorKind::Unknown => {
                debug!("RetryPolicy::decide: unknown error, at most one retry");
                self.config.max_retries.min(1)
            }
            k if self.is_retryable(k) => self.config.max_retries,
            k => {
                debug!(%k, "RetryPolicy::decide: non-retryable");
                return RetryDecision::GiveUp {
                    reason: GiveUpReason::NonRetryable(k),
                };
            }
        };

        if attempt < budget {
            let delay = self.backoff(attempt);
            debug!(?delay, "RetryPolicy::decide: retry");
            RetryDecision::Retry { delay }
        } else {
            debug!("RetryPolicy::decide: exhausted");
            RetryDecision::GiveUp {
                reason: GiveUpReason::Exhausted { attempts: attempt + 1 },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
