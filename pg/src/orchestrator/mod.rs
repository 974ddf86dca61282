//! Retry and fallback orchestration for a single generation request
//!
//! `run` drives one request through at most two providers: the primary under
//! the retry policy, then (if the policy gives up and the fallback strategy
//! names an alternate) exactly one attempt against the alternate. Every
//! provider call is admitted by the rate limiter first.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::domain::{BatchGenerationResult, GenerationRequest, GenerationResult};
use crate::fallback::{Candidate, FallbackSelector, FallbackStrategy};
use crate::provider::{ErrorKind, GenerationError, ImageProvider, ProviderError, create_providers};
use crate::ratelimit::RateLimiter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stats::{StatisticsAggregator, StatisticsSnapshot};

/// Errors that prevent a request from being attempted at all
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("No providers configured")]
    NoProviders,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Applies rate limiting, retries and fallback around provider calls
pub struct RetryFallbackOrchestrator {
    providers: Vec<Arc<dyn ImageProvider>>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    selector: FallbackSelector,
    stats: Arc<StatisticsAggregator>,
}

impl RetryFallbackOrchestrator {
    /// `providers` is the configured order used by `next_provider` and as the
    /// default primary
    pub fn new(
        providers: Vec<Arc<dyn ImageProvider>>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        strategy: FallbackStrategy,
        stats: Arc<StatisticsAggregator>,
    ) -> Result<Self, OrchestratorError> {
        debug!(provider_count = providers.len(), %strategy, "RetryFallbackOrchestrator::new: called");
        if providers.is_empty() {
            return Err(OrchestratorError::NoProviders);
        }
        let candidates = providers.iter().map(|p| Candidate::from_provider(p.as_ref())).collect();
        Ok(Self {
            selector: FallbackSelector::new(strategy, candidates),
            providers,
            limiter,
            policy,
            stats,
        })
    }

    /// Build providers, limiter, policy and statistics from configuration
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        debug!("RetryFallbackOrchestrator::from_config: called");
        let providers = create_providers(&config.providers)?;
        let limiter = if config.queue.enable_rate_limiting {
            RateLimiter::new(config.providers.iter().map(|p| (p.name.clone(), p.rate_limit)))
        } else {
            RateLimiter::disabled()
        };
        let stats = StatisticsAggregator::new(config.fallback, config.providers.iter().map(|p| p.name.clone()));

        Self::new(
            providers,
            Arc::new(limiter),
            RetryPolicy::new(config.retry.clone()),
            config.fallback,
            Arc::new(stats),
        )
    }

    pub fn providers(&self) -> &[Arc<dyn ImageProvider>] {
        &self.providers
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn ImageProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn strategy(&self) -> FallbackStrategy {
        self.selector.strategy()
    }

    /// Shared handle to the statistics this orchestrator records into
    pub fn stats(&self) -> Arc<StatisticsAggregator> {
        self.stats.clone()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_statistics(&self) {
        self.stats.reset();
    }

    /// Name of the provider a request starts on
    pub fn primary_name(&self, request: &GenerationRequest) -> String {
        match &request.provider_name {
            Some(name) => name.clone(),
            None => self.providers.first().map(|p| p.name().to_string()).unwrap_or_default(),
        }
    }

    fn primary(&self, request: &GenerationRequest) -> Result<&Arc<dyn ImageProvider>, OrchestratorError> {
        match &request.provider_name {
            Some(name) => self
                .provider(name)
                .ok_or_else(|| OrchestratorError::UnknownProvider(name.clone())),
            None => self.providers.first().ok_or(OrchestratorError::NoProviders),
        }
    }

    /// Generate one image with retries and at most one fallback hop
    pub async fn run(&self, request: &GenerationRequest) -> Result<GenerationResult, OrchestratorError> {
        let primary = self.primary(request)?;
        debug!(primary = %primary.name(), "RetryFallbackOrchestrator::run: called");

        let result = self.run_with_retries(primary.as_ref(), request).await;
        if result.success {
            return Ok(result);
        }

        let Some(alternate) = self
            .selector
            .select(primary.name())
            .and_then(|name| self.provider(name))
        else {
            debug!(primary = %primary.name(), "RetryFallbackOrchestrator::run: no fallback");
            return Ok(result);
        };

        warn!(
            from = %primary.name(),
            to = %alternate.name(),
            error = ?result.error_message(),
            "Falling back to alternate provider"
        );
        self.stats.record_fallback();

        // The fallback gets a single attempt; its outcome is final
        let fallback = self.attempt(alternate.as_ref(), request).await;
        Ok(fallback.with_metadata("fallback_from", primary.name()))
    }

    /// Like `run`, but request-level errors become a failed result
    pub async fn run_to_result(&self, request: &GenerationRequest) -> GenerationResult {
        match self.run(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Request could not be attempted");
                GenerationResult::failure(
                    request.provider_name.clone().unwrap_or_default(),
                    &request.prompt,
                    GenerationError::new(ErrorKind::Unknown, e.to_string()),
                )
            }
        }
    }

    /// Run several requests one after another
    pub async fn generate_batch(&self, requests: &[GenerationRequest]) -> BatchGenerationResult {
        debug!(count = requests.len(), "RetryFallbackOrchestrator::generate_batch: called");
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.run_to_result(request).await);
        }
        BatchGenerationResult::from_results(results)
    }

    async fn run_with_retries(&self, provider: &dyn ImageProvider, request: &GenerationRequest) -> GenerationResult {
        let policy = self.policy.with_max_retries(provider.config().max_retries);
        let mut attempt = 0u32;

        loop {
            let result = self.attempt(provider, request).await;
            if result.success {
                if attempt > 0 {
                    info!(provider = %provider.name(), retries = attempt, "Succeeded after retries");
                }
                return result;
            }

            let kind = result.error_kind().unwrap_or(ErrorKind::Unknown);
            match policy.decide(kind, attempt) {
                RetryDecision::Retry { delay } => {
                    // A local rejection cannot succeed before the window frees up
                    let delay = if is_local_rejection(&result) {
                        delay.max(self.limiter.retry_after(provider.name()))
                    } else {
                        delay
                    };
                    warn!(provider = %provider.name(), %kind, attempt = attempt + 1, ?delay, "Retrying after failure");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp { reason } => {
                    warn!(provider = %provider.name(), %kind, %reason, "Giving up on provider");
                    return result;
                }
            }
        }
    }

    /// One rate-limited provider call, recorded in statistics if it happened
    async fn attempt(&self, provider: &dyn ImageProvider, request: &GenerationRequest) -> GenerationResult {
        let name = provider.name();
        if let Err(e) = self.limiter.check_and_record(name) {
            debug!(provider = %name, "RetryFallbackOrchestrator::attempt: rejected by rate limiter");
            return GenerationResult::failure(
                name,
                &request.prompt,
                GenerationError::new(ErrorKind::RateLimited, e.to_string()),
            )
            .with_metadata(LOCAL_REJECTION, true);
        }

        let guard = AttemptGuard::start(&self.stats, name);
        let result = match AssertUnwindSafe(provider.generate(request)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(provider = %name, %message, "Provider panicked");
                GenerationResult::failure(
                    name,
                    &request.prompt,
                    GenerationError::new(ErrorKind::Unknown, format!("Provider panicked: {}", message)),
                )
            }
        };
        guard.settle(&result);
        result
    }
}

/// Pairs a recorded attempt with its outcome
///
/// Dropping an unsettled guard (the attempt's future was cancelled, e.g. by
/// an aborted worker) records a failure so that every attempt is matched.
struct AttemptGuard<'a> {
    stats: &'a StatisticsAggregator,
    provider: &'a str,
    settled: bool,
}

impl<'a> AttemptGuard<'a> {
    fn start(stats: &'a StatisticsAggregator, provider: &'a str) -> Self {
        stats.record_attempt(provider);
        Self {
            stats,
            provider,
            settled: false,
        }
    }

    fn settle(mut self, result: &GenerationResult) {
        if result.success {
            self.stats.record_success(self.provider, result.cost);
        } else {
            self.stats.record_failure(self.provider);
        }
        self.settled = true;
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!(provider = %self.provider, "Attempt cancelled before completion");
            self.stats.record_failure(self.provider);
        }
    }
}

const LOCAL_REJECTION: &str = "rate_limited_locally";

fn is_local_rejection(result: &GenerationResult) -> bool {
    result.metadata.get(LOCAL_REJECTION).and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
