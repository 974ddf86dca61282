//! Aggregate generation statistics
//!
//! Tracks, behind one lock so a snapshot is always consistent:
//! - Per-provider attempts, successes, failures and cost
//! - Fallback hops taken
//! - Terminal task totals for the queue status

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fallback::FallbackStrategy;

/// Counters for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Provider invocations (limiter rejections are not invocations)
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// successes / attempts, 0.0 before the first attempt
    pub success_rate: f64,
    /// USD spent on successful generations
    pub total_cost: f64,
}

/// Point-in-time copy of all statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub providers: BTreeMap<String, ProviderStats>,
    pub fallback_count: u64,
    pub fallback_strategy: FallbackStrategy,
}

impl StatisticsSnapshot {
    pub fn total_attempts(&self) -> u64 {
        self.providers.values().map(|p| p.attempts).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.providers.values().map(|p| p.total_cost).sum()
    }
}

/// Terminal task counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTotals {
    pub total_processed: u64,
    pub total_success: u64,
    pub total_failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    providers: BTreeMap<String, ProviderStats>,
    fallback_count: u64,
    tasks: TaskTotals,
}

/// Shared statistics owned by the pool and handed to the orchestrator
#[derive(Debug)]
pub struct StatisticsAggregator {
    strategy: FallbackStrategy,
    counters: Mutex<Counters>,
}

impl StatisticsAggregator {
    /// Pre-register `providers` so they show up before their first attempt
    pub fn new<I, S>(strategy: FallbackStrategy, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let providers: BTreeMap<String, ProviderStats> = providers
            .into_iter()
            .map(|name| (name.into(), ProviderStats::default()))
            .collect();
        debug!(%strategy, provider_count = providers.len(), "StatisticsAggregator::new: called");
        Self {
            strategy,
            counters: Mutex::new(Counters {
                providers,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A provider is about to be invoked
    pub fn record_attempt(&self, provider: &str) {
        debug!(%provider, "StatisticsAggregator::record_attempt: called");
        self.lock().providers.entry(provider.to_string()).or_default().attempts += 1;
    }

    pub fn record_success(&self, provider: &str, cost: f64) {
        debug!(%provider, cost, "StatisticsAggregator::record_success: called");
        let mut counters = self.lock();
        let stats = counters.providers.entry(provider.to_string()).or_default();
        stats.successes += 1;
        stats.total_cost += cost;
    }

    pub fn record_failure(&self, provider: &str) {
        debug!(%provider, "StatisticsAggregator::record_failure: called");
        self.lock().providers.entry(provider.to_string()).or_default().failures += 1;
    }

    pub fn record_fallback(&self) {
        debug!("StatisticsAggregator::record_fallback: called");
        self.lock().fallback_count += 1;
    }

    /// A task reached a terminal status
    pub fn record_task(&self, success: bool) {
        debug!(success, "StatisticsAggregator::record_task: called");
        let mut counters = self.lock();
        counters.tasks.total_processed += 1;
        if success {
            counters.tasks.total_success += 1;
        } else {
            counters.tasks.total_failed += 1;
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let counters = self.lock();
        let providers = counters
            .providers
            .iter()
            .map(|(name, stats)| {
                let success_rate = if stats.attempts == 0 {
                    0.0
                } else {
                    stats.successes as f64 / stats.attempts as f64
                };
                (
                    name.clone(),
                    ProviderStats {
                        success_rate,
                        ..stats.clone()
                    },
                )
            })
            .collect();
        StatisticsSnapshot {
            providers,
            fallback_count: counters.fallback_count,
            fallback_strategy: self.strategy,
        }
    }

    pub fn task_totals(&self) -> TaskTotals {
        self.lock().tasks
    }

    /// Zero every counter, keeping registered providers
    pub fn reset(&self) {
        debug!("StatisticsAggregator::reset: called");
        let mut counters = self.lock();
        for stats in counters.providers.values_mut() {
            *stats = ProviderStats::default();
        }
        counters.fallback_count = 0;
        counters.tasks = TaskTotals::default();
    }
}
