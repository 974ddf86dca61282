//! Per-provider sliding-window rate limiting
//!
//! Each provider owns a window of request instants behind its own lock, so
//! workers calling different providers never contend with each other.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default rate window
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// A request was refused because the provider's window is full
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded for {provider}: {count} requests in last {window:?} (limit: {limit}), retry after {retry_after:?}")]
pub struct RateLimitError {
    pub provider: String,
    pub count: usize,
    pub limit: u32,
    pub window: Duration,
    pub retry_after: Duration,
}

/// Sliding window state for one provider
#[derive(Debug)]
struct Window {
    limit: u32,
    request_times: VecDeque<Instant>,
}

impl Window {
    fn prune(&mut self, now: Instant, window: Duration) {
        // Entries exactly `window` old have aged out
        while self
            .request_times
            .front()
            .map(|t| now.saturating_duration_since(*t) >= window)
            .unwrap_or(false)
        {
            self.request_times.pop_front();
        }
    }

    fn retry_after(&self, now: Instant, window: Duration) -> Duration {
        self.request_times
            .front()
            .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-provider request counters over a trailing window
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    providers: HashMap<String, Mutex<Window>>,
}

impl RateLimiter {
    /// Create a limiter for the given `(provider, requests per window)` pairs
    ///
    /// A limit of 0 means unlimited.
    pub fn new<I, S>(limits: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        Self::with_window(limits, RATE_WINDOW)
    }

    pub fn with_window<I, S>(limits: I, window: Duration) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let providers: HashMap<String, Mutex<Window>> = limits
            .into_iter()
            .map(|(name, limit)| {
                (
                    name.into(),
                    Mutex::new(Window {
                        limit,
                        request_times: VecDeque::new(),
                    }),
                )
            })
            .collect();
        debug!(provider_count = providers.len(), ?window, "RateLimiter::with_window: called");
        Self { window, providers }
    }

    /// A limiter that admits everything
    pub fn disabled() -> Self {
        debug!("RateLimiter::disabled: called");
        Self {
            window: RATE_WINDOW,
            providers: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit and record one request, or refuse without recording
    pub fn check_and_record(&self, provider: &str) -> Result<(), RateLimitError> {
        let Some(slot) = self.providers.get(provider) else {
            debug!(%provider, "RateLimiter::check_and_record: unlimited provider");
            return Ok(());
        };

        let mut window = match slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if window.limit == 0 {
            return Ok(());
        }

        let now = Instant::now();
        window.prune(now, self.window);

        let count = window.request_times.len();
        if count >= window.limit as usize {
            let retry_after = window.retry_after(now, self.window);
            warn!(%provider, count, limit = window.limit, ?retry_after, "Rate limited locally");
            return Err(RateLimitError {
                provider: provider.to_string(),
                count,
                limit: window.limit,
                window: self.window,
                retry_after,
            });
        }

        window.request_times.push_back(now);
        debug!(%provider, count = count + 1, limit = window.limit, "RateLimiter::check_and_record: admitted");
        Ok(())
    }

    /// Requests recorded within the trailing window
    pub fn current_count(&self, provider: &str) -> usize {
        self.providers
            .get(provider)
            .and_then(|slot| slot.lock().ok())
            .map(|mut window| {
                window.prune(Instant::now(), self.window);
                window.request_times.len()
            })
            .unwrap_or(0)
    }

    /// Time until the next request to `provider` would be admitted
    pub fn retry_after(&self, provider: &str) -> Duration {
        let Some(mut window) = self.providers.get(provider).and_then(|slot| slot.lock().ok()) else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        window.prune(now, self.window);
        if window.limit == 0 || window.request_times.len() < window.limit as usize {
            Duration::ZERO
        } else {
            window.retry_after(now, self.window)
        }
    }
}
