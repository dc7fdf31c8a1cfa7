use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::live_log::LiveLog;
use crate::observability::metrics;
use crate::rate_limiter::RateLimiter;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// When false, rate-limit failures are returned like any other failure.
    pub retry_on_rate_limit: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the `retry`-th retry (1-based): linear in the retry index.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.retry_delay * retry
    }
}

impl From<&RateLimitConfig> for RetryPolicy {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            retry_on_rate_limit: cfg.retry_on_rate_limit,
            max_retries: cfg.max_retries,
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

/// Runs provider calls behind the rate limiter, retrying throttled attempts.
#[derive(Clone, Debug)]
pub struct RetryExecutor {
    limiter: RateLimiter,
    policy: RetryPolicy,
    live_log: LiveLog,
}

impl RetryExecutor {
    pub fn new(limiter: RateLimiter, policy: RetryPolicy, live_log: LiveLog) -> Self {
        Self {
            limiter,
            policy,
            live_log,
        }
    }

    /// Convenience for callers that only need defaults wired to one live log.
    pub fn from_config(cfg: &RateLimitConfig, live_log: LiveLog) -> Self {
        let limiter = RateLimiter::new(cfg.into(), live_log.clone());
        info!(
            requests_per_minute = cfg.requests_per_minute,
            max_concurrent = cfg.max_concurrent_requests,
            max_retries = cfg.max_retries,
            "Retry executor configured"
        );
        Self::new(limiter, cfg.into(), live_log)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Invoke `operation` at most `max_retries + 1` times. Only failures whose
    /// kind is `RateLimit` are retried; anything else is returned at once.
    pub async fn execute_with_retry<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries: u32 = 0;
        loop {
            self.limiter.admit().await;

            let attempt = retries + 1;
            self.live_log.info(
                format!("Executing {} (attempt {})", label, attempt),
                Some(json!({ "operation": label, "attempt": attempt })),
            );

            match operation().await {
                Ok(value) => {
                    self.live_log.success(
                        format!("{} completed successfully", label),
                        Some(json!({ "operation": label, "attempts": attempt })),
                    );
                    return Ok(value);
                }
                Err(err)
                    if err.is_rate_limited()
                        && self.policy.retry_on_rate_limit
                        && retries < self.policy.max_retries =>
                {
                    retries += 1;
                    let delay = self.policy.delay_for(retries);
                    let delay_ms = delay.as_millis() as u64;
                    warn!(
                        operation = label,
                        retry = retries,
                        max_retries = self.policy.max_retries,
                        delay_ms,
                        "Rate limited, retrying"
                    );
                    self.live_log.warning(
                        format!(
                            "Rate limit error for {}. Retrying in {}ms (attempt {}/{})",
                            label, delay_ms, retries, self.policy.max_retries
                        ),
                        Some(json!({
                            "operation": label,
                            "attempt": retries,
                            "maxRetries": self.policy.max_retries,
                            "delay": delay_ms,
                        })),
                    );
                    metrics::retry::scheduled();
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_rate_limited() {
                        metrics::retry::exhausted();
                    }
                    error!(operation = label, attempts = attempt, error = %err, "Operation failed");
                    self.live_log.error(
                        format!("{} failed after {} attempts: {}", label, attempt, err),
                        Some(json!({
                            "operation": label,
                            "attempts": attempt,
                            "error": err.to_string(),
                        })),
                    );
                    return Err(err);
                }
            }
        }
    }
}
