use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::constants::RATE_WINDOW_SECS;
use crate::live_log::LiveLog;
use crate::observability::metrics;

const WINDOW: Duration = Duration::from_secs(RATE_WINDOW_SECS);

#[derive(Clone, Debug)]
pub struct Limits {
    pub requests_per_minute: u32,
    pub max_concurrent_requests: u32,
    pub min_delay_between_starts: Duration,
}

impl From<&RateLimitConfig> for Limits {
    fn from(cfg: &RateLimitConfig) -> Self {
        Self {
            requests_per_minute: cfg.requests_per_minute.max(1),
            max_concurrent_requests: cfg.max_concurrent_requests.max(1),
            min_delay_between_starts: Duration::from_millis(cfg.delay_between_requests_ms),
        }
    }
}

/// Admission gate for outbound provider calls.
///
/// Clones share the same window and concurrency slots, so one limiter can be
/// handed to every request handler that talks to the provider.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limits: Limits,
    // start instants of admitted calls, oldest first
    window: Mutex<VecDeque<Instant>>,
    sem: Semaphore,
    live_log: LiveLog,
}

impl RateLimiter {
    pub fn new(limits: Limits, live_log: LiveLog) -> Self {
        let limits = Limits {
            requests_per_minute: limits.requests_per_minute.max(1),
            max_concurrent_requests: limits.max_concurrent_requests.max(1),
            ..limits
        };
        let sem = Semaphore::new(limits.max_concurrent_requests as usize);
        Self {
            inner: Arc::new(Inner {
                window: Mutex::new(VecDeque::with_capacity(
                    limits.requests_per_minute as usize,
                )),
                limits,
                sem,
                live_log,
            }),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.inner.limits
    }

    /// Concurrency slots not currently held by a caller inside `admit`.
    pub fn available_slots(&self) -> usize {
        self.inner.sem.available_permits()
    }

    /// Starts recorded in the trailing minute.
    pub async fn window_len(&self) -> usize {
        let mut window = self.inner.window.lock().await;
        purge(&mut window, Instant::now());
        window.len()
    }

    /// Wait until one outbound call may start, then record its start.
    pub async fn admit(&self) {
        // Concurrency first; the permit is released when this function returns
        // or its future is dropped.
        let _permit = self
            .inner
            .sem
            .acquire()
            .await
            .expect("rate limiter semaphore is never closed");

        let rpm = self.inner.limits.requests_per_minute as usize;
        let occupancy = {
            let mut window = self.inner.window.lock().await;
            loop {
                let now = Instant::now();
                purge(&mut window, now);
                if window.len() < rpm {
                    break;
                }
                // purge leaves only entries younger than WINDOW, so this is positive
                let oldest = window.front().copied().unwrap_or(now);
                let wait = (oldest + WINDOW).saturating_duration_since(now);
                let wait_ms = wait.as_millis() as u64;
                warn!(wait_ms, in_window = window.len(), "Rate limit reached, waiting");
                self.inner.live_log.warning(
                    format!("Rate limit reached. Waiting {}ms before next request", wait_ms),
                    Some(json!({ "waitTimeMs": wait_ms, "requestsInWindow": window.len() })),
                );
                metrics::rate_limit::window_wait(wait.as_secs_f64());
                tokio::time::sleep(wait).await;
            }
            window.push_back(Instant::now());
            window.len()
        };

        metrics::rate_limit::admitted(occupancy);
        debug!(occupancy, limit = rpm, "Outbound call admitted");
        self.inner.live_log.info(
            format!("API call queued. Current window: {}/{}", occupancy, rpm),
            Some(json!({ "queueSize": occupancy, "maxRequests": rpm })),
        );

        let spacing = self.inner.limits.min_delay_between_starts;
        if !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
    }
}

fn purge(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rpm: u32, concurrent: u32, delay_ms: u64) -> RateLimiter {
        RateLimiter::new(
            Limits {
                requests_per_minute: rpm,
                max_concurrent_requests: concurrent,
                min_delay_between_starts: Duration::from_millis(delay_ms),
            },
            LiveLog::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_window_blocks_until_oldest_expires() {
        let rl = limiter(3, 5, 0);
        let t0 = Instant::now();
        for _ in 0..3 {
            rl.admit().await;
        }
        assert!(t0.elapsed() < Duration::from_secs(1));
        assert_eq!(rl.window_len().await, 3);

        rl.admit().await;
        assert!(t0.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_requests_per_minute() {
        let rl = limiter(4, 3, 0);
        let starts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for _ in 0..13 {
            let rl = rl.clone();
            let starts = starts.clone();
            handles.push(tokio::spawn(async move {
                rl.admit().await;
                starts.lock().unwrap().push(Instant::now());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut starts = starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 13);
        for (i, s) in starts.iter().enumerate() {
            let in_window = starts[i..].iter().filter(|t| **t < *s + WINDOW).count();
            assert!(in_window <= 4, "{} starts within one minute", in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_slots_bound_admissions() {
        let rl = limiter(100, 2, 1000);
        let t0 = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let rl = rl.clone();
            handles.push(tokio::spawn(async move {
                rl.admit().await;
                Instant::now()
            }));
        }
        tokio::task::yield_now().await;
        assert_eq!(rl.available_slots(), 0);

        let mut finished = Vec::new();
        for h in handles {
            finished.push(h.await.unwrap().duration_since(t0));
        }
        finished.sort();
        // two waves of two, each holding its slot for the spacing delay
        assert!(finished[1] >= Duration::from_secs(1) && finished[1] < Duration::from_millis(1500));
        assert!(finished[3] >= Duration::from_secs(2) && finished[3] < Duration::from_millis(2500));
        assert_eq!(rl.available_slots(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_sequential_starts() {
        let rl = limiter(60, 5, 1000);
        let t0 = Instant::now();
        rl.admit().await;
        rl.admit().await;
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_publishes_occupancy() {
        let log = LiveLog::new();
        let rl = RateLimiter::new(
            Limits {
                requests_per_minute: 1,
                max_concurrent_requests: 1,
                min_delay_between_starts: Duration::ZERO,
            },
            log.clone(),
        );
        rl.admit().await;
        rl.admit().await;

        let messages: Vec<String> = log.recent(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages[0], "API call queued. Current window: 1/1");
        assert!(messages[1].starts_with("Rate limit reached. Waiting"));
        assert_eq!(messages[2], "API call queued. Current window: 1/1");
    }
}
