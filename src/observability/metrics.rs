//! Metrics for the geocoding pipeline.
//!
//! Recording functions are grouped by the component that emits them. Without
//! an installed recorder every call is a no-op, so tests need no setup.

use std::fmt;
use std::net::SocketAddr;
use tracing::{info, warn};

use crate::error::{GeocoderError, Result};

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Rate limiter
    RateLimitAdmitted,
    RateLimitWindowOccupancy,
    RateLimitWindowWaitSeconds,

    // Retry executor
    RetryScheduled,
    RetryExhausted,

    // Provider
    ProviderRequests,
    ProviderResponses,

    // Batch orchestrator
    BatchesStarted,
    BatchSize,
    BatchAddressesProcessed,
    BatchDurationSeconds,
    IntakeAddressesSkipped,

    // Live log
    LiveLogSubscribers,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::RateLimitAdmitted => "geocoder_rate_limit_admitted_total",
            MetricName::RateLimitWindowOccupancy => "geocoder_rate_limit_window_occupancy",
            MetricName::RateLimitWindowWaitSeconds => "geocoder_rate_limit_window_wait_seconds",

            MetricName::RetryScheduled => "geocoder_retry_scheduled_total",
            MetricName::RetryExhausted => "geocoder_retry_exhausted_total",

            MetricName::ProviderRequests => "geocoder_provider_requests_total",
            MetricName::ProviderResponses => "geocoder_provider_responses_total",

            MetricName::BatchesStarted => "geocoder_batches_started_total",
            MetricName::BatchSize => "geocoder_batch_size",
            MetricName::BatchAddressesProcessed => "geocoder_batch_addresses_processed_total",
            MetricName::BatchDurationSeconds => "geocoder_batch_duration_seconds",
            MetricName::IntakeAddressesSkipped => "geocoder_intake_addresses_skipped_total",

            MetricName::LiveLogSubscribers => "geocoder_live_log_subscribers",
        }
    }
}

/// Install the Prometheus recorder with its own scrape listener.
pub fn init(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| GeocoderError::Config(format!("Failed to install Prometheus exporter: {}", e)))?;
    info!("Prometheus exporter listening on http://{}/metrics", addr);
    Ok(())
}

/// Like [`init`] but only warns on failure; metrics are never fatal.
pub fn init_or_warn(port: u16) {
    if let Err(e) = init(port) {
        warn!(error = %e, "Metrics disabled");
    }
}

// ============================================================================
// Rate Limiter Metrics
// ============================================================================

pub mod rate_limit {
    use super::MetricName;

    /// Record an admitted call and the window size after admission
    pub fn admitted(occupancy: usize) {
        ::metrics::counter!(MetricName::RateLimitAdmitted.as_str()).increment(1);
        ::metrics::gauge!(MetricName::RateLimitWindowOccupancy.as_str()).set(occupancy as f64);
    }

    /// Record time spent waiting for the window to free a slot
    pub fn window_wait(secs: f64) {
        ::metrics::histogram!(MetricName::RateLimitWindowWaitSeconds.as_str()).record(secs);
    }
}

// ============================================================================
// Retry Metrics
// ============================================================================

pub mod retry {
    use super::MetricName;

    pub fn scheduled() {
        ::metrics::counter!(MetricName::RetryScheduled.as_str()).increment(1);
    }

    /// A throttled operation ran out of retries
    pub fn exhausted() {
        ::metrics::counter!(MetricName::RetryExhausted.as_str()).increment(1);
    }
}

// ============================================================================
// Provider Metrics
// ============================================================================

pub mod provider {
    use super::MetricName;

    pub fn request() {
        ::metrics::counter!(MetricName::ProviderRequests.as_str()).increment(1);
    }

    /// Record a provider response by HTTP status
    pub fn response(status: u16) {
        ::metrics::counter!(MetricName::ProviderResponses.as_str(), "status" => status.to_string())
            .increment(1);
    }
}

// ============================================================================
// Batch Metrics
// ============================================================================

pub mod batch {
    use super::MetricName;
    use crate::domain::AddressStatus;

    pub fn started(size: usize) {
        ::metrics::counter!(MetricName::BatchesStarted.as_str()).increment(1);
        ::metrics::histogram!(MetricName::BatchSize.as_str()).record(size as f64);
    }

    /// Record the outcome of one address
    pub fn address_processed(status: AddressStatus) {
        ::metrics::counter!(MetricName::BatchAddressesProcessed.as_str(), "status" => status.to_string())
            .increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::BatchDurationSeconds.as_str()).record(secs);
    }

    /// Record addresses dropped before processing (`reason` is "empty" or "limit")
    pub fn skipped(reason: &'static str, count: usize) {
        if count > 0 {
            ::metrics::counter!(MetricName::IntakeAddressesSkipped.as_str(), "reason" => reason)
                .increment(count as u64);
        }
    }
}

// ============================================================================
// Live Log Metrics
// ============================================================================

pub mod live_log {
    use super::MetricName;

    pub fn active_subscribers(count: usize) {
        ::metrics::gauge!(MetricName::LiveLogSubscribers.as_str()).set(count as f64);
    }
}
