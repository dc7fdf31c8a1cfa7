use serde_json::json;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info};

use crate::app::geocode_client::GeocodeClient;
use crate::app::ports::HttpClientPort;
use crate::config::{Config, ProcessingConfig};
use crate::constants::NO_COORDINATES_MESSAGE;
use crate::domain::{AddressRecord, BatchSummary};
use crate::error::Result;
use crate::live_log::LiveLog;
use crate::observability::metrics;
use crate::pipeline::intake::Intake;
use crate::retry::RetryExecutor;

/// Drives a batch of address records through the geocode client, one at a
/// time, publishing progress to the live log.
#[derive(Clone)]
pub struct BatchOrchestrator {
    client: Arc<GeocodeClient>,
    live_log: LiveLog,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<GeocodeClient>, live_log: LiveLog) -> Self {
        Self { client, live_log }
    }

    /// Wire a limiter, retry executor and client from configuration. Every
    /// batch run through the returned orchestrator (and its clones) shares
    /// one outbound-call budget.
    pub fn from_config(config: &Config, http: Arc<dyn HttpClientPort>, live_log: LiveLog) -> Self {
        let executor = RetryExecutor::from_config(&config.rate_limit, live_log.clone());
        let client = GeocodeClient::new(http, executor, &config.provider);
        Self::new(Arc::new(client), live_log)
    }

    pub fn client(&self) -> &GeocodeClient {
        &self.client
    }

    pub fn live_log(&self) -> &LiveLog {
        &self.live_log
    }

    /// Geocode every pending record, returning the same records in the same
    /// order. Per-address failures are recorded on the record; the only error
    /// is a configuration problem found before any address is touched.
    ///
    /// There is no mid-batch cancellation: once started, the loop runs to the end.
    pub async fn process_batch(&self, mut records: Vec<AddressRecord>) -> Result<Vec<AddressRecord>> {
        self.client.ensure_configured()?;

        let total = records.len();
        let started = Instant::now();
        info!(total, "Starting batch geocoding");
        metrics::batch::started(total);
        self.live_log.info(
            format!("Starting geocoding for {} addresses", total),
            Some(json!({ "total": total })),
        );

        for (index, record) in records.iter_mut().enumerate() {
            let position = index + 1;

            if !record.is_pending() {
                self.live_log.info(
                    format!(
                        "Skipping address {}/{}: already {}",
                        position,
                        total,
                        record.status()
                    ),
                    Some(json!({ "index": position, "status": record.status() })),
                );
                continue;
            }

            self.live_log.info(
                format!("Processing address {}/{}: {}", position, total, record.full_address()),
                Some(json!({ "index": position, "total": total, "address": record.full_address() })),
            );

            self.geocode_record(position, record).await;
            metrics::batch::address_processed(record.status());
        }

        let summary = summarize(&records);
        metrics::batch::duration(started.elapsed().as_secs_f64());
        info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            "Batch geocoding completed"
        );
        self.live_log.success(
            format!(
                "Geocoding completed: {} success, {} failed",
                summary.success, summary.failed
            ),
            Some(json!(summary)),
        );

        Ok(records)
    }

    async fn geocode_record(&self, position: usize, record: &mut AddressRecord) {
        if record.full_address().trim().is_empty() {
            record.mark_failed("Address text is empty");
            self.live_log.error(
                format!("Address {} has no text", position),
                Some(json!({ "index": position })),
            );
            return;
        }

        let address = record.full_address().to_string();
        match self.client.geocode(&address).await {
            Ok(Some(coordinate)) => {
                let (lat, lon) = (coordinate.latitude, coordinate.longitude);
                record.mark_success(coordinate);
                self.live_log.success(
                    format!("Successfully geocoded: {} -> ({}, {})", address, lat, lon),
                    Some(json!({ "index": position, "latitude": lat, "longitude": lon })),
                );
            }
            Ok(None) => {
                record.mark_failed(NO_COORDINATES_MESSAGE);
                self.live_log.error(
                    format!("No coordinates found for: {}", address),
                    Some(json!({ "index": position })),
                );
            }
            Err(e) => {
                let message = e.to_string();
                error!(address = %address, error = %message, "Failed to geocode address");
                record.mark_failed(message.clone());
                self.live_log.error(
                    format!("Failed to geocode {}: {}", address, message),
                    Some(json!({ "index": position, "error": message })),
                );
            }
        }
    }

    /// Intake raw strings under the processing limits, then run the batch.
    pub async fn geocode_addresses<I, S>(
        &self,
        addresses: I,
        processing: &ProcessingConfig,
    ) -> Result<(Intake, Vec<AddressRecord>)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.client.ensure_configured()?;
        let mut intake = Intake::prepare(addresses, processing, &self.live_log);
        let records = std::mem::take(&mut intake.records);
        let processed = self.process_batch(records).await?;
        Ok((intake, processed))
    }
}

pub fn summarize(records: &[AddressRecord]) -> BatchSummary {
    BatchSummary::from_records(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::domain::{AddressStatus, Coordinate};
    use crate::error::GeocoderError;
    use crate::infra::scripted_http::ScriptedHttp;
    use crate::live_log::LogLevel;
    use crate::rate_limiter::{Limits, RateLimiter};
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn orchestrator(http: ScriptedHttp, api_key: Option<&str>) -> BatchOrchestrator {
        let log = LiveLog::new();
        let limiter = RateLimiter::new(
            Limits {
                requests_per_minute: 1000,
                max_concurrent_requests: 5,
                min_delay_between_starts: Duration::ZERO,
            },
            log.clone(),
        );
        let executor = RetryExecutor::new(
            limiter,
            RetryPolicy {
                retry_on_rate_limit: true,
                max_retries: 1,
                retry_delay: Duration::from_millis(10),
            },
            log.clone(),
        );
        let provider = ProviderConfig {
            base_url: "https://geo.example.test/geocode".into(),
            api_key: api_key.map(str::to_string),
            timeout_seconds: 5,
        };
        let client = GeocodeClient::new(Arc::new(http), executor, &provider);
        BatchOrchestrator::new(Arc::new(client), log)
    }

    fn records(texts: &[&str]) -> Vec<AddressRecord> {
        texts.iter().map(|t| AddressRecord::new(*t).unwrap()).collect()
    }

    fn located(lon: f64, lat: f64) -> serde_json::Value {
        json!({ "status": "OK", "location": { "x": lon, "y": lat } })
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_input_order() {
        let http = ScriptedHttp::new()
            .reply_json(200, located(51.0, 35.0))
            .reply_json(400, json!({ "error": "bad address" }))
            .reply_json(200, json!({ "status": "NO_RESULT" }));
        let orch = orchestrator(http.clone(), Some("key"));

        let out = orch.process_batch(records(&["a", "b", "c"])).await.unwrap();

        let texts: Vec<&str> = out.iter().map(|r| r.full_address()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(out[0].status(), AddressStatus::Success);
        assert_eq!(out[0].latitude(), Some(35.0));
        assert_eq!(out[0].longitude(), Some(51.0));
        assert!(out[0].updated_at().is_some());
        assert_eq!(out[1].status(), AddressStatus::Failed);
        assert_eq!(out[1].error_message(), Some("provider error: bad address"));
        assert_eq!(out[2].error_message(), Some(NO_COORDINATES_MESSAGE));
        assert_eq!(http.request_count(), 3);

        let summary = summarize(&out);
        assert_eq!((summary.total, summary.success, summary.failed), (3, 1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events_in_order() {
        let http = ScriptedHttp::new().otherwise_json(200, located(1.0, 2.0));
        let orch = orchestrator(http, Some("key"));
        orch.process_batch(records(&["first", "second"])).await.unwrap();

        let messages: Vec<String> = orch
            .live_log()
            .recent(100)
            .into_iter()
            .map(|e| e.message)
            .filter(|m| m.starts_with("Processing") || m.starts_with("Starting") || m.starts_with("Geocoding"))
            .collect();
        assert_eq!(
            messages,
            vec![
                "Starting geocoding for 2 addresses".to_string(),
                "Processing address 1/2: first".to_string(),
                "Processing address 2/2: second".to_string(),
                "Geocoding completed: 2 success, 0 failed".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_aborts_before_loop() {
        let http = ScriptedHttp::new().otherwise_json(200, located(1.0, 2.0));
        let orch = orchestrator(http.clone(), None);
        let err = orch.process_batch(records(&["a", "b"])).await.unwrap_err();
        assert!(matches!(err, GeocoderError::Config(_)));
        assert_eq!(http.request_count(), 0);
        assert!(orch.live_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_records_pass_through() {
        let http = ScriptedHttp::new().otherwise_json(200, located(1.0, 2.0));
        let orch = orchestrator(http.clone(), Some("key"));

        let mut input = records(&["done", "todo"]);
        input[0].mark_success(Coordinate {
            latitude: 9.0,
            longitude: 8.0,
            geocoded_address: None,
        });

        let out = orch.process_batch(input).await.unwrap();
        assert_eq!(out[0].latitude(), Some(9.0));
        assert_eq!(out[1].status(), AddressStatus::Success);
        assert_eq!(http.request_count(), 1);
        assert!(orch
            .live_log()
            .recent(100)
            .iter()
            .any(|e| e.level == LogLevel::Info && e.message.starts_with("Skipping address 1/2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_geocode_addresses_skips_blank_text() {
        let http = ScriptedHttp::new().otherwise_json(200, located(51.4, 35.7));
        let orch = orchestrator(http.clone(), Some("key"));

        let (intake, out) = orch
            .geocode_addresses(vec!["Tehran, Valiasr St", ""], &ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(intake.skipped_empty, 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].full_address(), "Tehran, Valiasr St");
        assert_eq!(http.request_count(), 1);
    }
}
