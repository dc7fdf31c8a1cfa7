use anyhow::Result;
use batch_geocoder::config::Config;
use batch_geocoder::domain::{AddressRecord, AddressStatus};
use batch_geocoder::error::GeocoderError;
use batch_geocoder::infra::scripted_http::ScriptedHttp;
use batch_geocoder::live_log::{LiveLog, LogLevel};
use batch_geocoder::pipeline::BatchOrchestrator;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn config(api_key: Option<&str>, max_retries: u32) -> Config {
    let mut config = Config::default();
    config.provider.api_key = api_key.map(str::to_string);
    config.provider.base_url = "https://geo.example.test/v6/geocoding".to_string();
    config.rate_limit.max_retries = max_retries;
    config
}

fn setup(http: &ScriptedHttp, config: &Config) -> (BatchOrchestrator, LiveLog) {
    let live_log = LiveLog::new();
    let orchestrator = BatchOrchestrator::from_config(config, Arc::new(http.clone()), live_log.clone());
    (orchestrator, live_log)
}

fn located() -> serde_json::Value {
    json!({ "status": "OK", "location": { "x": 51.4106, "y": 35.7447 } })
}

fn pending(texts: &[&str]) -> Vec<AddressRecord> {
    texts
        .iter()
        .map(|t| AddressRecord::new(*t).expect("non-empty address"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_throttled_three_times_then_success() -> Result<()> {
    let http = ScriptedHttp::new()
        .reply_status(429, "Too Many Requests")
        .reply_status(429, "Too Many Requests")
        .reply_status(429, "Too Many Requests")
        .reply_json(200, located());
    let (orchestrator, live_log) = setup(&http, &config(Some("key"), 3));

    let out = orchestrator.process_batch(pending(&["Tehran, Valiasr St"])).await?;

    assert_eq!(http.request_count(), 4);
    assert_eq!(out[0].status(), AddressStatus::Success);
    assert_eq!(out[0].latitude(), Some(35.7447));
    assert_eq!(out[0].longitude(), Some(51.4106));

    let retries = live_log
        .recent(100)
        .into_iter()
        .filter(|e| e.level == LogLevel::Warning && e.message.starts_with("Rate limit error"))
        .count();
    assert_eq!(retries, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_always_throttled_fails_after_retries() -> Result<()> {
    let http = ScriptedHttp::new().otherwise_json(429, json!({ "error": "Too Many Requests" }));
    let (orchestrator, _) = setup(&http, &config(Some("key"), 2));

    let out = orchestrator.process_batch(pending(&["Shiraz"])).await?;

    assert_eq!(http.request_count(), 3);
    assert_eq!(out[0].status(), AddressStatus::Failed);
    let message = out[0].error_message().unwrap_or_default().to_lowercase();
    assert!(message.contains("rate limit"), "unexpected message: {}", message);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_location_fails_with_fixed_message() -> Result<()> {
    let http = ScriptedHttp::new().reply_json(200, json!({ "status": "OK", "location": null }));
    let (orchestrator, _) = setup(&http, &config(Some("key"), 3));

    let out = orchestrator.process_batch(pending(&["Nowhere"])).await?;

    assert_eq!(out[0].status(), AddressStatus::Failed);
    assert_eq!(out[0].error_message(), Some("No coordinates returned from API"));
    assert_eq!(out[0].latitude(), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_missing_credential_stops_before_processing() {
    let http = ScriptedHttp::new().otherwise_json(200, located());
    let (orchestrator, live_log) = setup(&http, &config(None, 3));

    let err = orchestrator
        .process_batch(pending(&["a", "b"]))
        .await
        .unwrap_err();

    assert!(matches!(err, GeocoderError::Config(_)));
    assert_eq!(http.request_count(), 0);
    assert!(!live_log
        .recent(100)
        .iter()
        .any(|e| e.message.starts_with("Processing")));
}

#[tokio::test(start_paused = true)]
async fn test_blank_text_is_rejected_at_intake() -> Result<()> {
    let http = ScriptedHttp::new().otherwise_json(200, located());
    let cfg = config(Some("key"), 3);
    let (orchestrator, _) = setup(&http, &cfg);

    let (intake, out) = orchestrator
        .geocode_addresses(vec!["Tehran, Valiasr St", ""], &cfg.processing)
        .await?;

    assert_eq!(intake.total_input, 2);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].full_address(), "Tehran, Valiasr St");
    assert_eq!(http.request_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_window_budget_spreads_batch_over_minutes() -> Result<()> {
    let http = ScriptedHttp::new().otherwise_json(200, located());
    let mut cfg = config(Some("key"), 3);
    cfg.rate_limit.requests_per_minute = 3;
    cfg.rate_limit.delay_between_requests_ms = 0;
    let (orchestrator, live_log) = setup(&http, &cfg);

    let texts: Vec<String> = (1..=7).map(|i| format!("address {}", i)).collect();
    let input: Vec<&str> = texts.iter().map(String::as_str).collect();

    let started = Instant::now();
    let out = orchestrator.process_batch(pending(&input)).await?;
    let elapsed = started.elapsed();

    // 7 calls at 3 per minute need two full window waits
    assert!(elapsed >= Duration::from_secs(120), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(125), "elapsed {:?}", elapsed);

    assert_eq!(out.len(), 7);
    for (record, text) in out.iter().zip(&texts) {
        assert_eq!(record.full_address(), text);
        assert_eq!(record.status(), AddressStatus::Success);
    }
    assert!(live_log
        .recent(100)
        .iter()
        .any(|e| e.level == LogLevel::Warning && e.message.starts_with("Rate limit reached")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_live_stream_sees_whole_batch_in_order() -> Result<()> {
    let http = ScriptedHttp::new().otherwise_json(200, located());
    let (orchestrator, live_log) = setup(&http, &config(Some("key"), 3));

    live_log.info("before batch", None);
    let mut stream = live_log.stream(20);

    orchestrator.process_batch(pending(&["one", "two"])).await?;
    drop(orchestrator);

    let mut seen = Vec::new();
    while let Some(event) = stream.try_recv() {
        seen.push(event.message);
    }
    let expected: Vec<String> = live_log.recent(100).into_iter().map(|e| e.message).collect();
    assert_eq!(seen, expected);
    assert_eq!(seen.first().map(String::as_str), Some("before batch"));
    assert_eq!(
        seen.last().map(String::as_str),
        Some("Geocoding completed: 2 success, 0 failed")
    );
    Ok(())
}
