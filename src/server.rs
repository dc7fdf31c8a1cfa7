use axum::{
    extract::Query,
    http::{Method, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Extension, Router,
};
use futures::stream::{self, Stream};
use hyper::Server;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::constants::{DEFAULT_RECENT_COUNT, STREAM_REPLAY_COUNT};
use crate::domain::{AddressRecord, BatchSummary};
use crate::error::FailureKind;
use crate::live_log::{LiveLog, LogEvent};
use crate::pipeline::orchestrator::summarize;
use crate::pipeline::BatchOrchestrator;

/// Shared handles injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: BatchOrchestrator,
    pub live_log: LiveLog,
    pub config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
pub struct GeocodeRequest {
    pub addresses: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeResponse {
    pub summary: BatchSummary,
    pub total_input: usize,
    pub skipped_empty: usize,
    pub skipped_by_limit: usize,
    pub limit_applied: bool,
    pub records: Vec<AddressRecord>,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub count: Option<usize>,
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "batch-geocoder",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn geocode(
    Extension(state): Extension<AppState>,
    Json(request): Json<GeocodeRequest>,
) -> Response {
    if request.addresses.iter().all(|a| a.trim().is_empty()) {
        return error_response(StatusCode::BAD_REQUEST, "No addresses found in request");
    }

    let result = state
        .orchestrator
        .geocode_addresses(&request.addresses, &state.config.processing)
        .await;

    match result {
        Ok((intake, records)) => Json(GeocodeResponse {
            summary: summarize(&records),
            total_input: intake.total_input,
            skipped_empty: intake.skipped_empty,
            skipped_by_limit: intake.skipped_by_limit,
            limit_applied: intake.limit_applied,
            records,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Geocode request rejected");
            let status = match e.kind() {
                FailureKind::Fatal => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(status, e.to_string())
        }
    }
}

/// Server-sent events: the most recent events first, then everything new.
/// The subscription ends when the client goes away and the stream is dropped.
async fn live_logs(
    Extension(state): Extension<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.live_log.stream(STREAM_REPLAY_COUNT);
    info!(subscriber = %subscription.id(), "Live log client connected");

    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((sse_event(&event), subscription))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sse_event(event: &LogEvent) -> Result<Event, axum::Error> {
    Event::default().json_data(event).map_err(axum::Error::new)
}

async fn recent_logs(
    Extension(state): Extension<AppState>,
    Query(params): Query<RecentParams>,
) -> Json<Vec<LogEvent>> {
    Json(state.live_log.recent(params.count.unwrap_or(DEFAULT_RECENT_COUNT)))
}

async fn configuration(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let config = &state.config;
    Json(serde_json::json!({
        "provider": {
            "baseUrl": config.provider.base_url,
            "apiKeyConfigured": config.has_api_key(),
            "timeoutSeconds": config.provider.timeout_seconds,
        },
        "rateLimit": {
            "requestsPerMinute": config.rate_limit.requests_per_minute,
            "delayBetweenRequests": config.rate_limit.delay_between_requests_ms,
            "maxConcurrentRequests": config.rate_limit.max_concurrent_requests,
            "retryOnRateLimit": config.rate_limit.retry_on_rate_limit,
            "maxRetries": config.rate_limit.max_retries,
            "retryDelay": config.rate_limit.retry_delay_ms,
        },
        "processing": {
            "enableLimits": config.processing.enable_limits,
            "maxAddressesPerBatch": config.processing.max_addresses_per_batch,
        },
    }))
}

/// Create the HTTP router with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/geocode", post(geocode))
        .route("/api/live-logs", get(live_logs))
        .route("/api/live-logs/recent", get(recent_logs))
        .route("/api/configuration", get(configuration))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    if !state.config.has_api_key() {
        warn!("No provider API key configured; geocode requests will be rejected");
    }
    let app = create_server(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("HTTP server running on http://localhost:{}", port);
    info!("Live log stream: http://localhost:{}/api/live-logs", port);

    Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
