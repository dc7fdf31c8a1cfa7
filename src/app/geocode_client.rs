use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::ports::{HttpClientPort, HttpGetResult};
use crate::config::ProviderConfig;
use crate::constants::{ADDRESS_QUERY_PARAM, API_KEY_HEADER};
use crate::domain::Coordinate;
use crate::error::{GeocoderError, Result};
use crate::observability::metrics;
use crate::retry::RetryExecutor;

const TOO_MANY_REQUESTS: u16 = 429;
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    location: Option<ProviderLocation>,
    #[serde(default, alias = "formattedAddress")]
    formatted_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderLocation {
    /// longitude
    #[serde(default)]
    x: Option<f64>,
    /// latitude
    #[serde(default)]
    y: Option<f64>,
}

/// Resolves one address to a coordinate through the retry executor.
pub struct GeocodeClient {
    http: Arc<dyn HttpClientPort>,
    executor: RetryExecutor,
    base_url: String,
    api_key: Option<String>,
}

impl GeocodeClient {
    pub fn new(http: Arc<dyn HttpClientPort>, executor: RetryExecutor, provider: &ProviderConfig) -> Self {
        Self {
            http,
            executor,
            base_url: provider.base_url.clone(),
            api_key: provider
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Fails fast with a configuration error when no credential is set.
    pub fn ensure_configured(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| GeocoderError::Config("Provider API key is not configured".into()))
    }

    /// `Ok(None)` means the provider answered but had no location for the text.
    pub async fn geocode(&self, address: &str) -> Result<Option<Coordinate>> {
        let api_key = self.ensure_configured()?;
        let url = lookup_url(&self.base_url, address)?;
        let label = format!("Geocode \"{}\"", address);

        let result = self
            .executor
            .execute_with_retry(&label, || self.lookup_once(&url, api_key))
            .await;

        match &result {
            Ok(Some(c)) => info!(
                address,
                latitude = c.latitude,
                longitude = c.longitude,
                "Geocoded address"
            ),
            Ok(None) => warn!(address, "No geocoding result for address"),
            Err(e) => warn!(address, error = %e, "Geocoding failed"),
        }
        result
    }

    async fn lookup_once(&self, url: &str, api_key: &str) -> Result<Option<Coordinate>> {
        metrics::provider::request();
        let response = self
            .http
            .get(url, &[(API_KEY_HEADER, api_key)])
            .await
            .map_err(GeocoderError::transport)?;
        metrics::provider::response(response.status);
        interpret_response(response)
    }
}

/// `<base>?address=<text>` with the text form-encoded.
pub fn lookup_url(base_url: &str, address: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| GeocoderError::Config(format!("Invalid provider URL '{}': {}", base_url, e)))?;
    url.query_pairs_mut().append_pair(ADDRESS_QUERY_PARAM, address);
    Ok(url.to_string())
}

fn interpret_response(response: HttpGetResult) -> Result<Option<Coordinate>> {
    if response.status == TOO_MANY_REQUESTS {
        return Err(GeocoderError::RateLimited(format!(
            "HTTP 429 Too Many Requests: {}",
            truncate(&response.text())
        )));
    }

    if !response.is_success() {
        let message = match extract_error_message(&response.bytes) {
            Some(detail) => format!("provider error: {}", detail),
            None => format!("provider error: {}", response.status),
        };
        return Err(GeocoderError::provider(Some(response.status), message));
    }

    let parsed: ProviderResponse = serde_json::from_slice(&response.bytes)
        .map_err(|e| GeocoderError::InvalidResponse(e.to_string()))?;

    match parsed.location {
        Some(ProviderLocation {
            x: Some(longitude),
            y: Some(latitude),
        }) => Ok(Some(Coordinate {
            latitude,
            longitude,
            geocoded_address: parsed.formatted_address,
        })),
        _ => {
            tracing::debug!(status = ?parsed.status, "Provider response carried no location");
            Ok(None)
        }
    }
}

/// Pull `error` (or `message`) out of a JSON error body.
fn extract_error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let field = value.get("error").or_else(|| value.get("message"))?;
    let text = match field {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => return None,
        other => other.to_string(),
    };
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", head)
    }
}
