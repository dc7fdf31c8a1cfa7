/// Provider and pipeline constants shared across the codebase

// Provider endpoint and credential header
pub const DEFAULT_PROVIDER_URL: &str = "https://api.neshan.org/v6/geocoding";
pub const API_KEY_HEADER: &str = "Api-Key";
pub const ADDRESS_QUERY_PARAM: &str = "address";

// Environment overrides applied on top of config.toml
pub const ENV_API_KEY: &str = "GEOCODER_API_KEY";
pub const ENV_BASE_URL: &str = "GEOCODER_BASE_URL";
pub const ENV_PORT: &str = "GEOCODER_PORT";

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

// Rate limiting defaults
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_DELAY_BETWEEN_REQUESTS_MS: u64 = 1000;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: u32 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Length of the sliding request-count window.
pub const RATE_WINDOW_SECS: u64 = 60;

// Processing limits
pub const DEFAULT_MAX_ADDRESSES_PER_BATCH: usize = 10;

// Live log
pub const LIVE_LOG_CAPACITY: usize = 100;
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;
pub const STREAM_REPLAY_COUNT: usize = 20;
pub const DEFAULT_RECENT_COUNT: usize = 50;

/// Error stored on a record when the provider answered without a location.
pub const NO_COORDINATES_MESSAGE: &str = "No coordinates returned from API";

// HTTP server
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_METRICS_PORT: u16 = 9898;
