pub mod config;
pub mod constants;
pub mod error;
pub mod live_log;
pub mod rate_limiter;
pub mod retry;
pub mod server;

// Domain data shapes shared across layers
pub mod domain;

// Layered boundaries for application and infrastructure
pub mod app;
pub mod infra;

pub mod observability;
pub mod pipeline;

pub use error::{GeocoderError, Result};
