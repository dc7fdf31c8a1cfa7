use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "batch_geocoder.log";
const CRATE_DIRECTIVE: &str = "batch_geocoder=debug";

/// `RUST_LOG` when set, otherwise `info`; this crate always logs at `debug`.
fn env_filter() -> EnvFilter {
    let crate_directive = CRATE_DIRECTIVE
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(crate_directive)
}

/// Route `tracing` output to stderr and to `logs/batch_geocoder.log.<date>`
/// as JSON lines. Stdout stays free for `geocode` results.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    let _ = fs::create_dir_all(LOG_DIR);

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(LOG_DIR, LOG_FILE));

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_writer(file_writer))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok();

    if installed {
        keep_flushing(guard);
    }
}

// The writer thread stops when its guard drops; keep it for the process lifetime.
fn keep_flushing(guard: WorkerGuard) {
    std::mem::forget(guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_directive_always_present() {
        assert!(env_filter().to_string().contains(CRATE_DIRECTIVE));
    }
}
