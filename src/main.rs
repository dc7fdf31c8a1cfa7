use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use batch_geocoder::config::Config;
use batch_geocoder::constants::STREAM_REPLAY_COUNT;
use batch_geocoder::infra::http_client::ReqwestHttp;
use batch_geocoder::live_log::{LiveLog, LogEvent, LogLevel};
use batch_geocoder::observability::{init_logging, metrics};
use batch_geocoder::pipeline::orchestrator::summarize;
use batch_geocoder::pipeline::BatchOrchestrator;
use batch_geocoder::server::{start_server, AppState};

#[derive(Parser)]
#[command(name = "batch_geocoder")]
#[command(about = "Rate-limited batch geocoding with a live progress log")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = batch_geocoder::constants::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Geocode a list of addresses and print the results as JSON
    Geocode {
        /// Text file with one address per line
        #[arg(long)]
        file: Option<PathBuf>,
        /// Address to geocode (repeatable)
        #[arg(long = "address")]
        addresses: Vec<String>,
        /// Write results to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print live progress events while the batch runs
        #[arg(long)]
        follow: bool,
    },
    /// Run the HTTP server
    Serve {
        /// Port to listen on (overrides configuration)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration
    Config,
}

fn build_orchestrator(config: &Config, live_log: LiveLog) -> anyhow::Result<BatchOrchestrator> {
    let http = ReqwestHttp::new(Duration::from_secs(config.provider.timeout_seconds))?;
    Ok(BatchOrchestrator::from_config(config, Arc::new(http), live_log))
}

fn read_addresses(file: Option<&PathBuf>, mut addresses: Vec<String>) -> anyhow::Result<Vec<String>> {
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read address file {}", path.display()))?;
        addresses.extend(content.lines().map(str::to_string));
    }
    Ok(addresses)
}

fn print_event(event: &LogEvent) {
    let tag = match event.level {
        LogLevel::Info => "INFO",
        LogLevel::Success => "OK",
        LogLevel::Warning => "WARN",
        LogLevel::Error => "ERROR",
    };
    eprintln!("[{}] {:<5} {}", event.timestamp.format("%H:%M:%S"), tag, event.message);
}

async fn run_geocode(
    config: &Config,
    file: Option<PathBuf>,
    addresses: Vec<String>,
    output: Option<PathBuf>,
    follow: bool,
) -> anyhow::Result<()> {
    let addresses = read_addresses(file.as_ref(), addresses)?;
    if addresses.iter().all(|a| a.trim().is_empty()) {
        anyhow::bail!("No addresses given; use --file or --address");
    }

    let live_log = LiveLog::new();
    let orchestrator = build_orchestrator(config, live_log.clone())?;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let follower = if follow {
        let stream = live_log.stream(STREAM_REPLAY_COUNT);
        Some(tokio::spawn(async move {
            stream
                .run_until(
                    async {
                        let _ = stop_rx.await;
                    },
                    |event| print_event(&event),
                )
                .await
        }))
    } else {
        None
    };

    let result = orchestrator
        .geocode_addresses(&addresses, &config.processing)
        .await;

    let _ = stop_tx.send(());
    if let Some(handle) = follower {
        let forwarded = handle.await.unwrap_or(0);
        info!(forwarded, "Live log follower stopped");
    }

    let (intake, records) = result?;
    let summary = summarize(&records);
    if intake.limit_applied {
        warn!(
            skipped = intake.skipped_by_limit,
            "Some addresses were not processed because of the batch limit"
        );
    }

    let json = serde_json::to_string_pretty(&records)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write results to {}", path.display()))?;
            info!(path = %path.display(), "Results written");
        }
        None => println!("{}", json),
    }

    eprintln!(
        "Geocoded {} addresses: {} success, {} failed",
        summary.total, summary.success, summary.failed
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;

    if config.metrics.enabled && !matches!(cli.command, Commands::Config) {
        metrics::init_or_warn(config.metrics.port);
    }

    match cli.command {
        Commands::Geocode {
            file,
            addresses,
            output,
            follow,
        } => run_geocode(&config, file, addresses, output, follow).await?,
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            let live_log = LiveLog::new();
            let orchestrator = build_orchestrator(&config, live_log.clone())?;
            let state = AppState {
                orchestrator,
                live_log,
                config: Arc::new(config),
            };
            start_server(state, port).await?;
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            println!("# api key configured: {}", config.has_api_key());
        }
    }

    Ok(())
}
