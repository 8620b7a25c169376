//! Canon ingest watcher

use anyhow::{Context, Result};
use canon_common::broker::nats::NatsClient;
use canon_common::broker::MessagePublisher;
use canon_common::logging::{init_logging, LogConfig, LogLevel};
use canon_common::env::load_env_file;
use canon_common::shutdown::shutdown_token;
use canon_common::EnvelopeOrigin;
use canon_ingest::config::IngestConfig;
use canon_ingest::route::RoutesManifest;
use canon_ingest::supervisor::{RouteReport, Supervisor};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "canon-ingest")]
#[command(author, version, about = "Watch route folders and publish CSV rows")]
struct Cli {
    /// Routes manifest
    #[arg(short, long, env = "CANON_ROUTES_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before argument parsing so .env also feeds clap's env fallbacks
    load_env_file(None)?;
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("canon-ingest")
        .build()
        .with_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = IngestConfig::load(cli.manifest)?;
    let routes = RoutesManifest::load(&config.manifest_path).with_context(|| {
        format!("Failed to load routes manifest {}", config.manifest_path.display())
    })?;

    info!(
        manifest = %config.manifest_path.display(),
        routes = routes.len(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting canon-ingest"
    );

    let broker: Option<Arc<dyn MessagePublisher>> =
        if routes.iter().any(|r| r.outputs.broker.is_some()) {
            let client = NatsClient::connect(&config.broker)
                .await
                .context("Failed to connect to broker")?;
            Some(Arc::new(client.publisher()))
        } else {
            None
        };

    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let origin = EnvelopeOrigin::new(&config.source_id, env!("CARGO_PKG_VERSION"), hostname);

    let cancel = shutdown_token();

    let supervisor = Supervisor::new(origin, broker, log_config, config.discovery_queue);
    let reports = supervisor.run(routes, cancel).await;

    let failed = reports
        .iter()
        .filter(|(_, report)| !matches!(report, RouteReport::Stopped(_)))
        .count();
    if failed > 0 {
        error!(failed, "Some routes did not stop cleanly");
    }

    info!("canon-ingest shut down");
    Ok(())
}
