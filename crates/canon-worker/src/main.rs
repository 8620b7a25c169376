//! Canon worker

use anyhow::{Context, Result};
use canon_common::broker::nats::NatsClient;
use canon_common::logging::{init_logging, LogConfig, LogLevel};
use canon_common::env::load_env_file;
use canon_common::shutdown::shutdown_token;
use canon_worker::config::WorkerConfig;
use canon_worker::repository::postgres::create_pool;
use canon_worker::repository::{DryRunRepository, PgRepository, Repository};
use canon_worker::supervisor::{bind_consumers, run_consumers};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "canon-worker")]
#[command(author, version, about = "Canonicalize reference data from the broker")]
struct Cli {
    /// Log upserts instead of writing them
    #[arg(long, env = "CANON_DRY_RUN")]
    dry_run: bool,

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

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("canon-worker")
        .build()
        .with_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = WorkerConfig::load()?;
    info!(
        domain = %config.domain,
        exchange = %config.exchange,
        entities = ?config.entities,
        dry_run = cli.dry_run,
        version = env!("CARGO_PKG_VERSION"),
        "Starting canon-worker"
    );

    let client = NatsClient::connect(&config.broker)
        .await
        .context("Failed to connect to broker")?;

    let consumers = if cli.dry_run {
        bind_consumers(&config, &client, || {
            Box::new(DryRunRepository::default()) as Box<dyn Repository>
        })
        .await?
    } else {
        let pool = create_pool(&config.database)
            .await
            .context("Failed to connect to database")?;
        bind_consumers(&config, &client, || {
            Box::new(PgRepository::new(pool.clone())) as Box<dyn Repository>
        })
        .await?
    };

    let cancel = shutdown_token();

    let results = run_consumers(consumers, cancel).await;
    let crashed = results.values().filter(|stats| stats.is_none()).count();
    if crashed > 0 {
        error!(crashed, "Some consumers did not stop cleanly");
    }

    info!("canon-worker shut down");
    Ok(())
}
