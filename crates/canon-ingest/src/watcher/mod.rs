//! Route watcher
//!
//! Detection modes are built from the route's [`DetectionMode`] once, as a set
//! of [`Discover`] implementations that all feed the same bounded queue. One
//! dispatch loop per route drains that queue, so a file found by both the
//! event and the poll path in hybrid mode is handled twice in sequence and the
//! second pass finds it already archived.

pub mod event;
pub mod poll;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument::WithSubscriber, warn, Instrument};

use crate::archive::ArchiveBucket;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{IngestError, Result};
use crate::route::{DetectionMode, Route};

pub use event::EventWatcher;
pub use poll::PollWatcher;

/// A source of candidate files for one route
#[async_trait]
pub trait Discover: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Send candidate paths until cancelled or until the queue closes
    async fn discover(&self, queue: mpsc::Sender<PathBuf>, cancel: CancellationToken) -> Result<()>;
}

/// Discovery paths for a route's detection mode
pub fn discoverers(route: &Route) -> Vec<Box<dyn Discover>> {
    match route.detection {
        DetectionMode::Event => vec![Box::new(EventWatcher::new(route))],
        DetectionMode::Poll(ref config) => vec![Box::new(PollWatcher::new(
            route,
            Duration::from_secs(config.interval_secs.max(1)),
        ))],
        DetectionMode::Hybrid(ref config) => vec![
            Box::new(EventWatcher::new(route)),
            Box::new(PollWatcher::new(
                route,
                Duration::from_secs(config.backup_interval_secs.max(1)),
            )),
        ],
    }
}

/// Per-route totals reported when a route stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub processed: u64,
    pub failed: u64,
    pub ignored: u64,
    pub skipped: u64,
    pub rows: u64,
}

impl RouteSummary {
    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Skipped => self.skipped += 1,
            DispatchOutcome::Archived { bucket, rows, .. } => {
                self.rows += rows;
                match bucket {
                    ArchiveBucket::Processed => self.processed += 1,
                    ArchiveBucket::Failed => self.failed += 1,
                    ArchiveBucket::Ignored => self.ignored += 1,
                }
            },
        }
    }
}

/// List the regular files directly under `dir`, sorted by name
pub(crate) async fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Watch a route until cancelled
///
/// Fails only when the route cannot start (missing input folder); every
/// file-level problem is handled inside the dispatcher.
pub async fn run_route(
    mut dispatcher: Dispatcher,
    queue_size: usize,
    cancel: CancellationToken,
) -> Result<RouteSummary> {
    let route = Arc::new(dispatcher.route().clone());

    if !route.input_dir.is_dir() {
        return Err(IngestError::invalid_manifest(format!(
            "input folder {} does not exist",
            route.input_dir.display()
        )));
    }

    let (tx, mut rx) = mpsc::channel::<PathBuf>(queue_size);
    let discovery_cancel = cancel.child_token();
    let mut discovery = JoinSet::new();

    for discoverer in discoverers(&route) {
        let queue = tx.clone();
        let token = discovery_cancel.clone();
        let kind = discoverer.kind();
        discovery.spawn(
            async move { (kind, discoverer.discover(queue, token).await) }
                .in_current_span()
                .with_current_subscriber(),
        );
    }
    drop(tx);

    info!(
        input = %route.input_dir.display(),
        mode = %route.detection,
        "Route watching"
    );

    let mut summary = RouteSummary::default();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            finished = discovery.join_next(), if !discovery.is_empty() => {
                match finished {
                    Some(Ok((kind, Ok(())))) => info!(kind, "Discovery stopped"),
                    Some(Ok((kind, Err(e)))) => error!(kind, error = %e, "Discovery failed"),
                    Some(Err(e)) => error!(error = %e, "Discovery task aborted"),
                    None => {},
                }
            },
            next = rx.recv() => match next {
                Some(path) => {
                    let outcome = dispatcher.handle(&path).await;
                    summary.record(&outcome);
                },
                None => {
                    warn!("All discovery paths stopped");
                    break;
                },
            },
        }
    }

    discovery_cancel.cancel();
    while discovery.join_next().await.is_some() {}

    info!(
        processed = summary.processed,
        failed = summary.failed,
        ignored = summary.ignored,
        rows = summary.rows,
        "Route stopped"
    );
    Ok(summary)
}
