//! File dispatcher
//!
//! Turns one discovered file into a stream of envelopes, then archives it.
//! Every file that still exists when it is handled ends in exactly one archive
//! bucket:
//!
//! - `ignored` when the name does not match the route's suffix filter
//! - `failed` when the header row, any data row or any publish fails
//! - `processed` otherwise
//!
//! A file that disappeared between discovery and handling was archived by
//! another discovery path and is skipped quietly.

use canon_common::{EnvelopeOrigin, MessageEnvelope, Payload};
use csv_async::{AsyncReaderBuilder, StringRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::archive::{archive, ArchiveBucket};
use crate::error::{IngestError, Result};
use crate::publisher::Publisher;
use crate::route::Route;

/// Progress is logged every this many rows
pub const ROW_LOG_CADENCE: u64 = 100;

/// Upper bound on settle samples before a growing file is dispatched anyway
const MAX_SETTLE_CHECKS: u32 = 120;

const BOM: char = '\u{feff}';

/// What happened to a handled file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Gone or not a regular file by the time it was handled
    Skipped,
    Archived {
        bucket: ArchiveBucket,
        rows: u64,
        archived_to: Option<PathBuf>,
    },
}

impl DispatchOutcome {
    pub fn bucket(&self) -> Option<ArchiveBucket> {
        match self {
            DispatchOutcome::Skipped => None,
            DispatchOutcome::Archived { bucket, .. } => Some(*bucket),
        }
    }
}

pub struct Dispatcher {
    route: Arc<Route>,
    origin: EnvelopeOrigin,
    publisher: Publisher,
}

impl Dispatcher {
    pub fn new(route: Arc<Route>, origin: EnvelopeOrigin, publisher: Publisher) -> Self {
        Self {
            route,
            origin,
            publisher,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Handle one discovered file
    #[instrument(name = "dispatch", skip_all, fields(route = %self.route.name, file = %path.display()))]
    pub async fn handle(&mut self, path: &Path) -> DispatchOutcome {
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return DispatchOutcome::Skipped,
        };

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {},
            Ok(_) => return DispatchOutcome::Skipped,
            Err(_) => {
                debug!("File no longer present, already handled");
                return DispatchOutcome::Skipped;
            },
        }

        if !self.route.suffix_filter.matches(&file_name) {
            info!("File does not match suffix filter");
            return self.finish(path, ArchiveBucket::Ignored, 0).await;
        }

        if !self.wait_until_settled(path).await {
            debug!("File vanished while settling");
            return DispatchOutcome::Skipped;
        }

        let mut rows = 0u64;
        let published = self.publish_rows(path, &file_name, &mut rows).await;
        let closed = self.publisher.finish_file().await;

        match published.and(closed) {
            Ok(()) => {
                info!(rows, "File dispatched");
                self.finish(path, ArchiveBucket::Processed, rows).await
            },
            Err(e) => {
                error!(rows, error = %e, "File dispatch aborted");
                self.finish(path, ArchiveBucket::Failed, rows).await
            },
        }
    }

    async fn finish(&self, path: &Path, bucket: ArchiveBucket, rows: u64) -> DispatchOutcome {
        let archived_to = archive(path, &self.route.archive, bucket).await;
        DispatchOutcome::Archived {
            bucket,
            rows,
            archived_to,
        }
    }

    async fn publish_rows(&mut self, path: &Path, file_name: &str, rows: &mut u64) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| IngestError::Header(e.to_string()))?;
        let mut reader = AsyncReaderBuilder::new()
            .delimiter(self.route.delimiter)
            .has_headers(true)
            .create_reader(file);

        let headers: Vec<String> = reader
            .headers()
            .await
            .map_err(|e| IngestError::Header(e.to_string()))?
            .iter()
            .enumerate()
            .map(|(i, h)| if i == 0 { h.trim_start_matches(BOM) } else { h })
            .map(String::from)
            .collect();

        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(IngestError::Header("file has no header row".to_string()));
        }

        self.publisher.begin_file().await?;

        let mut record = StringRecord::new();
        loop {
            match reader.read_record(&mut record).await {
                Ok(true) => {},
                Ok(false) => break,
                Err(source) => {
                    return Err(IngestError::Row {
                        row: *rows + 1,
                        source,
                    })
                },
            }

            let payload: Payload = headers
                .iter()
                .cloned()
                .zip(record.iter().map(String::from))
                .collect();

            let envelope = MessageEnvelope::new(
                &self.route.domain,
                &self.route.entity,
                &self.route.contract,
                file_name,
                &self.origin,
                payload,
            );
            self.publisher.publish(&envelope).await?;

            *rows += 1;
            if *rows % ROW_LOG_CADENCE == 0 {
                info!(rows = *rows, "Rows published");
            }
        }

        Ok(())
    }

    /// Wait for two identical size samples `settle` apart
    ///
    /// Returns false when the file disappears meanwhile.
    async fn wait_until_settled(&self, path: &Path) -> bool {
        let settle = self.route.settle;
        if settle.is_zero() {
            return true;
        }

        let mut last = match file_size(path).await {
            Some(size) => size,
            None => return false,
        };

        for _ in 0..MAX_SETTLE_CHECKS {
            tokio::time::sleep(settle).await;
            let current = match file_size(path).await {
                Some(size) => size,
                None => return false,
            };
            if current == last {
                return true;
            }
            debug!(previous = last, current, "File still growing");
            last = current;
        }

        warn!("File kept growing, dispatching anyway");
        true
    }
}

async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}
