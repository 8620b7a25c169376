//! Archive manager
//!
//! Every dispatched file ends up in exactly one bucket, renamed to
//! `name_YYYYMMDD_HHMMSS.ext`. Archiving never fails the caller: problems are
//! logged and the watcher moves on.

use chrono::{DateTime, Local};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::route::ArchivePaths;

/// Destination bucket of a dispatched file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveBucket {
    Processed,
    Failed,
    Ignored,
}

impl ArchiveBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveBucket::Processed => "processed",
            ArchiveBucket::Failed => "failed",
            ArchiveBucket::Ignored => "ignored",
        }
    }

    pub fn dir<'a>(&self, paths: &'a ArchivePaths) -> &'a Path {
        match self {
            ArchiveBucket::Processed => &paths.processed,
            ArchiveBucket::Failed => &paths.failed,
            ArchiveBucket::Ignored => &paths.ignored,
        }
    }
}

impl std::fmt::Display for ArchiveBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamped archive name: `countries.csv` -> `countries_20260126_103000.csv`
pub fn archive_name(file_name: &str, at: DateTime<Local>) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S");
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, stamp, ext),
        _ => format!("{}_{}", file_name, stamp),
    }
}

/// First free path for `name` inside `dir`, appending `_N` before the
/// extension on collision
async fn free_destination(dir: &Path, name: &str) -> io::Result<PathBuf> {
    let candidate = dir.join(name);
    if !fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let mut counter = 1u32;
    loop {
        let numbered = match ext {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = dir.join(numbered);
        if !fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

async fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(e),
        Err(e) => {
            // Archive folder on another filesystem
            debug!(error = %e, "Rename failed, falling back to copy");
            fs::copy(source, destination).await?;
            fs::remove_file(source).await
        },
    }
}

/// Move `source` into `bucket`, returning the archived path when it moved
pub async fn archive(source: &Path, paths: &ArchivePaths, bucket: ArchiveBucket) -> Option<PathBuf> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dir = bucket.dir(paths);

    if let Err(e) = fs::create_dir_all(dir).await {
        warn!(file = %file_name, dir = %dir.display(), error = %e, "Cannot create archive folder");
        return None;
    }

    let destination = match free_destination(dir, &archive_name(&file_name, Local::now())).await {
        Ok(destination) => destination,
        Err(e) => {
            warn!(file = %file_name, dir = %dir.display(), error = %e, "Cannot inspect archive folder");
            return None;
        },
    };

    match move_file(source, &destination).await {
        Ok(()) => {
            info!(
                file = %file_name,
                bucket = %bucket,
                archived_as = %destination.display(),
                "File archived"
            );
            Some(destination)
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // Another discovery path got there first
            debug!(file = %file_name, bucket = %bucket, "File already archived");
            None
        },
        Err(e) => {
            warn!(file = %file_name, bucket = %bucket, error = %e, "Archive rename failed");
            None
        },
    }
}
