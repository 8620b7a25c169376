//! Filesystem notifications
//!
//! Uses the platform's recommended `notify` backend on the input folder (not
//! recursive). Notifications miss files that were already present, so the
//! folder is scanned once before the watcher is armed.

use async_trait::async_trait;
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{list_files, Discover};
use crate::error::Result;
use crate::route::Route;

pub struct EventWatcher {
    input_dir: PathBuf,
}

impl EventWatcher {
    pub fn new(route: &Route) -> Self {
        Self {
            input_dir: route.input_dir.clone(),
        }
    }
}

/// Creation and move-in notifications are the only ones that surface new files
fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any))
    )
}

#[async_trait]
impl Discover for EventWatcher {
    fn kind(&self) -> &'static str {
        "event"
    }

    async fn discover(&self, queue: mpsc::Sender<PathBuf>, cancel: CancellationToken) -> Result<()> {
        let (event_tx, mut events) = mpsc::unbounded_channel::<notify::Result<Event>>();

        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&self.input_dir, RecursiveMode::NonRecursive)?;

        let existing = list_files(&self.input_dir).await?;
        info!(files = existing.len(), "Startup scan");
        for path in existing {
            if queue.send(path).await.is_err() {
                return Ok(());
            }
        }

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Watch error");
                    continue;
                },
            };

            if !is_arrival(&event.kind) {
                continue;
            }

            for path in event.paths {
                debug!(path = %path.display(), "File arrived");
                if queue.send(path).await.is_err() {
                    return Ok(());
                }
            }
        }

        drop(watcher);
        Ok(())
    }
}
