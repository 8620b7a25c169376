//! Interval polling

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{list_files, Discover};
use crate::error::Result;
use crate::route::{PollLogging, Route};

/// Lists the input folder on a fixed interval; the first tick fires at once
pub struct PollWatcher {
    input_dir: PathBuf,
    interval: Duration,
    logging: PollLogging,
}

impl PollWatcher {
    pub fn new(route: &Route, interval: Duration) -> Self {
        Self {
            input_dir: route.input_dir.clone(),
            interval,
            logging: route.poll_logging,
        }
    }
}

#[async_trait]
impl Discover for PollWatcher {
    fn kind(&self) -> &'static str {
        "poll"
    }

    async fn discover(&self, queue: mpsc::Sender<PathBuf>, cancel: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(interval_secs = self.interval.as_secs(), "Polling started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {},
            }

            let files = match list_files(&self.input_dir).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(error = %e, "Poll listing failed");
                    continue;
                },
            };

            if self.logging.should_log(files.len()) {
                info!(files = files.len(), "Poll cycle");
            }

            for path in files {
                if queue.send(path).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::route::RoutesManifest;

    fn route(root: &std::path::Path) -> Route {
        let manifest = format!(
            r#"
routes:
  - name: countries
    domain: reference
    entity: countries
    root: {}
    detection: {{ mode: poll, interval_secs: 1 }}
    outputs: {{ broker: {{ exchange: reference }} }}
"#,
            root.display()
        );
        RoutesManifest::parse(&manifest).unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_first_tick_lists_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let route = route(dir.path());
        std::fs::create_dir_all(&route.input_dir).unwrap();
        std::fs::create_dir_all(route.input_dir.join("nested")).unwrap();
        std::fs::write(route.input_dir.join("b.csv"), "x").unwrap();
        std::fs::write(route.input_dir.join("a.csv"), "x").unwrap();

        let watcher = PollWatcher::new(&route, Duration::from_secs(60));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { watcher.discover(tx, cancel).await }
        });

        assert_eq!(rx.recv().await.unwrap(), route.input_dir.join("a.csv"));
        assert_eq!(rx.recv().await.unwrap(), route.input_dir.join("b.csv"));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
