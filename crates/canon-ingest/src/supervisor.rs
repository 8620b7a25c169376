//! Route supervision
//!
//! Every route runs as its own task in one [`JoinSet`], under its own logger.
//! A route that fails to start, returns an error or panics is reported by
//! name; the other routes keep running until the shared token is cancelled.

use canon_common::broker::MessagePublisher;
use canon_common::logging::{route_dispatch, LogConfig};
use canon_common::EnvelopeOrigin;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, instrument::WithSubscriber, Instrument};

use crate::dispatcher::Dispatcher;
use crate::publisher::Publisher;
use crate::route::Route;
use crate::watcher::{run_route, RouteSummary};

/// Final state of one route
#[derive(Debug)]
pub enum RouteReport {
    Stopped(RouteSummary),
    Failed(String),
    Panicked,
}

pub struct Supervisor {
    origin: EnvelopeOrigin,
    broker: Option<Arc<dyn MessagePublisher>>,
    log_config: LogConfig,
    queue_size: usize,
}

impl Supervisor {
    pub fn new(
        origin: EnvelopeOrigin,
        broker: Option<Arc<dyn MessagePublisher>>,
        log_config: LogConfig,
        queue_size: usize,
    ) -> Self {
        Self {
            origin,
            broker,
            log_config,
            queue_size,
        }
    }

    /// Run all routes until `cancel` fires, returning one report per route
    pub async fn run(
        &self,
        routes: Vec<Route>,
        cancel: CancellationToken,
    ) -> HashMap<String, RouteReport> {
        let mut reports = HashMap::new();
        let mut tasks = JoinSet::new();
        let mut names: HashMap<Id, String> = HashMap::new();

        for route in routes {
            let name = route.name.clone();

            let (dispatch, guard) = match route_dispatch(&self.log_config, &name, &route.log_dir) {
                Ok(logger) => logger,
                Err(e) => {
                    error!(route = %name, error = %e, "Route logger could not be created");
                    reports.insert(name, RouteReport::Failed(e.to_string()));
                    continue;
                },
            };

            let publisher = match Publisher::new(&route, self.broker.clone()) {
                Ok(publisher) => publisher,
                Err(e) => {
                    error!(route = %name, error = %e, "Route publisher could not be created");
                    reports.insert(name, RouteReport::Failed(e.to_string()));
                    continue;
                },
            };

            let dispatcher = Dispatcher::new(Arc::new(route), self.origin.clone(), publisher);
            let queue_size = self.queue_size;
            let token = cancel.clone();

            let task = async move {
                let _guard = guard;
                run_route(dispatcher, queue_size, token).await
            }
            .instrument(info_span!("route", route = %name))
            .with_subscriber(dispatch);

            let handle = tasks.spawn(task);
            names.insert(handle.id(), name);
        }

        info!(routes = tasks.len(), "Routes started");

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, Ok(summary))) => {
                    let name = names.remove(&id).unwrap_or_default();
                    info!(route = %name, "Route finished");
                    reports.insert(name, RouteReport::Stopped(summary));
                },
                Ok((id, Err(e))) => {
                    let name = names.remove(&id).unwrap_or_default();
                    error!(route = %name, error = %e, "Route failed");
                    reports.insert(name, RouteReport::Failed(e.to_string()));
                },
                Err(e) => {
                    let name = names.remove(&e.id()).unwrap_or_default();
                    if e.is_panic() {
                        error!(route = %name, "Route task panicked");
                        reports.insert(name, RouteReport::Panicked);
                    } else {
                        error!(route = %name, error = %e, "Route task cancelled");
                        reports.insert(name, RouteReport::Failed(e.to_string()));
                    }
                },
            }
        }

        reports
    }
}
