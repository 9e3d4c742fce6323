//! Wiring of the probe's components and their shutdown order.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::controller::{Backoff, ControllerClient, EventDispatcher, HttpPollTransport};
use crate::error::AppError;
use crate::healthz::{Healthz, HealthzState};
use crate::metrics::PrometheusMetrics;
use crate::monitoring::{ProbeCheckFactory, ResultSink, Scheduler};
use crate::publisher::Publisher;

const CONTROLLER_EVENT_BUFFER: usize = 64;

/// A running probe
pub struct Probe {
    scheduler: Arc<Scheduler>,
    healthz: Healthz,
    controller: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    publisher: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Probe {
    /// Start every component.
    ///
    /// `shutdown` is cancelled by the probe itself when the controller
    /// rejects it; the caller cancels it to stop the controller session.
    pub async fn start(config: &Config, shutdown: CancellationToken) -> Result<Self, AppError> {
        let metrics = Arc::new(PrometheusMetrics::new()?);
        let (sink, results) = ResultSink::channel(config.publisher.queue_capacity);

        let publisher = Publisher::new(
            &config.publisher.tsdb_url()?,
            &config.probe.api_key,
            &config.probe.name,
            config.publisher.concurrency,
            metrics.clone(),
        )?;
        let transport = HttpPollTransport::new(
            &config.controller.server_url()?,
            &config.probe.api_key,
            &config.probe.name,
            config.controller.poll_interval(),
        )?;

        let scheduler =
            Arc::new(Scheduler::new(config.health.hosts.clone(), Arc::new(ProbeCheckFactory), sink, metrics.clone()));
        scheduler.start_health_monitor(config.health.interval(), config.health.timeout())?;

        let healthz = match Healthz::start(
            &config.healthz.listen_addr,
            HealthzState { scheduler: scheduler.clone(), metrics },
        ) {
            Ok(healthz) => healthz,
            Err(e) => {
                scheduler.close().await;
                return Err(e);
            }
        };

        let publisher = publisher.spawn(results);

        let (events_tx, events_rx) = mpsc::channel(CONTROLLER_EVENT_BUFFER);
        let client = ControllerClient::new(
            Arc::new(transport),
            Backoff::new(config.controller.reconnect_initial(), config.controller.reconnect_max()),
        );
        let controller = tokio::spawn(client.run(events_tx, shutdown.clone()));
        let dispatcher = tokio::spawn(EventDispatcher::new(scheduler.clone(), shutdown.clone()).run(events_rx));

        info!(name = %config.probe.name, "probe started");
        Ok(Self { scheduler, healthz, controller, dispatcher, publisher, shutdown })
    }

    /// Stop in order: healthz, checks, controller session, then the
    /// publisher once the last result is delivered
    pub async fn stop(self) {
        self.healthz.stop().await;
        self.scheduler.close().await;

        self.shutdown.cancel();
        for (name, task) in [("controller", self.controller), ("dispatcher", self.dispatcher)] {
            if let Err(e) = task.await {
                warn!(error = %e, "{name} task failed");
            }
        }

        if let Err(e) = self.publisher.await {
            warn!(error = %e, "publisher task failed");
        }
        info!("probe stopped");
    }
}
