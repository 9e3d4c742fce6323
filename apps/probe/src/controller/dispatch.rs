use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::events::ControllerEvent;
use crate::monitoring::{Scheduler, SchedulerError};

/// Applies controller events to the scheduler, one at a time
pub struct EventDispatcher {
    scheduler: Arc<Scheduler>,
    shutdown: CancellationToken,
}

impl EventDispatcher {
    /// `shutdown` is cancelled when the controller reports an error
    pub fn new(scheduler: Arc<Scheduler>, shutdown: CancellationToken) -> Self {
        Self { scheduler, shutdown }
    }

    pub async fn run(self, mut events: mpsc::Receiver<ControllerEvent>) {
        while let Some(event) = events.recv().await {
            self.apply(event);
        }
        debug!("event dispatcher stopped");
    }

    pub fn apply(&self, event: ControllerEvent) {
        let name = event.name();
        let outcome = match event {
            ControllerEvent::Refresh(definitions) => {
                debug!(checks = definitions.len(), "refresh received");
                self.scheduler.refresh(definitions).map(|_| ())
            }
            ControllerEvent::Created(definition) => self.scheduler.create(definition),
            ControllerEvent::Updated(definition) => self.scheduler.update(definition),
            ControllerEvent::Removed(definition) => self.scheduler.remove(&definition),
            ControllerEvent::Ready(ready) => {
                debug!(probe_id = ready.probe_id, "session ready");
                Ok(())
            }
            ControllerEvent::Error(reason) => {
                error!("Controller emitted an error. {reason}");
                self.shutdown.cancel();
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            Err(SchedulerError::Closed) => debug!(event = name, "scheduler closed, event ignored"),
            Err(e @ SchedulerError::Stale(_)) => info!(event = name, error = %e, "stale event ignored"),
            Err(e) => warn!(event = name, error = %e, "unable to apply controller event"),
        }
    }
}
