use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::checks::Check;
use super::definition::{CheckDefinition, CheckId, CheckType};
use super::sink::ResultSink;
use super::types::{CheckResult, ResultRecord};

enum InstanceState {
    Stopped {
        /// Loop that was told to stop and may still be finishing an execution
        draining: Option<JoinHandle<()>>,
    },
    Running {
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
}

/// One check bound to its execution loop.
///
/// The loop runs on its own task; starting and stopping never touches other
/// instances. Dropping an instance stops its loop.
pub struct CheckInstance {
    definition: CheckDefinition,
    check: Arc<dyn Check>,
    sink: ResultSink,
    slug: watch::Sender<String>,
    state: InstanceState,
    starts: u64,
}

impl CheckInstance {
    pub fn new(definition: CheckDefinition, check: Arc<dyn Check>, sink: ResultSink) -> Self {
        let (slug, _) = watch::channel(definition.slug.clone());
        Self {
            definition,
            check,
            sink,
            slug,
            state: InstanceState::Stopped { draining: None },
            starts: 0,
        }
    }

    pub fn definition(&self) -> &CheckDefinition {
        &self.definition
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, InstanceState::Running { .. })
    }

    /// How many times a loop was started for this instance
    pub fn start_count(&self) -> u64 {
        self.starts
    }

    /// Start the execution loop.
    ///
    /// No-op when already running or when the definition is disabled.
    pub fn run(&mut self) {
        if !self.definition.enabled {
            return;
        }

        let previous = match &mut self.state {
            InstanceState::Running { .. } => return,
            InstanceState::Stopped { draining } => draining.take(),
        };

        let cancel = CancellationToken::new();
        let execution = Execution {
            check_id: self.definition.id,
            check_type: self.definition.check_type,
            check: Arc::clone(&self.check),
            sink: self.sink.clone(),
            slug: self.slug.subscribe(),
            cancel: cancel.clone(),
        };
        let interval = self.definition.interval();
        let offset = self.definition.start_offset();

        let handle = tokio::spawn(async move {
            // The previous loop is cancelled already; wait for its last
            // execution so two never overlap.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            execution.run(interval, offset).await;
        });

        self.starts += 1;
        self.state = InstanceState::Running { cancel, handle };
        debug!(check_id = self.definition.id, slug = %self.definition.slug, "check started");
    }

    /// Signal the loop to end. Idempotent.
    pub fn stop(&mut self) {
        let state = std::mem::replace(&mut self.state, InstanceState::Stopped { draining: None });
        self.state = match state {
            InstanceState::Running { cancel, handle } => {
                cancel.cancel();
                debug!(check_id = self.definition.id, slug = %self.definition.slug, "check stopped");
                InstanceState::Stopped { draining: Some(handle) }
            }
            stopped => stopped,
        };
    }

    /// Stop and hand over the loop's task so the caller can wait for it
    pub(crate) fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.stop();
        match &mut self.state {
            InstanceState::Stopped { draining } => draining.take(),
            InstanceState::Running { .. } => None,
        }
    }

    /// Wait for `draining`, the loop of the instance this one replaces,
    /// before the first execution
    pub(crate) fn succeeding(mut self, draining: Option<JoinHandle<()>>) -> Self {
        if let InstanceState::Stopped { draining: slot } = &mut self.state {
            *slot = draining;
        }
        self
    }

    /// Adopt a definition that only differs in labels
    pub(crate) fn relabel(&mut self, definition: CheckDefinition) {
        debug_assert!(self.definition.same_behavior(&definition));
        if definition.slug != self.definition.slug {
            self.slug.send_replace(definition.slug.clone());
        }
        self.definition = definition;
    }
}

impl Drop for CheckInstance {
    fn drop(&mut self) {
        if let InstanceState::Running { cancel, .. } = &self.state {
            cancel.cancel();
        }
    }
}

/// Everything the loop task owns
struct Execution {
    check_id: CheckId,
    check_type: CheckType,
    check: Arc<dyn Check>,
    sink: ResultSink,
    slug: watch::Receiver<String>,
    cancel: CancellationToken,
}

impl Execution {
    async fn run(self, interval: Duration, offset: Duration) {
        let mut ticker = interval_at(Instant::now() + offset, interval);
        // A tick that fires while the previous execution is still running is dropped.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = self.check.run().await;
            if self.cancel.is_cancelled() {
                debug!(check_id = self.check_id, "check stopped during execution, dropping result");
                break;
            }

            let result = match outcome {
                Ok(result) => {
                    if !result.is_success() {
                        debug!(check_id = self.check_id, error = result.error_msg(), "check reported failure");
                    }
                    result
                }
                Err(e) => {
                    warn!(check_id = self.check_id, error = %e, "check execution failed");
                    CheckResult::failure(e.to_string())
                }
            };

            self.sink.publish(ResultRecord {
                check_id: self.check_id,
                slug: self.slug.borrow().clone(),
                check_type: self.check_type,
                result,
            });
        }
    }
}
