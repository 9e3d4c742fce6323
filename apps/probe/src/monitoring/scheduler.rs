use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checks::{Check, CheckError, CheckFactory};
use super::definition::{CheckDefinition, CheckId};
use super::health::{HealthGate, HealthMonitor, HealthProbe, HealthState};
use super::instance::CheckInstance;
use super::sink::ResultSink;
use crate::metrics::MetricsSink;

/// How long `close` waits for running executions before aborting them
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("check {0} is already scheduled with a different definition")]
    AlreadyExists(CheckId),

    #[error("definition of check {0} is older than the one already applied")]
    Stale(CheckId),

    #[error("check {id} could not be built: {source}")]
    InvalidCheck {
        id: CheckId,
        #[source]
        source: CheckError,
    },

    #[error("unable to create health check for {host}: {source}")]
    HealthCheck {
        host: String,
        #[source]
        source: CheckError,
    },

    #[error("scheduler is closed")]
    Closed,
}

/// What a refresh changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub created: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Point-in-time view of one scheduled check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckStatus {
    pub id: CheckId,
    pub slug: String,
    pub enabled: bool,
    pub running: bool,
    pub starts: u64,
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerState {
    checks: HashMap<CheckId, CheckInstance>,
    /// Removed ids and the modification time of their removal
    tombstones: HashMap<CheckId, Option<DateTime<Utc>>>,
    health: HealthState,
    monitor: Option<MonitorTask>,
    closed: bool,
}

/// Registry of scheduled checks.
///
/// Refreshes, creates, updates and removals are serialized on `mutations` for their whole
/// duration and are totally ordered. Checks are built before the state lock
/// is taken, so health broadcasts never wait on check construction. Check
/// executions run on their own tasks and never take either lock.
pub struct Scheduler {
    mutations: Mutex<()>,
    state: Mutex<SchedulerState>,
    health_hosts: Vec<String>,
    factory: Arc<dyn CheckFactory>,
    sink: ResultSink,
    metrics: Arc<dyn MetricsSink>,
    close_grace: Duration,
}

impl Scheduler {
    /// Create an empty scheduler. Health is Unhealthy until the health
    /// monitor says otherwise, so nothing runs before connectivity is known.
    pub fn new(
        health_hosts: Vec<String>,
        factory: Arc<dyn CheckFactory>,
        sink: ResultSink,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            mutations: Mutex::new(()),
            state: Mutex::new(SchedulerState {
                checks: HashMap::new(),
                tombstones: HashMap::new(),
                health: HealthState::Unhealthy,
                monitor: None,
                closed: false,
            }),
            health_hosts,
            factory,
            sink,
            metrics,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock().health.is_healthy()
    }

    pub fn len(&self) -> usize {
        self.state.lock().checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status of every scheduled check, ordered by id
    pub fn checks(&self) -> Vec<CheckStatus> {
        let state = self.state.lock();
        let mut checks: Vec<_> = state
            .checks
            .values()
            .map(|instance| CheckStatus {
                id: instance.definition().id,
                slug: instance.definition().slug.clone(),
                enabled: instance.definition().enabled,
                running: instance.is_running(),
                starts: instance.start_count(),
            })
            .collect();
        checks.sort_by_key(|status| status.id);
        checks
    }

    pub fn check(&self, id: CheckId) -> Option<CheckStatus> {
        self.checks().into_iter().find(|status| status.id == id)
    }

    /// Reconcile with the full list of definitions from the controller
    pub fn refresh(&self, definitions: Vec<CheckDefinition>) -> Result<RefreshSummary, SchedulerError> {
        let _mutation = self.mutations.lock();
        let changed: Vec<bool> = {
            let state = self.state.lock();
            if state.closed {
                return Err(SchedulerError::Closed);
            }
            definitions
                .iter()
                .map(|definition| match state.checks.get(&definition.id) {
                    Some(current) => !current.definition().same_behavior(definition),
                    None => true,
                })
                .collect()
        };
        let built: Vec<Option<Result<Arc<dyn Check>, SchedulerError>>> = definitions
            .iter()
            .zip(changed)
            .map(|(definition, changed)| changed.then(|| self.build_check(definition)))
            .collect();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SchedulerError::Closed);
        }

        let mut summary = RefreshSummary::default();
        let incoming: HashSet<CheckId> = definitions.iter().map(|definition| definition.id).collect();

        // A refresh is the controller's full state, older removals no longer matter.
        state.tombstones.clear();

        let gone: Vec<CheckId> = state.checks.keys().filter(|id| !incoming.contains(id)).copied().collect();
        for id in gone {
            if let Some(mut instance) = state.checks.remove(&id) {
                instance.stop();
                state.tombstones.insert(id, instance.definition().updated);
                summary.removed += 1;
            }
        }

        let healthy = state.health.is_healthy();
        for (definition, built) in definitions.into_iter().zip(built) {
            let id = definition.id;
            match built {
                None => {
                    if let Some(current) = state.checks.get_mut(&id) {
                        current.relabel(definition);
                    }
                    summary.unchanged += 1;
                }
                Some(Ok(check)) => {
                    let previous = state.checks.remove(&id);
                    if previous.is_some() {
                        summary.replaced += 1;
                    } else {
                        summary.created += 1;
                    }
                    state.checks.insert(id, self.install(definition, check, healthy, previous));
                }
                Some(Err(_)) => {
                    if let Some(mut previous) = state.checks.remove(&id) {
                        previous.stop();
                    }
                    summary.failed += 1;
                }
            }
        }

        self.metrics.set_scheduled_checks(state.checks.len());
        info!(
            created = summary.created,
            replaced = summary.replaced,
            unchanged = summary.unchanged,
            removed = summary.removed,
            failed = summary.failed,
            "refreshed checks"
        );
        Ok(summary)
    }

    /// Schedule a new check
    pub fn create(&self, definition: CheckDefinition) -> Result<(), SchedulerError> {
        let _mutation = self.mutations.lock();
        let id = definition.id;
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SchedulerError::Closed);
            }

            if let Some(current) = state.checks.get_mut(&id) {
                if current.definition().same_behavior(&definition) {
                    debug!(check_id = id, "duplicate create ignored");
                    current.relabel(definition);
                    return Ok(());
                }
                return Err(SchedulerError::AlreadyExists(id));
            }

            if let Some(removed_at) = state.tombstones.get(&id) {
                if !is_newer(definition.updated, *removed_at) {
                    return Err(SchedulerError::Stale(id));
                }
            }
        }

        let check = self.build_check(&definition)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SchedulerError::Closed);
        }
        let instance = self.install(definition, check, state.health.is_healthy(), None);
        state.tombstones.remove(&id);
        state.checks.insert(id, instance);
        self.metrics.set_scheduled_checks(state.checks.len());
        Ok(())
    }

    /// Replace the check with a new definition.
    ///
    /// A disabled definition keeps the check registered but stopped.
    pub fn update(&self, definition: CheckDefinition) -> Result<(), SchedulerError> {
        let _mutation = self.mutations.lock();
        let id = definition.id;
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SchedulerError::Closed);
            }

            if let Some(removed_at) = state.tombstones.get(&id) {
                if !is_newer(definition.updated, *removed_at) {
                    return Err(SchedulerError::Stale(id));
                }
            }

            match state.checks.get_mut(&id) {
                Some(current) if definition.is_older_than(current.definition().updated) => {
                    return Err(SchedulerError::Stale(id));
                }
                Some(current) if current.definition().same_behavior(&definition) => {
                    current.relabel(definition);
                    return Ok(());
                }
                Some(_) => {}
                None => debug!(check_id = id, "update for unscheduled check, creating it"),
            }
        }

        let built = self.build_check(&definition);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SchedulerError::Closed);
        }

        // The outdated instance goes away even if the new definition cannot be built.
        let previous = state.checks.remove(&id);
        let result = match built {
            Ok(check) => {
                let instance = self.install(definition, check, state.health.is_healthy(), previous);
                state.tombstones.remove(&id);
                state.checks.insert(id, instance);
                Ok(())
            }
            Err(e) => {
                if let Some(mut previous) = previous {
                    previous.stop();
                }
                Err(e)
            }
        };
        self.metrics.set_scheduled_checks(state.checks.len());
        result
    }

    /// Stop and forget a check. Removing an unknown id is not an error.
    pub fn remove(&self, definition: &CheckDefinition) -> Result<(), SchedulerError> {
        let _mutation = self.mutations.lock();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(SchedulerError::Closed);
        }

        let id = definition.id;
        if let Some(current) = state.checks.get(&id) {
            if definition.is_older_than(current.definition().updated) {
                return Err(SchedulerError::Stale(id));
            }
        }

        match state.checks.remove(&id) {
            Some(mut instance) => {
                instance.stop();
                debug!(check_id = id, slug = %definition.slug, "check removed");
            }
            None => debug!(check_id = id, "remove for unscheduled check ignored"),
        }

        let tombstone = state.tombstones.entry(id).or_insert(definition.updated);
        if is_newer(definition.updated, *tombstone) {
            *tombstone = definition.updated;
        }
        self.metrics.set_scheduled_checks(state.checks.len());
        Ok(())
    }

    /// Start the health monitor loop, evaluating every `every`
    pub fn start_health_monitor(self: &Arc<Self>, every: Duration, timeout: Duration) -> Result<(), SchedulerError> {
        let probes = self
            .health_hosts
            .iter()
            .map(|host| {
                HealthProbe::ping(host, timeout, self.factory.as_ref())
                    .map_err(|source| SchedulerError::HealthCheck { host: host.clone(), source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(SchedulerError::Closed);
        }
        if state.monitor.is_some() {
            warn!("health monitor already running");
            return Ok(());
        }

        let monitor = HealthMonitor::new(probes, Arc::clone(&self.metrics));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(Arc::downgrade(self), every, cancel.clone()));
        state.monitor = Some(MonitorTask { cancel, handle });
        info!(hosts = ?self.health_hosts, "health monitor started");
        Ok(())
    }

    /// Stop every check and the health monitor.
    ///
    /// Returns once every loop has finished, or after the grace period with
    /// the stragglers aborted. No result is published after this returns.
    pub async fn close(&self) {
        let (handles, monitor) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let handles: Vec<_> = state.checks.values_mut().filter_map(CheckInstance::shutdown).collect();
            state.checks.clear();
            (handles, state.monitor.take())
        };
        self.sink.close();
        self.metrics.set_scheduled_checks(0);

        let mut handles = handles;
        if let Some(monitor) = monitor {
            monitor.cancel.cancel();
            handles.push(monitor.handle);
        }

        info!(tasks = handles.len(), "closing scheduler");
        let joined = tokio::time::timeout(self.close_grace, join_all(handles.iter_mut())).await;
        if joined.is_err() {
            warn!("checks still running after {:?}, aborting them", self.close_grace);
            // Finished handles were already awaited above and must not be polled again.
            for handle in handles.into_iter().filter(|handle| !handle.is_finished()) {
                handle.abort();
                let _ = handle.await;
            }
        }
        info!("scheduler closed");
    }

    fn build_check(&self, definition: &CheckDefinition) -> Result<Arc<dyn Check>, SchedulerError> {
        let id = definition.id;
        self.factory.build(definition).map_err(|source| {
            error!(check_id = id, slug = %definition.slug, error = %source, "unable to build check, not scheduling it");
            SchedulerError::InvalidCheck { id, source }
        })
    }

    /// Wrap `check` in an instance replacing `previous`.
    ///
    /// The new loop only starts once the old one has finished its last
    /// execution.
    fn install(
        &self,
        definition: CheckDefinition,
        check: Arc<dyn Check>,
        start: bool,
        previous: Option<CheckInstance>,
    ) -> CheckInstance {
        let draining = previous.and_then(|mut previous| previous.shutdown());
        let mut instance = CheckInstance::new(definition, check, self.sink.clone()).succeeding(draining);
        if start {
            instance.run();
        }
        instance
    }
}

impl HealthGate for Scheduler {
    /// Stop or resume every check. Called on transitions only.
    fn set_health(&self, health: HealthState) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.health = health;
        match health {
            HealthState::Unhealthy => state.checks.values_mut().for_each(CheckInstance::stop),
            HealthState::Healthy => state.checks.values_mut().for_each(|instance| {
                debug!(check_id = instance.definition().id, slug = %instance.definition().slug, "resuming check");
                instance.run();
            }),
        }
    }
}

/// Whether `incoming` supersedes a removal recorded at `removed_at`
fn is_newer(incoming: Option<DateTime<Utc>>, removed_at: Option<DateTime<Utc>>) -> bool {
    matches!((incoming, removed_at), (Some(incoming), Some(removed_at)) if incoming > removed_at)
}
