/// Scheduler scenarios
///
/// These tests drive the scheduler the way the controller and the health
/// monitor do and verify:
/// - Reconciliation never restarts unchanged checks
/// - Health transitions stop and resume every check
/// - Stale and duplicate events leave the registry untouched
/// - Closing stops every result from reaching the publisher
use super::checks::{Check, CheckError, CheckFactory, ProbeCheckFactory};
use super::definition::fixtures::ping_definition;
use super::definition::{CheckDefinition, CheckId};
use super::health::{HealthGate, HealthState};
use super::scheduler::{RefreshSummary, Scheduler, SchedulerError};
use super::sink::ResultSink;
use super::types::{CheckResult, ResultRecord};
use crate::metrics::{MetricsSink, NoopMetrics};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, mpsc as std_mpsc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Execution counters shared by every check built for one id
#[derive(Default)]
struct CheckStats {
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct MockCheck {
    stats: Arc<CheckStats>,
    delay: Duration,
    reachable: bool,
}

#[async_trait::async_trait]
impl Check for MockCheck {
    async fn run(&self) -> Result<CheckResult, CheckError> {
        self.stats.runs.fetch_add(1, Ordering::SeqCst);
        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.stats.active.fetch_sub(1, Ordering::SeqCst);

        if self.reachable { Ok(CheckResult::success()) } else { Ok(CheckResult::failure("100% packet loss")) }
    }
}

/// Builds mock checks driven by the definition's settings:
/// `broken` fails construction, `delay` sets the execution time in seconds,
/// and hostnames starting with `down.` report failures.
#[derive(Default)]
struct MockFactory {
    stats: Mutex<HashMap<CheckId, Arc<CheckStats>>>,
}

impl MockFactory {
    fn stats(&self, id: CheckId) -> Arc<CheckStats> {
        self.stats.lock().entry(id).or_default().clone()
    }

    fn runs(&self, id: CheckId) -> usize {
        self.stats(id).runs.load(Ordering::SeqCst)
    }
}

impl CheckFactory for MockFactory {
    fn build(&self, definition: &CheckDefinition) -> Result<Arc<dyn Check>, CheckError> {
        if definition.settings.contains_key("broken") {
            return Err(CheckError::invalid("hostname", "broken on purpose"));
        }
        let delay = definition.settings.get("delay").and_then(|v| v.as_u64()).unwrap_or(0);
        let reachable = !definition
            .settings
            .get("hostname")
            .and_then(|v| v.as_str())
            .is_some_and(|host| host.starts_with("down."));

        Ok(Arc::new(MockCheck { stats: self.stats(definition.id), delay: Duration::from_secs(delay), reachable }))
    }
}

#[derive(Default)]
struct RecordingMetrics {
    healthy: Mutex<Vec<bool>>,
    scheduled: AtomicUsize,
}

impl MetricsSink for RecordingMetrics {
    fn set_healthy(&self, healthy: bool) {
        self.healthy.lock().push(healthy);
    }

    fn set_scheduled_checks(&self, count: usize) {
        self.scheduled.store(count, Ordering::SeqCst);
    }
}

struct Harness {
    scheduler: Arc<Scheduler>,
    factory: Arc<MockFactory>,
    metrics: Arc<RecordingMetrics>,
    results: mpsc::Receiver<ResultRecord>,
}

/// Helper to create a scheduler wired to mocks
fn harness(hosts: &[&str]) -> Harness {
    let factory = Arc::new(MockFactory::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let (sink, results) = ResultSink::channel(256);
    let scheduler = Scheduler::new(
        hosts.iter().map(|host| host.to_string()).collect(),
        factory.clone(),
        sink,
        metrics.clone(),
    )
    .with_close_grace(Duration::from_secs(1));

    Harness { scheduler: Arc::new(scheduler), factory, metrics, results }
}

/// Helper to create a harness whose scheduler is already healthy
fn healthy_harness() -> Harness {
    let harness = harness(&[]);
    harness.scheduler.set_health(HealthState::Healthy);
    harness
}

fn at(second: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, second).single()
}

fn drain(results: &mut mpsc::Receiver<ResultRecord>) -> Vec<ResultRecord> {
    let mut records = Vec::new();
    while let Ok(record) = results.try_recv() {
        records.push(record);
    }
    records
}

#[tokio::test(start_paused = true)]
async fn test_refresh_twice_keeps_running_timers() {
    let h = healthy_harness();
    let definitions = vec![ping_definition(1, 5), ping_definition(2, 5), ping_definition(3, 5)];

    let first = h.scheduler.refresh(definitions.clone()).unwrap();
    assert_eq!(first, RefreshSummary { created: 3, ..Default::default() });

    let second = h.scheduler.refresh(definitions).unwrap();
    assert_eq!(second, RefreshSummary { unchanged: 3, ..Default::default() });

    for status in h.scheduler.checks() {
        assert!(status.running);
        assert_eq!(status.starts, 1, "check {} was restarted", status.id);
    }
    assert_eq!(h.metrics.scheduled.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_reconciles_changes_and_removals() {
    let h = healthy_harness();
    h.scheduler.refresh(vec![ping_definition(1, 5), ping_definition(2, 5)]).unwrap();

    let mut changed = ping_definition(2, 10);
    changed.slug = "renamed".into();
    let mut relabelled = ping_definition(1, 5);
    relabelled.slug = "only-the-slug".into();

    let summary = h.scheduler.refresh(vec![relabelled, changed, ping_definition(3, 5)]).unwrap();
    assert_eq!(summary, RefreshSummary { created: 1, replaced: 1, unchanged: 1, ..Default::default() });

    let summary = h.scheduler.refresh(vec![ping_definition(3, 5)]).unwrap();
    assert_eq!(summary.removed, 2);

    let ids: Vec<_> = h.scheduler.checks().into_iter().map(|status| status.id).collect();
    assert_eq!(ids, vec![3]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_survives_unbuildable_checks() {
    let h = healthy_harness();
    let mut broken = ping_definition(2, 5);
    broken.settings.insert("broken".into(), true.into());

    let summary = h.scheduler.refresh(vec![ping_definition(1, 5), broken]).unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 1);
    assert!(h.scheduler.check(2).is_none());
    assert!(h.scheduler.check(1).is_some_and(|status| status.running));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_create_is_a_noop() {
    let h = healthy_harness();
    h.scheduler.create(ping_definition(7, 5)).unwrap();
    h.scheduler.create(ping_definition(7, 5)).unwrap();

    assert_eq!(h.scheduler.len(), 1);
    assert_eq!(h.scheduler.check(7).map(|status| status.starts), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_create_leaves_existing_check() {
    let h = healthy_harness();
    h.scheduler.create(ping_definition(7, 5)).unwrap();

    let err = h.scheduler.create(ping_definition(7, 30)).unwrap_err();
    assert!(matches!(err, SchedulerError::AlreadyExists(7)));

    let status = h.scheduler.check(7).unwrap();
    assert!(status.running);
    assert_eq!(status.starts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_while_unhealthy_waits_for_health() {
    let h = harness(&[]);
    h.scheduler.create(ping_definition(4, 5)).unwrap();

    let status = h.scheduler.check(4).unwrap();
    assert!(!status.running);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.factory.runs(4), 0);

    h.scheduler.set_health(HealthState::Healthy);
    assert!(h.scheduler.check(4).unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn test_health_transitions_stop_and_resume_every_check() {
    let mut h = healthy_harness();
    h.scheduler.refresh(vec![ping_definition(1, 5), ping_definition(2, 5)]).unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!drain(&mut h.results).is_empty());

    h.scheduler.set_health(HealthState::Unhealthy);
    assert!(!h.scheduler.is_healthy());
    assert!(h.scheduler.checks().iter().all(|status| !status.running));

    // Anything already queued was produced before the transition.
    drain(&mut h.results);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut h.results).is_empty());

    h.scheduler.set_health(HealthState::Healthy);
    assert!(h.scheduler.checks().iter().all(|status| status.running && status.starts == 2));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!drain(&mut h.results).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_identical_update_keeps_timer() {
    let h = healthy_harness();
    h.scheduler.create(ping_definition(1, 5)).unwrap();
    h.scheduler.update(ping_definition(1, 5)).unwrap();

    assert_eq!(h.scheduler.check(1).map(|status| status.starts), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_update_keeps_check_registered() {
    let h = healthy_harness();
    h.scheduler.create(ping_definition(1, 5)).unwrap();

    let mut disabled = ping_definition(1, 5);
    disabled.enabled = false;
    h.scheduler.update(disabled).unwrap();

    let status = h.scheduler.check(1).unwrap();
    assert!(!status.enabled);
    assert!(!status.running);

    // Health resuming must not start a disabled check.
    h.scheduler.set_health(HealthState::Unhealthy);
    h.scheduler.set_health(HealthState::Healthy);
    assert!(!h.scheduler.check(1).unwrap().running);

    h.scheduler.update(ping_definition(1, 5)).unwrap();
    let status = h.scheduler.check(1).unwrap();
    assert!(status.enabled);
    assert!(status.running);
}

#[tokio::test(start_paused = true)]
async fn test_replacement_never_overlaps_previous_execution() {
    let h = healthy_harness();
    let mut slow = ping_definition(10, 5);
    slow.settings.insert("delay".into(), 3.into());
    h.scheduler.create(slow.clone()).unwrap();

    // The first execution runs from 0s to 3s.
    tokio::time::sleep(Duration::from_secs(1)).await;
    slow.frequency = 7;
    h.scheduler.update(slow).unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stats = h.factory.stats(10);
    assert_eq!(stats.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(stats.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_update_of_unknown_check_creates_it() {
    let h = healthy_harness();
    h.scheduler.update(ping_definition(9, 5)).unwrap();
    assert!(h.scheduler.check(9).is_some_and(|status| status.running));
}

#[tokio::test(start_paused = true)]
async fn test_failed_update_drops_outdated_check() {
    let h = healthy_harness();
    h.scheduler.create(ping_definition(1, 5)).unwrap();

    let mut broken = ping_definition(1, 5);
    broken.settings.insert("broken".into(), true.into());
    let err = h.scheduler.update(broken).unwrap_err();

    assert!(matches!(err, SchedulerError::InvalidCheck { id: 1, .. }));
    assert!(h.scheduler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remove_is_idempotent() {
    let h = healthy_harness();
    h.scheduler.create(ping_definition(1, 5)).unwrap();

    h.scheduler.remove(&ping_definition(1, 5)).unwrap();
    h.scheduler.remove(&ping_definition(1, 5)).unwrap();
    h.scheduler.remove(&ping_definition(99, 5)).unwrap();

    assert!(h.scheduler.is_empty());
    assert_eq!(h.metrics.scheduled.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_events_do_not_resurrect_removed_check() {
    let h = healthy_harness();
    let mut created = ping_definition(1, 5);
    created.updated = at(10);
    h.scheduler.create(created).unwrap();

    let mut removed = ping_definition(1, 5);
    removed.updated = at(20);
    h.scheduler.remove(&removed).unwrap();

    // An update sent before the removal arrives after it.
    let mut late = ping_definition(1, 30);
    late.updated = at(15);
    assert!(matches!(h.scheduler.update(late.clone()), Err(SchedulerError::Stale(1))));
    assert!(matches!(h.scheduler.create(late), Err(SchedulerError::Stale(1))));
    assert!(h.scheduler.is_empty());

    let mut recreated = ping_definition(1, 5);
    recreated.updated = at(25);
    h.scheduler.create(recreated).unwrap();
    assert_eq!(h.scheduler.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_update_is_rejected() {
    let h = healthy_harness();
    let mut current = ping_definition(1, 5);
    current.updated = at(20);
    h.scheduler.create(current).unwrap();

    let mut stale = ping_definition(1, 60);
    stale.updated = at(10);
    assert!(matches!(h.scheduler.update(stale), Err(SchedulerError::Stale(1))));
    assert_eq!(h.scheduler.check(1).map(|status| status.starts), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_non_finite_timeout_only_fails_its_own_check() {
    let (sink, _results) = ResultSink::channel(16);
    let scheduler = Scheduler::new(Vec::new(), Arc::new(ProbeCheckFactory), sink, Arc::new(NoopMetrics));
    let mut nan = ping_definition(2, 5);
    nan.settings.insert("timeout".into(), "NaN".into());

    let summary = scheduler.refresh(vec![ping_definition(1, 5), nan.clone()]).unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.failed, 1);
    assert!(scheduler.check(2).is_none());

    let err = scheduler.update(nan).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidCheck { id: 2, .. }));

    scheduler.create(ping_definition(3, 5)).unwrap();
    assert_eq!(scheduler.len(), 2);
    scheduler.close().await;
}

/// Blocks inside `build` until released, reporting when it got there
struct GatedFactory {
    building: Mutex<std_mpsc::Sender<()>>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

impl CheckFactory for GatedFactory {
    fn build(&self, _definition: &CheckDefinition) -> Result<Arc<dyn Check>, CheckError> {
        let _ = self.building.lock().send(());
        let _ = self.release.lock().recv();
        Ok(Arc::new(MockCheck { stats: Arc::default(), delay: Duration::ZERO, reachable: true }))
    }
}

#[tokio::test]
async fn test_health_broadcast_does_not_wait_for_check_construction() {
    let (building_tx, building_rx) = std_mpsc::channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    let factory = GatedFactory { building: Mutex::new(building_tx), release: Mutex::new(release_rx) };
    let (sink, _results) = ResultSink::channel(16);
    let scheduler = Arc::new(Scheduler::new(Vec::new(), Arc::new(factory), sink, Arc::new(NoopMetrics)));

    let refreshing = {
        let scheduler = scheduler.clone();
        tokio::task::spawn_blocking(move || scheduler.refresh(vec![ping_definition(1, 5)]))
    };
    building_rx.recv().unwrap();

    // The refresh is stuck building, yet the health flip goes through.
    scheduler.set_health(HealthState::Healthy);
    assert!(scheduler.is_healthy());
    assert!(scheduler.is_empty());

    release_tx.send(()).unwrap();
    let summary = refreshing.await.unwrap().unwrap();
    assert_eq!(summary.created, 1);
    assert!(scheduler.check(1).is_some_and(|status| status.running));

    scheduler.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_clears_removals() {
    let h = healthy_harness();
    h.scheduler.create(ping_definition(1, 5)).unwrap();
    h.scheduler.remove(&ping_definition(1, 5)).unwrap();
    assert!(matches!(h.scheduler.create(ping_definition(1, 5)), Err(SchedulerError::Stale(1))));

    h.scheduler.refresh(vec![ping_definition(1, 5)]).unwrap();
    assert_eq!(h.scheduler.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_gates_checks() {
    let h = harness(&["one.example", "two.example", "three.example"]);
    h.scheduler.create(ping_definition(1, 5)).unwrap();
    h.scheduler.start_health_monitor(Duration::from_secs(10), Duration::from_secs(1)).unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h.scheduler.is_healthy());
    assert!(h.scheduler.check(1).unwrap().running);
    assert_eq!(*h.metrics.healthy.lock(), vec![false, true]);

    h.scheduler.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_majority_keeps_checks_stopped() {
    let h = harness(&["down.one", "down.two", "three.example"]);
    h.scheduler.create(ping_definition(1, 5)).unwrap();
    h.scheduler.start_health_monitor(Duration::from_secs(10), Duration::from_secs(1)).unwrap();

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(!h.scheduler.is_healthy());
    assert_eq!(h.factory.runs(1), 0);

    h.scheduler.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_results_and_rejects_mutations() {
    let mut h = healthy_harness();
    let mut slow = ping_definition(1, 5);
    slow.settings.insert("delay".into(), 30.into());
    h.scheduler.refresh(vec![slow, ping_definition(2, 5)]).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let started = tokio::time::Instant::now();
    h.scheduler.close().await;
    assert!(started.elapsed() <= Duration::from_secs(2));

    // The sink is closed, so the channel ends once queued results are read.
    tokio::time::sleep(Duration::from_secs(60)).await;
    while h.results.recv().await.is_some() {}
    assert!(h.results.try_recv().is_err());

    assert!(matches!(h.scheduler.create(ping_definition(3, 5)), Err(SchedulerError::Closed)));
    assert!(matches!(h.scheduler.refresh(Vec::new()), Err(SchedulerError::Closed)));
    assert!(h.scheduler.is_empty());

    // Closing twice is harmless.
    h.scheduler.close().await;
}
