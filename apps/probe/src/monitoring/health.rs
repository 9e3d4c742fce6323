//! Self-health judgment of the probe.
//!
//! A probe whose own network is degraded would report every target it
//! monitors as down. The health monitor pings a fixed set of well-known hosts
//! and, when more than half of them look unreachable, stops every check until
//! connectivity recovers.

use futures::future::join_all;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checks::{Check, CheckError, CheckFactory};
use super::definition::{CheckDefinition, CheckType};
use super::types::CheckResult;
use crate::metrics::MetricsSink;

/// Health of the probe's own network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl HealthState {
    pub fn is_healthy(self) -> bool {
        self == HealthState::Healthy
    }
}

/// How a single health probe went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    /// The check ran and reported an error
    Failed,
    /// The check could not run at all
    Fatal,
}

impl ProbeOutcome {
    fn from_run(outcome: &Result<CheckResult, CheckError>) -> Self {
        match outcome {
            Ok(result) if result.is_success() => ProbeOutcome::Reachable,
            Ok(_) => ProbeOutcome::Failed,
            Err(_) => ProbeOutcome::Fatal,
        }
    }
}

/// Sum of penalties. A fatal outcome counts as if every host had failed.
pub fn score(outcomes: &[ProbeOutcome]) -> usize {
    let host_count = outcomes.len();
    outcomes
        .iter()
        .map(|outcome| match outcome {
            ProbeOutcome::Reachable => 0,
            ProbeOutcome::Failed => 1,
            ProbeOutcome::Fatal => host_count,
        })
        .sum()
}

/// Unhealthy when the score is strictly above half the host count.
///
/// The half uses integer division: with 4 hosts, 2 failures stay healthy.
pub fn classify(score: usize, host_count: usize) -> HealthState {
    if score > host_count / 2 { HealthState::Unhealthy } else { HealthState::Healthy }
}

/// Receiver of health transitions
pub trait HealthGate: Send + Sync {
    fn set_health(&self, state: HealthState);
}

/// Health check against one well-known host
pub struct HealthProbe {
    pub host: String,
    pub check: Arc<dyn Check>,
}

impl HealthProbe {
    /// Build the ping check used for `host`
    pub fn ping(host: &str, timeout: Duration, factory: &dyn CheckFactory) -> Result<Self, CheckError> {
        let mut settings = serde_json::Map::new();
        settings.insert("hostname".into(), host.into());
        settings.insert("timeout".into(), timeout.as_secs_f64().into());

        let definition = CheckDefinition {
            id: 0,
            slug: format!("health-{host}"),
            check_type: CheckType::Ping,
            frequency: 1,
            settings,
            enabled: true,
            updated: None,
        };

        Ok(Self { host: host.to_string(), check: factory.build(&definition)? })
    }
}

/// Periodic evaluator with hysteresis
pub struct HealthMonitor {
    probes: Vec<HealthProbe>,
    last_state: HealthState,
    metrics: Arc<dyn MetricsSink>,
}

impl HealthMonitor {
    /// The monitor starts out Unhealthy, so the first Healthy evaluation
    /// resumes the checks.
    pub fn new(probes: Vec<HealthProbe>, metrics: Arc<dyn MetricsSink>) -> Self {
        metrics.set_healthy(false);
        Self { probes, last_state: HealthState::Unhealthy, metrics }
    }

    pub fn last_state(&self) -> HealthState {
        self.last_state
    }

    /// Run every probe concurrently and classify the outcome
    pub async fn evaluate(&self) -> HealthState {
        let outcomes = join_all(self.probes.iter().map(|probe| async move {
            let outcome = probe.check.run().await;
            match &outcome {
                Ok(result) if result.is_success() => debug!(host = %probe.host, "health check completed"),
                Ok(result) => warn!(host = %probe.host, error = result.error_msg(), "health check failed"),
                Err(e) => warn!(host = %probe.host, error = %e, "health check could not run"),
            }
            ProbeOutcome::from_run(&outcome)
        }))
        .await;

        let score = score(&outcomes);
        debug!(score, hosts = outcomes.len(), "health evaluated");
        classify(score, outcomes.len())
    }

    /// Record `state`; returns it only when it differs from the last one
    pub fn observe(&mut self, state: HealthState) -> Option<HealthState> {
        if state == self.last_state {
            return None;
        }
        self.last_state = state;
        Some(state)
    }

    /// One evaluation, forwarding transitions to `gate`
    pub async fn tick(&mut self, gate: &dyn HealthGate) {
        let state = self.evaluate().await;
        if let Some(transition) = self.observe(state) {
            match transition {
                HealthState::Unhealthy => {
                    warn!("This probe is in an unhealthy state. Stopping execution of checks.")
                }
                HealthState::Healthy => {
                    info!("This probe is now healthy again. Resuming execution of checks.")
                }
            }
            gate.set_health(transition);
            self.metrics.set_healthy(transition.is_healthy());
        }
    }

    /// Evaluate every `every` until `cancel` fires or the gate is gone
    pub async fn run<G: HealthGate>(mut self, gate: Weak<G>, every: Duration, cancel: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(gate) = gate.upgrade() else {
                break;
            };
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = self.tick(gate.as_ref()) => {}
            }
        }
        debug!("health monitor stopped");
    }
}
