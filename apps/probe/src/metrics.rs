//! Metrics exported by the probe.
//!
//! Components receive a [`MetricsSink`] at construction instead of reaching
//! for a process wide registry.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Receiver of the probe's own measurements
pub trait MetricsSink: Send + Sync {
    /// 1 while checks are allowed to run, 0 otherwise
    fn set_healthy(&self, healthy: bool);

    fn set_scheduled_checks(&self, _count: usize) {}

    fn record_delivery(&self, _delivered: bool) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn set_healthy(&self, _healthy: bool) {}
}

/// Prometheus backed metrics, served on `/metrics`
pub struct PrometheusMetrics {
    registry: Registry,
    scheduler_healthy: IntGauge,
    scheduled_checks: IntGauge,
    deliveries: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("uppe_probe".into()), None)?;

        let scheduler_healthy =
            IntGauge::new("scheduler_healthy", "Whether the probe considers its own network healthy")?;
        let scheduled_checks = IntGauge::new("scheduled_checks", "Number of checks known to the scheduler")?;
        let deliveries = IntCounterVec::new(
            Opts::new("result_deliveries_total", "Result deliveries to the metrics store by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(scheduler_healthy.clone()))?;
        registry.register(Box::new(scheduled_checks.clone()))?;
        registry.register(Box::new(deliveries.clone()))?;

        Ok(Self { registry, scheduler_healthy, scheduled_checks, deliveries })
    }

    /// Render every metric in the text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn set_healthy(&self, healthy: bool) {
        self.scheduler_healthy.set(i64::from(healthy));
    }

    fn set_scheduled_checks(&self, count: usize) {
        self.scheduled_checks.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    fn record_delivery(&self, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.deliveries.with_label_values(&[outcome]).inc();
    }
}
