//! Delivery of check results to the metrics store.

use reqwest::StatusCode;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use url::Url;

use crate::metrics::MetricsSink;
use crate::monitoring::ResultRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid metrics store url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metrics store answered {0}")]
    Rejected(StatusCode),
}

/// Body of one delivery
#[derive(Serialize)]
struct Delivery<'a> {
    probe: &'a str,
    #[serde(flatten)]
    record: &'a ResultRecord,
}

/// Posts results to `{tsdb_url}metrics`, a bounded number at a time
pub struct Publisher {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    probe: String,
    limit: Arc<Semaphore>,
    metrics: Arc<dyn MetricsSink>,
}

impl Publisher {
    pub fn new(
        tsdb_url: &Url,
        api_key: impl Into<String>,
        probe: impl Into<String>,
        concurrency: usize,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, PublishError> {
        let mut base = tsdb_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }

        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: base.join("metrics")?,
            api_key: api_key.into(),
            probe: probe.into(),
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
            metrics,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Deliver everything received on `results` until every sender is gone.
    ///
    /// The returned task finishes after the last in-flight delivery.
    pub fn spawn(self, results: mpsc::Receiver<ResultRecord>) -> JoinHandle<()> {
        tokio::spawn(Arc::new(self).run(results))
    }

    async fn run(self: Arc<Self>, mut results: mpsc::Receiver<ResultRecord>) {
        let mut in_flight = JoinSet::new();

        while let Some(record) = results.recv().await {
            let Ok(permit) = Arc::clone(&self.limit).acquire_owned().await else {
                break;
            };
            let publisher = Arc::clone(&self);
            in_flight.spawn(async move {
                let _permit = permit;
                publisher.deliver(&record).await;
            });
            while in_flight.try_join_next().is_some() {}
        }

        info!(pending = in_flight.len(), "result channel closed, waiting for deliveries");
        while in_flight.join_next().await.is_some() {}
        info!("publisher stopped");
    }

    async fn deliver(&self, record: &ResultRecord) {
        match self.send(record).await {
            Ok(()) => {
                debug!(check_id = record.check_id, slug = %record.slug, "result delivered");
                self.metrics.record_delivery(true);
            }
            Err(e) => {
                warn!(check_id = record.check_id, slug = %record.slug, error = %e, "failed to deliver result");
                self.metrics.record_delivery(false);
            }
        }
    }

    async fn send(&self, record: &ResultRecord) -> Result<(), PublishError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&Delivery { probe: &self.probe, record })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() { Ok(()) } else { Err(PublishError::Rejected(status)) }
    }
}
