use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, warn};
use url::Url;

use super::ControllerError;
use super::events::{ControllerEvent, ReadyPayload};
use crate::monitoring::CheckDefinition;

const EVENT_BUFFER: usize = 64;

/// A way of reaching the controller.
///
/// A successful `connect` opens a session; the session ends when the returned
/// receiver yields `None`.
#[async_trait]
pub trait ControllerTransport: Send + Sync {
    async fn connect(&self, session: Option<&str>) -> Result<mpsc::Receiver<ControllerEvent>, ControllerError>;
}

/// Answer of the checks endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChecksResponse {
    probe_id: i64,
    session_id: String,
    checks: Vec<CheckDefinition>,
}

/// Polls `{server_url}/api/v1/probes/checks`, each answer becoming a refresh
pub struct HttpPollTransport {
    client: reqwest::Client,
    checks_url: Url,
    api_key: String,
    name: String,
    version: String,
    poll_interval: Duration,
}

impl HttpPollTransport {
    pub fn new(
        server_url: &Url,
        api_key: impl Into<String>,
        name: impl Into<String>,
        poll_interval: Duration,
    ) -> Result<Self, ControllerError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?,
            checks_url: server_url.join("api/v1/probes/checks")?,
            api_key: api_key.into(),
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            poll_interval,
        })
    }

    fn request_url(&self, session: Option<&str>) -> Url {
        let mut url = self.checks_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("name", &self.name).append_pair("version", &self.version);
            if let Some(session) = session {
                query.append_pair("lastSession", session);
            }
        }
        url
    }

    async fn poll(client: &reqwest::Client, url: Url, api_key: &str) -> Result<ChecksResponse, ControllerError> {
        let response = client.get(url).bearer_auth(api_key).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Rejected(status));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ControllerTransport for HttpPollTransport {
    async fn connect(&self, session: Option<&str>) -> Result<mpsc::Receiver<ControllerEvent>, ControllerError> {
        let first = Self::poll(&self.client, self.request_url(session), &self.api_key).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let ready = ReadyPayload { probe_id: first.probe_id, session_id: first.session_id.clone() };
        // Fresh channel with room for both
        let _ = tx.try_send(ControllerEvent::Ready(ready));
        let _ = tx.try_send(ControllerEvent::Refresh(first.checks));

        let client = self.client.clone();
        let url = self.request_url(Some(&first.session_id));
        let api_key = self.api_key.clone();
        let every = self.poll_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                match Self::poll(&client, url.clone(), &api_key).await {
                    Ok(response) => {
                        if tx.send(ControllerEvent::Refresh(response.checks)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "polling the controller failed");
                        break;
                    }
                }
            }
            debug!("controller poll session ended");
        });

        Ok(rx)
    }
}
