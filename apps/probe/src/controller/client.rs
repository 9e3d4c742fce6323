use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::events::ControllerEvent;
use super::transport::ControllerTransport;

/// Where the client is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Doubling delay between reconnect attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max: max.max(initial), current: initial }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Keeps a session with the controller open and forwards its events.
///
/// Reconnects with exponential backoff after every failed attempt or ended
/// session, presenting the last session id it was given.
pub struct ControllerClient {
    transport: Arc<dyn ControllerTransport>,
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
    session: Option<String>,
}

impl ControllerClient {
    pub fn new(transport: Arc<dyn ControllerTransport>, backoff: Backoff) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { transport, backoff, state, session: None }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` fires or nobody listens to `events` anymore
    pub async fn run(mut self, events: mpsc::Sender<ControllerEvent>, shutdown: CancellationToken) {
        'sessions: loop {
            self.state.send_replace(ConnectionState::Connecting);
            let connected = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                connected = self.transport.connect(self.session.as_deref()) => connected,
            };

            match connected {
                Ok(mut session) => {
                    self.state.send_replace(ConnectionState::Connected);
                    self.backoff.reset();
                    info!("connected to controller");

                    loop {
                        let event = tokio::select! {
                            biased;
                            () = shutdown.cancelled() => break 'sessions,
                            event = session.recv() => event,
                        };
                        let Some(event) = event else {
                            break;
                        };
                        if let ControllerEvent::Ready(ready) = &event {
                            info!(probe_id = ready.probe_id, "server sent ready event");
                            self.session = Some(ready.session_id.clone());
                        }
                        if events.send(event).await.is_err() {
                            break 'sessions;
                        }
                    }
                    self.state.send_replace(ConnectionState::Disconnected);
                    error!("Disconnected from remote server.");
                }
                Err(e) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    warn!(error = %e, "unable to connect to controller");
                }
            }

            let delay = self.backoff.next_delay();
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("controller client stopped");
    }
}
