//! Connection to the controller that assigns checks to this probe.

mod client;
mod dispatch;
mod events;
mod transport;

use reqwest::StatusCode;
use thiserror::Error;

pub use client::{Backoff, ConnectionState, ControllerClient};
pub use dispatch::EventDispatcher;
pub use events::{ControllerEvent, ReadyPayload};
pub use transport::{ControllerTransport, HttpPollTransport};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid controller url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request to controller failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("controller answered {0}")]
    Rejected(StatusCode),
}
