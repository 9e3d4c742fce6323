use serde::{Deserialize, Serialize};

use crate::monitoring::CheckDefinition;

/// Sent by the controller once it accepted this probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyPayload {
    pub probe_id: i64,
    /// Handed back on reconnect so the controller can resume the session
    pub session_id: String,
}

/// Everything the controller can tell a probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum ControllerEvent {
    /// Full list of checks assigned to this probe
    Refresh(Vec<CheckDefinition>),
    Created(CheckDefinition),
    Updated(CheckDefinition),
    Removed(CheckDefinition),
    Ready(ReadyPayload),
    /// The controller refuses to serve this probe
    Error(String),
}

impl ControllerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerEvent::Refresh(_) => "refresh",
            ControllerEvent::Created(_) => "created",
            ControllerEvent::Updated(_) => "updated",
            ControllerEvent::Removed(_) => "removed",
            ControllerEvent::Ready(_) => "ready",
            ControllerEvent::Error(_) => "error",
        }
    }
}
