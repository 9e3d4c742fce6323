use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use super::checks::CheckError;

/// Identity of a check as assigned by the controller
pub type CheckId = i64;

/// Kind of probe a definition asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Ping,
    Dns,
    Http,
    Https,
    /// Any tag this probe does not know how to run
    #[serde(other)]
    Unsupported,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckType::Ping => write!(f, "ping"),
            CheckType::Dns => write!(f, "dns"),
            CheckType::Http => write!(f, "http"),
            CheckType::Https => write!(f, "https"),
            CheckType::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Longest accepted interval between two executions, one day
pub const MAX_FREQUENCY_SECS: u64 = 86_400;

fn default_enabled() -> bool {
    true
}

/// A check as the controller describes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckDefinition {
    pub id: CheckId,

    /// Display slug, only used to label results
    #[serde(default)]
    pub slug: String,

    #[serde(rename = "type")]
    pub check_type: CheckType,

    /// Seconds between two executions
    pub frequency: u64,

    /// Type specific settings, parsed into typed settings when the check is built
    #[serde(default)]
    pub settings: Map<String, Value>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Last modification time on the controller side
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl CheckDefinition {
    /// Execution interval of this check
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.frequency.clamp(1, MAX_FREQUENCY_SECS))
    }

    /// Delay before the first execution, spreading checks with the same
    /// frequency across the interval.
    pub fn start_offset(&self) -> Duration {
        let frequency = i64::try_from(self.interval().as_secs()).unwrap_or(1);
        Duration::from_secs(self.id.rem_euclid(frequency).unsigned_abs())
    }

    /// Whether both definitions would execute the same way.
    ///
    /// Slug and modification time are labels and do not count.
    pub fn same_behavior(&self, other: &CheckDefinition) -> bool {
        self.check_type == other.check_type
            && self.frequency == other.frequency
            && self.enabled == other.enabled
            && self.settings == other.settings
    }

    /// True when this definition is strictly older than `accepted`.
    /// Definitions without timestamps are never considered stale.
    pub fn is_older_than(&self, accepted: Option<DateTime<Utc>>) -> bool {
        matches!((self.updated, accepted), (Some(incoming), Some(accepted)) if incoming < accepted)
    }

    /// Checks that do not depend on the check type
    pub fn validate(&self) -> Result<(), CheckError> {
        if self.frequency == 0 {
            return Err(CheckError::InvalidSetting {
                field: "frequency",
                reason: "must be at least one second".to_string(),
            });
        }
        if self.frequency > MAX_FREQUENCY_SECS {
            return Err(CheckError::InvalidSetting {
                field: "frequency",
                reason: format!("must be at most {MAX_FREQUENCY_SECS} seconds"),
            });
        }
        Ok(())
    }
}
