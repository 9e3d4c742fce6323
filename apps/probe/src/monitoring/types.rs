use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::definition::{CheckId, CheckType};

/// Status of a single check execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
        }
    }
}

/// Outcome of running a check once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    /// When the execution finished
    pub timestamp: DateTime<Utc>,

    pub status: MonitorStatus,

    /// Named measurements (latencies in milliseconds, counts, sizes)
    pub metrics: BTreeMap<String, f64>,

    /// Why the target is considered down
    pub error_message: Option<String>,
}

impl CheckResult {
    /// A successful execution without measurements yet
    pub fn success() -> Self {
        Self {
            timestamp: Utc::now(),
            status: MonitorStatus::Up,
            metrics: BTreeMap::new(),
            error_message: None,
        }
    }

    /// The check ran but the target did not behave
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: MonitorStatus::Down,
            metrics: BTreeMap::new(),
            error_message: Some(error.into()),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Embedded error message, empty on success
    pub fn error_msg(&self) -> &str {
        self.error_message.as_deref().unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        self.error_msg().is_empty()
    }
}

/// A result labelled with the check it came from, as handed to the publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub check_id: CheckId,
    pub slug: String,
    pub check_type: CheckType,
    #[serde(flatten)]
    pub result: CheckResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_msg_is_empty_on_success() {
        let result = CheckResult::success().with_metric("avg", 12.5);
        assert_eq!(result.error_msg(), "");
        assert!(result.is_success());
        assert_eq!(result.metrics["avg"], 12.5);
    }

    #[test]
    fn failure_carries_message() {
        let result = CheckResult::failure("100% packet loss");
        assert_eq!(result.status, MonitorStatus::Down);
        assert_eq!(result.error_msg(), "100% packet loss");
        assert!(!result.is_success());
    }

    #[test]
    fn record_serializes_flat() {
        let record = ResultRecord {
            check_id: 3,
            slug: "example".into(),
            check_type: CheckType::Dns,
            result: CheckResult::failure("NXDOMAIN"),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["checkId"], 3);
        assert_eq!(json["checkType"], "dns");
        assert_eq!(json["status"], "down");
        assert_eq!(json["errorMessage"], "NXDOMAIN");
    }
}
