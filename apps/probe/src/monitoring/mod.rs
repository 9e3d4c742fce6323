/// Monitoring engine module - schedules and executes checks
///
/// This module is responsible for:
/// - Building checks from controller definitions
/// - Running each check on its own interval
/// - Gating execution behind the probe's own network health
/// - Handing results to the publisher
pub mod checks;
pub mod definition;
pub mod health;
pub mod instance;
pub mod scheduler;
pub mod sink;
pub mod types;

#[cfg(test)]
mod tests;

pub use checks::{Check, CheckError, CheckFactory, ProbeCheckFactory};
pub use definition::{CheckDefinition, CheckId, CheckType};
pub use health::{HealthMonitor, HealthState};
pub use scheduler::{Scheduler, SchedulerError};
pub use sink::ResultSink;
pub use types::{CheckResult, ResultRecord};
