//! Concrete probes and the capability the scheduler runs them through.
//!
//! A check is built once from a [`CheckDefinition`] and then executed
//! repeatedly. Building validates the settings; a bad field is reported with
//! its name and the check is never scheduled.

mod dns;
mod http;
mod ping;
mod settings;

pub use dns::{DnsCheck, DnsSettings};
pub use http::{HttpCheck, HttpSettings};
pub use ping::{PingCheck, PingSettings};

use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use super::definition::{CheckDefinition, CheckType};
use super::types::CheckResult;

/// Errors raised while building or running a check
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("unsupported check type '{0}'")]
    UnsupportedType(String),

    /// The check could not be executed at all
    #[error("check execution failed: {0}")]
    Execution(String),
}

impl CheckError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting { field, reason: reason.into() }
    }
}

/// A probe that can be run on demand.
///
/// `Ok` results may still describe a failing target through
/// [`CheckResult::error_msg`]; `Err` means the probe itself could not run.
#[async_trait::async_trait]
pub trait Check: Send + Sync {
    async fn run(&self) -> Result<CheckResult, CheckError>;
}

/// Builds checks from controller definitions
pub trait CheckFactory: Send + Sync {
    fn build(&self, definition: &CheckDefinition) -> Result<Arc<dyn Check>, CheckError>;
}

/// Typed settings, one variant per check kind
#[derive(Debug, Clone)]
pub enum CheckSettings {
    Ping(PingSettings),
    Dns(DnsSettings),
    Http(HttpSettings),
}

impl CheckSettings {
    pub fn parse(check_type: CheckType, settings: &Map<String, Value>) -> Result<Self, CheckError> {
        match check_type {
            CheckType::Ping => PingSettings::parse(settings).map(Self::Ping),
            CheckType::Dns => DnsSettings::parse(settings).map(Self::Dns),
            CheckType::Http => HttpSettings::parse(settings, false).map(Self::Http),
            CheckType::Https => HttpSettings::parse(settings, true).map(Self::Http),
            CheckType::Unsupported => Err(CheckError::UnsupportedType(check_type.to_string())),
        }
    }
}

/// Factory for the probes shipped with this agent
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbeCheckFactory;

impl CheckFactory for ProbeCheckFactory {
    fn build(&self, definition: &CheckDefinition) -> Result<Arc<dyn Check>, CheckError> {
        definition.validate()?;

        let check: Arc<dyn Check> = match CheckSettings::parse(definition.check_type, &definition.settings)? {
            CheckSettings::Ping(settings) => Arc::new(PingCheck::new(settings)),
            CheckSettings::Dns(settings) => Arc::new(DnsCheck::new(settings)?),
            CheckSettings::Http(settings) => Arc::new(HttpCheck::new(settings)?),
        };
        Ok(check)
    }
}
