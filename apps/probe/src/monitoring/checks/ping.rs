use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::trace;

use super::settings::{self, Settings, millis};
use super::{Check, CheckError};
use crate::monitoring::types::CheckResult;

const DEFAULT_PORT: u16 = 80;
const DEFAULT_COUNT: u16 = 5;
const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

/// Settings of a reachability probe
#[derive(Debug, Clone, PartialEq)]
pub struct PingSettings {
    pub hostname: String,
    pub port: u16,
    pub count: u16,
    pub timeout: Duration,
}

impl PingSettings {
    pub fn new(hostname: impl Into<String>, timeout: Duration) -> Self {
        Self { hostname: hostname.into(), port: DEFAULT_PORT, count: DEFAULT_COUNT, timeout }
    }

    pub(super) fn parse(raw: &Settings) -> Result<Self, CheckError> {
        let hostname = settings::required_str(raw, "hostname")?;
        let port = settings::optional_u16(raw, "port")?.unwrap_or(DEFAULT_PORT);
        let count = settings::optional_u16(raw, "count")?.unwrap_or(DEFAULT_COUNT);
        if count > 20 {
            return Err(CheckError::invalid("count", "at most 20 attempts are allowed"));
        }
        let timeout = settings::timeout(raw, DEFAULT_TIMEOUT_SECS)?;
        Ok(Self { hostname, port, count, timeout })
    }
}

/// Unprivileged reachability probe.
///
/// Sends `count` TCP connection attempts instead of ICMP echoes. Any answer
/// from the host counts as a reply, a refused connection included; only
/// timeouts and unreachable errors count as loss.
pub struct PingCheck {
    settings: PingSettings,
}

impl PingCheck {
    pub fn new(settings: PingSettings) -> Self {
        Self { settings }
    }

    async fn resolve(&self) -> io::Result<SocketAddr> {
        lookup_host((self.settings.hostname.as_str(), self.settings.port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses found"))
    }

    async fn attempt(&self, addr: SocketAddr) -> Result<Option<Duration>, CheckError> {
        let start = Instant::now();
        match timeout(self.settings.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => Ok(Some(start.elapsed())),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(Some(start.elapsed())),
            Ok(Err(e)) if is_local_failure(&e) => Err(CheckError::Execution(e.to_string())),
            Ok(Err(e)) => {
                trace!(host = %self.settings.hostname, error = %e, "ping attempt lost");
                Ok(None)
            }
            Err(_) => Ok(None),
        }
    }
}

/// Errors that say nothing about the target, only about this machine
fn is_local_failure(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::Unsupported
            | io::ErrorKind::OutOfMemory
    )
}

#[async_trait::async_trait]
impl Check for PingCheck {
    async fn run(&self) -> Result<CheckResult, CheckError> {
        let addr = match self.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                return Ok(CheckResult::failure(format!(
                    "failed to resolve {}: {e}",
                    self.settings.hostname
                )));
            }
        };

        let mut replies = Vec::with_capacity(self.settings.count as usize);
        for _ in 0..self.settings.count {
            if let Some(rtt) = self.attempt(addr).await? {
                replies.push(millis(rtt));
            }
        }

        Ok(summarize(self.settings.count, replies))
    }
}

fn summarize(sent: u16, mut replies: Vec<f64>) -> CheckResult {
    let sent = f64::from(sent.max(1));
    let loss = (sent - replies.len() as f64) / sent * 100.0;

    if replies.is_empty() {
        return CheckResult::failure("100% packet loss").with_metric("loss", 100.0);
    }

    replies.sort_by(f64::total_cmp);
    let count = replies.len() as f64;
    let avg = replies.iter().sum::<f64>() / count;
    let mdev = (replies.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / count).sqrt();
    let median = if replies.len() % 2 == 0 {
        (replies[replies.len() / 2 - 1] + replies[replies.len() / 2]) / 2.0
    } else {
        replies[replies.len() / 2]
    };

    CheckResult::success()
        .with_metric("loss", loss)
        .with_metric("min", replies[0])
        .with_metric("max", replies[replies.len() - 1])
        .with_metric("avg", avg)
        .with_metric("median", median)
        .with_metric("mdev", mdev)
}
