use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

use super::settings::{self, Settings, millis};
use super::{Check, CheckError};
use crate::monitoring::types::CheckResult;

const DEFAULT_TIMEOUT_SECS: f64 = 5.0;

const SUPPORTED_RECORDS: [RecordType; 9] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::CNAME,
    RecordType::MX,
    RecordType::NS,
    RecordType::TXT,
    RecordType::SOA,
    RecordType::PTR,
    RecordType::SRV,
];

/// Settings of a DNS lookup check
#[derive(Debug, Clone)]
pub struct DnsSettings {
    pub name: String,
    pub record_type: RecordType,
    /// Explicit name server, the system resolver is used when absent
    pub server: Option<SocketAddr>,
    pub protocol: Protocol,
    pub timeout: Duration,
}

impl DnsSettings {
    pub(super) fn parse(raw: &Settings) -> Result<Self, CheckError> {
        let name = settings::required_str(raw, "name")?;

        let record_type = match settings::optional_str(raw, "type")? {
            None => RecordType::A,
            Some(raw_type) => RecordType::from_str(&raw_type.to_ascii_uppercase())
                .ok()
                .filter(|record_type| SUPPORTED_RECORDS.contains(record_type))
                .ok_or_else(|| CheckError::invalid("type", format!("'{raw_type}' is not a supported record type")))?,
        };

        let port = settings::optional_u16(raw, "port")?.unwrap_or(53);
        let server = settings::optional_str(raw, "server")?
            .map(|server| {
                server
                    .parse::<IpAddr>()
                    .map(|ip| SocketAddr::new(ip, port))
                    .map_err(|_| CheckError::invalid("server", format!("'{server}' is not an IP address")))
            })
            .transpose()?;

        let protocol = match settings::optional_str(raw, "protocol")?.as_deref() {
            None | Some("udp") => Protocol::Udp,
            Some("tcp") => Protocol::Tcp,
            Some(other) => return Err(CheckError::invalid("protocol", format!("'{other}' is not udp or tcp"))),
        };

        Ok(Self {
            name,
            record_type,
            server,
            protocol,
            timeout: settings::timeout(raw, DEFAULT_TIMEOUT_SECS)?,
        })
    }
}

/// DNS lookup check
pub struct DnsCheck {
    resolver: TokioResolver,
    settings: DnsSettings,
}

impl DnsCheck {
    pub fn new(settings: DnsSettings) -> Result<Self, CheckError> {
        let mut builder = match settings.server {
            Some(addr) => {
                let config =
                    ResolverConfig::from_parts(None, vec![], vec![NameServerConfig::new(addr, settings.protocol)]);
                Resolver::builder_with_config(config, TokioConnectionProvider::default())
            }
            None => Resolver::builder_tokio()
                .map_err(|e| CheckError::Execution(format!("unable to read system resolver config: {e}")))?,
        };

        let opts: &mut ResolverOpts = builder.options_mut();
        opts.timeout = settings.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;

        Ok(Self { resolver: builder.build(), settings })
    }
}

#[async_trait::async_trait]
impl Check for DnsCheck {
    async fn run(&self) -> Result<CheckResult, CheckError> {
        let start = Instant::now();
        let lookup = self.resolver.lookup(self.settings.name.as_str(), self.settings.record_type).await;
        let elapsed = millis(start.elapsed());

        match lookup {
            Ok(lookup) => {
                let records = lookup.records();
                if records.is_empty() {
                    return Ok(CheckResult::failure("no answers").with_metric("time", elapsed));
                }
                let ttl = records.iter().map(|record| record.ttl()).min().unwrap_or_default();
                Ok(CheckResult::success()
                    .with_metric("time", elapsed)
                    .with_metric("ttl", f64::from(ttl))
                    .with_metric("answers", records.len() as f64))
            }
            Err(e) => {
                debug!(name = %self.settings.name, error = %e, "dns lookup failed");
                Ok(CheckResult::failure(e.to_string()).with_metric("time", elapsed))
            }
        }
    }
}
