#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use uppe_probe::app::Probe;
use uppe_probe::config::{Config, Overrides};

/// Runs controller-assigned checks behind a self-health gate
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file, created with defaults when missing
    #[arg(short, long, env = "UPPE_PROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Name this probe registers under
    #[arg(long, env = "UPPE_PROBE_NAME")]
    name: Option<String>,

    #[arg(long, env = "UPPE_PROBE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base url of the controller
    #[arg(long, env = "UPPE_PROBE_SERVER_URL")]
    server_url: Option<String>,

    /// Base url of the metrics store
    #[arg(long, env = "UPPE_PROBE_TSDB_URL")]
    tsdb_url: Option<String>,

    /// Deliveries to the metrics store in flight at once
    #[arg(long, env = "UPPE_PROBE_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Comma separated hosts pinged to judge this probe's network health
    #[arg(long, env = "UPPE_PROBE_HEALTH_HOSTS", value_delimiter = ',')]
    health_hosts: Option<Vec<String>>,

    /// Address of the readiness, liveness and metrics endpoints
    #[arg(long, env = "UPPE_PROBE_HEALTHZ_LISTEN_ADDR")]
    healthz_listen_addr: Option<String>,

    /// trace, debug, info, warn, error or off
    #[arg(long, env = "UPPE_PROBE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            name: self.name.clone(),
            api_key: self.api_key.clone(),
            server_url: self.server_url.clone(),
            tsdb_url: self.tsdb_url.clone(),
            concurrency: self.concurrency,
            health_hosts: self.health_hosts.clone(),
            healthz_listen_addr: self.healthz_listen_addr.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_ref()).context("loading configuration")?;
    config.apply(cli.overrides());
    let config = config.validated()?;

    logger::init(config.log_level()?, config.log_format()?);
    info!("\n{config}");

    let shutdown = CancellationToken::new();
    let probe = Probe::start(&config, shutdown.clone()).await.context("starting probe")?;

    tokio::select! {
        result = terminated() => {
            result.context("listening for signals")?;
            info!("interrupt");
        }
        () = shutdown.cancelled() => info!("controller requested shutdown"),
    }

    probe.stop().await;
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM
async fn terminated() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
