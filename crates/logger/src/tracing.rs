use std::env::var;
use std::str::FromStr;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected compact or json")),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` directives take precedence over `level`. When `format` is `None`
/// the `RUST_LOG_FORMAT` environment variable decides, defaulting to compact.
pub fn init(level: LevelFilter, format: Option<LogFormat>) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let format = format.unwrap_or_else(|| {
        var("RUST_LOG_FORMAT")
            .ok()
            .and_then(|raw| {
                raw.parse()
                    .inspect_err(|error| warn!("Ignoring RUST_LOG_FORMAT: {error}"))
                    .ok()
            })
            .unwrap_or_default()
    });

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        warn!("Tracing subscriber already installed, keeping the existing one");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_log_formats() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert_eq!("".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("pretty".parse::<LogFormat>().is_err());
    }

    #[test]
    fn second_init_keeps_the_first_subscriber() {
        init(LevelFilter::DEBUG, Some(LogFormat::Json));
        init(LevelFilter::INFO, Some(LogFormat::Compact));
        tracing::info!("still logging");
    }
}
