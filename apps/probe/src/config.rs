use std::str::FromStr;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use logger::LogFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("unable to write {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: io::Error },

    #[error("invalid configuration file: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("unable to serialize configuration: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("no configuration directory, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { key, reason: reason.into() }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: Probe,
    pub controller: Controller,
    pub publisher: Publisher,
    pub health: Health,
    pub healthz: Healthz,
    pub log: Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Probe {
    /// Name this probe registers under, required
    pub name: String,
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Controller {
    pub server_url: String,
    pub poll_interval_secs: u64,
    pub reconnect_initial_secs: u64,
    pub reconnect_max_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Publisher {
    pub tsdb_url: String,
    /// Deliveries in flight at once
    pub concurrency: usize,
    /// Results buffered between the checks and the publisher
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Health {
    pub hosts: Vec<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Healthz {
    pub listen_addr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    pub level: String,
    /// compact or json, `RUST_LOG_FORMAT` decides when unset
    pub format: Option<String>,
}

impl Default for Probe {
    fn default() -> Self {
        Self { name: String::new(), api_key: "not_very_secret_key".into() }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:80/".into(),
            poll_interval_secs: 30,
            reconnect_initial_secs: 2,
            reconnect_max_secs: 60,
        }
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self { tsdb_url: "http://localhost:80/".into(), concurrency: 5, queue_capacity: 1000 }
    }
}

impl Default for Health {
    fn default() -> Self {
        Self {
            hosts: ["google.com", "youtube.com", "facebook.com", "twitter.com", "wikipedia.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            interval_secs: 5,
            timeout_secs: 2,
        }
    }
}

impl Default for Healthz {
    fn default() -> Self {
        Self { listen_addr: "localhost:7180".into() }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self { level: "info".into(), format: None }
    }
}

/// Values given on the command line or through `UPPE_PROBE_*` variables
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub server_url: Option<String>,
    pub tsdb_url: Option<String>,
    pub concurrency: Option<usize>,
    pub health_hosts: Option<Vec<String>>,
    pub healthz_listen_addr: Option<String>,
    pub log_level: Option<String>,
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/uppe/probe.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("uppe/probe.toml"))
}

/// Make `url` a base that relative paths can be joined onto
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Parse an http(s) base url
fn base_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| invalid(key, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(with_trailing_slash(url)),
        other => Err(invalid(key, format!("scheme must be http or https, was {other}"))),
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "(unset)" } else { "********" }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Probe")?;
        write_1(f, "Name", &self.probe.name)?;
        write_1(f, "API Key", &mask(&self.probe.api_key))?;
        write_title_1(f, "Controller")?;
        write_1(f, "Server URL", &self.controller.server_url)?;
        write_1(f, "Poll Interval (s)", &self.controller.poll_interval_secs)?;
        write_1(
            f,
            "Reconnect Backoff (s)",
            &format_args!("{}..{}", self.controller.reconnect_initial_secs, self.controller.reconnect_max_secs),
        )?;
        write_title_1(f, "Publisher")?;
        write_1(f, "TSDB URL", &self.publisher.tsdb_url)?;
        write_1(f, "Concurrency", &self.publisher.concurrency)?;
        write_1(f, "Queue Capacity", &self.publisher.queue_capacity)?;
        write_title_1(f, "Health")?;
        write_1(f, "Hosts", &self.health.hosts.join(","))?;
        write_1(f, "Interval (s)", &self.health.interval_secs)?;
        write_1(f, "Timeout (s)", &self.health.timeout_secs)?;
        write_title_1(f, "Healthz")?;
        write_1(f, "Listen Address", &self.healthz.listen_addr)?;
        write_title_1(f, "Log")?;
        write_1(f, "Level", &self.log.level)?;
        write_1(f, "Format", &self.log.format.as_deref().unwrap_or("(from environment)"))?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/uppe/probe.toml
    ///  or the specified path, with the name probe.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;
        let write_failed = |source| ConfigError::WriteFailed { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        fs::write(path, config_str).map_err(write_failed)
    }

    /// Layer command line and environment values over the file
    pub fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            name,
            api_key,
            server_url,
            tsdb_url,
            concurrency,
            health_hosts,
            healthz_listen_addr,
            log_level,
        } = overrides;

        if let Some(name) = name {
            self.probe.name = name;
        }
        if let Some(api_key) = api_key {
            self.probe.api_key = api_key;
        }
        if let Some(server_url) = server_url {
            self.controller.server_url = server_url;
        }
        if let Some(tsdb_url) = tsdb_url {
            self.publisher.tsdb_url = tsdb_url;
        }
        if let Some(concurrency) = concurrency {
            self.publisher.concurrency = concurrency;
        }
        if let Some(hosts) = health_hosts {
            self.health.hosts = hosts;
        }
        if let Some(listen_addr) = healthz_listen_addr {
            self.healthz.listen_addr = listen_addr;
        }
        if let Some(level) = log_level {
            self.log.level = level;
        }
    }

    /// Normalize and check every value
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.probe.name = self.probe.name.trim().to_string();
        if self.probe.name.is_empty() {
            return Err(invalid("probe.name", "name must be set"));
        }

        self.controller.server_url = self.controller.server_url()?.into();
        self.publisher.tsdb_url = self.publisher.tsdb_url()?.into();

        if self.controller.poll_interval_secs == 0 {
            return Err(invalid("controller.poll_interval_secs", "must be at least 1"));
        }
        if self.controller.reconnect_initial_secs == 0 {
            return Err(invalid("controller.reconnect_initial_secs", "must be at least 1"));
        }
        if self.controller.reconnect_max_secs < self.controller.reconnect_initial_secs {
            return Err(invalid("controller.reconnect_max_secs", "must not be below reconnect_initial_secs"));
        }
        if self.publisher.concurrency == 0 {
            return Err(invalid("publisher.concurrency", "must be at least 1"));
        }
        if self.publisher.queue_capacity == 0 {
            return Err(invalid("publisher.queue_capacity", "must be at least 1"));
        }

        self.health.hosts = self
            .health
            .hosts
            .iter()
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .collect();
        if self.health.interval_secs == 0 {
            return Err(invalid("health.interval_secs", "must be at least 1"));
        }
        if !(1..=10).contains(&self.health.timeout_secs) {
            return Err(invalid("health.timeout_secs", "must be between 1 and 10"));
        }

        self.log_level()?;
        self.log_format()?;
        Ok(self)
    }

    pub fn log_level(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log.level).map_err(|e| invalid("log.level", e.to_string()))
    }

    pub fn log_format(&self) -> Result<Option<LogFormat>, ConfigError> {
        self.log.format.as_deref().map(LogFormat::from_str).transpose().map_err(|e| invalid("log.format", e))
    }
}

impl Controller {
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        base_url("controller.server_url", &self.server_url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_secs)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }
}

impl Publisher {
    pub fn tsdb_url(&self) -> Result<Url, ConfigError> {
        base_url("publisher.tsdb_url", &self.tsdb_url)
    }
}

impl Health {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn named(name: &str) -> Config {
        let mut config = Config::default();
        config.probe.name = name.into();
        config
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/probe");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("nested/probe.toml").exists());

        // Reading it back gives the same values.
        assert_eq!(Config::from_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        fs::write(&path, "[probe]\nname = \"ams-1\"\n\n[health]\nhosts = [\"example.com\"]\n").unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.probe.name, "ams-1");
        assert_eq!(config.health.hosts, vec!["example.com"]);
        assert_eq!(config.health.timeout_secs, 2);
        assert_eq!(config.publisher.concurrency, 5);
    }

    #[test]
    fn broken_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        fs::write(&path, "[probe\nname = ").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn overrides_win_over_the_file() {
        let mut config = named("from-file");
        config.apply(Overrides {
            name: Some("from-cli".into()),
            concurrency: Some(12),
            health_hosts: Some(vec!["one.example".into()]),
            ..Default::default()
        });

        assert_eq!(config.probe.name, "from-cli");
        assert_eq!(config.publisher.concurrency, 12);
        assert_eq!(config.health.hosts, vec!["one.example"]);
        assert_eq!(config.healthz.listen_addr, "localhost:7180");
    }

    #[test]
    fn name_is_required() {
        let err = Config::default().validated().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "probe.name", .. }));
    }

    #[test]
    fn validation_normalizes_urls_and_hosts() {
        let mut config = named("ams-1");
        config.publisher.tsdb_url = "https://tsdb.example/api".into();
        config.health.hosts = vec![" example.com ".into(), String::new()];

        let config = config.validated().unwrap();
        assert_eq!(config.publisher.tsdb_url, "https://tsdb.example/api/");
        assert_eq!(config.publisher.tsdb_url().unwrap().join("metrics").unwrap().path(), "/api/metrics");
        assert_eq!(config.health.hosts, vec!["example.com"]);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = named("ams-1");
        config.controller.server_url = "ws://controller.example/".into();
        assert!(matches!(config.validated(), Err(ConfigError::Invalid { key: "controller.server_url", .. })));

        let mut config = named("ams-1");
        config.health.timeout_secs = 30;
        assert!(matches!(config.validated(), Err(ConfigError::Invalid { key: "health.timeout_secs", .. })));

        let mut config = named("ams-1");
        config.log.format = Some("pretty".into());
        assert!(matches!(config.validated(), Err(ConfigError::Invalid { key: "log.format", .. })));

        let mut config = named("ams-1");
        config.log.level = "loud".into();
        assert!(matches!(config.validated(), Err(ConfigError::Invalid { key: "log.level", .. })));
    }

    #[test]
    fn display_masks_the_api_key() {
        let mut config = named("ams-1");
        config.probe.api_key = "hunter2".into();

        let text = config.to_string();
        assert!(text.contains("Name: ams-1"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains("********"));
    }
}
