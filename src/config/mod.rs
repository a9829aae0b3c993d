//! Configuration management for the terminwatch monitor
//!
//! Process configuration (endpoints, timeouts, paths) comes from a TOML file
//! and/or environment variables. The probed portal's page structure is *not*
//! configured here; that lives in the hot-reloadable site profile
//! ([`crate::site`]), so markup drift is absorbed without touching process
//! config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Browser session configuration
    pub browser: BrowserConfig,

    /// Probe orchestration configuration
    pub probe: ProbeConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Database configuration
    pub storage: StorageConfig,

    /// Notification configuration
    pub notify: NotifyConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Path to the site profile TOML; built-in defaults when absent
    pub site_profile: Option<PathBuf>,
}

/// Browser-session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// WebDriver endpoint URL (the browser process itself is external)
    pub webdriver_url: String,

    /// Run the browser headless
    pub headless: bool,

    /// Per-wait navigation timeout in seconds
    pub nav_timeout_secs: u64,

    /// Page-quiescence timeout in seconds
    pub quiesce_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: String::from("http://localhost:4444"),
            headless: true,
            nav_timeout_secs: 10,
            quiesce_timeout_secs: 15,
        }
    }
}

impl BrowserConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.nav_timeout_secs)
    }

    pub fn quiesce_timeout(&self) -> Duration {
        Duration::from_secs(self.quiesce_timeout_secs)
    }
}

/// Probe orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Aggregate timeout for one whole probe attempt, in seconds
    pub attempt_timeout_secs: u64,

    /// Directory for diagnostic screenshots
    pub screenshot_dir: PathBuf,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 120,
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

impl ProbeConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick period in seconds
    pub tick_secs: u64,

    /// Minimum spacing between probes against the external portal, in seconds
    pub probe_spacing_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: 300,
            probe_spacing_secs: 2,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn probe_spacing(&self) -> Duration {
        Duration::from_secs(self.probe_spacing_secs)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/terminwatch.db"),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook endpoint for slot notifications; logging-only when absent
    pub webhook_url: Option<String>,

    /// Maximum number of slots listed per message
    pub max_listed_slots: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_listed_slots: 15,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional path, falling back to environment defaults
    pub fn load_or_env(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Self::from_env(),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("TERMINWATCH_WEBDRIVER_URL") {
            self.browser.webdriver_url = url;
        }
        if let Some(v) = env_parse::<u64>("TERMINWATCH_NAV_TIMEOUT") {
            self.browser.nav_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("TERMINWATCH_ATTEMPT_TIMEOUT") {
            self.probe.attempt_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("TERMINWATCH_TICK_SECS") {
            self.scheduler.tick_secs = v;
        }
        if let Some(v) = env_parse::<u64>("TERMINWATCH_PROBE_SPACING") {
            self.scheduler.probe_spacing_secs = v;
        }
        if let Ok(path) = std::env::var("TERMINWATCH_SQLITE_PATH") {
            self.storage.sqlite_path = path.into();
        }
        if let Ok(url) = std::env::var("TERMINWATCH_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url);
        }
        if let Ok(level) = std::env::var("TERMINWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TERMINWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Ok(path) = std::env::var("TERMINWATCH_SITE_PROFILE") {
            self.site_profile = Some(path.into());
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.browser.webdriver_url).with_context(|| {
            format!("Invalid WebDriver URL '{}'", self.browser.webdriver_url)
        })?;

        if let Some(webhook) = &self.notify.webhook_url {
            url::Url::parse(webhook)
                .with_context(|| format!("Invalid webhook URL '{webhook}'"))?;
        }

        anyhow::ensure!(self.scheduler.tick_secs > 0, "tick_secs must be positive");
        anyhow::ensure!(
            self.probe.attempt_timeout_secs > self.browser.nav_timeout_secs,
            "attempt timeout must exceed the navigation timeout"
        );

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
