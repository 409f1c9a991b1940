//! zkcluster Configuration
//!
//! Configuration for a single [`Coordinator`](crate::coordinator::Coordinator):
//! where the coordination service lives, which election path to join and what
//! to advertise there.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordination service addresses (host:port)
    pub servers: Vec<String>,

    /// Connect / initial election timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Election path shared by all members (e.g. "/services/scheduler")
    pub election_path: String,

    /// Opaque payload advertised in this member's entry
    #[serde(default)]
    pub member_data: String,

    /// Retry behaviour for coordination service calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pending updates kept per subscriber before the oldest is dropped
    #[serde(default = "default_subscriber_backlog")]
    pub subscriber_backlog: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Attempts per primitive call before the error is surfaced
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_subscriber_backlog() -> usize {
    64
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl CoordinatorConfig {
    /// Build a configuration with defaults for everything but the essentials
    pub fn new(
        servers: Vec<String>,
        connect_timeout: Duration,
        election_path: impl Into<String>,
        member_data: impl Into<String>,
    ) -> Self {
        Self {
            servers,
            connect_timeout_ms: connect_timeout.as_millis() as u64,
            election_path: election_path.into(),
            member_data: member_data.into(),
            retry: RetryConfig::default(),
            subscriber_backlog: default_subscriber_backlog(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: CoordinatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.servers.is_empty() {
            return Err(crate::Error::Config("servers cannot be empty".into()));
        }

        if self.servers.iter().any(|s| s.trim().is_empty()) {
            return Err(crate::Error::Config("servers cannot contain empty addresses".into()));
        }

        if self.connect_timeout_ms == 0 {
            return Err(crate::Error::Config("connect_timeout_ms must be positive".into()));
        }

        if !self.election_path.starts_with('/') || self.election_path.len() < 2 {
            return Err(crate::Error::Config(format!(
                "election_path must be an absolute path, got {:?}",
                self.election_path
            )));
        }

        if self.election_path.ends_with('/') || self.election_path.contains("//") {
            return Err(crate::Error::Config(format!(
                "election_path has an empty segment: {:?}",
                self.election_path
            )));
        }

        if self.member_data.contains('/') {
            return Err(crate::Error::Config("member_data cannot contain '/'".into()));
        }

        if self.retry.initial_backoff_ms == 0 || self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(crate::Error::Config(
                "retry backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms".into(),
            ));
        }

        if self.subscriber_backlog == 0 {
            return Err(crate::Error::Config("subscriber_backlog must be positive".into()));
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Comma-separated server list, the form most clients log and dial
    pub fn connect_string(&self) -> String {
        self.servers.join(",")
    }
}

impl LoggingConfig {
    /// Apply command line overrides on top of the configured values
    pub fn with_overrides(mut self, level: Option<String>, format: Option<String>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(format) = format {
            self.format = format;
        }
        self
    }
}

impl RetryConfig {
    /// Get initial backoff as Duration
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Get maximum backoff as Duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}
