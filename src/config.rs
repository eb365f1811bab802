//! Crate configuration.
//!
//! All timing knobs of the subsystem live here with serde defaults, so a
//! config file only needs to state what it overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub presence: PresenceConfig,
    pub retry: RetryConfig,
    pub directory: DirectoryConfig,
    pub logging: LoggingConfig,
}

impl MessagingConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// section the file does not mention.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Heartbeat cadence while the client is active. Kept safely under the
    /// recency window so an active user is never shown offline.
    pub heartbeat_interval_secs: u64,
    /// A user counts as online if last_seen_at is within this window.
    pub online_recency_secs: u64,
    /// At most one online report per user within this window.
    pub report_throttle_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 240,
            online_recency_secs: 300,
            report_throttle_secs: 30,
            cache_ttl_secs: 30,
            cache_max_entries: 10_000,
        }
    }
}

impl PresenceConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn report_throttle(&self) -> Duration {
        Duration::from_secs(self.report_throttle_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per call before giving up.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Rolling window for the per-query-key failure budget.
    pub window_secs: u64,
    /// Failures allowed per query key inside one window.
    pub window_max_failures: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            window_secs: 300,
            window_max_failures: 5,
        }
    }
}

impl RetryConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Bound on how stale a cached listing may get between refreshes.
    pub refresh_interval_secs: u64,
    /// Stop invoking the provisioner after this many consecutive failures.
    pub provisioner_failure_cap: u32,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 120,
            provisioner_failure_cap: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}
