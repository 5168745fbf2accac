//! Configuration schema definitions.
//!
//! Field names are snake_case; the camelCase spellings used by existing bot
//! deployments (`commandPrefix`, `queueEnabled`, ...) are accepted as aliases.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_framework::{EngineSettings, QueueLimits, QueueSettings, TimeoutPolicy};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WardenConfig {
    /// Dispatch engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Two-level admission queue settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WardenConfig {
    /// Converts the file-level settings into the engine's runtime settings.
    pub fn to_engine_settings(&self) -> EngineSettings {
        EngineSettings {
            prefix: self.engine.command_prefix.clone(),
            default_cooldown_secs: self.engine.default_cooldown_seconds,
            execution_timeout: Duration::from_secs(self.engine.execution_timeout_secs),
            timeout_policy: self.engine.timeout_policy,
            top_handlers: self.engine.top_handlers,
            owners: self.engine.owner_ids.clone(),
            queue: self.queue.to_queue_settings(),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Dispatch engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Text a message must start with to be treated as a command.
    #[serde(default = "default_command_prefix", alias = "commandPrefix")]
    pub command_prefix: String,

    /// Cooldown applied to handlers that do not declare their own.
    #[serde(default = "default_cooldown_seconds", alias = "defaultCooldownSeconds")]
    pub default_cooldown_seconds: u64,

    /// Upper bound on a single handler execution.
    #[serde(default = "default_execution_timeout_secs", alias = "executionTimeoutSecs")]
    pub execution_timeout_secs: u64,

    /// What happens to a handler body that outlives its timeout.
    #[serde(default, alias = "timeoutPolicy")]
    pub timeout_policy: TimeoutPolicy,

    /// Length of the most-used list in statistics.
    #[serde(default = "default_top_handlers", alias = "topHandlers")]
    pub top_handlers: usize,

    /// Sender ids allowed through the `owner_only` guard.
    #[serde(default, alias = "ownerIds")]
    pub owner_ids: Vec<String>,

    /// Period of the cooldown/queue maintenance sweep.
    #[serde(default = "default_cooldown_sweep_secs", alias = "cooldownSweepSecs")]
    pub cooldown_sweep_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            default_cooldown_seconds: default_cooldown_seconds(),
            execution_timeout_secs: default_execution_timeout_secs(),
            timeout_policy: TimeoutPolicy::default(),
            top_handlers: default_top_handlers(),
            owner_ids: Vec::new(),
            cooldown_sweep_secs: default_cooldown_sweep_secs(),
        }
    }
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_cooldown_seconds() -> u64 {
    3
}

fn default_execution_timeout_secs() -> u64 {
    60
}

fn default_top_handlers() -> usize {
    5
}

fn default_cooldown_sweep_secs() -> u64 {
    60
}

// =============================================================================
// Queue
// =============================================================================

/// Admission queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// When false, handlers run immediately without admission control.
    #[serde(default, alias = "queueEnabled")]
    pub enabled: bool,

    #[serde(default = "default_global_concurrency", alias = "globalConcurrency")]
    pub global_concurrency: usize,

    #[serde(default = "default_global_interval_capacity", alias = "globalIntervalCapacity")]
    pub global_interval_capacity: u32,

    #[serde(default = "default_global_interval_ms", alias = "globalIntervalMs")]
    pub global_interval_ms: u64,

    #[serde(default = "default_user_concurrency", alias = "userConcurrency")]
    pub user_concurrency: usize,

    #[serde(default = "default_user_interval_capacity", alias = "userIntervalCapacity")]
    pub user_interval_capacity: u32,

    #[serde(default = "default_user_interval_ms", alias = "userIntervalMs")]
    pub user_interval_ms: u64,
}

impl QueueConfig {
    /// Converts to the framework's queue settings.
    pub fn to_queue_settings(&self) -> QueueSettings {
        QueueSettings {
            enabled: self.enabled,
            global: QueueLimits::new(
                self.global_concurrency,
                self.global_interval_capacity,
                Duration::from_millis(self.global_interval_ms),
            ),
            user: QueueLimits::new(
                self.user_concurrency,
                self.user_interval_capacity,
                Duration::from_millis(self.user_interval_ms),
            ),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            global_concurrency: default_global_concurrency(),
            global_interval_capacity: default_global_interval_capacity(),
            global_interval_ms: default_global_interval_ms(),
            user_concurrency: default_user_concurrency(),
            user_interval_capacity: default_user_interval_capacity(),
            user_interval_ms: default_user_interval_ms(),
        }
    }
}

fn default_global_concurrency() -> usize {
    20
}

fn default_global_interval_capacity() -> u32 {
    60
}

fn default_global_interval_ms() -> u64 {
    1000
}

fn default_user_concurrency() -> usize {
    1
}

fn default_user_interval_capacity() -> u32 {
    3
}

fn default_user_interval_ms() -> u64 {
    1500
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Target file when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Per-module levels, e.g. `warden_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in each record.
    #[serde(default)]
    pub file_location: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = WardenConfig::default();
        assert_eq!(config.engine.command_prefix, "!");
        assert_eq!(config.engine.default_cooldown_seconds, 3);
        assert_eq!(config.engine.cooldown_sweep_secs, 60);
        assert!(!config.queue.enabled);
        assert_eq!(config.queue.global_concurrency, 20);
        assert_eq!(config.queue.user_interval_ms, 1500);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn engine_settings_conversion() {
        let mut config = WardenConfig::default();
        config.engine.command_prefix = "/".into();
        config.engine.owner_ids = vec!["42".into()];
        config.queue.enabled = true;
        config.queue.user_interval_capacity = 7;

        let settings = config.to_engine_settings();
        assert_eq!(settings.prefix, "/");
        assert_eq!(settings.execution_timeout, Duration::from_secs(60));
        assert_eq!(settings.owners, vec!["42".to_string()]);
        assert!(settings.queue.enabled);
        assert_eq!(settings.queue.user.interval_cap, 7);
        assert_eq!(settings.queue.global.interval, Duration::from_millis(1000));
    }
}
