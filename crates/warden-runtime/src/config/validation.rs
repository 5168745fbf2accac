//! Configuration validation utilities.
//!
//! Validation is the only fatal error class at startup; everything the engine
//! does after that is reported per dispatch.

use tracing::warn;
use warden_framework::MAX_COOLDOWN_SECS;

use super::error::{ConfigError, ConfigResult};
use super::schema::{EngineConfig, LogOutput, LoggingConfig, QueueConfig, WardenConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &WardenConfig) -> ConfigResult<()> {
    validate_engine_config(&config.engine)?;
    validate_queue_config(&config.queue)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_engine_config(engine: &EngineConfig) -> ConfigResult<()> {
    if engine.command_prefix.is_empty() {
        return Err(ConfigError::validation("Command prefix must not be empty"));
    }

    if engine.command_prefix.chars().any(char::is_whitespace) {
        return Err(ConfigError::validation(format!(
            "Command prefix must not contain whitespace: {:?}",
            engine.command_prefix
        )));
    }

    if engine.execution_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "Execution timeout must be greater than 0",
        ));
    }

    if engine.default_cooldown_seconds > MAX_COOLDOWN_SECS {
        return Err(ConfigError::validation(format!(
            "Default cooldown must be at most {MAX_COOLDOWN_SECS} seconds"
        )));
    }

    if engine.cooldown_sweep_secs == 0 {
        return Err(ConfigError::validation(
            "Cooldown sweep interval must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_queue_config(queue: &QueueConfig) -> ConfigResult<()> {
    let limits = [
        ("global_concurrency", queue.global_concurrency as u64),
        ("global_interval_capacity", u64::from(queue.global_interval_capacity)),
        ("global_interval_ms", queue.global_interval_ms),
        ("user_concurrency", queue.user_concurrency as u64),
        ("user_interval_capacity", u64::from(queue.user_interval_capacity)),
        ("user_interval_ms", queue.user_interval_ms),
    ];
    for (field, value) in limits {
        if value == 0 {
            return Err(ConfigError::validation(format!(
                "queue.{field} must be at least 1"
            )));
        }
    }

    if queue.user_concurrency > 1 {
        warn!(
            user_concurrency = queue.user_concurrency,
            "Per-user concurrency above 1 no longer runs a user's commands in arrival order"
        );
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    // Levels themselves are checked when the enum is deserialized.
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(
            "logging.filters contains an empty module name",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&WardenConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_prefix() {
        let mut config = WardenConfig::default();
        config.engine.command_prefix = String::new();
        assert!(validate_config(&config).is_err());

        config.engine.command_prefix = "! ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = WardenConfig::default();
        config.engine.execution_timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_oversized_default_cooldown() {
        let mut config = WardenConfig::default();
        config.engine.default_cooldown_seconds = MAX_COOLDOWN_SECS;
        assert!(validate_config(&config).is_ok());

        config.engine.default_cooldown_seconds = MAX_COOLDOWN_SECS + 1;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Default cooldown"));
    }

    #[test]
    fn rejects_zero_queue_limits() {
        let mut config = WardenConfig::default();
        config.queue.user_interval_capacity = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("user_interval_capacity"));
    }

    #[test]
    fn accepts_user_concurrency_above_one() {
        let mut config = WardenConfig::default();
        config.queue.user_concurrency = 4;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn file_output_requires_path() {
        let mut config = WardenConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("warden.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
