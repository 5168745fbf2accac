//! Configuration module for the Warden runtime.
//!
//! Layered figment loading of [`WardenConfig`] plus the startup validation
//! that rejects unusable engine, queue or logging settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    EngineConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, QueueConfig, SpanEventConfig,
    WardenConfig,
};
pub use validation::validate_config;
