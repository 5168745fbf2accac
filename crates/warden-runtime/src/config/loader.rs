//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: enables TOML configuration files (`warden.toml`, `config.toml`)
//! - `yaml-config`: enables YAML configuration files (`warden.yaml`, `warden.yml`, etc.)
//!
//! Both features can be enabled simultaneously; if so, both file formats are searched and loaded.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Providers passed to [`ConfigLoader::merge`]
//! 3. Profile-specific config file (`warden.{profile}.toml` / `warden.{profile}.yaml`)
//! 4. Main config file (`warden.toml` / `warden.yaml`)
//! 5. Environment variables (`WARDEN_*`)
//! 6. Closures passed to [`ConfigLoader::adjust`], run on the extracted value
//!
//! # Environment Variable Mapping
//!
//! Environment variables are mapped using the `WARDEN_` prefix with `__` as separator:
//!
//! - `WARDEN_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `WARDEN_ENGINE__COMMAND_PREFIX=/` → `engine.command_prefix = "/"`
//! - `WARDEN_QUEUE__ENABLED=true` → `queue.enabled = true`
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load()?;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./config/warden.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::{Figment, Provider};
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::Env;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::WardenConfig;
use super::validation::validate_config;

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `prod` and `dev` are accepted as short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `WARDEN_PROFILE`, defaulting to Development.
    pub fn from_env() -> Self {
        std::env::var("WARDEN_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type Adjustment = Box<dyn FnOnce(&mut WardenConfig) + Send>;

/// Configuration loader with figment-based multi-source support.
///
/// [`load`](Self::load) validates the result, so a loaded config is always
/// safe to hand to the runtime.
pub struct ConfigLoader {
    /// Programmatic layer.
    figment: Figment,
    adjustments: Vec<Adjustment>,
    profile: Profile,
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            adjustments: Vec::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Adds `<user config dir>/warden` to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("warden"))
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a provider below the config files and environment.
    ///
    /// Only the keys the provider emits are layered, so set individual keys
    /// rather than a whole serialized [`WardenConfig`]:
    ///
    /// ```rust,ignore
    /// use figment::providers::Serialized;
    ///
    /// let config = ConfigLoader::new()
    ///     .merge(Serialized::default("engine.command_prefix", "/"))
    ///     .load()?;
    /// ```
    ///
    /// A key must use the same spelling as any file that also sets it; a
    /// snake_case key next to its camelCase alias is a duplicate field.
    pub fn merge<P: Provider>(mut self, provider: P) -> Self {
        self.figment = self.figment.merge(provider);
        self
    }

    /// Edits the extracted configuration before validation.
    ///
    /// Runs after every other source, so the edit always wins and never
    /// collides with key spellings used in files.
    pub fn adjust<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut WardenConfig) + Send + 'static,
    {
        self.adjustments.push(Box::new(f));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(mut self) -> ConfigResult<WardenConfig> {
        let profile = self.profile.clone();
        let adjustments = std::mem::take(&mut self.adjustments);
        let figment = self.build_figment()?;

        let mut config: WardenConfig = figment.extract()?;
        for adjust in adjustments {
            adjust(&mut config);
        }
        validate_config(&config)?;

        debug!(
            profile = %profile,
            prefix = %config.engine.command_prefix,
            queue_enabled = config.queue.enabled,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Builds the figment instance with all sources.
    ///
    /// Built-in defaults come from the serde field defaults rather than a
    /// serialized layer, so camelCase keys in files never collide with them.
    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = std::mem::take(&mut self.figment);

        if let Some(path) = self.config_file.take() {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            } else {
                return Err(ConfigError::FileNotFound(path));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with WARDEN_ prefix");
            figment = figment.merge(Env::prefixed("WARDEN_").ignore(&["profile"]).split("__"));
        }

        Ok(figment)
    }

    /// Merges a single config file into the figment, dispatching on file extension.
    ///
    /// Only extensions enabled via feature flags are accepted.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Resolves the effective list of search paths.
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("warden"));
            }
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Searches `search_paths × base_names` for one file format.
    ///
    /// A profile-specific variant is merged first, then the base file. Stops at
    /// the first base file found and reports whether one was.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                // e.g. warden.production.toml
                let profile_path = search_path.join(format!("{stem}.{}.{ext}", self.profile));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    figment = merge_fn(figment, &base_path);
                    return (figment, true);
                }
            }
        }
        (figment, false)
    }

    /// Searches for and loads configuration files from search paths.
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["warden.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["warden.yaml", "warden.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<WardenConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from a specific file, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<WardenConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use figment::Jail;
    use figment::providers::Serialized;

    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_default_config() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level.as_str(), "info");
            assert_eq!(config.engine.command_prefix, "!");
            Ok(())
        });
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("prod"), Profile::Production);
        assert_eq!(Profile::parse("Development"), Profile::Development);
        assert_eq!(Profile::parse("staging"), Profile::Custom("staging".into()));
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("WARDEN_PROFILE", "production");
            assert_eq!(Profile::from_env(), Profile::Production);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_camel_case_file_keys() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "warden.toml",
                r#"
                [engine]
                commandPrefix = "/"
                defaultCooldownSeconds = 10

                [queue]
                queueEnabled = true
                userIntervalCapacity = 5
                "#,
            )?;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.engine.command_prefix, "/");
            assert_eq!(config.engine.default_cooldown_seconds, 10);
            assert!(config.queue.enabled);
            assert_eq!(config.queue.user_interval_capacity, 5);
            assert_eq!(config.queue.global_concurrency, 20);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_merged_keys_coexist_with_camel_case_files() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "warden.toml",
                r#"
                [engine]
                defaultCooldownSeconds = 10

                [queue]
                queueEnabled = true
                "#,
            )?;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .merge(Serialized::default("engine.command_prefix", "/"))
                .merge(Serialized::default("engine.top_handlers", 1))
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.engine.command_prefix, "/");
            assert_eq!(config.engine.default_cooldown_seconds, 10);
            assert_eq!(config.engine.top_handlers, 1);
            assert!(config.queue.enabled);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_adjust_runs_after_every_source() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "warden.toml",
                r#"
                [engine]
                ownerIds = ["1"]
                "#,
            )?;
            jail.set_env("WARDEN_ENGINE__COMMAND_PREFIX", "?");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .adjust(|config| config.engine.owner_ids.push("42".into()))
                .adjust(|config| config.engine.command_prefix = "#".into())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.engine.owner_ids, vec!["1".to_string(), "42".to_string()]);
            assert_eq!(config.engine.command_prefix, "#");
            Ok(())
        });
    }

    #[test]
    fn test_adjusted_config_is_validated() {
        Jail::expect_with(|jail| {
            let result = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .adjust(|config| config.engine.command_prefix.clear())
                .load();

            assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "warden.toml",
                r#"
                [logging]
                level = "warn"
                "#,
            )?;
            jail.set_env("WARDEN_LOGGING__LEVEL", "debug");
            jail.set_env("WARDEN_ENGINE__OWNER_IDS", "[\"42\", \"7\"]");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.engine.owner_ids, vec!["42".to_string(), "7".to_string()]);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_invalid_file_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "warden.toml",
                r#"
                [engine]
                command_prefix = ""
                "#,
            )?;

            let result = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load();
            assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = ConfigLoader::new()
            .file("/nonexistent/warden.toml")
            .without_env()
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
