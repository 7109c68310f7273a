//! # Memwatch Configuration
//!
//! Layered configuration for the tracker, the telemetry server and logging.
//!
//! ## Sources, later wins
//! 1. Built-in defaults
//! 2. `config/memwatch.yaml`, when present
//! 3. `MEMWATCH_*` environment variables, `__` separating nested keys
//!    (`MEMWATCH_TELEMETRY__STAT_PERIOD_MS=500`)
//!
//! Every loaded configuration is validated before it is returned.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod error;
mod logging;
mod telemetry;
mod tracker;
mod validation;

pub use error::ConfigError;
pub use logging::LoggingConfig;
pub use telemetry::TelemetryConfig;
pub use tracker::TrackerConfig;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/memwatch.yaml";
/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MEMWATCH_";

/// Top-level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MemwatchConfig {
    /// Fingerprint capture and custom registry names.
    #[validate(nested)]
    pub tracker: TrackerConfig,

    /// Telemetry listener and pacing.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl MemwatchConfig {
    /// Defaults, then `config/memwatch.yaml` if it exists, then the
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Self::defaults();
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            figment = figment.merge(Yaml::file(DEFAULT_CONFIG_PATH));
        }
        Self::finish(figment)
    }

    /// Defaults, then the file at `path`, which must exist, then the
    /// environment.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }
        Self::finish(Self::defaults().merge(Yaml::file(path)))
    }

    /// [`load_from_path`](Self::load_from_path) when a path is given,
    /// [`load`](Self::load) otherwise.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(MemwatchConfig::default()))
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = MemwatchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.telemetry.stat_period_ms, 250);
        assert_eq!(config.telemetry.chunk_size, 4096);
        assert!(config.tracker.capture_backtraces);
    }

    #[test]
    fn test_yaml_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                DEFAULT_CONFIG_PATH,
                r#"
tracker:
  pools: [textures, audio]
  tags: [level]
telemetry:
  stat_period_ms: 500
"#,
            )?;
            jail.set_env("MEMWATCH_TELEMETRY__STAT_PERIOD_MS", "1000");
            jail.set_env("MEMWATCH_LOGGING__JSON", "true");

            let config = MemwatchConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.tracker.pools, vec!["textures", "audio"]);
            assert_eq!(config.tracker.tags, vec!["level"]);
            assert_eq!(config.telemetry.stat_period_ms, 1000);
            assert!(config.logging.json);
            // untouched sections keep their defaults
            assert_eq!(config.telemetry.listen_addr, "127.0.0.1:50007");
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_reported() {
        Jail::expect_with(|_| {
            let err = MemwatchConfig::load_from_path("nope.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::FileNotFound(_)));
            // the default file is optional
            assert_eq!(MemwatchConfig::load_with(None).unwrap(), MemwatchConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bad.yaml",
                r#"
tracker:
  pools: [a, b, c, d, e]
  markers: [this-name-is-too-long]
telemetry:
  chunk_size: 16
  listen_addr: nowhere
"#,
            )?;
            let err = MemwatchConfig::load_from_path("bad.yaml").unwrap_err();
            let ConfigError::Validation(errors) = &err else {
                panic!("expected a validation error, got {err}");
            };
            let tracker = errors.errors().get("tracker");
            let telemetry = errors.errors().get("telemetry");
            assert!(tracker.is_some());
            assert!(telemetry.is_some());
            let message = err.to_string();
            assert!(message.contains("Invalid configuration"));
            assert!(message.contains("telemetry.chunk_size"));
            assert!(message.contains("tracker.pools"));
            Ok(())
        });
    }

    #[test]
    fn test_parse_error_is_reported() {
        Jail::expect_with(|jail| {
            jail.create_file("broken.yaml", "telemetry:\n  stat_period_ms: soon\n")?;
            let err = MemwatchConfig::load_from_path("broken.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Parsing(_)));
            Ok(())
        });
    }
}
