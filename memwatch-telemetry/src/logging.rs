//! ## memwatch-telemetry::logging
//! **`tracing` subscriber setup**
//!
//! One fmt subscriber per process, human-readable or JSON lines. `RUST_LOG`
//! overrides the configured filter when set.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::TelemetryError;

#[derive(Clone, Copy, Debug)]
pub struct Logger;

impl Logger {
    /// Installs the global subscriber. Fails if one is already installed.
    pub fn init(filter: &str, json: bool) -> Result<(), TelemetryError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(from_env) => from_env,
            Err(_) => EnvFilter::try_new(filter)?,
        };
        let builder = fmt().with_env_filter(env_filter).with_thread_names(true);
        let installed = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        installed.map_err(|e| TelemetryError::Logging(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_filter_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert!(matches!(
            Logger::init("memwatch=loud", false),
            Err(TelemetryError::Filter(_))
        ));
    }
}
