use memwatch_config::ConfigError;
use memwatch_core::ContractViolation;
use memwatch_telemetry::TelemetryError;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid listen address {addr:?}: {source}")]
    Address {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracker rejected the configuration: {0}")]
    Contract(#[from] ContractViolation),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Viewer task ended")]
    ViewerClosed,

    #[error("Viewer task failed: {0}")]
    Join(#[from] JoinError),
}
