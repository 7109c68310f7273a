use memwatch_config::ConfigError;
use memwatch_engine::EngineError;
use memwatch_telemetry::TelemetryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Workload thread failed: {0}")]
    Workload(#[from] std::io::Error),
}
