use thiserror::Error;

use crate::channel::ChannelError;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Log filter error: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Logger installation failed: {0}")]
    Logging(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}
