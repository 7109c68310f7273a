//! Telemetry server parameters.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Address the profiled process listens on for a viewer.
    #[validate(custom(function = validation::validate_socket_addr))]
    pub listen_addr: String,

    /// Period between statistics snapshots.
    #[validate(range(min = 10, max = 60000))]
    pub stat_period_ms: u64,

    /// Largest chunk handed to the channel in one send.
    #[validate(range(min = 256, max = 1048576))]
    pub chunk_size: usize,

    /// Largest inbound request payload accepted before the stream is
    /// considered out of sync.
    #[validate(range(min = 16, max = 1048576))]
    pub max_request_len: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50007".into(),
            stat_period_ms: 250,
            chunk_size: 4096,
            max_request_len: 4096,
        }
    }
}
