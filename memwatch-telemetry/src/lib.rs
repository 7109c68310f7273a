//! # memwatch-telemetry
//!
//! Both ends of the telemetry session plus the process-level logging and
//! metrics setup. Endpoints are transport-agnostic: whoever owns the socket
//! drives them through [`Channel`] notifications.
//!
//! ### Modules:
//! - `server`: runs next to the tracker, pushes snapshots and serves dumps
//! - `client`: runs in the viewer, decodes what the server sends
//! - `source`: the server's view of a tracker
//! - `logging` / `metrics`: `tracing` subscriber and prometheus counters

pub mod channel;
pub mod client;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod source;

pub use channel::{BufferedChannel, Channel, ChannelError};
pub use client::{ClientHandler, TelemetryClient};
pub use error::TelemetryError;
pub use logging::Logger;
pub use metrics::TelemetryMetrics;
pub use server::{ServerConfig, SessionState, TelemetryServer};
pub use source::StatSource;
