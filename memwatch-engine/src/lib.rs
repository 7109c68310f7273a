//! # memwatch-engine
//!
//! Tokio glue between the telemetry endpoints and real sockets, plus the
//! code that turns a loaded [`MemwatchConfig`](memwatch_config::MemwatchConfig)
//! into a configured tracker and server.

pub mod config;
pub mod error;
pub mod server;
pub mod viewer;

pub use config::{apply_tracker_config, server_config};
pub use error::EngineError;
pub use server::{parse_listen_addr, serve, serve_on};
pub use viewer::{connect, ViewerHandle};
