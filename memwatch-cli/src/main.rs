//! ## memwatch-cli
//! **`memwatch` command line**
//!
//! - `memwatch serve`: a profiled process. Every Rust allocation goes
//!   through the tracker; telemetry is served on the configured address.
//! - `memwatch view`: connects to a served process and prints what it sends.

use clap::Parser;
use memwatch_core::TrackingAllocator;

mod commands;
mod error;
mod report;
mod workload;

use commands::Cli;
use error::CliError;

#[global_allocator]
static ALLOC: TrackingAllocator = TrackingAllocator;

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    commands::run_command(cli).await
}
