use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::{Args, Parser, Subcommand};
use memwatch_config::MemwatchConfig;
use memwatch_core::global;
use memwatch_engine::{apply_tracker_config, connect, parse_listen_addr, serve};
use memwatch_telemetry::Logger;
use tracing::{info, warn};

use crate::error::CliError;
use crate::report::{Progress, Report};
use crate::workload::Workload;

/// Largest message the viewer accepts; heap dumps of busy processes run to
/// tens of megabytes.
const MAX_VIEWER_MESSAGE: u32 = 512 << 20;

#[derive(Parser)]
#[command(name = "memwatch", version, about)]
pub struct Cli {
    /// Configuration file; defaults to config/memwatch.yaml when present
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Track this process and serve telemetry
    Serve(ServeArgs),
    /// Connect to a served process and print its telemetry
    View(ViewArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Run a synthetic allocation workload while serving
    #[arg(long)]
    pub workload: bool,
    /// Overrides telemetry.listen_addr
    #[arg(long)]
    pub listen: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    #[arg(long, default_value = "127.0.0.1:50007")]
    pub addr: String,
    /// Request a heap dump once the session is up
    #[arg(long)]
    pub dump: bool,
    /// Snapshots to print before disconnecting
    #[arg(long, default_value_t = 10)]
    pub count: usize,
    /// Call sites listed in the dump summary
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}

pub async fn run_command(cli: Cli) -> Result<(), CliError> {
    let config = MemwatchConfig::load_with(cli.config.as_deref())?;
    Logger::init(&config.logging.filter, config.logging.json)?;

    match cli.command {
        Commands::Serve(args) => run_serve(config, args).await,
        Commands::View(args) => run_view(args).await,
    }
}

async fn run_serve(mut config: MemwatchConfig, args: ServeArgs) -> Result<(), CliError> {
    if let Some(listen) = args.listen {
        config.telemetry.listen_addr = listen;
    }
    let tracker = global();
    apply_tracker_config(tracker, &config.tracker)?;

    let stop = Arc::new(AtomicBool::new(false));
    let worker = if args.workload {
        let workload = Workload::new(tracker, Arc::clone(&stop));
        Some(
            thread::Builder::new()
                .name("workload".into())
                .spawn(move || workload.run())?,
        )
    } else {
        None
    };

    info!(addr = %config.telemetry.listen_addr, workload = args.workload, "serving telemetry");
    let served = tokio::select! {
        served = serve(&config.telemetry, tracker) => served,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    };

    stop.store(true, Ordering::Relaxed);
    if let Some(worker) = worker {
        if worker.join().is_err() {
            warn!("workload thread panicked");
        }
    }
    served.map_err(CliError::from)
}

async fn run_view(args: ViewArgs) -> Result<(), CliError> {
    let addr = parse_listen_addr(&args.addr)?;
    let progress = Progress::new();
    let report = Report::new(progress.clone(), args.top);
    let viewer = connect(addr, report, MAX_VIEWER_MESSAGE).await?;
    if args.dump {
        viewer.request_dump()?;
    }

    let done = progress.wait_until(|state| {
        state.lost || (state.stats >= args.count && (!args.dump || state.dumps > 0))
    });
    tokio::select! {
        _ = done => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    let report = viewer.shutdown().await?;
    report.finish();
    Ok(())
}
