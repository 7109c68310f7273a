//! ## memwatch-engine::server
//! **TCP transport for the telemetry server**
//!
//! One viewer at a time. Each connection is driven by a single task:
//! queued chunks are written in order and acknowledged to the server as
//! soon as `write_all` returns, reads are fed straight through, and a timer
//! advances the snapshot period. When the viewer goes away the server drops
//! its queue and the listener accepts the next one.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use memwatch_config::TelemetryConfig;
use memwatch_telemetry::{BufferedChannel, StatSource, TelemetryMetrics, TelemetryServer};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::server_config;
use crate::error::EngineError;

const READ_BUFFER: usize = 4096;

type Server<S> = TelemetryServer<S, BufferedChannel>;

pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, EngineError> {
    addr.parse().map_err(|source| EngineError::Address {
        addr: addr.to_owned(),
        source,
    })
}

/// Binds `config.listen_addr` and serves viewers until an I/O error on the
/// listener.
pub async fn serve<S: StatSource>(config: &TelemetryConfig, source: S) -> Result<(), EngineError> {
    let addr = parse_listen_addr(&config.listen_addr)?;
    let listener = TcpListener::bind(addr).await?;
    let metrics = TelemetryMetrics::new().map_err(memwatch_telemetry::TelemetryError::from)?;
    let server = TelemetryServer::new(source, server_config(config)).with_metrics(metrics.clone());
    serve_on(listener, server, Some(metrics)).await
}

/// Serves viewers on an already bound listener.
#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
pub async fn serve_on<S: StatSource>(
    listener: TcpListener,
    mut server: Server<S>,
    metrics: Option<TelemetryMetrics>,
) -> Result<(), EngineError> {
    info!(session_id = server.session_id(), "telemetry listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "could not disable nagle");
        }
        info!(%peer, "viewer connected");
        server.on_channel_open(BufferedChannel::new());
        let reason = drive_connection(&mut server, stream).await;
        server.on_channel_closed(&reason);

        if let Some(metrics) = &metrics {
            match metrics.gather() {
                Ok(text) => debug!(%peer, metrics = %text, "telemetry counters"),
                Err(err) => debug!(%err, "could not gather telemetry counters"),
            }
        }
    }
}

/// Runs one connection to completion and returns why it ended.
async fn drive_connection<S: StatSource>(server: &mut Server<S>, mut stream: TcpStream) -> String {
    let stat_period = server.config().stat_period;
    let (mut reader, mut writer) = stream.split();
    let mut ticker = time::interval(stat_period.min(Duration::from_millis(50)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();
    let mut buf = vec![0u8; READ_BUFFER];

    loop {
        if let Err(err) = flush(server, &mut writer).await {
            warn!(%err, "write to viewer failed");
            return err.to_string();
        }
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => return "viewer closed the connection".to_owned(),
                Ok(n) => server.on_packet_received(&buf[..n]),
                Err(err) => return err.to_string(),
            },
            now = ticker.tick() => {
                server.update(now - last_tick);
                last_tick = now;
            }
        }
    }
}

/// Writes everything queued, acknowledging each chunk once it is written.
async fn flush<S: StatSource, W: AsyncWrite + Unpin>(
    server: &mut Server<S>,
    writer: &mut W,
) -> io::Result<()> {
    loop {
        let pending = server
            .channel_mut()
            .map(BufferedChannel::take_pending)
            .unwrap_or_default();
        if pending.is_empty() {
            return writer.flush().await;
        }
        for chunk in pending {
            writer.write_all(&chunk).await?;
            server.on_packet_delivered();
        }
    }
}
