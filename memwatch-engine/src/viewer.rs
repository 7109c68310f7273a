//! ## memwatch-engine::viewer
//! **TCP transport for the telemetry client**
//!
//! [`connect`] spawns a task that owns the socket and the client. The
//! returned [`ViewerHandle`] talks to that task; the handler comes back out
//! when the task ends.

use std::net::SocketAddr;

use memwatch_telemetry::{BufferedChannel, ClientHandler, TelemetryClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;

const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerRequest {
    Dump,
    Shutdown,
}

#[derive(Debug)]
pub struct ViewerHandle<H> {
    requests: mpsc::UnboundedSender<ViewerRequest>,
    task: JoinHandle<Result<H, EngineError>>,
}

impl<H> ViewerHandle<H> {
    /// Asks for a heap dump. Sent as soon as the session is established and
    /// no other dump is on its way.
    pub fn request_dump(&self) -> Result<(), EngineError> {
        self.requests
            .send(ViewerRequest::Dump)
            .map_err(|_| EngineError::ViewerClosed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes the connection and returns the handler.
    pub async fn shutdown(self) -> Result<H, EngineError> {
        // the task may already be gone; join reports how it ended
        let _ = self.requests.send(ViewerRequest::Shutdown);
        self.task.await?
    }

    /// Waits for the server to close the connection.
    pub async fn join(self) -> Result<H, EngineError> {
        self.task.await?
    }
}

/// Connects to a telemetry server. `max_message_len` bounds one inbound
/// message and must leave room for a full heap dump.
pub async fn connect<H>(
    addr: SocketAddr,
    handler: H,
    max_message_len: u32,
) -> Result<ViewerHandle<H>, EngineError>
where
    H: ClientHandler + Send + 'static,
{
    let stream = TcpStream::connect(addr).await?;
    info!(%addr, "connected to telemetry server");
    let (tx, rx) = mpsc::unbounded_channel();
    let client = TelemetryClient::new(handler, max_message_len);
    let task = tokio::spawn(run_client(client, stream, rx));
    Ok(ViewerHandle { requests: tx, task })
}

#[instrument(skip_all, fields(peer = ?stream.peer_addr().ok()))]
async fn run_client<H: ClientHandler>(
    mut client: TelemetryClient<H, BufferedChannel>,
    mut stream: TcpStream,
    mut requests: mpsc::UnboundedReceiver<ViewerRequest>,
) -> Result<H, EngineError> {
    let (mut reader, mut writer) = stream.split();
    let mut buf = vec![0u8; READ_BUFFER];
    let mut dump_wanted = false;
    client.on_channel_open(BufferedChannel::new());

    loop {
        if dump_wanted && client.request_dump() {
            dump_wanted = false;
        }
        loop {
            let pending = client
                .channel_mut()
                .map(BufferedChannel::take_pending)
                .unwrap_or_default();
            if pending.is_empty() {
                break;
            }
            for chunk in pending {
                if let Err(err) = writer.write_all(&chunk).await {
                    warn!(%err, "write to server failed");
                    client.on_channel_closed("write failed");
                    return Ok(client.into_handler());
                }
                client.on_packet_delivered();
            }
        }

        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    client.on_channel_closed("server closed the connection");
                    break;
                }
                Ok(n) => client.on_packet_received(&buf[..n]),
                Err(err) => {
                    client.on_channel_closed(&err.to_string());
                    break;
                }
            },
            request = requests.recv() => match request {
                Some(ViewerRequest::Dump) => {
                    debug!("heap dump requested");
                    dump_wanted = true;
                }
                Some(ViewerRequest::Shutdown) | None => {
                    client.on_channel_closed("viewer shut down");
                    break;
                }
            }
        }
    }
    Ok(client.into_handler())
}
