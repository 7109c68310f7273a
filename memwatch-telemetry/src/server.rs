//! ## memwatch-telemetry::server
//! **Telemetry server embedded in the profiled process**
//!
//! ### Session:
//! - open: the channel is attached, nothing is sent until the viewer's
//!   handshake arrives
//! - handshake: a known session id is answered with a bare ack, anything
//!   else with the stat config descriptor
//! - active: once the handshake reply is delivered, a statistics snapshot
//!   is queued every `stat_period`; dump requests are served
//! - close: every queued parcel is released, the next open starts over
//!
//! ### Parcel queue:
//! Outbound messages are queued whole. Only the head is in flight, one chunk
//! of at most `chunk_size` bytes at a time; each delivery notification
//! sends the next chunk or pops the parcel.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use memwatch_protocol::{
    Command, Dump, FrameAssembler, ProtoHeader, ProtocolError, StatSnapshot, Status,
};
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::metrics::TelemetryMetrics;
use crate::source::StatSource;

const HEADER_SIZE: usize = ProtoHeader::ENCODED_SIZE;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub stat_period: Duration,
    pub chunk_size: usize,
    /// Largest inbound payload before the stream counts as desynced.
    pub max_request_len: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            stat_period: Duration::from_millis(250),
            chunk_size: 4096,
            max_request_len: 4096,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No channel attached.
    Closed,
    /// Channel open, handshake not yet completed.
    Handshaking,
    Active,
}

/// Memory behind one outbound message.
pub enum ParcelBuffer<D> {
    /// Built on the heap: acks, descriptors and snapshots.
    Heap(Vec<u8>),
    /// Built by the source's dump builder and released through it.
    Dump(D),
}

impl<D: AsRef<[u8]>> ParcelBuffer<D> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Heap(buf) => buf,
            Self::Dump(dump) => dump.as_ref(),
        }
    }
}

struct Parcel<D> {
    buffer: ParcelBuffer<D>,
    command: Command,
    offset: usize,
    /// Delivering this parcel completes the handshake.
    completes_handshake: bool,
}

pub struct TelemetryServer<S: StatSource, C: Channel> {
    source: S,
    config: ServerConfig,
    session_id: u32,
    state: SessionState,
    channel: Option<C>,
    opened_at: Option<Instant>,
    since_stat: Duration,
    parcels: VecDeque<Parcel<S::Dump>>,
    /// Length of the chunk awaiting delivery.
    in_flight: Option<usize>,
    inbound: FrameAssembler,
    metrics: Option<TelemetryMetrics>,
}

impl<S: StatSource, C: Channel> TelemetryServer<S, C> {
    /// A server with a fresh random session id.
    pub fn new(source: S, config: ServerConfig) -> Self {
        Self::with_session_id(source, config, rand::random())
    }

    pub fn with_session_id(source: S, config: ServerConfig, session_id: u32) -> Self {
        let inbound = FrameAssembler::new(config.max_request_len);
        Self {
            source,
            config,
            session_id,
            state: SessionState::Closed,
            channel: None,
            opened_at: None,
            since_stat: Duration::ZERO,
            parcels: VecDeque::new(),
            in_flight: None,
            inbound,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: TelemetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn queued_parcels(&self) -> usize {
        self.parcels.len()
    }

    pub fn channel_mut(&mut self) -> Option<&mut C> {
        self.channel.as_mut()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn on_channel_open(&mut self, channel: C) {
        if self.channel.is_some() {
            self.on_channel_closed("replaced by a new connection");
        }
        info!(session_id = self.session_id, "telemetry channel open");
        self.channel = Some(channel);
        self.state = SessionState::Handshaking;
        self.opened_at = Some(Instant::now());
        self.since_stat = Duration::ZERO;
        self.inbound.reset();
    }

    pub fn on_channel_closed(&mut self, reason: &str) {
        if self.channel.is_none() {
            return;
        }
        info!(
            reason,
            discarded = self.parcels.len(),
            "telemetry channel closed"
        );
        self.parcels.clear();
        self.update_queue_gauge();
        self.in_flight = None;
        self.channel = None;
        self.state = SessionState::Closed;
        self.opened_at = None;
        self.inbound.reset();
    }

    /// Feeds received bytes. Malformed or unexpected requests are logged and
    /// dropped without closing the channel.
    pub fn on_packet_received(&mut self, data: &[u8]) {
        if self.channel.is_none() {
            return;
        }
        self.inbound.push(data);
        while let Some(frame) = self.inbound.next_frame() {
            match frame {
                Ok((header, _payload)) => self.handle_request(header),
                Err(err) => self.desync(&err),
            }
        }
    }

    /// The last chunk handed to the channel is on the wire.
    pub fn on_packet_delivered(&mut self) {
        let Some(sent) = self.in_flight.take() else {
            debug!("delivery notification with nothing in flight");
            return;
        };
        if let Some(metrics) = &self.metrics {
            metrics.bytes_sent.inc_by(sent as u64);
        }
        let finished = match self.parcels.front_mut() {
            Some(parcel) => {
                parcel.offset += sent;
                parcel.offset >= parcel.buffer.as_slice().len()
            }
            None => false,
        };
        if finished {
            if let Some(parcel) = self.parcels.pop_front() {
                self.parcel_delivered(&parcel);
            }
            self.update_queue_gauge();
        }
        self.send_next_chunk();
    }

    /// Advances the snapshot timer.
    pub fn update(&mut self, elapsed: Duration) {
        if self.state != SessionState::Active {
            return;
        }
        self.since_stat += elapsed;
        if self.since_stat >= self.config.stat_period {
            self.since_stat = Duration::ZERO;
            self.queue_stat();
        }
    }

    fn handle_request(&mut self, header: ProtoHeader) {
        match header.command {
            Command::InitComm => self.handshake(header.session_id),
            Command::Dump if self.state == SessionState::Active => self.queue_dump(),
            Command::Dump => {
                warn!("dump requested before the handshake completed");
                self.count_protocol_error();
            }
            Command::CurStat => {
                warn!(command = ?header.command, "unexpected command from viewer");
                self.count_protocol_error();
            }
        }
    }

    fn handshake(&mut self, client_session: u32) {
        if let Some(metrics) = &self.metrics {
            metrics.sessions.inc();
        }
        if client_session == self.session_id {
            info!(session_id = self.session_id, "resuming telemetry session");
            let ack = ProtoHeader::ack(self.session_id, Command::InitComm, 0);
            self.enqueue(ParcelBuffer::Heap(ack.to_bytes().to_vec()), Command::InitComm, true);
            return;
        }

        let size = self.source.calc_stat_config_size();
        let mut buf = vec![0u8; HEADER_SIZE + size];
        let written = match self.source.get_stat_config(&mut buf[HEADER_SIZE..]) {
            Ok(written) => written,
            Err(err) => {
                warn!(%err, "stat config did not fit its computed size");
                return;
            }
        };
        buf.truncate(HEADER_SIZE + written);
        let ack = ProtoHeader::ack(self.session_id, Command::InitComm, written as u32);
        buf[..HEADER_SIZE].copy_from_slice(&ack.to_bytes());
        info!(
            session_id = self.session_id,
            client_session, "starting telemetry session"
        );
        self.enqueue(ParcelBuffer::Heap(buf), Command::InitComm, true);
    }

    fn queue_stat(&mut self) {
        // The tag depth may change between sizing and encoding; one retry
        // with a fresh size covers it.
        for _ in 0..2 {
            let size = self.source.calc_stat_size();
            let mut buf = vec![0u8; HEADER_SIZE + size];
            let written = match self.source.get_stat(&mut buf[HEADER_SIZE..]) {
                Ok(written) => written,
                Err(err) => {
                    debug!(%err, "snapshot size changed while encoding");
                    continue;
                }
            };
            buf.truncate(HEADER_SIZE + written);
            let header = ProtoHeader::ack(self.session_id, Command::CurStat, written as u32);
            buf[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
            if let Err(err) = StatSnapshot::patch_timestamp(&mut buf[HEADER_SIZE..], self.now_ms())
            {
                warn!(%err, "snapshot too short to stamp");
            }
            self.enqueue(ParcelBuffer::Heap(buf), Command::CurStat, false);
            return;
        }
        warn!("skipping snapshot, size kept changing");
    }

    fn queue_dump(&mut self) {
        let begin = self.now_ms();
        let Some(mut dump) = self.source.get_dump(HEADER_SIZE) else {
            warn!("out of memory building heap dump");
            let header = ProtoHeader::new(self.session_id, Command::Dump, Status::Error, 0);
            self.enqueue(ParcelBuffer::Heap(header.to_bytes().to_vec()), Command::Dump, false);
            return;
        };
        let end = self.now_ms();

        let bytes = dump.as_mut();
        let payload_len = bytes.len().saturating_sub(HEADER_SIZE);
        let header = ProtoHeader::ack(self.session_id, Command::Dump, payload_len as u32);
        bytes[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        if let Err(err) = Dump::patch_timestamps(&mut bytes[HEADER_SIZE..], begin, end) {
            warn!(%err, "heap dump too short to stamp");
        }
        info!(bytes = payload_len, "heap dump queued");
        self.enqueue(ParcelBuffer::Dump(dump), Command::Dump, false);
    }

    fn enqueue(&mut self, buffer: ParcelBuffer<S::Dump>, command: Command, completes_handshake: bool) {
        self.parcels.push_back(Parcel {
            buffer,
            command,
            offset: 0,
            completes_handshake,
        });
        self.update_queue_gauge();
        if self.in_flight.is_none() {
            self.send_next_chunk();
        }
    }

    fn send_next_chunk(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        let Some(parcel) = self.parcels.front() else {
            return;
        };
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let bytes = parcel.buffer.as_slice();
        let end = bytes.len().min(parcel.offset + self.config.chunk_size.max(1));
        let chunk = &bytes[parcel.offset..end];
        let len = chunk.len();
        let sent = channel.send(chunk);
        match sent {
            Ok(()) => self.in_flight = Some(len),
            Err(err) => {
                warn!(%err, "telemetry send failed");
                self.on_channel_closed("send failed");
            }
        }
    }

    fn parcel_delivered(&mut self, parcel: &Parcel<S::Dump>) {
        if parcel.completes_handshake && self.state == SessionState::Handshaking {
            debug!(session_id = self.session_id, "handshake delivered");
            self.state = SessionState::Active;
            self.since_stat = Duration::ZERO;
        }
        if let Some(metrics) = &self.metrics {
            match parcel.command {
                Command::CurStat => metrics.snapshots_sent.inc(),
                Command::Dump => metrics.dumps_sent.inc(),
                Command::InitComm => {}
            }
        }
    }

    fn desync(&mut self, err: &ProtocolError) {
        warn!(%err, "telemetry stream desync, dropping buffered input");
        self.count_protocol_error();
    }

    fn count_protocol_error(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.protocol_errors.inc();
        }
    }

    fn update_queue_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.queued_parcels.set(self.parcels.len() as i64);
        }
    }

    fn now_ms(&self) -> u64 {
        self.opened_at
            .map_or(0, |opened| opened.elapsed().as_millis() as u64)
    }
}

impl<S: StatSource, C: Channel> fmt::Debug for TelemetryServer<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryServer")
            .field("session_id", &self.session_id)
            .field("state", &self.state)
            .field("queued_parcels", &self.parcels.len())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests;
