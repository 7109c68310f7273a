//! ## memwatch-telemetry::client
//! **Viewer end of a telemetry session**
//!
//! Sends the handshake on open with the last session id it saw, decodes the
//! config descriptor, snapshots and dumps the server pushes, and hands them
//! to a [`ClientHandler`]. A payload that fails to decode is skipped; the
//! viewer just has no data for that tick.

use std::collections::VecDeque;

use memwatch_protocol::{Command, Dump, FrameAssembler, ProtoHeader, StatConfig, StatSnapshot, Status};
use tracing::{debug, info, warn};

use crate::channel::Channel;

const HEADER_SIZE: usize = ProtoHeader::ENCODED_SIZE;

/// Presentation side of the client.
pub trait ClientHandler {
    /// The handshake completed. `config` is the descriptor for this session,
    /// cached from an earlier connection when the session was resumed.
    fn on_session(&mut self, session_id: u32, config: Option<&StatConfig>);

    fn on_stat(&mut self, snapshot: StatSnapshot);

    fn on_dump(&mut self, dump: Dump);

    fn on_connection_lost(&mut self) {}
}

pub struct TelemetryClient<H: ClientHandler, C: Channel> {
    handler: H,
    channel: Option<C>,
    /// Zero until a server has answered.
    session_id: u32,
    config: Option<StatConfig>,
    established: bool,
    inbound: FrameAssembler,
    outbound: VecDeque<[u8; HEADER_SIZE]>,
    sending: bool,
    dump_pending: bool,
}

impl<H: ClientHandler, C: Channel> TelemetryClient<H, C> {
    /// `max_message_len` bounds a single inbound payload; dumps need room.
    pub fn new(handler: H, max_message_len: u32) -> Self {
        Self {
            handler,
            channel: None,
            session_id: 0,
            config: None,
            established: false,
            inbound: FrameAssembler::new(max_message_len),
            outbound: VecDeque::new(),
            sending: false,
            dump_pending: false,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn channel_mut(&mut self) -> Option<&mut C> {
        self.channel.as_mut()
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn config(&self) -> Option<&StatConfig> {
        self.config.as_ref()
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn dump_pending(&self) -> bool {
        self.dump_pending
    }

    pub fn on_channel_open(&mut self, channel: C) {
        if self.channel.is_some() {
            self.on_channel_closed("replaced by a new connection");
        }
        debug!(session_id = self.session_id, "requesting telemetry session");
        self.channel = Some(channel);
        self.send(ProtoHeader::ack(self.session_id, Command::InitComm, 0));
    }

    pub fn on_channel_closed(&mut self, reason: &str) {
        if self.channel.take().is_none() {
            return;
        }
        info!(reason, "telemetry connection lost");
        self.established = false;
        self.dump_pending = false;
        self.sending = false;
        self.outbound.clear();
        self.inbound.reset();
        self.handler.on_connection_lost();
    }

    /// Asks for a heap dump. Returns `false` while the session is not
    /// established or a dump is already on its way.
    pub fn request_dump(&mut self) -> bool {
        if !self.established || self.dump_pending {
            return false;
        }
        self.dump_pending = true;
        self.send(ProtoHeader::ack(self.session_id, Command::Dump, 0));
        true
    }

    pub fn on_packet_received(&mut self, data: &[u8]) {
        if self.channel.is_none() {
            return;
        }
        self.inbound.push(data);
        while let Some(frame) = self.inbound.next_frame() {
            match frame {
                Ok((header, payload)) => self.handle_message(header, &payload),
                Err(err) => {
                    warn!(%err, "telemetry stream desync, dropping buffered input");
                    // the lost frame may have been the dump reply
                    self.dump_pending = false;
                }
            }
        }
    }

    pub fn on_packet_delivered(&mut self) {
        self.sending = false;
        self.send_next();
    }

    fn handle_message(&mut self, header: ProtoHeader, payload: &[u8]) {
        match header.command {
            Command::InitComm => self.session_started(header, payload),
            Command::CurStat => match StatSnapshot::decode(payload) {
                Ok(snapshot) => self.handler.on_stat(snapshot),
                Err(err) => debug!(%err, "skipping undecodable snapshot"),
            },
            Command::Dump => {
                self.dump_pending = false;
                if header.status == Status::Error {
                    warn!("server could not build the heap dump");
                    return;
                }
                match Dump::decode(payload) {
                    Ok(dump) => self.handler.on_dump(dump),
                    Err(err) => debug!(%err, "skipping undecodable heap dump"),
                }
            }
        }
    }

    fn session_started(&mut self, header: ProtoHeader, payload: &[u8]) {
        if header.length > 0 {
            match StatConfig::decode(payload) {
                Ok(config) => self.config = Some(config),
                Err(err) => {
                    debug!(%err, "skipping undecodable stat config");
                    self.config = None;
                }
            }
        }
        let resumed = header.length == 0;
        self.session_id = header.session_id;
        self.established = true;
        info!(session_id = self.session_id, resumed, "telemetry session established");
        self.handler.on_session(self.session_id, self.config.as_ref());
    }

    fn send(&mut self, header: ProtoHeader) {
        self.outbound.push_back(header.to_bytes());
        self.send_next();
    }

    fn send_next(&mut self) {
        if self.sending {
            return;
        }
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let Some(request) = self.outbound.pop_front() else {
            return;
        };
        match channel.send(&request) {
            Ok(()) => self.sending = true,
            Err(err) => {
                warn!(%err, "telemetry send failed");
                self.on_channel_closed("send failed");
            }
        }
    }
}
