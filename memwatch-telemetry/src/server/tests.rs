use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memwatch_core::{AllocPool, ContractViolation, Tracker, FULL_RANGE};
use memwatch_protocol::{Command, Dump, FrameAssembler, ProtoHeader, StatConfig, StatSnapshot};
use tracing_test::traced_test;

use super::*;
use crate::channel::BufferedChannel;
use crate::source::StatSource;

const SESSION: u32 = 42;
const CHUNK: usize = 256;

struct CountedDump {
    bytes: Vec<u8>,
    drops: Arc<AtomicUsize>,
}

impl AsRef<[u8]> for CountedDump {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsMut<[u8]> for CountedDump {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for CountedDump {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// A real tracker whose dumps count their releases.
struct CountingSource {
    tracker: Tracker,
    drops: Arc<AtomicUsize>,
}

impl CountingSource {
    fn new() -> Self {
        let tracker = Tracker::new();
        tracker.set_backtrace_capture(false, 0);
        Self {
            tracker,
            drops: Arc::default(),
        }
    }
}

impl StatSource for CountingSource {
    type Dump = CountedDump;

    fn calc_stat_config_size(&self) -> usize {
        self.tracker.calc_stat_config_size()
    }

    fn get_stat_config(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        self.tracker.get_stat_config(buf)
    }

    fn calc_stat_size(&self) -> usize {
        self.tracker.calc_stat_size()
    }

    fn get_stat(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        self.tracker.get_stat(buf)
    }

    fn get_dump(&self, user_size: usize) -> Option<CountedDump> {
        let dump = self.tracker.get_dump(user_size, FULL_RANGE)?;
        Some(CountedDump {
            bytes: dump.as_slice().to_vec(),
            drops: Arc::clone(&self.drops),
        })
    }
}

type Server = TelemetryServer<CountingSource, BufferedChannel>;

fn server() -> Server {
    let config = ServerConfig {
        stat_period: Duration::from_millis(250),
        chunk_size: CHUNK,
        max_request_len: 64,
    };
    TelemetryServer::with_session_id(CountingSource::new(), config, SESSION)
}

fn request(session_id: u32, command: Command) -> [u8; HEADER_SIZE] {
    ProtoHeader::ack(session_id, command, 0).to_bytes()
}

/// Acknowledges every chunk until the queue drains, returning the bytes.
fn deliver_all(server: &mut Server) -> Vec<u8> {
    let mut wire = Vec::new();
    loop {
        let pending = match server.channel_mut() {
            Some(channel) => channel.take_pending(),
            None => break,
        };
        if pending.is_empty() {
            break;
        }
        for chunk in pending {
            assert!(chunk.len() <= CHUNK);
            wire.extend_from_slice(&chunk);
            server.on_packet_delivered();
        }
    }
    wire
}

fn frames(wire: &[u8]) -> Vec<(ProtoHeader, Vec<u8>)> {
    let mut assembler = FrameAssembler::new(u32::MAX);
    assembler.push(wire);
    assembler
        .map(|frame| {
            let (header, payload) = frame.unwrap();
            (header, payload.to_vec())
        })
        .collect()
}

fn active_server() -> Server {
    let mut server = server();
    server.on_channel_open(BufferedChannel::new());
    server.on_packet_received(&request(SESSION, Command::InitComm));
    deliver_all(&mut server);
    assert_eq!(server.state(), SessionState::Active);
    server
}

#[test]
fn test_scenario_c_known_session_gets_bare_ack() {
    let mut server = server();
    server.on_channel_open(BufferedChannel::new());
    server.on_packet_received(&request(SESSION, Command::InitComm));

    let frames = frames(&deliver_all(&mut server));
    assert_eq!(frames.len(), 1);
    let (header, payload) = &frames[0];
    assert_eq!(header.command, Command::InitComm);
    assert_eq!(header.status, Status::Ack);
    assert_eq!(header.length, 0);
    assert!(payload.is_empty());
}

#[test]
fn test_scenario_c_new_session_gets_descriptor() {
    let mut server = server();
    server.on_channel_open(BufferedChannel::new());
    server.on_packet_received(&request(7, Command::InitComm));

    let frames = frames(&deliver_all(&mut server));
    let (header, payload) = &frames[0];
    assert_eq!(header.session_id, SESSION);
    assert_eq!(header.status, Status::Ack);
    assert!(header.length > 0);
    let config = StatConfig::decode(payload).unwrap();
    assert_eq!(config.pools.len(), AllocPool::PREDEFINED as usize);
}

#[test]
fn test_session_activates_on_delivery() {
    let mut server = server();
    assert_eq!(server.state(), SessionState::Closed);
    server.on_channel_open(BufferedChannel::new());
    server.on_packet_received(&request(0, Command::InitComm));
    assert_eq!(server.state(), SessionState::Handshaking);

    // no snapshots before the handshake is delivered
    server.update(Duration::from_secs(1));
    assert_eq!(server.queued_parcels(), 1);

    deliver_all(&mut server);
    assert_eq!(server.state(), SessionState::Active);
}

#[test]
fn test_snapshots_follow_the_period() {
    let mut server = active_server();
    server.update(Duration::from_millis(100));
    server.update(Duration::from_millis(100));
    assert_eq!(server.queued_parcels(), 0);
    server.update(Duration::from_millis(100));
    assert_eq!(server.queued_parcels(), 1);

    let frames = frames(&deliver_all(&mut server));
    let (header, payload) = &frames[0];
    assert_eq!(header.command, Command::CurStat);
    let snapshot = StatSnapshot::decode(payload).unwrap();
    let expected = server.source().tracker.stat_snapshot();
    assert_eq!(snapshot.pools, expected.pools);
    assert_eq!(snapshot.markers, expected.markers);
}

#[test]
fn test_dump_streams_in_chunks_and_is_released() {
    let mut server = active_server();
    let tracker = &server.source().tracker;
    let blocks: Vec<_> = (0..40)
        .map(|_| tracker.allocate(24, AllocPool::ENTITY).unwrap())
        .collect();

    server.on_packet_received(&request(SESSION, Command::Dump));
    let wire = deliver_all(&mut server);
    assert!(wire.len() > 4 * CHUNK);

    let frames = frames(&wire);
    assert_eq!(frames.len(), 1);
    let (header, payload) = &frames[0];
    assert_eq!(header.command, Command::Dump);
    assert_eq!(header.length as usize, payload.len());
    let dump = Dump::decode(payload).unwrap();
    assert_eq!(dump.header.block_count, 40);
    assert!(dump.header.timestamp_end >= dump.header.timestamp_begin);
    assert_eq!(server.source().drops.load(Ordering::SeqCst), 1);

    for block in blocks {
        unsafe { server.source().tracker.deallocate(block.as_ptr()) };
    }
}

#[test]
fn test_close_discards_queue() {
    let mut server = active_server();
    let tracker = &server.source().tracker;
    let blocks: Vec<_> = (0..40)
        .map(|_| tracker.allocate(24, AllocPool::ENTITY).unwrap())
        .collect();

    server.on_packet_received(&request(SESSION, Command::Dump));
    server.update(Duration::from_secs(1));
    assert_eq!(server.queued_parcels(), 2);

    // first chunk only
    let first = server.channel_mut().unwrap().take_pending();
    assert_eq!(first.len(), 1);
    server.on_packet_delivered();

    server.on_channel_closed("viewer went away");
    assert_eq!(server.state(), SessionState::Closed);
    assert_eq!(server.queued_parcels(), 0);
    assert_eq!(server.source().drops.load(Ordering::SeqCst), 1);
    // late notifications are harmless
    server.on_packet_delivered();
    server.update(Duration::from_secs(1));
    assert_eq!(server.queued_parcels(), 0);

    // a new connection handshakes again
    server.on_channel_open(BufferedChannel::new());
    assert_eq!(server.state(), SessionState::Handshaking);

    for block in blocks {
        unsafe { server.source().tracker.deallocate(block.as_ptr()) };
    }
}

#[test]
fn test_dump_before_handshake_is_dropped() {
    let metrics = TelemetryMetrics::new().unwrap();
    let mut server = server().with_metrics(metrics.clone());
    server.on_channel_open(BufferedChannel::new());
    server.on_packet_received(&request(SESSION, Command::Dump));
    assert_eq!(server.queued_parcels(), 0);
    assert_eq!(metrics.protocol_errors.get(), 1);
}

#[traced_test]
#[test]
fn test_desync_is_logged_and_survived() {
    let metrics = TelemetryMetrics::new().unwrap();
    let mut server = server().with_metrics(metrics.clone());
    server.on_channel_open(BufferedChannel::new());

    let mut bogus = request(SESSION, Command::InitComm);
    bogus[4..8].copy_from_slice(&99u32.to_be_bytes());
    server.on_packet_received(&bogus);
    assert!(logs_contain("desync"));
    assert_eq!(server.queued_parcels(), 0);

    let oversized = ProtoHeader::ack(SESSION, Command::InitComm, 1 << 20).to_bytes();
    server.on_packet_received(&oversized);
    assert_eq!(metrics.protocol_errors.get(), 2);
    // the rejected payload is skipped, not parsed as headers
    for _ in 0..16 {
        server.on_packet_received(&[0xff; 1 << 16]);
    }
    assert_eq!(metrics.protocol_errors.get(), 2);

    server.on_packet_received(&request(SESSION, Command::InitComm));
    deliver_all(&mut server);
    assert_eq!(server.state(), SessionState::Active);
}

#[test]
fn test_requests_split_across_packets() {
    let mut server = server();
    server.on_channel_open(BufferedChannel::new());
    let handshake = request(SESSION, Command::InitComm);
    server.on_packet_received(&handshake[..5]);
    assert_eq!(server.queued_parcels(), 0);
    server.on_packet_received(&handshake[5..]);
    assert_eq!(server.queued_parcels(), 1);
}

#[test]
fn test_metrics_count_delivered_parcels() {
    let metrics = TelemetryMetrics::new().unwrap();
    let mut server = server().with_metrics(metrics.clone());
    server.on_channel_open(BufferedChannel::new());
    server.on_packet_received(&request(SESSION, Command::InitComm));
    let handshake = deliver_all(&mut server);

    server.update(Duration::from_secs(1));
    let snapshot = deliver_all(&mut server);
    server.on_packet_received(&request(SESSION, Command::Dump));
    let dump = deliver_all(&mut server);

    assert_eq!(metrics.sessions.get(), 1);
    assert_eq!(metrics.snapshots_sent.get(), 1);
    assert_eq!(metrics.dumps_sent.get(), 1);
    assert_eq!(
        metrics.bytes_sent.get() as usize,
        handshake.len() + snapshot.len() + dump.len()
    );
    assert_eq!(metrics.queued_parcels.get(), 0);
}
