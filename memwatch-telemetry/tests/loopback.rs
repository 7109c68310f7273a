//! Server and client wired back to back through in-memory channels.

use std::sync::Arc;
use std::time::Duration;

use memwatch_core::{AllocPool, Tracker};
use memwatch_protocol::{Dump, StatConfig, StatSnapshot};
use memwatch_telemetry::{
    BufferedChannel, ClientHandler, ServerConfig, SessionState, TelemetryClient, TelemetryServer,
};
use proptest::prelude::*;

#[derive(Default)]
struct Viewer {
    sessions: Vec<u32>,
    pool_names: Vec<String>,
    stats: Vec<StatSnapshot>,
    dumps: Vec<Dump>,
}

impl ClientHandler for Viewer {
    fn on_session(&mut self, session_id: u32, config: Option<&StatConfig>) {
        self.sessions.push(session_id);
        if let Some(config) = config {
            self.pool_names = config.pools.iter().map(|n| n.as_str().into_owned()).collect();
        }
    }

    fn on_stat(&mut self, snapshot: StatSnapshot) {
        self.stats.push(snapshot);
    }

    fn on_dump(&mut self, dump: Dump) {
        self.dumps.push(dump);
    }
}

type Server = TelemetryServer<Arc<Tracker>, BufferedChannel>;
type Client = TelemetryClient<Viewer, BufferedChannel>;

fn pump(server: &mut Server, client: &mut Client) {
    loop {
        let to_client = server
            .channel_mut()
            .map(|c| c.take_pending())
            .unwrap_or_default();
        let to_server = client
            .channel_mut()
            .map(|c| c.take_pending())
            .unwrap_or_default();
        if to_client.is_empty() && to_server.is_empty() {
            return;
        }
        for chunk in to_client {
            client.on_packet_received(&chunk);
            server.on_packet_delivered();
        }
        for chunk in to_server {
            server.on_packet_received(&chunk);
            client.on_packet_delivered();
        }
    }
}

fn connect(server: &mut Server, client: &mut Client) {
    server.on_channel_open(BufferedChannel::new());
    client.on_channel_open(BufferedChannel::new());
    pump(server, client);
}

#[inline(never)]
fn allocate_entities(tracker: &Tracker, count: usize) -> Vec<std::ptr::NonNull<u8>> {
    (0..count)
        .map(|i| tracker.allocate(32 + i, AllocPool::ENTITY).unwrap())
        .collect()
}

#[test]
fn test_session_snapshot_and_dump() {
    let tracker = Arc::new(Tracker::new());
    tracker.register_pool_name(4, "scratch").unwrap();
    let config = ServerConfig {
        chunk_size: 512,
        ..ServerConfig::default()
    };
    let mut server = TelemetryServer::with_session_id(Arc::clone(&tracker), config, 900);
    let mut client = TelemetryClient::new(Viewer::default(), 64 << 20);

    connect(&mut server, &mut client);
    assert_eq!(server.state(), SessionState::Active);
    assert_eq!(client.handler().sessions, vec![900]);
    assert_eq!(client.handler().pool_names[4], "scratch");

    let blocks = allocate_entities(&tracker, 25);
    server.update(Duration::from_millis(300));
    pump(&mut server, &mut client);
    let snapshot = client.handler().stats.last().unwrap();
    let entity = snapshot.pool_stat(0, AllocPool::ENTITY.index() as usize).unwrap();
    assert_eq!(entity.block_count, 25);

    assert!(client.request_dump());
    pump(&mut server, &mut client);
    assert!(!client.dump_pending());
    let dump = &client.handler().dumps[0];
    assert_eq!(dump.header.block_count as usize, 25);
    assert!(dump
        .blocks
        .iter()
        .all(|block| dump.fingerprint(block.fingerprint_hash).is_some()));
    assert!(!dump.symbols.is_empty());

    for block in blocks {
        unsafe { tracker.deallocate(block.as_ptr()) };
    }
}

#[test]
fn test_reconnect_resumes_session() {
    let tracker = Arc::new(Tracker::new());
    tracker.set_backtrace_capture(false, 0);
    let mut server = TelemetryServer::with_session_id(tracker, ServerConfig::default(), 31);
    let mut client = TelemetryClient::new(Viewer::default(), 1 << 20);

    connect(&mut server, &mut client);
    let pools = client.handler().pool_names.clone();

    server.on_channel_closed("viewer restarted");
    client.on_channel_closed("viewer restarted");
    assert_eq!(server.state(), SessionState::Closed);

    connect(&mut server, &mut client);
    assert_eq!(server.state(), SessionState::Active);
    assert_eq!(client.handler().sessions, vec![31, 31]);
    assert_eq!(client.config().map(|c| c.pools.len()), Some(pools.len()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_dump_survives_any_chunk_size(chunk_size in 1usize..2048, blocks in 0usize..50) {
        let tracker = Arc::new(Tracker::new());
        tracker.set_backtrace_capture(false, 0);
        let held: Vec<_> = (0..blocks)
            .map(|i| tracker.allocate(8 + i, AllocPool::COMPONENT).unwrap())
            .collect();
        let config = ServerConfig {
            chunk_size,
            ..ServerConfig::default()
        };
        let mut server = TelemetryServer::with_session_id(Arc::clone(&tracker), config, 1);
        let mut client = TelemetryClient::new(Viewer::default(), 1 << 24);

        connect(&mut server, &mut client);
        prop_assert!(client.request_dump());
        pump(&mut server, &mut client);

        let dump = &client.handler().dumps[0];
        prop_assert_eq!(dump.header.block_count as usize, blocks);
        let total: u64 = dump.blocks.iter().map(|b| u64::from(b.alloc_by_app)).sum();
        prop_assert_eq!(total, (0..blocks as u64).map(|i| 8 + i).sum::<u64>());

        for block in held {
            unsafe { tracker.deallocate(block.as_ptr()) };
        }
    }
}
