//! ## memwatch-cli::report
//! **Viewer output**
//!
//! Prints one line per snapshot and, for a heap dump, the call sites
//! holding the most live bytes.

use std::collections::HashMap;
use std::sync::Arc;

use memwatch_protocol::{Dump, StatConfig, StatSnapshot};
use memwatch_telemetry::ClientHandler;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Frames printed per call site.
const FRAMES_SHOWN: usize = 4;

#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressState {
    pub stats: usize,
    pub dumps: usize,
    pub lost: bool,
}

/// What the viewer task has received so far, shared with the command.
#[derive(Clone, Default)]
pub struct Progress {
    state: Arc<Mutex<ProgressState>>,
    changed: Arc<Notify>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut ProgressState)) {
        f(&mut self.state.lock());
        self.changed.notify_waiters();
    }

    pub async fn wait_until(&self, done: impl Fn(&ProgressState) -> bool) {
        loop {
            let changed = self.changed.notified();
            if done(&self.state.lock()) {
                return;
            }
            changed.await;
        }
    }
}

pub struct Report {
    progress: Progress,
    top: usize,
    pool_names: Vec<String>,
}

impl Report {
    pub fn new(progress: Progress, top: usize) -> Self {
        Self {
            progress,
            top,
            pool_names: Vec::new(),
        }
    }

    pub fn finish(&self) {
        let state = *self.progress.state.lock();
        println!(
            "received {} snapshots and {} dumps{}",
            state.stats,
            state.dumps,
            if state.lost { ", connection lost" } else { "" }
        );
    }

    fn pool_name(&self, index: usize) -> String {
        self.pool_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("pool{index}"))
    }
}

impl ClientHandler for Report {
    fn on_session(&mut self, session_id: u32, config: Option<&StatConfig>) {
        if let Some(config) = config {
            self.pool_names = config.pools.iter().map(|n| n.as_str().into_owned()).collect();
            let tags: Vec<_> = config.tags.iter().map(|n| n.as_str()).collect();
            let markers: Vec<_> = config.markers.iter().map(|n| n.as_str()).collect();
            println!(
                "session {session_id:#010x}: pools [{}], tags [{}], markers [{}]",
                self.pool_names.join(", "),
                tags.join(", "),
                markers.join(", ")
            );
        } else {
            println!("session {session_id:#010x} resumed");
        }
    }

    fn on_stat(&mut self, snapshot: StatSnapshot) {
        let head = &snapshot.head;
        let pools: Vec<String> = (0..head.alloc_pool_count as usize)
            .filter_map(|pool| {
                let stat = snapshot.pool_stat(0, pool)?;
                (stat.block_count > 0).then(|| {
                    format!(
                        "{}={}/{}",
                        self.pool_name(pool),
                        stat.block_count,
                        human_bytes(stat.alloc_by_app)
                    )
                })
            })
            .collect();
        println!(
            "{:>8}ms seq={} depth={} real={} internal={} ghosts={} | {}",
            head.timestamp,
            head.alloc_count,
            head.tags.depth,
            human_bytes(head.general.real_size),
            human_bytes(head.general.alloc_internal),
            head.general.ghost_block_count,
            pools.join(" ")
        );
        self.progress.update(|state| state.stats += 1);
    }

    fn on_dump(&mut self, dump: Dump) {
        let header = &dump.header;
        println!(
            "heap dump: {} blocks, {} call sites, {} symbols, built in {}ms",
            header.block_count,
            header.fingerprint_count,
            header.symbol_count,
            header.timestamp_end.saturating_sub(header.timestamp_begin)
        );
        for (rank, site) in summarize_dump(&dump, self.top).iter().enumerate() {
            println!(
                "#{:<3} {:>10} in {:>6} blocks  [{:08x}]",
                rank + 1,
                human_bytes(site.bytes),
                site.blocks,
                site.fingerprint_hash
            );
            for frame in &site.frames {
                println!("       {frame}");
            }
        }
        self.progress.update(|state| state.dumps += 1);
    }

    fn on_connection_lost(&mut self) {
        self.progress.update(|state| state.lost = true);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub fingerprint_hash: u32,
    pub blocks: usize,
    pub bytes: u64,
    pub frames: Vec<String>,
}

/// Live bytes grouped by call site, largest first. Blocks without a
/// fingerprint share hash 0.
pub fn summarize_dump(dump: &Dump, top: usize) -> Vec<CallSite> {
    let mut totals: HashMap<u32, (usize, u64)> = HashMap::new();
    for block in &dump.blocks {
        let entry = totals.entry(block.fingerprint_hash).or_default();
        entry.0 += 1;
        entry.1 += u64::from(block.alloc_by_app);
    }

    let mut sites: Vec<CallSite> = totals
        .into_iter()
        .map(|(hash, (blocks, bytes))| CallSite {
            fingerprint_hash: hash,
            blocks,
            bytes,
            frames: frames_of(dump, hash),
        })
        .collect();
    sites.sort_by(|a, b| {
        b.bytes
            .cmp(&a.bytes)
            .then(a.fingerprint_hash.cmp(&b.fingerprint_hash))
    });
    sites.truncate(top);
    sites
}

fn frames_of(dump: &Dump, hash: u32) -> Vec<String> {
    let Some(fingerprint) = dump.fingerprint(hash) else {
        return Vec::new();
    };
    fingerprint
        .frames()
        .take(FRAMES_SHOWN)
        .map(|addr| match dump.symbol(addr) {
            Some(symbol) => symbol.name(),
            None => format!("{addr:#x}"),
        })
        .collect()
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
