//! ## memwatch-cli::workload
//! **Synthetic allocation traffic for `memwatch serve --workload`**
//!
//! A fake game loop: a long-lived entity table that churns, per-frame
//! scratch buffers inside a tag scope, and a marker that advances every few
//! hundred frames. Every registered pool, tag and marker gets used.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use memwatch_core::{AllocPool, IntervalKind, PoolScope, Tracker, DEFAULT_TAG};
use rand::Rng;
use tracing::{debug, info, warn};

const FRAME_TIME: Duration = Duration::from_millis(4);
const MAX_ENTITIES: usize = 4096;
const MARKER_PERIOD: u64 = 500;
const CHECKPOINT_PERIOD: u64 = 250;

struct Entity {
    _components: Vec<u64>,
    _name: String,
}

pub struct Workload {
    tracker: &'static Tracker,
    stop: Arc<AtomicBool>,
}

impl Workload {
    pub fn new(tracker: &'static Tracker, stop: Arc<AtomicBool>) -> Self {
        Self { tracker, stop }
    }

    pub fn run(self) {
        info!(
            pools = self.tracker.pool_count(),
            tags = self.tracker.tag_count(),
            markers = self.tracker.marker_count(),
            "workload started"
        );
        let mut rng = rand::rng();
        let mut entities: VecDeque<Entity> = VecDeque::new();
        let mut frame: u64 = 0;
        self.tracker.set_interval_callback(|interval| {
            if interval.kind == IntervalKind::Checkpoint {
                let live: u32 = interval.pools.iter().map(|p| p.block_count).sum();
                debug!(id = interval.tag, end = interval.end, live, "workload checkpoint");
            }
        });

        while !self.stop.load(Ordering::Relaxed) {
            if frame % MARKER_PERIOD == 0 {
                let marker = ((frame / MARKER_PERIOD) % self.tracker.marker_count() as u64) as u32;
                if let Err(err) = self.tracker.set_active_marker(marker) {
                    warn!(%err, marker, "could not switch marker");
                }
            }

            {
                let _pool = PoolScope::enter(AllocPool::ENTITY);
                let spawned = rng.random_range(0..8);
                for _ in 0..spawned {
                    entities.push_back(spawn_entity(&mut rng, frame));
                }
                while entities.len() > MAX_ENTITIES || rng.random_bool(0.3) {
                    if entities.pop_front().is_none() {
                        break;
                    }
                }
            }

            self.run_frame(&mut rng, frame);
            if frame % CHECKPOINT_PERIOD == 0 {
                self.tracker.checkpoint((frame / CHECKPOINT_PERIOD) as u32);
            }
            frame += 1;
            thread::sleep(FRAME_TIME);
        }
        self.tracker.clear_interval_callback();
        debug!(frames = frame, live_entities = entities.len(), "workload stopped");
    }

    /// Scratch allocations inside the custom tag scopes: the first custom
    /// tag wraps the frame, the others rotate one level below it.
    fn run_frame(&self, rng: &mut impl Rng, frame: u64) {
        let custom_tags = self.tracker.tag_count() as u32 - 1;
        let _frame_scope = match custom_tags {
            0 => None,
            _ => self.tracker.tag_scope(DEFAULT_TAG + 1).ok(),
        };
        let _batch = PoolScope::enter(AllocPool::RENDER_BATCH);
        let batch: Vec<[f32; 4]> = vec![[0.0; 4]; rng.random_range(16..256)];

        let _inner = match custom_tags {
            0 | 1 => None,
            n => {
                let tag = DEFAULT_TAG + 2 + (frame % u64::from(n - 1)) as u32;
                self.tracker.tag_scope(tag).ok()
            }
        };
        let custom_pools = AllocPool::PREDEFINED..self.tracker.pool_count() as u32;
        let pool = if custom_pools.is_empty() {
            AllocPool::COMPONENT
        } else {
            self.tracker
                .pool(rng.random_range(custom_pools))
                .unwrap_or(AllocPool::COMPONENT)
        };
        let _pool = PoolScope::enter(pool);
        let scratch: Vec<u8> = vec![0; rng.random_range(64..4096)];
        std::hint::black_box((&batch, &scratch));
    }
}

#[inline(never)]
fn spawn_entity(rng: &mut impl Rng, frame: u64) -> Entity {
    let _components = PoolScope::enter(AllocPool::COMPONENT);
    Entity {
        _components: vec![frame; rng.random_range(1..32)],
        _name: format!("entity-{frame}"),
    }
}
