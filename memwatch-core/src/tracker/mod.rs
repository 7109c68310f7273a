//! ## memwatch-core::tracker
//! **The allocation tracker.**
//!
//! Owns the live-block list, the statistics tables, the tag-scope stack and
//! the fingerprint and symbol caches. All of it is reached through three
//! independent spin locks, always taken in the order
//! `symbols -> fingerprints -> state`:
//!
//! - `state`: list, sequence counter, tag stack, statistics. Held only for a
//!   handful of pointer and counter updates; nothing allocates under it.
//! - `fingerprints`: the set of unique call sites.
//! - `symbols`: resolved return addresses.
//!
//! Work that allocates on the tracker's behalf (interning, symbol
//! resolution, dump building) runs inside an internal scope, so when this
//! tracker is the process allocator those allocations take the internal
//! path instead of recursing.

mod dump;
mod registry;
mod stats;


use std::ops::Range;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use memwatch_protocol::{
    BlockRecord, DumpHeader, FingerprintRecord, PoolStat, ProtocolError, StatConfig, StatHead,
    StatSnapshot, SymbolRecord, TagStack, MAX_ALLOC_POOL_COUNT, MAX_MARKER_COUNT, MAX_TAG_DEPTH,
};
use nohash_hasher::IntSet;
use spin::{Mutex, RwLock};

use crate::alloc::block::{self, BlockHeader, BlockInit, BlockLayout, BLOCK_ALIGN};
use crate::alloc::list::LiveList;
use crate::alloc::raw::{RawAllocator, SystemAllocator};
use crate::error::ContractViolation;
use crate::fingerprint::{Fingerprint, FingerprintSet};
use crate::pool::{AllocPool, DEFAULT_MARKER, DEFAULT_TAG};
use crate::reentry;
use crate::symbols::{BacktraceSymbolizer, SymbolCache, Symbolizer};

pub use dump::DumpBuffer;
use registry::Registry;
use stats::{BlockCharge, StatTables};

/// Frames dropped from the top of every fingerprint by default: the
/// tracker's own capture and allocation functions.
pub const DEFAULT_BACKTRACE_SKIP: usize = 2;

/// Every sequence number; pass to [`Tracker::get_dump`] for a full dump.
pub const FULL_RANGE: Range<u32> = 0..u32::MAX;

/// Times [`Tracker::get_dump`] re-sizes its block copy when the live list
/// outgrows it between sizing and copying.
const DUMP_ATTEMPTS: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntervalKind {
    /// A tag scope was left.
    Tag,
    /// [`Tracker::checkpoint`] was called.
    Checkpoint,
}

/// Delivered to the interval callback when a tag scope closes or a
/// checkpoint is taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TagInterval {
    pub kind: IntervalKind,
    /// Tag id, or the checkpoint id.
    pub tag: u32,
    /// First sequence number of the interval.
    pub begin: u32,
    /// One past the last sequence number of the interval.
    pub end: u32,
    /// Per-pool totals of blocks allocated in the interval and still live
    /// when it closed.
    pub pools: [PoolStat; MAX_ALLOC_POOL_COUNT],
}

pub type IntervalCallback = Arc<dyn Fn(&TagInterval) + Send + Sync>;

struct TrackerState {
    list: LiveList,
    next_order_no: u32,
    tags: TagStack,
    stats: StatTables,
}

pub struct Tracker<A: RawAllocator = SystemAllocator, S: Symbolizer = BacktraceSymbolizer> {
    raw: A,
    symbolizer: S,
    state: Mutex<TrackerState>,
    fingerprints: Mutex<FingerprintSet>,
    symbols: Mutex<SymbolCache>,
    registry: RwLock<Registry>,
    /// Mirror of the registered pool count for the allocation path.
    pool_count: AtomicU32,
    active_marker: AtomicU32,
    capture_backtraces: AtomicBool,
    backtrace_skip: AtomicUsize,
    on_interval: RwLock<Option<IntervalCallback>>,
}

impl Tracker {
    /// A tracker over the C allocator. Does not allocate, so it can be
    /// built from inside the global allocator.
    pub fn new() -> Self {
        Self::with_parts(SystemAllocator, BacktraceSymbolizer)
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: RawAllocator, S: Symbolizer> Tracker<A, S> {
    pub fn with_parts(raw: A, symbolizer: S) -> Self {
        Self {
            raw,
            symbolizer,
            state: Mutex::new(TrackerState {
                list: LiveList::new(),
                next_order_no: 1,
                tags: TagStack::default(),
                stats: StatTables::new(),
            }),
            fingerprints: Mutex::new(FingerprintSet::new()),
            symbols: Mutex::new(SymbolCache::new()),
            registry: RwLock::new(Registry::new()),
            pool_count: AtomicU32::new(AllocPool::PREDEFINED),
            active_marker: AtomicU32::new(DEFAULT_MARKER),
            capture_backtraces: AtomicBool::new(true),
            backtrace_skip: AtomicUsize::new(DEFAULT_BACKTRACE_SKIP),
            on_interval: RwLock::new(None),
        }
    }

    pub fn raw_allocator(&self) -> &A {
        &self.raw
    }

    // ----- registries -----

    pub fn register_pool_name(&self, index: u32, name: &str) -> Result<(), ContractViolation> {
        {
            let mut registry = self.registry.write();
            registry.pools.register(index, name)?;
            self.pool_count
                .store(registry.pools.count() as u32, Ordering::Release);
        }
        tracing::debug!(index, name, "registered pool name");
        Ok(())
    }

    pub fn register_tag_name(&self, index: u32, name: &str) -> Result<(), ContractViolation> {
        self.registry.write().tags.register(index, name)?;
        tracing::debug!(index, name, "registered tag name");
        Ok(())
    }

    pub fn register_marker_name(&self, index: u32, name: &str) -> Result<(), ContractViolation> {
        self.registry.write().markers.register(index, name)?;
        tracing::debug!(index, name, "registered marker name");
        Ok(())
    }

    /// A registered pool.
    pub fn pool(&self, index: u32) -> Result<AllocPool, ContractViolation> {
        self.registry.read().pools.check(index)?;
        AllocPool::new(index)
    }

    pub fn pool_count(&self) -> usize {
        self.registry.read().pools.count()
    }

    pub fn tag_count(&self) -> usize {
        self.registry.read().tags.count()
    }

    pub fn marker_count(&self) -> usize {
        self.registry.read().markers.count()
    }

    // ----- configuration -----

    /// Turns call-site capture on or off and sets how many tracker frames
    /// to drop from each fingerprint.
    pub fn set_backtrace_capture(&self, enabled: bool, skip: usize) {
        self.capture_backtraces.store(enabled, Ordering::Relaxed);
        self.backtrace_skip.store(skip, Ordering::Relaxed);
    }

    pub fn set_active_marker(&self, marker: u32) -> Result<(), ContractViolation> {
        self.registry.read().markers.check(marker)?;
        self.active_marker.store(marker, Ordering::Relaxed);
        Ok(())
    }

    pub fn active_marker(&self) -> u32 {
        self.active_marker.load(Ordering::Relaxed)
    }

    pub fn set_interval_callback<F>(&self, callback: F)
    where
        F: Fn(&TagInterval) + Send + Sync + 'static,
    {
        let callback: IntervalCallback = Arc::new(callback);
        let previous = self.on_interval.write().replace(callback);
        drop(previous);
    }

    pub fn clear_interval_callback(&self) {
        let previous = self.on_interval.write().take();
        drop(previous);
    }

    // ----- allocation -----

    /// Allocates `size` bytes in `pool`, 16-byte aligned. Zero-size requests
    /// get a unique one-byte block. A pool that was never registered is
    /// charged to [`AllocPool::APPLICATION`]. `None` when the underlying
    /// allocator fails; no shared state is touched in that case.
    pub fn allocate(&self, size: usize, pool: AllocPool) -> Option<NonNull<u8>> {
        self.allocate_block(size, BLOCK_ALIGN, pool)
    }

    /// Like [`allocate`](Self::allocate) with a caller-chosen power-of-two
    /// alignment.
    pub fn aligned_allocate(
        &self,
        size: usize,
        align: usize,
        pool: AllocPool,
    ) -> Result<Option<NonNull<u8>>, ContractViolation> {
        if !align.is_power_of_two() {
            return Err(ContractViolation::InvalidAlignment(align));
        }
        Ok(self.allocate_block(size, align, pool))
    }

    /// Bookkeeping allocation: counted in the general record, never listed.
    pub fn allocate_internal(&self, size: usize) -> Option<NonNull<u8>> {
        self.allocate_block(size, BLOCK_ALIGN, AllocPool::INTERNAL)
    }

    #[inline(never)]
    fn allocate_block(&self, size: usize, align: usize, pool: AllocPool) -> Option<NonNull<u8>> {
        let size = size.max(1);
        let layout = BlockLayout::new(size, align)?;
        // SAFETY: plain C allocation of `layout.total` bytes.
        let real = NonNull::new(unsafe { self.raw.malloc(layout.total) })?;
        let offset = layout.user_addr(real.as_ptr() as usize) - real.as_ptr() as usize;
        // SAFETY: `offset + size <= layout.total`, inside the allocation.
        let user = unsafe { NonNull::new_unchecked(real.as_ptr().add(offset)) };

        if pool.is_internal() || reentry::is_internal() {
            // SAFETY: the header fits between `real` and `user`.
            unsafe {
                block::write_header(
                    user,
                    BlockInit {
                        real_start: real,
                        alloc_by_app: size,
                        alloc_total: layout.total,
                        pool: AllocPool::INTERNAL,
                        marker: DEFAULT_MARKER,
                        fingerprint_hash: 0,
                    },
                );
            }
            let mut state = self.state.lock();
            let general = &mut state.stats.general;
            general.alloc_internal = general.alloc_internal.wrapping_add(size as u64);
            general.internal_block_count = general.internal_block_count.wrapping_add(1);
            return Some(user);
        }

        let pool = if pool.index() < self.pool_count.load(Ordering::Acquire) {
            pool
        } else {
            AllocPool::APPLICATION
        };
        let fingerprint = self.capture_fingerprint();
        let fingerprint_hash = fingerprint.as_ref().map_or(0, Fingerprint::hash);
        let marker = self.active_marker.load(Ordering::Relaxed);
        let real_size = self.real_size(real, layout.total);
        // SAFETY: the header fits between `real` and `user`.
        let header = unsafe {
            block::write_header(
                user,
                BlockInit {
                    real_start: real,
                    alloc_by_app: size,
                    alloc_total: layout.total,
                    pool,
                    marker,
                    fingerprint_hash,
                },
            )
        };

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let order_no = state.next_order_no;
            state.next_order_no = order_no.wrapping_add(1);
            // SAFETY: fresh header, not yet visible to any other thread.
            unsafe {
                (*header.as_ptr()).order_no = order_no;
                state.list.push_front(header);
            }
            let charge = BlockCharge {
                pool: pool.index() as usize,
                marker: marker as usize,
                order_no,
                alloc_by_app: size,
                alloc_total: layout.total,
            };
            state.stats.charge(&state.tags, &charge);
            state.stats.general.real_size = state.stats.general.real_size.wrapping_add(real_size);
        }

        if let Some(fingerprint) = fingerprint {
            let _internal = reentry::enter_internal();
            self.fingerprints.lock().intern(fingerprint_hash, fingerprint);
        }
        Some(user)
    }

    #[inline(never)]
    fn capture_fingerprint(&self) -> Option<Fingerprint> {
        if !self.capture_backtraces.load(Ordering::Relaxed) {
            return None;
        }
        let _internal = reentry::enter_internal();
        let fingerprint = Fingerprint::capture(self.backtrace_skip.load(Ordering::Relaxed));
        (!fingerprint.is_empty()).then_some(fingerprint)
    }

    fn real_size(&self, real: NonNull<u8>, total: usize) -> u64 {
        // SAFETY: `real` is a live allocation of the underlying allocator.
        match unsafe { self.raw.usable_size(real.as_ptr()) } {
            0 => total as u64,
            usable => usable as u64,
        }
    }

    /// Releases a block. Pointers the tracker never handed out (ghosts) are
    /// counted and passed straight to the underlying allocator.
    ///
    /// # Safety
    /// `ptr` is null, or was returned by this tracker or its underlying
    /// allocator and has not been released yet.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        let Some(user) = NonNull::new(ptr) else {
            return;
        };
        let Some(header) = block::header_of(user) else {
            self.release_ghost(user);
            return;
        };

        let (real_start, charge, pool) = {
            let h: &BlockHeader = header.as_ref();
            (
                h.real_start,
                BlockCharge {
                    pool: h.pool as usize,
                    marker: h.marker as usize,
                    order_no: h.order_no,
                    alloc_by_app: h.alloc_by_app,
                    alloc_total: h.alloc_total,
                },
                AllocPool::from_raw(h.pool),
            )
        };

        if pool.is_internal() {
            let mut state = self.state.lock();
            let general = &mut state.stats.general;
            general.alloc_internal = general
                .alloc_internal
                .saturating_sub(charge.alloc_by_app as u64);
            general.internal_block_count = general.internal_block_count.saturating_sub(1);
        } else {
            let real_size = match NonNull::new(real_start) {
                Some(real) => self.real_size(real, charge.alloc_total),
                None => charge.alloc_total as u64,
            };
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.list.unlink(header);
            state.stats.discharge(&state.tags, &charge);
            state.stats.general.real_size = state.stats.general.real_size.saturating_sub(real_size);
        }

        block::retire(header);
        self.raw.free(real_start);
    }

    unsafe fn release_ghost(&self, ptr: NonNull<u8>) {
        let size = self.raw.usable_size(ptr.as_ptr()) as u64;
        {
            let mut state = self.state.lock();
            let general = &mut state.stats.general;
            general.ghost_block_count = general.ghost_block_count.wrapping_add(1);
            general.ghost_size = general.ghost_size.wrapping_add(size);
        }
        self.raw.free(ptr.as_ptr());
    }

    /// Resizes a block by allocate, copy and release, keeping its pool. Null
    /// allocates in the application pool; ghosts go to the underlying
    /// allocator's `realloc`. On failure the old block is left intact.
    ///
    /// # Safety
    /// Same as [`deallocate`](Self::deallocate).
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        let Some(user) = NonNull::new(ptr) else {
            return self.allocate(new_size, AllocPool::APPLICATION);
        };
        match block::header_of(user) {
            Some(header) => {
                let (old_size, pool) = {
                    let h = header.as_ref();
                    (h.alloc_by_app, AllocPool::from_raw(h.pool))
                };
                let fresh = self.allocate_block(new_size, BLOCK_ALIGN, pool)?;
                ptr::copy_nonoverlapping(user.as_ptr(), fresh.as_ptr(), old_size.min(new_size));
                self.deallocate(user.as_ptr());
                Some(fresh)
            }
            None => NonNull::new(self.raw.realloc(user.as_ptr(), new_size)),
        }
    }

    /// Bytes requested for a tracked block, 0 for anything else.
    ///
    /// # Safety
    /// Same as [`deallocate`](Self::deallocate).
    pub unsafe fn block_size(&self, ptr: *mut u8) -> usize {
        NonNull::new(ptr)
            .and_then(|user| block::header_of(user))
            .map_or(0, |header| header.as_ref().alloc_by_app)
    }

    /// Walks the live list.
    pub fn live_block_count(&self) -> usize {
        self.state.lock().list.iter().count()
    }

    /// Sequence number the next tracked block will get.
    pub fn next_order_no(&self) -> u32 {
        self.state.lock().next_order_no
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.lock().len()
    }

    pub fn reset_fingerprints(&self) {
        let _internal = reentry::enter_internal();
        self.fingerprints.lock().clear();
    }

    // ----- tag scopes -----

    /// Opens a scope for `tag`. Re-entering the tag already on top is a
    /// no-op and returns `Ok(false)`; nothing needs leaving in that case.
    pub fn enter_tag_scope(&self, tag: u32) -> Result<bool, ContractViolation> {
        if tag == DEFAULT_TAG {
            return Err(ContractViolation::DefaultTag);
        }
        self.registry.read().tags.check(tag)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let depth = state.tags.depth as usize;
        if state.tags.stack[depth] == tag {
            return Ok(false);
        }
        if depth + 1 >= MAX_TAG_DEPTH {
            return Err(ContractViolation::TagOverflow {
                depth: state.tags.depth,
            });
        }
        state.tags.depth += 1;
        state.tags.stack[depth + 1] = tag;
        state.tags.begin[depth + 1] = state.next_order_no;
        Ok(true)
    }

    /// Closes the innermost scope and reports its interval. With
    /// `Some(tag)` that does not match the innermost scope nothing happens
    /// and `Ok(None)` is returned.
    pub fn leave_tag_scope(&self, tag: Option<u32>) -> Result<Option<TagInterval>, ContractViolation> {
        let interval = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let depth = state.tags.depth as usize;
            if depth == 0 {
                return Err(ContractViolation::TagUnderflow);
            }
            let top = state.tags.stack[depth];
            if tag.is_some_and(|t| t != top) {
                return Ok(None);
            }
            let interval = TagInterval {
                kind: IntervalKind::Tag,
                tag: top,
                begin: state.tags.begin[depth],
                end: state.next_order_no,
                pools: state.stats.take_depth(depth),
            };
            state.tags.stack[depth] = 0;
            state.tags.begin[depth] = 0;
            state.tags.depth -= 1;
            interval
        };
        self.notify(&interval);
        Ok(Some(interval))
    }

    /// Reports everything allocated so far as a checkpoint interval.
    pub fn checkpoint(&self, id: u32) -> TagInterval {
        let interval = {
            let state = self.state.lock();
            TagInterval {
                kind: IntervalKind::Checkpoint,
                tag: id,
                begin: 0,
                end: state.next_order_no,
                pools: state.stats.pools[0],
            }
        };
        self.notify(&interval);
        interval
    }

    /// Enters `tag` and leaves it again when the guard drops. A guard for
    /// the tag already on top leaves nothing, so the enclosing scope stays
    /// open until its own guard drops.
    pub fn tag_scope(&self, tag: u32) -> Result<TagScope<'_, A, S>, ContractViolation> {
        let armed = self.enter_tag_scope(tag)?;
        Ok(TagScope {
            tracker: self,
            tag,
            armed,
        })
    }

    pub fn tag_stack(&self) -> TagStack {
        self.state.lock().tags
    }

    fn notify(&self, interval: &TagInterval) {
        let callback = self.on_interval.read().clone();
        if let Some(callback) = callback {
            callback(interval);
        }
    }

    // ----- snapshots -----

    pub fn stat_config(&self) -> StatConfig {
        let registry = *self.registry.read();
        StatConfig::new(
            registry.tags.names().to_vec(),
            registry.pools.names().to_vec(),
            registry.markers.names().to_vec(),
        )
    }

    pub fn calc_stat_config_size(&self) -> usize {
        let registry = self.registry.read();
        StatConfig::size_for(
            registry.tags.count(),
            registry.pools.count(),
            registry.markers.count(),
        )
    }

    /// Encodes the stat config into `buf`, returning the bytes written.
    pub fn get_stat_config(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        let config = self.stat_config();
        let mut dst = buf;
        config.encode(&mut dst)?;
        Ok(config.encoded_size())
    }

    pub fn calc_stat_size(&self) -> usize {
        let (pools, markers) = {
            let registry = self.registry.read();
            (registry.pools.count(), registry.markers.count())
        };
        let depth = self.state.lock().tags.depth as usize;
        StatSnapshot::size_for(depth, pools, markers)
    }

    /// Encodes the current statistics into `buf`, returning the bytes
    /// written. The tag depth can change between
    /// [`calc_stat_size`](Self::calc_stat_size) and this call; a buffer that
    /// turns out too small is reported, never partially written.
    pub fn get_stat(&self, buf: &mut [u8]) -> Result<usize, ContractViolation> {
        let captured = self.capture_stat();
        let mut dst = buf;
        captured
            .head
            .encode_with(&mut dst, captured.pools(), captured.markers())?;
        Ok(captured.head.encoded_size())
    }

    /// The current statistics as an owned snapshot.
    pub fn stat_snapshot(&self) -> StatSnapshot {
        let captured = self.capture_stat();
        StatSnapshot {
            head: captured.head,
            pools: captured.pools().to_vec(),
            markers: captured.markers().to_vec(),
        }
    }

    fn capture_stat(&self) -> CapturedStat {
        let (pool_count, marker_count) = {
            let registry = self.registry.read();
            (registry.pools.count(), registry.markers.count())
        };
        let mut captured = CapturedStat {
            head: StatHead::default(),
            pools: [PoolStat::default(); MAX_TAG_DEPTH * MAX_ALLOC_POOL_COUNT],
            markers: [PoolStat::default(); MAX_MARKER_COUNT],
        };
        let state = self.state.lock();
        captured.head = StatHead {
            timestamp: 0,
            alloc_count: state.next_order_no,
            alloc_pool_count: pool_count as u32,
            marker_count: marker_count as u32,
            tags: state.tags,
            general: state.stats.general,
        };
        let mut n = 0;
        for depth in 0..=state.tags.depth as usize {
            for pool in 0..pool_count {
                captured.pools[n] = state.stats.pools[depth][pool];
                n += 1;
            }
        }
        captured.markers = state.stats.markers;
        captured
    }

    /// Resolves the frames of the given call sites not looked up before.
    fn resolve_symbols(&self, sites: &IntSet<u32>) {
        let pending: Vec<usize> = {
            let symbols = self.symbols.lock();
            let fingerprints = self.fingerprints.lock();
            let mut pending: Vec<usize> = sites
                .iter()
                .filter_map(|&hash| fingerprints.get(hash))
                .flat_map(Fingerprint::frames)
                .filter(|&addr| !symbols.contains(addr))
                .collect();
            pending.sort_unstable();
            pending.dedup();
            pending
        };
        for addr in pending {
            let name = self.symbolizer.resolve(addr);
            self.symbols.lock().insert(addr, name);
        }
    }
}

impl<A: RawAllocator + Clone, S: Symbolizer> Tracker<A, S> {
    /// Builds a heap dump of the live blocks whose sequence numbers fall in
    /// `range`, the fingerprints of their call sites and the resolved
    /// symbols of those fingerprints. The first `user_size` bytes are left
    /// zeroed for the caller. `None` when the underlying allocator cannot
    /// provide the buffer.
    ///
    /// `state` is held only while the blocks are copied out; the dump
    /// buffer is allocated and filled with every lock released.
    pub fn get_dump(&self, user_size: usize, range: Range<u32>) -> Option<DumpBuffer<A>> {
        let _internal = reentry::enter_internal();
        let (blocks, block_end) = self.copy_blocks(&range)?;
        let sites: IntSet<u32> = blocks
            .iter()
            .map(|block| block.fingerprint_hash)
            .filter(|&hash| hash != 0)
            .collect();
        self.resolve_symbols(&sites);
        let (fingerprints, symbols) = self.dump_call_sites(&sites);

        let header = DumpHeader {
            timestamp_begin: 0,
            timestamp_end: 0,
            block_begin: range.start,
            block_end,
            block_count: blocks.len() as u32,
            fingerprint_count: fingerprints.len() as u32,
            symbol_count: symbols.len() as u32,
        };
        let len = user_size.checked_add(header.payload_size())?;
        let mut dump = DumpBuffer::zeroed(self.raw.clone(), len, user_size)?;

        let written = write_dump(dump.payload_mut(), &header, &blocks, &fingerprints, &symbols);
        if let Err(err) = written {
            tracing::error!(%err, "heap dump overran its buffer");
            return None;
        }
        Some(dump)
    }

    /// Records of the live blocks in `range`, newest first, and the end of
    /// the sequence range they were taken from. The copy is sized with
    /// `state` released since allocating under it would recurse into it.
    fn copy_blocks(&self, range: &Range<u32>) -> Option<(Vec<BlockRecord>, u32)> {
        let mut estimate = blocks_in(&self.state.lock().list, range).count();
        for _ in 0..DUMP_ATTEMPTS {
            let mut blocks = Vec::with_capacity(estimate + estimate / 8 + 16);
            let state = self.state.lock();
            let mut complete = true;
            for block in blocks_in(&state.list, range) {
                if blocks.len() == blocks.capacity() {
                    complete = false;
                    break;
                }
                blocks.push(block_record(block));
            }
            if complete {
                let block_end = range.end.min(state.next_order_no);
                drop(state);
                return Some((blocks, block_end));
            }
            estimate = blocks_in(&state.list, range).count();
            drop(state);
        }
        tracing::warn!(
            attempts = DUMP_ATTEMPTS,
            "live list kept outgrowing the heap dump copy"
        );
        None
    }

    /// Fingerprints of `sites` and the resolved symbols of their frames.
    fn dump_call_sites(&self, sites: &IntSet<u32>) -> (Vec<FingerprintRecord>, Vec<SymbolRecord>) {
        let symbols = self.symbols.lock();
        let fingerprints = self.fingerprints.lock();
        let mut frames: IntSet<usize> = IntSet::default();
        let records: Vec<FingerprintRecord> = fingerprints
            .iter()
            .filter(|(hash, _)| sites.contains(hash))
            .map(|(hash, fingerprint)| {
                frames.extend(fingerprint.frames());
                fingerprint.to_record(hash)
            })
            .collect();
        let names: Vec<SymbolRecord> = symbols
            .resolved()
            .filter(|(addr, _)| frames.contains(addr))
            .map(|(addr, name)| SymbolRecord::new(addr as u64, name))
            .collect();
        (records, names)
    }

    /// Releases a dump through the allocator that built it.
    pub fn free_dump(&self, dump: DumpBuffer<A>) {
        drop(dump);
    }
}

/// Guard returned by [`Tracker::tag_scope`].
#[must_use]
pub struct TagScope<'a, A: RawAllocator, S: Symbolizer> {
    tracker: &'a Tracker<A, S>,
    tag: u32,
    armed: bool,
}

impl<A: RawAllocator, S: Symbolizer> Drop for TagScope<'_, A, S> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.tracker.leave_tag_scope(Some(self.tag));
        }
    }
}

struct CapturedStat {
    head: StatHead,
    pools: [PoolStat; MAX_TAG_DEPTH * MAX_ALLOC_POOL_COUNT],
    markers: [PoolStat; MAX_MARKER_COUNT],
}

impl CapturedStat {
    fn pools(&self) -> &[PoolStat] {
        &self.pools[..self.head.pool_record_count()]
    }

    fn markers(&self) -> &[PoolStat] {
        &self.markers[..self.head.marker_count as usize]
    }
}

/// Live blocks with `range.start <= order_no < range.end`, newest first.
fn blocks_in<'a>(list: &'a LiveList, range: &Range<u32>) -> impl Iterator<Item = &'a BlockHeader> {
    let Range { start, end } = *range;
    list.iter()
        .skip_while(move |b| b.order_no >= end)
        .take_while(move |b| b.order_no >= start)
}

fn block_record(block: &BlockHeader) -> BlockRecord {
    let user = block::user_ptr(NonNull::from(block));
    BlockRecord {
        addr: user.as_ptr() as u64,
        alloc_by_app: u32::try_from(block.alloc_by_app).unwrap_or(u32::MAX),
        alloc_total: u32::try_from(block.alloc_total).unwrap_or(u32::MAX),
        order_no: block.order_no,
        pool: block.pool,
        fingerprint_hash: block.fingerprint_hash,
        marker: block.marker,
    }
}

fn write_dump(
    mut dst: &mut [u8],
    header: &DumpHeader,
    blocks: &[BlockRecord],
    fingerprints: &[FingerprintRecord],
    symbols: &[SymbolRecord],
) -> Result<(), ProtocolError> {
    header.encode(&mut dst)?;
    for block in blocks {
        block.encode(&mut dst)?;
    }
    for fingerprint in fingerprints {
        fingerprint.encode(&mut dst)?;
    }
    for symbol in symbols {
        symbol.encode(&mut dst)?;
    }
    Ok(())
}
