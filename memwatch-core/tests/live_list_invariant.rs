//! Walking the live list must always agree with the statistics tables.

use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use memwatch_core::{AllocPool, Tracker};

#[derive(Clone, Debug)]
enum Op {
    Allocate { size: usize, pool: u32 },
    Free(usize),
    Realloc { index: usize, size: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..2048, 0u32..4).prop_map(|(size, pool)| Op::Allocate { size, pool }),
        2 => any::<usize>().prop_map(Op::Free),
        1 => (any::<usize>(), 0usize..4096).prop_map(|(index, size)| Op::Realloc { index, size }),
    ]
}

fn assert_consistent(tracker: &Tracker) {
    let snapshot = tracker.stat_snapshot();
    let pool_count = snapshot.head.alloc_pool_count as usize;
    let by_pool: u64 = (0..pool_count)
        .map(|pool| snapshot.pool_stat(0, pool).map_or(0, |s| u64::from(s.block_count)))
        .sum();
    let by_marker: u64 = snapshot.markers.iter().map(|s| u64::from(s.block_count)).sum();
    let walked = tracker.live_block_count() as u64;
    assert_eq!(walked, by_pool);
    assert_eq!(walked, by_marker);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_list_matches_stats(ops in prop::collection::vec(op(), 1..200)) {
        let tracker = Tracker::new();
        tracker.set_backtrace_capture(false, 0);
        let mut live: Vec<NonNull<u8>> = Vec::new();

        for op in ops {
            match op {
                Op::Allocate { size, pool } => {
                    let pool = AllocPool::new(pool).unwrap();
                    live.push(tracker.allocate(size, pool).unwrap());
                }
                Op::Free(index) if !live.is_empty() => {
                    let block = live.swap_remove(index % live.len());
                    unsafe { tracker.deallocate(block.as_ptr()) };
                }
                Op::Realloc { index, size } if !live.is_empty() => {
                    let slot = index % live.len();
                    live[slot] = unsafe { tracker.reallocate(live[slot].as_ptr(), size) }.unwrap();
                }
                _ => {}
            }
            assert_consistent(&tracker);
        }

        for block in live {
            unsafe { tracker.deallocate(block.as_ptr()) };
        }
        prop_assert_eq!(tracker.live_block_count(), 0);
        let snapshot = tracker.stat_snapshot();
        prop_assert!(snapshot.pools.iter().all(|s| s.block_count == 0 && s.alloc_by_app == 0));
    }
}

#[test]
fn test_list_matches_stats_across_threads() {
    let tracker = Arc::new(Tracker::new());
    tracker.set_backtrace_capture(false, 0);

    let workers: Vec<_> = (0..4u32)
        .map(|worker| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                let pool = AllocPool::new(worker).unwrap();
                let mut kept = Vec::new();
                for i in 0..2_000usize {
                    let block = tracker.allocate(i % 97 + 1, pool).unwrap();
                    if i % 3 == 0 {
                        kept.push(block.as_ptr() as usize);
                    } else {
                        unsafe { tracker.deallocate(block.as_ptr()) };
                    }
                }
                kept
            })
        })
        .collect();

    let kept: Vec<usize> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    assert_eq!(tracker.live_block_count(), kept.len());
    assert_consistent(&tracker);
    assert_eq!(tracker.stat_snapshot().head.alloc_count, 1 + 4 * 2_000);

    for addr in kept {
        unsafe { tracker.deallocate(addr as *mut u8) };
    }
    assert_eq!(tracker.live_block_count(), 0);
    assert_consistent(&tracker);
}
