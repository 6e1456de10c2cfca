//! Every submitted closure runs exactly once.
//!
//! Covers single-producer batches of different sizes, many concurrent
//! producers, and a property test over ring capacity, worker count and
//! batch size.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use kiln_arena::{MemoryPartition, PartitionConfig};
use kiln_queue::{WorkQueue, WorkQueueConfig};
use proptest::prelude::*;

/// Arena large enough for any ring used here.
const ARENA_BYTES: usize = 256 * 1024;

fn partition() -> MemoryPartition {
    MemoryPartition::new(&PartitionConfig::new().with_arena("queue", ARENA_BYTES)).unwrap()
}

fn config(ring_capacity: usize, workers: usize) -> WorkQueueConfig {
    WorkQueueConfig {
        worker_count: Some(workers),
        min_threads: 0,
        ..WorkQueueConfig::with_capacity(ring_capacity)
    }
}

fn run_batch(count: usize, ring_capacity: usize, workers: usize) -> usize {
    let partition = partition();
    let counter = AtomicUsize::new(0);
    WorkQueue::scope(&partition["queue"], &config(ring_capacity, workers), |queue| {
        for _ in 0..count {
            queue.add_work(|| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        queue.wait();
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.queued(), 0);
    })
    .unwrap();
    counter.load(Ordering::Relaxed)
}

#[test]
fn single_item() {
    assert_eq!(run_batch(1, 256, 4), 1);
}

#[test]
fn ten_items() {
    assert_eq!(run_batch(10, 256, 4), 10);
}

#[test]
fn ten_thousand_items() {
    assert_eq!(run_batch(10_000, 256, 4), 10_000);
}

#[test]
fn ten_thousand_items_through_a_tiny_ring() {
    assert_eq!(run_batch(10_000, 2, 3), 10_000);
}

#[test]
fn auto_detected_workers() {
    let partition = partition();
    let counter = AtomicUsize::new(0);
    WorkQueue::scope(&partition["queue"], &WorkQueueConfig::default(), |queue| {
        assert!(queue.worker_count() >= 1);
        for _ in 0..1_000 {
            queue.add_work(|| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        queue.wait();
    })
    .unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1_000);
}

#[test]
fn concurrent_producers_each_item_runs_once() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 2_000;

    let partition = partition();
    let hits: Vec<AtomicUsize> = (0..PRODUCERS * PER_PRODUCER)
        .map(|_| AtomicUsize::new(0))
        .collect();

    let stats = WorkQueue::scope(&partition["queue"], &config(64, 4), |queue| {
        thread::scope(|s| {
            for p in 0..PRODUCERS {
                let hits = &hits;
                s.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let hit = &hits[p * PER_PRODUCER + i];
                        queue.add_work(move || {
                            hit.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                });
            }
        });
        queue.wait();
        queue.stats()
    })
    .unwrap();

    assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    assert_eq!(stats.submitted, (PRODUCERS * PER_PRODUCER) as u64);
    assert_eq!(stats.completed, stats.submitted);
}

#[test]
fn several_threads_wait_concurrently() {
    let partition = partition();
    let counter = AtomicUsize::new(0);
    WorkQueue::scope(&partition["queue"], &config(32, 2), |queue| {
        for _ in 0..5_000 {
            queue.add_work(|| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| queue.wait());
            }
        });
        assert_eq!(queue.pending(), 0);
    })
    .unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 5_000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_item_runs_once(
        ring_capacity in 2usize..64,
        workers in 1usize..4,
        count in 0usize..500,
    ) {
        prop_assert_eq!(run_batch(count, ring_capacity, workers), count);
    }
}
