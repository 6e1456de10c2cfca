//! Lock-free ring of closures drained by a fixed pool of workers.
//!
//! Producers and consumers coordinate through two monotonically increasing
//! cursors: `add_pos` counts claimed submissions, `exec_pos` counts claimed
//! executions. Position `p` lives in slot `p % capacity`. A cursor is
//! advanced with a CAS and the winner then owns that position's slot
//! through the slot publish protocol. The ring holds at most `capacity - 1`
//! queued items; a producer that finds it full spins until a consumer
//! advances `exec_pos`.
//!
//! Idle workers park on a [`Semaphore`]. A producer releases a permit only
//! when it observes a parked worker, and a worker re-checks the cursors
//! after announcing itself as parked, so a submission can never slip
//! between the check and the park.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crossbeam_utils::{Backoff, CachePadded};
use kiln_arena::Arena;
use parking_lot::Mutex;

use crate::config::WorkQueueConfig;
use crate::error::QueueError;
use crate::semaphore::Semaphore;
use crate::slot::{Job, Slot};

/// Snapshot of queue counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Closures accepted by `add_work` so far.
    pub submitted: u64,
    /// Closures that finished running (including ones that panicked).
    pub completed: u64,
    /// Submitted but not yet completed.
    pub pending: usize,
    /// Sitting in the ring, not yet claimed by a consumer.
    pub queued: usize,
    /// Workers currently parked on the semaphore.
    pub parked_workers: usize,
    /// Background worker threads.
    pub worker_count: usize,
    /// Ring slots.
    pub ring_capacity: usize,
}

/// State shared by the queue handle and every worker, allocated in the
/// caller's arena.
struct Shared<'env> {
    slots: &'env [Slot<'env>],
    add_pos: CachePadded<AtomicUsize>,
    exec_pos: CachePadded<AtomicUsize>,
    pending: CachePadded<AtomicUsize>,
    parked: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    shutdown: AtomicBool,
    semaphore: Semaphore,
    worker_panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl<'env> Shared<'env> {
    fn new(slots: &'env [Slot<'env>], workers: usize) -> Self {
        Self {
            slots,
            add_pos: CachePadded::new(AtomicUsize::new(0)),
            exec_pos: CachePadded::new(AtomicUsize::new(0)),
            pending: CachePadded::new(AtomicUsize::new(0)),
            parked: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            semaphore: Semaphore::new(0, workers),
            worker_panic: Mutex::new(None),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn submit(&self, job: Job<'env>) {
        let capacity = self.capacity();
        let backoff = Backoff::new();
        loop {
            // Read exec first: add can only grow past it, so the
            // difference never underflows.
            let exec = self.exec_pos.load(Ordering::Acquire);
            let add = self.add_pos.load(Ordering::SeqCst);
            if add - exec >= capacity - 1 {
                backoff.spin();
                continue;
            }
            if self
                .add_pos
                .compare_exchange_weak(add, add + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                backoff.spin();
                continue;
            }
            // Count before publishing so no consumer can complete the
            // item before it is counted.
            self.submitted.fetch_add(1, Ordering::Relaxed);
            self.pending.fetch_add(1, Ordering::SeqCst);
            self.slots[add % capacity].publish(job);
            if self.parked.load(Ordering::SeqCst) > 0 {
                self.semaphore.release(1);
            }
            return;
        }
    }

    /// Claim and run one item. Returns `false` if the ring was empty.
    fn execute_next(&self) -> bool {
        let capacity = self.capacity();
        let backoff = Backoff::new();
        loop {
            let exec = self.exec_pos.load(Ordering::Acquire);
            let add = self.add_pos.load(Ordering::SeqCst);
            if exec == add {
                return false;
            }
            if self
                .exec_pos
                .compare_exchange_weak(exec, exec + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let _done = Completion(self);
                if let Some(job) = self.slots[exec % capacity].take() {
                    job();
                }
                return true;
            }
            backoff.spin();
        }
    }

    fn has_work(&self) -> bool {
        self.exec_pos.load(Ordering::SeqCst) != self.add_pos.load(Ordering::SeqCst)
    }

    fn queued(&self) -> usize {
        let exec = self.exec_pos.load(Ordering::Acquire);
        let add = self.add_pos.load(Ordering::Acquire);
        add.saturating_sub(exec)
    }

    fn wait(&self) {
        let backoff = Backoff::new();
        while self.pending.load(Ordering::SeqCst) > 0 {
            if self.execute_next() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    fn shut_down(&self, workers: usize) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.semaphore.release(workers);
    }

    fn record_panic(&self, payload: Box<dyn Any + Send>) {
        let mut slot = self.worker_panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    fn take_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.worker_panic.lock().take()
    }
}

/// Marks one claimed item as finished, even if it panicked.
struct Completion<'a, 'env>(&'a Shared<'env>);

impl Drop for Completion<'_, '_> {
    fn drop(&mut self) {
        self.0.completed.fetch_add(1, Ordering::Release);
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drops a worker panic that was never resumed. `Shared` lives in the
/// arena and is never dropped, so the payload would leak otherwise.
struct DiscardPanic<'a, 'env>(&'a Shared<'env>);

impl Drop for DiscardPanic<'_, '_> {
    fn drop(&mut self) {
        drop(self.0.take_panic());
    }
}

/// Stops the workers when the scope body returns or unwinds.
struct ShutdownGuard<'a, 'env> {
    shared: &'a Shared<'env>,
    workers: usize,
}

impl Drop for ShutdownGuard<'_, '_> {
    fn drop(&mut self) {
        self.shared.shut_down(self.workers);
    }
}

fn worker_loop(shared: &Shared<'_>, index: usize) {
    tracing::trace!(worker = index, "worker started");
    loop {
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| shared.execute_next())) {
                Ok(true) => {}
                Ok(false) => break,
                Err(payload) => {
                    tracing::error!(worker = index, "work item panicked");
                    shared.record_panic(payload);
                }
            }
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        shared.parked.fetch_add(1, Ordering::SeqCst);
        if shared.shutdown.load(Ordering::SeqCst) || shared.has_work() {
            shared.parked.fetch_sub(1, Ordering::SeqCst);
            continue;
        }
        shared.semaphore.acquire();
        shared.parked.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::trace!(worker = index, "worker exiting");
}

/// A fixed-capacity work queue served by a pool of background threads.
///
/// Only reachable inside [`WorkQueue::scope`], which owns the worker
/// threads. Closures may borrow anything that outlives the arena borrow.
pub struct WorkQueue<'env> {
    shared: &'env Shared<'env>,
    workers: usize,
}

// Compile-time assertion: the queue handle can be shared with producer
// threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<WorkQueue<'static>>();
};

impl<'env> WorkQueue<'env> {
    /// Start a queue, run `f` with it, then drain and stop it.
    ///
    /// The ring slots and the shared queue state are allocated from
    /// `arena` and stay there until the arena is cleared. Worker threads
    /// are scoped to this call: when `f` returns, every outstanding item is
    /// executed, the workers are woken for shutdown and joined.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the configuration is invalid, the arena
    /// cannot hold the ring, or a worker thread cannot be spawned. Workers
    /// started before a spawn failure are shut down first.
    ///
    /// # Panics
    ///
    /// If a closure panicked on a worker thread, the first such panic is
    /// resumed on the caller after all workers have been joined. A closure
    /// that panics on the calling thread (inside [`wait`](Self::wait) or
    /// [`execute_next`](Self::execute_next)) unwinds through `f` directly.
    pub fn scope<F, R>(arena: &'env Arena, config: &WorkQueueConfig, f: F) -> Result<R, QueueError>
    where
        F: FnOnce(&WorkQueue<'env>) -> R,
    {
        config.validate()?;
        let workers = config.resolved_worker_count();
        let capacity = config.ring_capacity;

        let slots: &'env [Slot<'env>] = arena.try_alloc_slice_fill_with(capacity, |_| Slot::new())?;
        let shared: &'env Shared<'env> = arena.try_alloc(Shared::new(slots, workers))?;
        let queue = WorkQueue { shared, workers };
        // Runs after every worker has been joined, including on unwind.
        let _discard = DiscardPanic(shared);

        let outcome = thread::scope(|s| {
            let guard = ShutdownGuard { shared, workers };
            let mut handles = Vec::with_capacity(workers);
            for index in 0..workers {
                let spawned = thread::Builder::new()
                    .name(format!("{}-{index}", config.thread_name_prefix))
                    .spawn_scoped(s, move || worker_loop(shared, index));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        tracing::error!(worker = index, error = %e, "failed to spawn worker");
                        return Err(QueueError::ThreadSpawnFailed {
                            index,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            tracing::debug!(
                workers,
                ring_capacity = capacity,
                arena = arena.name(),
                "work queue started"
            );

            let result = f(&queue);
            queue.wait();
            drop(guard);

            let mut first_panic = None;
            for handle in handles {
                if let Err(payload) = handle.join() {
                    first_panic.get_or_insert(payload);
                }
            }
            if let Some(payload) = first_panic.or_else(|| shared.take_panic()) {
                panic::resume_unwind(payload);
            }
            Ok(result)
        });

        let stats = queue.stats();
        tracing::debug!(
            submitted = stats.submitted,
            completed = stats.completed,
            "work queue stopped"
        );
        outcome
    }

    /// Submit a closure for asynchronous execution.
    ///
    /// Never fails. If the ring is full, spins until a consumer frees a
    /// position; with no workers that requires another thread to call
    /// [`wait`](Self::wait) or [`execute_next`](Self::execute_next).
    pub fn add_work<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        self.shared.submit(Box::new(f));
    }

    /// Block until every submitted closure has completed.
    ///
    /// The calling thread executes queued items itself while it waits and
    /// spins when there is nothing to claim. Never parks in the kernel.
    pub fn wait(&self) {
        self.shared.wait();
    }

    /// Run at most one queued item on the calling thread.
    ///
    /// Returns `true` if an item was claimed.
    pub fn execute_next(&self) -> bool {
        self.shared.execute_next()
    }

    /// Submitted closures that have not completed yet.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Closures waiting in the ring for a consumer.
    pub fn queued(&self) -> usize {
        self.shared.queued()
    }

    /// Number of ring slots.
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Number of background worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        let shared = self.shared;
        // Completed first: every completion it counts was published after
        // its submission was counted.
        let completed = shared.completed.load(Ordering::Acquire);
        QueueStats {
            submitted: shared.submitted.load(Ordering::Relaxed),
            completed,
            pending: shared.pending.load(Ordering::SeqCst),
            queued: shared.queued(),
            parked_workers: shared.parked.load(Ordering::SeqCst),
            worker_count: self.workers,
            ring_capacity: shared.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_arena::{MemoryPartition, PartitionConfig};
    use std::sync::atomic::AtomicUsize;

    fn partition(bytes: usize) -> MemoryPartition {
        MemoryPartition::new(&PartitionConfig::new().with_arena("queue", bytes)).unwrap()
    }

    fn config(ring_capacity: usize, workers: usize) -> WorkQueueConfig {
        WorkQueueConfig {
            worker_count: Some(workers),
            min_threads: 0,
            ..WorkQueueConfig::with_capacity(ring_capacity)
        }
    }

    #[test]
    fn runs_every_item() {
        let partition = partition(64 * 1024);
        let counter = AtomicUsize::new(0);
        let stats = WorkQueue::scope(&partition["queue"], &config(16, 2), |queue| {
            for _ in 0..100 {
                queue.add_work(|| {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
            queue.wait();
            assert_eq!(queue.pending(), 0);
            queue.stats()
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
        assert_eq!(stats.submitted, 100);
        assert_eq!(stats.completed, 100);
        assert_eq!(stats.queued, 0);
    }

    #[test]
    fn ring_and_state_live_in_the_arena() {
        let partition = partition(64 * 1024);
        let arena = &partition["queue"];
        WorkQueue::scope(arena, &config(8, 1), |queue| {
            assert_eq!(queue.capacity(), 8);
            assert_eq!(queue.worker_count(), 1);
        })
        .unwrap();
        assert!(arena.used() >= 8 * std::mem::size_of::<Slot<'_>>());
    }

    #[test]
    fn zero_workers_drain_on_the_caller() {
        let partition = partition(4096);
        let counter = AtomicUsize::new(0);
        WorkQueue::scope(&partition["queue"], &config(4, 0), |queue| {
            for _ in 0..3 {
                queue.add_work(|| {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
            assert_eq!(queue.queued(), 3);
            assert_eq!(counter.load(Ordering::Relaxed), 0);
            assert!(queue.execute_next());
            assert_eq!(counter.load(Ordering::Relaxed), 1);
            queue.wait();
            assert!(!queue.execute_next());
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn scope_drains_outstanding_work_on_exit() {
        let partition = partition(4096);
        let counter = AtomicUsize::new(0);
        WorkQueue::scope(&partition["queue"], &config(4, 0), |queue| {
            queue.add_work(|| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn queue_is_reusable_after_wait() {
        let partition = partition(4096);
        let counter = AtomicUsize::new(0);
        WorkQueue::scope(&partition["queue"], &config(4, 2), |queue| {
            for round in 1..=5 {
                for _ in 0..10 {
                    queue.add_work(|| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
                queue.wait();
                assert_eq!(counter.load(Ordering::Relaxed), round * 10);
            }
        })
        .unwrap();
    }

    #[test]
    fn producers_on_other_threads() {
        let partition = partition(64 * 1024);
        let counter = AtomicUsize::new(0);
        WorkQueue::scope(&partition["queue"], &config(64, 2), |queue| {
            let counter = &counter;
            std::thread::scope(|s| {
                s.spawn(|| {
                    for _ in 0..20 {
                        queue.add_work(move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                        });
                    }
                });
            });
            queue.wait();
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 20);
    }

    #[test]
    fn arena_exhaustion_is_reported() {
        let partition = partition(4096);
        let arena = &partition["queue"];
        arena.push_bytes(arena.capacity() - 64);
        let err = WorkQueue::scope(arena, &config(64, 1), |_| ()).unwrap_err();
        assert!(matches!(err, QueueError::Arena(_)));
    }

    #[test]
    fn invalid_config_is_reported() {
        let partition = partition(4096);
        let err = WorkQueue::scope(&partition["queue"], &config(1, 1), |_| ()).unwrap_err();
        assert_eq!(err, QueueError::RingTooSmall { configured: 1 });
    }

    #[test]
    fn panicking_item_still_completes() {
        let partition = partition(4096);
        let counter = AtomicUsize::new(0);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            WorkQueue::scope(&partition["queue"], &config(8, 1), |queue| {
                queue.add_work(|| panic!("item failed"));
                for _ in 0..5 {
                    queue.add_work(|| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
                queue.wait();
                assert_eq!(queue.pending(), 0);
            })
        }));
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn completed_never_runs_ahead_of_submitted() {
        let partition = partition(64 * 1024);
        let done = AtomicBool::new(false);
        WorkQueue::scope(&partition["queue"], &config(8, 3), |queue| {
            std::thread::scope(|s| {
                s.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        let stats = queue.stats();
                        assert!(stats.completed <= stats.submitted, "{stats:?}");
                    }
                });
                for _ in 0..20_000 {
                    queue.add_work(|| {});
                }
                queue.wait();
                done.store(true, Ordering::Release);
            });
        })
        .unwrap();
    }

    #[test]
    fn unresumed_worker_panic_is_dropped() {
        static DROPPED: AtomicUsize = AtomicUsize::new(0);

        struct Payload;

        impl Drop for Payload {
            fn drop(&mut self) {
                DROPPED.fetch_add(1, Ordering::SeqCst);
            }
        }

        let partition = partition(4096);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            WorkQueue::scope(&partition["queue"], &config(4, 1), |queue| {
                queue.add_work(|| panic::panic_any(Payload));
                while queue.stats().completed == 0 {
                    std::thread::yield_now();
                }
                panic!("scope body failed");
            })
        }));
        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"scope body failed"));
        assert_eq!(DROPPED.load(Ordering::SeqCst), 1);
    }
}
