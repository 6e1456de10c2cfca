//! Ring slot with a four-state publish protocol.
//!
//! ```text
//! FREE ──producer CAS──▶ WRITING ──store──▶ PUBLISHED
//!   ▲                                          │
//!   └──store── READING ◀──consumer CAS─────────┘
//! ```
//!
//! A slot is only ever touched by the thread that won the CAS into
//! `WRITING` or `READING`, so the job cell is never aliased.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_utils::Backoff;

/// A boxed unit of work.
pub(crate) type Job<'env> = Box<dyn FnOnce() + Send + 'env>;

const FREE: u8 = 0;
const WRITING: u8 = 1;
const PUBLISHED: u8 = 2;
const READING: u8 = 3;

pub(crate) struct Slot<'env> {
    state: AtomicU8,
    job: UnsafeCell<Option<Job<'env>>>,
}

// SAFETY: the job cell is accessed only by the thread holding the slot in
// WRITING or READING, and the Release store that leaves either state
// publishes the write to the next owner's Acquire CAS. `Job` is `Send`.
unsafe impl Sync for Slot<'_> {}

impl<'env> Slot<'env> {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(FREE),
            job: UnsafeCell::new(None),
        }
    }

    /// Store `job` and make it visible to consumers.
    ///
    /// Spins while the previous occupant of the slot is still being taken.
    pub(crate) fn publish(&self, job: Job<'env>) {
        self.acquire(FREE, WRITING);
        // SAFETY: this thread moved the slot FREE -> WRITING, so no other
        // thread reads or writes the cell until PUBLISHED is stored.
        unsafe { *self.job.get() = Some(job) };
        self.state.store(PUBLISHED, Ordering::Release);
    }

    /// Take the published job, spinning until a producer publishes one.
    pub(crate) fn take(&self) -> Option<Job<'env>> {
        self.acquire(PUBLISHED, READING);
        // SAFETY: this thread moved the slot PUBLISHED -> READING and is its
        // only consumer until FREE is stored.
        let job = unsafe { (*self.job.get()).take() };
        self.state.store(FREE, Ordering::Release);
        job
    }

    fn acquire(&self, from: u8, to: u8) {
        let backoff = Backoff::new();
        while self
            .state
            .compare_exchange_weak(from, to, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            backoff.snooze();
        }
    }

    #[cfg(test)]
    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }
}
