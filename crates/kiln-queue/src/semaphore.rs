//! Counting semaphore used to park idle workers.

use parking_lot::{Condvar, Mutex};

/// A counting semaphore with a maximum permit count.
///
/// Releases beyond the maximum are dropped, so a burst of submissions can
/// never bank more wake-ups than there are workers to receive them.
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
    max: usize,
}

// Compile-time assertion: Semaphore must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Semaphore>();
};

impl Semaphore {
    /// Create a semaphore holding `initial` permits, capped at `max`.
    pub fn new(initial: usize, max: usize) -> Self {
        Self {
            permits: Mutex::new(initial.min(max)),
            available: Condvar::new(),
            max,
        }
    }

    /// Block until a permit is available, then take it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Take a permit if one is available, without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Add up to `n` permits. Returns how many were actually added.
    pub fn release(&self, n: usize) -> usize {
        let added = {
            let mut permits = self.permits.lock();
            let added = n.min(self.max - *permits);
            *permits += added;
            added
        };
        match added {
            0 => {}
            1 => {
                self.available.notify_one();
            }
            _ => {
                self.available.notify_all();
            }
        }
        added
    }

    /// Permits currently banked.
    pub fn available(&self) -> usize {
        *self.permits.lock()
    }

    /// Maximum permit count.
    pub fn max(&self) -> usize {
        self.max
    }
}
