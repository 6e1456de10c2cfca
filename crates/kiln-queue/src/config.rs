//! Work queue configuration.

use crate::error::QueueError;

/// Configuration for [`WorkQueue::scope`](crate::WorkQueue::scope).
#[derive(Clone, Debug)]
pub struct WorkQueueConfig {
    /// Number of ring slots. The ring holds at most `ring_capacity - 1`
    /// queued items. Default: 256. Must be at least 2.
    pub ring_capacity: usize,
    /// Number of background workers. `None` = auto-detect
    /// (`available_parallelism - 1`, leaving a core for the thread that
    /// calls [`wait`](crate::WorkQueue::wait) and helps drain).
    pub worker_count: Option<usize>,
    /// Lower bound applied to the worker count. Default: 1.
    ///
    /// Zero is allowed: the queue then only makes progress on threads
    /// that call `wait` or `execute_next`.
    pub min_threads: usize,
    /// Worker thread names are `"{prefix}-{index}"`. Default: `kiln-worker`.
    pub thread_name_prefix: String,
}

impl WorkQueueConfig {
    /// Default ring capacity.
    pub const DEFAULT_RING_CAPACITY: usize = 256;

    /// Smallest ring that can hold an item.
    pub const MIN_RING_CAPACITY: usize = 2;

    /// Default lower bound on workers.
    pub const DEFAULT_MIN_THREADS: usize = 1;

    /// Default auto-detected configuration with the given ring capacity.
    pub fn with_capacity(ring_capacity: usize) -> Self {
        Self {
            ring_capacity,
            ..Self::default()
        }
    }

    /// Resolve the actual worker count.
    ///
    /// The hint (or the auto-detected value) is clamped to
    /// `[min_threads, ring_capacity]`.
    pub fn resolved_worker_count(&self) -> usize {
        let hint = match self.worker_count {
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .saturating_sub(1),
        };
        hint.max(self.min_threads).min(self.ring_capacity)
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.ring_capacity < Self::MIN_RING_CAPACITY {
            return Err(QueueError::RingTooSmall {
                configured: self.ring_capacity,
            });
        }
        if self.min_threads > self.ring_capacity {
            return Err(QueueError::WorkerBounds {
                min_threads: self.min_threads,
                ring_capacity: self.ring_capacity,
            });
        }
        Ok(())
    }
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            ring_capacity: Self::DEFAULT_RING_CAPACITY,
            worker_count: None,
            min_threads: Self::DEFAULT_MIN_THREADS,
            thread_name_prefix: "kiln-worker".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_detect_leaves_room_for_the_caller() {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = WorkQueueConfig::default();
        let expected = (cpus - 1).max(1).min(WorkQueueConfig::DEFAULT_RING_CAPACITY);
        assert_eq!(config.resolved_worker_count(), expected);
    }

    #[test]
    fn explicit_count_is_clamped_to_ring() {
        let config = WorkQueueConfig {
            worker_count: Some(64),
            ..WorkQueueConfig::with_capacity(8)
        };
        assert_eq!(config.resolved_worker_count(), 8);
    }

    #[test]
    fn explicit_count_respects_min_threads() {
        let config = WorkQueueConfig {
            worker_count: Some(0),
            min_threads: 2,
            ..WorkQueueConfig::default()
        };
        assert_eq!(config.resolved_worker_count(), 2);

        let config = WorkQueueConfig {
            worker_count: Some(0),
            min_threads: 0,
            ..WorkQueueConfig::default()
        };
        assert_eq!(config.resolved_worker_count(), 0);
    }

    #[test]
    fn validate_rejects_tiny_ring() {
        assert_eq!(
            WorkQueueConfig::with_capacity(1).validate(),
            Err(QueueError::RingTooSmall { configured: 1 })
        );
        assert!(WorkQueueConfig::with_capacity(2).validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let config = WorkQueueConfig {
            min_threads: 9,
            ..WorkQueueConfig::with_capacity(8)
        };
        assert!(matches!(
            config.validate(),
            Err(QueueError::WorkerBounds { .. })
        ));
    }
}
