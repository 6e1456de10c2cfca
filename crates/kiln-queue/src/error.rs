//! Queue startup errors.

use std::error::Error;
use std::fmt;

use kiln_arena::ArenaError;

/// Errors detected while starting a [`WorkQueue`](crate::WorkQueue).
///
/// Running queues never fail: slot races are retried and a full ring is
/// waited out. Everything here happens before the first item is accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Ring capacity is below the minimum of 2.
    RingTooSmall {
        /// The configured capacity.
        configured: usize,
    },
    /// `min_threads` exceeds the ring capacity, leaving no valid worker count.
    WorkerBounds {
        /// The configured lower bound.
        min_threads: usize,
        /// The configured ring capacity (upper bound).
        ring_capacity: usize,
    },
    /// The backing arena could not hold the ring and queue state.
    Arena(ArenaError),
    /// A worker thread could not be spawned.
    ThreadSpawnFailed {
        /// Index of the worker that failed to start.
        index: usize,
        /// OS error description.
        reason: String,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RingTooSmall { configured } => {
                write!(f, "ring_capacity {configured} is below minimum of 2")
            }
            Self::WorkerBounds {
                min_threads,
                ring_capacity,
            } => {
                write!(
                    f,
                    "min_threads {min_threads} exceeds ring_capacity {ring_capacity}"
                )
            }
            Self::Arena(e) => write!(f, "arena: {e}"),
            Self::ThreadSpawnFailed { index, reason } => {
                write!(f, "failed to spawn worker {index}: {reason}")
            }
        }
    }
}

impl Error for QueueError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Arena(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArenaError> for QueueError {
    fn from(e: ArenaError) -> Self {
        Self::Arena(e)
    }
}
