//! Fixed-capacity work queue with a scoped pool of worker threads.
//!
//! Any thread submits zero-argument closures with
//! [`WorkQueue::add_work`]; background workers execute them in no
//! particular order, and any thread can block in [`WorkQueue::wait`] until
//! everything submitted so far has finished, helping to drain the ring
//! while it waits.
//!
//! # Architecture
//!
//! ```text
//! WorkQueue::scope(&arena, &config, |queue| ...)
//! ├── ring: [Slot; N] in the arena   FREE → WRITING → PUBLISHED → READING → FREE
//! ├── add_pos / exec_pos             monotonic cursors, CAS-advanced, slot = pos % N
//! ├── pending                        submitted - completed
//! ├── Semaphore (max = workers)      idle workers park here
//! └── worker threads (scoped)        drain → park → drain ... until shutdown
//! ```
//!
//! The ring never holds more than `N - 1` items. A producer that finds it
//! full spins until a consumer frees a position; there is no
//! backpressure error.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use kiln_arena::{MemoryPartition, PartitionConfig};
//! use kiln_queue::{WorkQueue, WorkQueueConfig};
//!
//! let partition = MemoryPartition::new(&PartitionConfig::new().with_arena("jobs", 4096)).unwrap();
//! let done = AtomicUsize::new(0);
//! WorkQueue::scope(&partition["jobs"], &WorkQueueConfig::with_capacity(8), |queue| {
//!     for _ in 0..100 {
//!         queue.add_work(|| {
//!             done.fetch_add(1, Ordering::Relaxed);
//!         });
//!     }
//!     queue.wait();
//! })
//! .unwrap();
//! assert_eq!(done.load(Ordering::Relaxed), 100);
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod queue;
pub mod semaphore;
mod slot;

pub use config::WorkQueueConfig;
pub use error::QueueError;
pub use queue::{QueueStats, WorkQueue};
pub use semaphore::Semaphore;
