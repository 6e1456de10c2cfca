//! Kiln: phase-scoped memory arenas and a lock-free work queue for
//! real-time engines.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the Kiln sub-crates. For most users, adding `kiln` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use kiln::prelude::*;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! // One mapping for the whole process, sliced into named arenas.
//! let mut memory = MemoryPartition::new(&PartitionConfig::frame_scene_permanent(
//!     64 * 1024,
//!     64 * 1024,
//!     16 * 1024,
//! ))
//! .unwrap();
//!
//! // Per-frame scratch data, released wholesale at the end of the frame.
//! let frame_start = memory["frame"].marker();
//! let positions = memory["frame"].alloc_slice_fill_with(256, |i| i as f32);
//! assert_eq!(positions.len(), 256);
//!
//! // Fan work out to the worker pool; the ring lives in the permanent arena.
//! let sum = AtomicU64::new(0);
//! WorkQueue::scope(&memory["permanent"], &WorkQueueConfig::with_capacity(32), |queue| {
//!     for chunk in positions.chunks(32) {
//!         let sum = &sum;
//!         queue.add_work(move || {
//!             let partial: f32 = chunk.iter().sum();
//!             sum.fetch_add(partial as u64, Ordering::Relaxed);
//!         });
//!     }
//!     queue.wait();
//! })
//! .unwrap();
//! assert_eq!(sum.load(Ordering::Relaxed), (0..256).sum::<u64>());
//!
//! memory.clear("frame", frame_start);
//! assert_eq!(memory["frame"].used(), 0);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`arena`] | `kiln-arena` | `MemoryPartition`, `Arena`, markers, partition config |
//! | [`queue`] | `kiln-queue` | `WorkQueue`, queue config, `Semaphore` |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Bump arenas and the virtual-memory partition (`kiln-arena`).
///
/// [`arena::MemoryPartition`] maps one block and slices it into named
/// [`arena::Arena`]s; [`arena::PartitionConfig`] describes the layout.
pub use kiln_arena as arena;

/// Work queue and worker pool (`kiln-queue`).
///
/// [`queue::WorkQueue::scope`] starts workers over a ring allocated from an
/// arena; [`queue::WorkQueueConfig`] sizes the ring and the pool.
pub use kiln_queue as queue;

/// Common imports for typical Kiln usage.
///
/// ```rust
/// use kiln::prelude::*;
/// ```
pub mod prelude {
    // Arenas
    pub use kiln_arena::{
        Arena, ArenaError, ArenaMut, ArenaScope, ArenaSpec, Marker, MemoryPartition,
        PartitionConfig,
    };

    // Queue
    pub use kiln_queue::{QueueError, WorkQueue, WorkQueueConfig};
}
