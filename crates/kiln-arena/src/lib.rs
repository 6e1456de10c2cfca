//! Bump arenas partitioned from a single virtual-memory block.
//!
//! Every allocation in the engine comes from an [`Arena`]. Arenas are
//! carved out of one OS mapping by a [`MemoryPartition`] at startup and are
//! never resized. Allocation follows the engine's phase structure: memory
//! is pushed during a phase and released wholesale by clearing back to a
//! [`Marker`] when the phase ends.
//!
//! # Architecture
//!
//! ```text
//! MemoryPartition (created once by the application root)
//! ├── VirtualBlock (one anonymous mapping, page-aligned, zero-filled)
//! └── IndexMap<String, Arena> (contiguous, page-aligned slices, in order)
//!     └── Arena { base, capacity, Mutex<{used, high_water}> }
//!         ├── push_bytes / push_bytes_aligned  (&self, any thread)
//!         └── clear(marker) / reset / scope     (ArenaMut handle)
//! ```
//!
//! The partition hands out `&Arena` for pushes and [`ArenaMut`] for
//! rollback, never `&mut Arena`, so no arena can be moved away from the
//! mapping it points into.
//!
//! # Failure model
//!
//! Overflow, zero-byte requests and bad alignments are programmer errors:
//! the plain methods log and panic, the `try_` methods return
//! [`ArenaError`]. Construction of a partition returns `Result` so the
//! application root decides how to abort.
//!
//! # Unsafe code
//!
//! Only [`block`], [`arena`] and [`partition`] contain `unsafe`, each block
//! with a `// SAFETY:` comment. The rest of the crate denies it.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
pub mod block;
pub mod config;
pub mod error;
pub mod partition;

// Public re-exports for the primary API surface.
pub use arena::{Arena, ArenaMut, ArenaScope, ArenaStats, Marker, MIN_ALIGNMENT};
pub use block::{page_size, VirtualBlock};
pub use config::{ArenaSpec, PartitionConfig};
pub use error::ArenaError;
pub use partition::MemoryPartition;
