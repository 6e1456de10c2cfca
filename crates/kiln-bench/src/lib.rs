//! Benchmark profiles and utilities for the Kiln arenas and work queue.
//!
//! Provides pre-built configurations shared by the criterion benches:
//!
//! - [`frame_profile`]: the classic frame/scene/permanent layout
//! - [`queue_profile`]: a work queue sized for fan-out benchmarks
//! - [`object_sizes`]: a deterministic mix of allocation sizes

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use kiln_arena::PartitionConfig;
use kiln_queue::WorkQueueConfig;

/// Bytes per arena in [`frame_profile`].
pub const PROFILE_ARENA_BYTES: usize = 4 * 1024 * 1024;

/// Frame/scene/permanent partition with [`PROFILE_ARENA_BYTES`] per arena.
pub fn frame_profile() -> PartitionConfig {
    PartitionConfig::frame_scene_permanent(
        PROFILE_ARENA_BYTES,
        PROFILE_ARENA_BYTES,
        PROFILE_ARENA_BYTES,
    )
}

/// Work queue with a 256-slot ring and `workers` background threads.
pub fn queue_profile(workers: usize) -> WorkQueueConfig {
    WorkQueueConfig {
        worker_count: Some(workers),
        min_threads: 0,
        ..WorkQueueConfig::with_capacity(256)
    }
}

/// `count` allocation sizes between 8 and 512 bytes.
///
/// Uses a fixed xorshift sequence so every run sees the same mix.
pub fn object_sizes(count: usize, seed: u64) -> Vec<usize> {
    let mut state = seed | 1;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            8 + (state % 505) as usize
        })
        .collect()
}
