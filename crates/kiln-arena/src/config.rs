//! Partition configuration parameters.

use crate::error::ArenaError;

/// One named arena inside a [`PartitionConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaSpec {
    /// Diagnostic label, also the lookup key in the partition.
    pub name: String,
    /// Requested size in bytes. Rounded up to the page size when mapped.
    pub bytes: usize,
}

impl ArenaSpec {
    /// Create a spec for an arena of `bytes` bytes.
    pub fn new(name: impl Into<String>, bytes: usize) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Configuration for a [`MemoryPartition`](crate::MemoryPartition).
///
/// Arenas are laid out contiguously in the order they are listed.
/// Validated at construction; immutable once the partition exists.
#[derive(Clone, Debug)]
pub struct PartitionConfig {
    /// Arenas to carve out of the block, in address order.
    pub arenas: Vec<ArenaSpec>,

    /// Hard ceiling on the page-rounded total.
    ///
    /// Default: 4 GiB. A total above this almost always means a size was
    /// computed in the wrong unit.
    pub max_total_bytes: u64,
}

impl PartitionConfig {
    /// Default ceiling: 4 GiB.
    pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 4 * 1024 * 1024 * 1024;

    /// Name of the per-frame arena in the preset layouts.
    pub const FRAME: &'static str = "frame";
    /// Name of the per-scene arena in the preset layouts.
    pub const SCENE: &'static str = "scene";
    /// Name of the transient arena in the two-region preset.
    pub const TRANSIENT: &'static str = "transient";
    /// Name of the startup-lifetime arena in the preset layouts.
    pub const PERMANENT: &'static str = "permanent";

    /// An empty configuration with the default ceiling.
    pub fn new() -> Self {
        Self {
            arenas: Vec::new(),
            max_total_bytes: Self::DEFAULT_MAX_TOTAL_BYTES,
        }
    }

    /// Append an arena to the layout.
    pub fn with_arena(mut self, name: impl Into<String>, bytes: usize) -> Self {
        self.arenas.push(ArenaSpec::new(name, bytes));
        self
    }

    /// Override the ceiling.
    pub fn with_max_total_bytes(mut self, max_total_bytes: u64) -> Self {
        self.max_total_bytes = max_total_bytes;
        self
    }

    /// Three-region layout: frame, scene, permanent.
    pub fn frame_scene_permanent(frame: usize, scene: usize, permanent: usize) -> Self {
        Self::new()
            .with_arena(Self::FRAME, frame)
            .with_arena(Self::SCENE, scene)
            .with_arena(Self::PERMANENT, permanent)
    }

    /// Two-region layout: transient, permanent.
    pub fn transient_permanent(transient: usize, permanent: usize) -> Self {
        Self::new()
            .with_arena(Self::TRANSIENT, transient)
            .with_arena(Self::PERMANENT, permanent)
    }

    /// Check structural invariants that do not depend on the page size.
    ///
    /// The ceiling is checked by the partition itself, after page rounding.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.arenas.is_empty() {
            return Err(ArenaError::EmptyPartition);
        }
        for (i, spec) in self.arenas.iter().enumerate() {
            if spec.bytes == 0 {
                return Err(ArenaError::ZeroSizedArena {
                    name: spec.name.clone(),
                });
            }
            if self.arenas[..i].iter().any(|other| other.name == spec.name) {
                return Err(ArenaError::DuplicateArena {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self::new()
    }
}
