//! Arena-specific error types.

use std::error::Error;
use std::fmt;

/// Errors that can occur while mapping, partitioning or pushing into arenas.
///
/// Push-time variants are programmer errors: the infallible `push_*`
/// methods turn them into panics after logging. Construction-time variants
/// are returned to the application root, which decides whether to abort.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// An arena was bound to a null base address.
    NullBase,
    /// An arena was bound to a zero-length address range.
    ZeroCapacity,
    /// A push asked for zero bytes.
    ZeroSizedRequest {
        /// Name of the arena that received the request.
        arena: String,
    },
    /// A push did not fit in the arena's remaining capacity.
    Overflow {
        /// Name of the overflowing arena.
        arena: String,
        /// Bytes the push would have consumed, including alignment padding.
        requested: usize,
        /// Bytes already consumed.
        used: usize,
        /// Total bytes owned by the arena.
        capacity: usize,
    },
    /// An aligned push used an alignment that is not a power of two.
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },
    /// A clear targeted a marker beyond the arena's current usage.
    StaleMarker {
        /// Name of the arena being cleared.
        arena: String,
        /// Offset recorded by the marker.
        marker: usize,
        /// Bytes currently consumed.
        used: usize,
    },
    /// A partition requested an arena of zero bytes.
    ZeroSizedArena {
        /// Name of the offending arena.
        name: String,
    },
    /// A partition was configured without any arenas.
    EmptyPartition,
    /// A partition listed the same arena name twice.
    DuplicateArena {
        /// The repeated name.
        name: String,
    },
    /// The page-rounded sum of all arena sizes exceeds the ceiling.
    PartitionTooLarge {
        /// Total bytes after page rounding.
        requested: u64,
        /// Configured ceiling.
        ceiling: u64,
    },
    /// The operating system refused to map the block.
    MapFailed {
        /// Bytes that were requested from the OS.
        bytes: usize,
        /// OS error description.
        reason: String,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullBase => write!(f, "arena base address is null"),
            Self::ZeroCapacity => write!(f, "arena capacity is zero"),
            Self::ZeroSizedRequest { arena } => {
                write!(f, "zero-byte push into arena '{arena}'")
            }
            Self::Overflow {
                arena,
                requested,
                used,
                capacity,
            } => {
                write!(
                    f,
                    "arena overflow in '{arena}': requested {requested} bytes with {used} of {capacity} bytes used"
                )
            }
            Self::InvalidAlignment { alignment } => {
                write!(f, "alignment {alignment} is not a power of two")
            }
            Self::StaleMarker {
                arena,
                marker,
                used,
            } => {
                write!(
                    f,
                    "marker {marker} is beyond the {used} bytes used in arena '{arena}'"
                )
            }
            Self::ZeroSizedArena { name } => {
                write!(f, "arena '{name}' was requested with zero bytes")
            }
            Self::EmptyPartition => write!(f, "partition has no arenas"),
            Self::DuplicateArena { name } => {
                write!(f, "arena '{name}' is listed more than once")
            }
            Self::PartitionTooLarge { requested, ceiling } => {
                write!(
                    f,
                    "partition of {requested} bytes exceeds the ceiling of {ceiling} bytes"
                )
            }
            Self::MapFailed { bytes, reason } => {
                write!(f, "failed to map {bytes} bytes: {reason}")
            }
        }
    }
}

impl Error for ArenaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_message_names_the_arena() {
        let err = ArenaError::Overflow {
            arena: "frame".into(),
            requested: 64,
            used: 4064,
            capacity: 4096,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("arena overflow in 'frame'"), "{msg}");
        assert!(msg.contains("4064 of 4096"));
    }

    #[test]
    fn alignment_message_includes_value() {
        let err = ArenaError::InvalidAlignment { alignment: 12 };
        assert_eq!(err.to_string(), "alignment 12 is not a power of two");
    }
}
