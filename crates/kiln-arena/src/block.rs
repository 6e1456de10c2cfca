//! The single virtual-memory mapping that backs every arena.
//!
//! [`VirtualBlock`] reserves and commits one anonymous, zero-filled mapping
//! through `memmap2`. It is the only type in the crate that talks to the
//! operating system; arenas are views into it.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::OnceLock;

use memmap2::MmapMut;

use crate::error::ArenaError;

/// Page size assumed on targets where it cannot be queried.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// The platform page size in bytes, queried once per process.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(query_page_size)
}

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no preconditions; it returns -1 on failure.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 && (size as usize).is_power_of_two() {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    FALLBACK_PAGE_SIZE
}

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// One committed, zero-filled range of virtual memory.
///
/// The range is released in a single call when the block is dropped, so
/// every arena carved from it becomes invalid at the same moment.
/// [`MemoryPartition`](crate::MemoryPartition) ties arena lifetimes to the
/// block so that cannot be observed from safe code.
pub struct VirtualBlock {
    map: MmapMut,
    base: NonNull<u8>,
}

// SAFETY: the block owns its mapping; `base` is only an address into it and
// carries no thread affinity.
unsafe impl Send for VirtualBlock {}
// SAFETY: `&VirtualBlock` exposes only the address and length.
unsafe impl Sync for VirtualBlock {}

impl VirtualBlock {
    /// Map `bytes` bytes of anonymous memory, rounded up to the page size.
    pub fn map(bytes: usize) -> Result<Self, ArenaError> {
        if bytes == 0 {
            return Err(ArenaError::ZeroCapacity);
        }
        let len = align_up(bytes, page_size()).ok_or(ArenaError::MapFailed {
            bytes,
            reason: "size overflows the address space".into(),
        })?;
        let mut map = MmapMut::map_anon(len).map_err(|e| ArenaError::MapFailed {
            bytes: len,
            reason: e.to_string(),
        })?;
        let base = NonNull::new(map.as_mut_ptr()).ok_or(ArenaError::NullBase)?;
        tracing::trace!(bytes = len, "virtual block mapped");
        Ok(Self { map, base })
    }

    /// First byte of the mapping. Page-aligned.
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length of the mapping in bytes. A multiple of the page size.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Always `false`: zero-length blocks are rejected by [`map`](Self::map).
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Drop for VirtualBlock {
    fn drop(&mut self) {
        tracing::trace!(bytes = self.map.len(), "virtual block released");
    }
}
