//! Bump allocation over a fixed byte range.
//!
//! An [`Arena`] hands out monotonically increasing, never individually
//! freed ranges from a slice of a [`VirtualBlock`](crate::VirtualBlock).
//! Pushes take `&self` and serialise only the bookkeeping update behind a
//! mutex, so any number of threads can allocate from a shared arena.
//! Rollback ([`Arena::clear`]) takes `&mut self`: exclusive access proves
//! that no slice returned by an earlier push is still borrowed.
//!
//! Bytes in `[used, capacity)` are always zero. Fresh mappings start zeroed
//! and `clear` re-zeroes what it releases, so every push returns zeroed
//! memory without touching it on the hot path.

#![allow(unsafe_code)]

use std::fmt;
use std::mem;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::slice;

use parking_lot::Mutex;

use crate::block::align_up;
use crate::error::ArenaError;

/// Smallest alignment honoured by aligned pushes.
///
/// Requests for a smaller alignment are raised to this value.
pub const MIN_ALIGNMENT: usize = 8;

/// A snapshot of an arena's usage, used to roll it back later.
///
/// Markers follow stack discipline: take one, push, then
/// [`clear`](Arena::clear) back to it. A marker is only meaningful for the
/// arena that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Marker(usize);

impl Marker {
    /// The empty-arena marker.
    pub const START: Self = Self(0);

    /// Byte offset from the arena base.
    pub fn offset(self) -> usize {
        self.0
    }
}

/// Point-in-time usage figures for an arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes currently consumed, including alignment padding.
    pub used: usize,
    /// Total bytes owned by the arena.
    pub capacity: usize,
    /// Largest `used` value ever observed.
    pub high_water: usize,
}

impl ArenaStats {
    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }
}

struct Cursor {
    used: usize,
    high_water: usize,
}

/// A bump allocator over a caller-owned address range.
pub struct Arena {
    name: String,
    base: NonNull<u8>,
    capacity: usize,
    cursor: Mutex<Cursor>,
}

// SAFETY: `base` points into memory that outlives the arena: the caller of
// `from_raw_parts` guarantees it, and a partition never hands out
// `&mut Arena`, so its arenas cannot be moved away from their mapping.
// Ranges are handed out disjointly under `cursor`'s lock, and the only
// operation that touches already-handed-out bytes requires `&mut self`.
unsafe impl Send for Arena {}
// SAFETY: see above; `&Arena` only ever creates references to fresh ranges.
unsafe impl Sync for Arena {}

impl Arena {
    /// Bind an arena to `capacity` bytes starting at `base`.
    ///
    /// # Errors
    ///
    /// [`ArenaError::NullBase`] if `base` is null,
    /// [`ArenaError::ZeroCapacity`] if `capacity` is zero.
    ///
    /// # Safety
    ///
    /// `[base, base + capacity)` must be valid for reads and writes, must be
    /// zero-filled, must not be accessed except through this arena, and must
    /// outlive it. [`MemoryPartition`](crate::MemoryPartition) upholds all of
    /// this; prefer it over calling this directly.
    pub unsafe fn from_raw_parts(
        base: *mut u8,
        capacity: usize,
        name: impl Into<String>,
    ) -> Result<Self, ArenaError> {
        let base = NonNull::new(base).ok_or(ArenaError::NullBase)?;
        if capacity == 0 {
            return Err(ArenaError::ZeroCapacity);
        }
        Ok(Self {
            name: name.into(),
            base,
            capacity,
            cursor: Mutex::new(Cursor {
                used: 0,
                high_water: 0,
            }),
        })
    }

    /// Diagnostic label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total bytes owned by the arena.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently consumed.
    pub fn used(&self) -> usize {
        self.cursor.lock().used
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used()
    }

    /// Largest usage ever observed, across clears.
    pub fn high_water(&self) -> usize {
        self.cursor.lock().high_water
    }

    /// Usage figures read under a single lock acquisition.
    pub fn stats(&self) -> ArenaStats {
        let cursor = self.cursor.lock();
        ArenaStats {
            used: cursor.used,
            capacity: self.capacity,
            high_water: cursor.high_water,
        }
    }

    /// Snapshot the current usage for a later [`clear`](Self::clear).
    pub fn marker(&self) -> Marker {
        Marker(self.used())
    }

    /// Address of the first byte of the arena.
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Whether `ptr` points inside the arena's range.
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        addr >= self.base_addr() && addr - self.base_addr() < self.capacity
    }

    /// Advance the cursor past `len` bytes starting at the next multiple
    /// of `align`. Returns the start of the claimed range.
    fn bump(&self, len: usize, align: usize) -> Result<NonNull<u8>, ArenaError> {
        let base = self.base_addr();
        let mut cursor = self.cursor.lock();
        let used = cursor.used;
        let end = align_up(base + used, align)
            .map(|addr| addr - base)
            .and_then(|start| Some((start, start.checked_add(len)?)));
        match end {
            Some((start, end)) if end <= self.capacity => {
                cursor.used = end;
                cursor.high_water = cursor.high_water.max(end);
                // SAFETY: start <= capacity, so the offset stays inside the
                // range the arena was constructed over.
                Ok(unsafe { self.base.add(start) })
            }
            other => Err(ArenaError::Overflow {
                arena: self.name.clone(),
                requested: other.map_or(usize::MAX, |(_, end)| end - used),
                used,
                capacity: self.capacity,
            }),
        }
    }

    fn overflow(&self, requested: usize) -> ArenaError {
        ArenaError::Overflow {
            arena: self.name.clone(),
            requested,
            used: self.used(),
            capacity: self.capacity,
        }
    }

    /// Push `len` fresh, zeroed bytes with no alignment guarantee.
    #[allow(clippy::mut_from_ref)]
    pub fn try_push_bytes(&self, len: usize) -> Result<&mut [u8], ArenaError> {
        if len == 0 {
            return Err(ArenaError::ZeroSizedRequest {
                arena: self.name.clone(),
            });
        }
        let ptr = self.bump(len, 1)?;
        // SAFETY: `bump` handed out `[ptr, ptr + len)` to this call alone;
        // it is inside the arena, zeroed, and lives until `clear(&mut self)`.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Push `len` fresh, zeroed bytes.
    ///
    /// # Panics
    ///
    /// Panics on a zero-byte request or arena overflow.
    #[allow(clippy::mut_from_ref)]
    #[track_caller]
    pub fn push_bytes(&self, len: usize) -> &mut [u8] {
        match self.try_push_bytes(len) {
            Ok(bytes) => bytes,
            Err(err) => fatal(&err),
        }
    }

    /// Push `len` fresh, zeroed bytes starting at a multiple of `alignment`.
    ///
    /// The effective alignment is `max(alignment, MIN_ALIGNMENT)`. The size
    /// is rounded up to that alignment before the capacity check, and any
    /// padding needed to reach the aligned start counts as used. The
    /// returned slice is exactly `len` bytes long.
    #[allow(clippy::mut_from_ref)]
    pub fn try_push_bytes_aligned(
        &self,
        len: usize,
        alignment: usize,
    ) -> Result<&mut [u8], ArenaError> {
        if !alignment.is_power_of_two() {
            return Err(ArenaError::InvalidAlignment { alignment });
        }
        if len == 0 {
            return Err(ArenaError::ZeroSizedRequest {
                arena: self.name.clone(),
            });
        }
        let align = alignment.max(MIN_ALIGNMENT);
        let size = align_up(len, align).ok_or_else(|| self.overflow(usize::MAX))?;
        let ptr = self.bump(size, align)?;
        // SAFETY: as in `try_push_bytes`; `len <= size`.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Push `len` fresh, zeroed bytes starting at a multiple of `alignment`.
    ///
    /// # Panics
    ///
    /// Panics on a zero-byte request, a non-power-of-two alignment, or
    /// arena overflow.
    #[allow(clippy::mut_from_ref)]
    #[track_caller]
    pub fn push_bytes_aligned(&self, len: usize, alignment: usize) -> &mut [u8] {
        match self.try_push_bytes_aligned(len, alignment) {
            Ok(bytes) => bytes,
            Err(err) => fatal(&err),
        }
    }

    /// Reserve properly aligned, uninitialised room for `len` values of `T`.
    fn alloc_raw<T>(&self, len: usize) -> Result<NonNull<T>, ArenaError> {
        let bytes = mem::size_of::<T>()
            .checked_mul(len)
            .ok_or_else(|| self.overflow(usize::MAX))?;
        if bytes == 0 {
            return Ok(NonNull::dangling());
        }
        let slot = self.try_push_bytes_aligned(bytes, mem::align_of::<T>())?;
        Ok(NonNull::from(slot).cast())
    }

    /// Move `value` into the arena.
    ///
    /// The value's destructor never runs; the memory is reclaimed by
    /// `clear` or when the partition is dropped.
    #[allow(clippy::mut_from_ref)]
    pub fn try_alloc<T>(&self, value: T) -> Result<&mut T, ArenaError> {
        let ptr = self.alloc_raw::<T>(1)?;
        // SAFETY: `ptr` is aligned for `T` and valid for one write (or
        // dangling for a zero-sized `T`), and nothing else refers to it.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Move `value` into the arena.
    ///
    /// # Panics
    ///
    /// Panics on arena overflow.
    #[allow(clippy::mut_from_ref)]
    #[track_caller]
    pub fn alloc<T>(&self, value: T) -> &mut T {
        match self.try_alloc(value) {
            Ok(value) => value,
            Err(err) => fatal(&err),
        }
    }

    /// Allocate `len` values produced by `f(index)`.
    #[allow(clippy::mut_from_ref)]
    pub fn try_alloc_slice_fill_with<T, F>(&self, len: usize, mut f: F) -> Result<&mut [T], ArenaError>
    where
        F: FnMut(usize) -> T,
    {
        let ptr = self.alloc_raw::<T>(len)?;
        for i in 0..len {
            // SAFETY: `i < len` and the range holds `len` aligned `T`s.
            unsafe { ptr.as_ptr().add(i).write(f(i)) };
        }
        // SAFETY: all `len` elements were initialised above.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Allocate `len` values produced by `f(index)`.
    ///
    /// # Panics
    ///
    /// Panics on arena overflow.
    #[allow(clippy::mut_from_ref)]
    #[track_caller]
    pub fn alloc_slice_fill_with<T, F>(&self, len: usize, f: F) -> &mut [T]
    where
        F: FnMut(usize) -> T,
    {
        match self.try_alloc_slice_fill_with(len, f) {
            Ok(slice) => slice,
            Err(err) => fatal(&err),
        }
    }

    /// Copy `src` into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn try_alloc_slice_copy<T: Copy>(&self, src: &[T]) -> Result<&mut [T], ArenaError> {
        let ptr = self.alloc_raw::<T>(src.len())?;
        // SAFETY: the destination is fresh arena memory sized for
        // `src.len()` values, so the ranges cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len());
            Ok(slice::from_raw_parts_mut(ptr.as_ptr(), src.len()))
        }
    }

    /// Copy `src` into the arena.
    ///
    /// # Panics
    ///
    /// Panics on arena overflow.
    #[allow(clippy::mut_from_ref)]
    #[track_caller]
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> &mut [T] {
        match self.try_alloc_slice_copy(src) {
            Ok(slice) => slice,
            Err(err) => fatal(&err),
        }
    }

    /// Copy a string into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn try_alloc_str(&self, src: &str) -> Result<&mut str, ArenaError> {
        let bytes = self.try_alloc_slice_copy(src.as_bytes())?;
        // SAFETY: the bytes were copied verbatim from a `str`.
        Ok(unsafe { std::str::from_utf8_unchecked_mut(bytes) })
    }

    /// Copy a string into the arena.
    ///
    /// # Panics
    ///
    /// Panics on arena overflow.
    #[allow(clippy::mut_from_ref)]
    #[track_caller]
    pub fn alloc_str(&self, src: &str) -> &mut str {
        match self.try_alloc_str(src) {
            Ok(s) => s,
            Err(err) => fatal(&err),
        }
    }

    /// Roll back to `marker`, zeroing every byte released.
    ///
    /// # Errors
    ///
    /// [`ArenaError::StaleMarker`] if `marker` lies beyond current usage.
    pub fn try_clear(&mut self, marker: Marker) -> Result<(), ArenaError> {
        let cursor = self.cursor.get_mut();
        if marker.0 > cursor.used {
            return Err(ArenaError::StaleMarker {
                arena: self.name.clone(),
                marker: marker.0,
                used: cursor.used,
            });
        }
        // SAFETY: `[marker, used)` lies inside the arena, and `&mut self`
        // guarantees no slice from an earlier push is still alive.
        unsafe {
            ptr::write_bytes(self.base.as_ptr().add(marker.0), 0, cursor.used - marker.0);
        }
        cursor.used = marker.0;
        Ok(())
    }

    /// Roll back to `marker`, zeroing every byte released.
    ///
    /// # Panics
    ///
    /// Panics if `marker` lies beyond current usage.
    #[track_caller]
    pub fn clear(&mut self, marker: Marker) {
        if let Err(err) = self.try_clear(marker) {
            fatal(&err);
        }
    }

    /// Release everything.
    pub fn reset(&mut self) {
        self.clear(Marker::START);
    }

    /// Open a temporary region that is cleared when the guard drops.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        let marker = self.marker();
        ArenaScope {
            arena: self,
            marker,
        }
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("Arena")
            .field("name", &self.name)
            .field("used", &stats.used)
            .field("capacity", &stats.capacity)
            .field("high_water", &stats.high_water)
            .finish()
    }
}

/// Exclusive access to an arena owned by a
/// [`MemoryPartition`](crate::MemoryPartition).
///
/// Dereferences to `&Arena` for pushes and adds the rollback operations
/// that need exclusive access. It never exposes `&mut Arena`, so an arena
/// cannot be swapped out of the partition that owns its memory:
///
/// ```compile_fail
/// use kiln_arena::{MemoryPartition, PartitionConfig};
///
/// let config = PartitionConfig::new().with_arena("x", 64);
/// let mut a = MemoryPartition::new(&config).unwrap();
/// let mut b = MemoryPartition::new(&config).unwrap();
/// let mut x = a.arena_mut("x").unwrap();
/// let mut y = b.arena_mut("x").unwrap();
/// std::mem::swap(&mut *x, &mut *y);
/// ```
pub struct ArenaMut<'a> {
    arena: &'a mut Arena,
}

impl<'a> ArenaMut<'a> {
    pub(crate) fn new(arena: &'a mut Arena) -> Self {
        Self { arena }
    }

    /// Roll back to `marker`, zeroing every byte released.
    ///
    /// # Errors
    ///
    /// [`ArenaError::StaleMarker`] if `marker` lies beyond current usage.
    pub fn try_clear(&mut self, marker: Marker) -> Result<(), ArenaError> {
        self.arena.try_clear(marker)
    }

    /// Roll back to `marker`, zeroing every byte released.
    ///
    /// # Panics
    ///
    /// Panics if `marker` lies beyond current usage.
    #[track_caller]
    pub fn clear(&mut self, marker: Marker) {
        self.arena.clear(marker);
    }

    /// Release everything.
    pub fn reset(&mut self) {
        self.arena.reset();
    }

    /// Open a temporary region that is cleared when the guard drops.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        self.arena.scope()
    }
}

impl Deref for ArenaMut<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

/// RAII rollback guard returned by [`Arena::scope`].
///
/// Dereferences to `&Arena`. Everything pushed through the guard is
/// released (and zeroed) when it drops.
pub struct ArenaScope<'a> {
    arena: &'a mut Arena,
    marker: Marker,
}

impl ArenaScope<'_> {
    /// The marker this scope will roll back to.
    pub fn marker(&self) -> Marker {
        self.marker
    }

    /// Roll back to `marker` without closing the scope.
    ///
    /// # Panics
    ///
    /// Panics if `marker` lies beyond current usage.
    #[track_caller]
    pub fn clear(&mut self, marker: Marker) {
        self.arena.clear(marker);
    }

    /// Release everything in the arena, including bytes pushed before the
    /// scope opened.
    pub fn reset(&mut self) {
        self.arena.reset();
    }
}

impl Deref for ArenaScope<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        // A nested clear may already have gone below our marker.
        let target = self.marker.min(self.arena.marker());
        self.arena.clear(target);
    }
}

#[cold]
#[track_caller]
fn fatal(err: &ArenaError) -> ! {
    tracing::error!(error = %err, "fatal arena misuse");
    panic!("{err}");
}
