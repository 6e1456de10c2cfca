//! One mapping, many arenas.
//!
//! [`MemoryPartition`] performs the single OS reservation for the whole
//! process and slices it into the named arenas listed in a
//! [`PartitionConfig`], contiguously and in order. The partition owns both
//! the mapping and the arenas, so arena references cannot outlive the
//! memory they point into, and dropping the partition releases everything
//! in one call.

#![allow(unsafe_code)]

use std::ops::Index;

use indexmap::IndexMap;

use crate::arena::{Arena, ArenaMut, Marker};
use crate::block::{align_up, page_size, VirtualBlock};
use crate::config::PartitionConfig;
use crate::error::ArenaError;

/// A fixed partition of one virtual-memory block into named arenas.
///
/// Created once at startup by the application root and passed by
/// reference to every subsystem that allocates.
///
/// Arenas are reached as `&Arena` (indexing, [`arena`](Self::arena)) or
/// through an [`ArenaMut`] handle for rollback. The partition never hands
/// out `&mut Arena`, so an arena cannot leave the mapping it points into:
///
/// ```compile_fail
/// use kiln_arena::{MemoryPartition, PartitionConfig};
///
/// let config = PartitionConfig::new().with_arena("x", 64);
/// let mut a = MemoryPartition::new(&config).unwrap();
/// let mut b = MemoryPartition::new(&config).unwrap();
/// std::mem::swap(&mut a["x"], &mut b["x"]);
/// ```
pub struct MemoryPartition {
    // Declared before `block` so arenas are dropped before the mapping.
    arenas: IndexMap<String, Arena>,
    block: VirtualBlock,
}

// Compile-time assertion: MemoryPartition must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<MemoryPartition>();
};

impl MemoryPartition {
    /// Map one block large enough for every configured arena and slice it.
    ///
    /// Every size is rounded up to the page size, so each arena starts on
    /// a page boundary. Either the whole partition exists or nothing was
    /// mapped.
    pub fn new(config: &PartitionConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let page = page_size();

        let too_large = |requested: u64| ArenaError::PartitionTooLarge {
            requested,
            ceiling: config.max_total_bytes,
        };

        let mut sizes = Vec::with_capacity(config.arenas.len());
        let mut total: u64 = 0;
        for spec in &config.arenas {
            let rounded = align_up(spec.bytes, page).ok_or_else(|| too_large(u64::MAX))?;
            total = total
                .checked_add(rounded as u64)
                .ok_or_else(|| too_large(u64::MAX))?;
            sizes.push(rounded);
        }
        if total > config.max_total_bytes {
            return Err(too_large(total));
        }
        let total = usize::try_from(total).map_err(|_| too_large(total))?;

        let block = VirtualBlock::map(total)?;
        let mut arenas = IndexMap::with_capacity(config.arenas.len());
        let mut offset = 0usize;
        for (spec, &size) in config.arenas.iter().zip(&sizes) {
            // SAFETY: `offset + size <= total == block.len()`, so the range
            // is inside the zero-filled mapping. Ranges of distinct arenas
            // are disjoint, and the arenas live in `self` next to the block
            // they borrow from.
            let arena = unsafe {
                Arena::from_raw_parts(block.base().as_ptr().add(offset), size, spec.name.clone())?
            };
            arenas.insert(spec.name.clone(), arena);
            offset += size;
        }

        tracing::debug!(
            total_bytes = total,
            arenas = arenas.len(),
            page_size = page,
            "memory partition mapped"
        );
        Ok(Self { arenas, block })
    }

    /// Look up an arena by name.
    pub fn arena(&self, name: &str) -> Option<&Arena> {
        self.arenas.get(name)
    }

    /// Look up an arena by name for clearing.
    pub fn arena_mut(&mut self, name: &str) -> Option<ArenaMut<'_>> {
        self.arenas.get_mut(name).map(ArenaMut::new)
    }

    /// Roll the named arena back to `marker`.
    ///
    /// # Panics
    ///
    /// Panics if no arena has this name or `marker` lies beyond its usage.
    #[track_caller]
    pub fn clear(&mut self, name: &str, marker: Marker) {
        self.expect_arena_mut(name).clear(marker);
    }

    /// Release everything in the named arena.
    ///
    /// # Panics
    ///
    /// Panics if no arena has this name.
    #[track_caller]
    pub fn reset(&mut self, name: &str) {
        self.expect_arena_mut(name).reset();
    }

    /// Release everything in every arena.
    pub fn reset_all(&mut self) {
        for arena in self.arenas.values_mut() {
            arena.reset();
        }
    }

    #[track_caller]
    fn expect_arena_mut(&mut self, name: &str) -> ArenaMut<'_> {
        match self.arenas.get_mut(name) {
            Some(arena) => ArenaMut::new(arena),
            None => panic!("no arena named '{name}' in partition"),
        }
    }

    /// Arenas in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Arena> {
        self.arenas.values()
    }

    /// Arenas in address order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = ArenaMut<'_>> {
        self.arenas.values_mut().map(ArenaMut::new)
    }

    /// Number of arenas.
    pub fn len(&self) -> usize {
        self.arenas.len()
    }

    /// Always `false`: empty layouts are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.arenas.is_empty()
    }

    /// Total mapped bytes, the sum of all page-rounded arena capacities.
    pub fn total_bytes(&self) -> usize {
        self.block.len()
    }

    /// Address of the start of the mapping.
    pub fn base_addr(&self) -> usize {
        self.block.base().as_ptr() as usize
    }

    /// Page size used for rounding.
    pub fn page_size(&self) -> usize {
        page_size()
    }
}

impl Index<&str> for MemoryPartition {
    type Output = Arena;

    /// # Panics
    ///
    /// Panics if no arena has this name.
    fn index(&self, name: &str) -> &Arena {
        match self.arenas.get(name) {
            Some(arena) => arena,
            None => panic!("no arena named '{name}' in partition"),
        }
    }
}

impl Drop for MemoryPartition {
    fn drop(&mut self) {
        tracing::debug!(total_bytes = self.block.len(), "memory partition released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIB: usize = 1024;

    #[test]
    fn arenas_are_contiguous_page_aligned_and_ordered() {
        let page = page_size();
        let config = PartitionConfig::frame_scene_permanent(100, page + 1, 3 * page);
        let partition = MemoryPartition::new(&config).unwrap();

        let frame = &partition["frame"];
        let scene = &partition["scene"];
        let permanent = &partition["permanent"];
        assert_eq!(frame.capacity(), page);
        assert_eq!(scene.capacity(), 2 * page);
        assert_eq!(permanent.capacity(), 3 * page);

        assert_eq!(frame.base_addr(), partition.base_addr());
        assert_eq!(scene.base_addr(), frame.base_addr() + frame.capacity());
        assert_eq!(permanent.base_addr(), scene.base_addr() + scene.capacity());
        assert!(partition.iter().all(|a| a.base_addr() % page == 0));
        assert_eq!(partition.total_bytes(), 6 * page);
    }

    #[test]
    fn arenas_start_empty_and_zeroed() {
        let partition = MemoryPartition::new(&PartitionConfig::transient_permanent(8 * KIB, 8 * KIB))
            .unwrap();
        for arena in partition.iter() {
            assert_eq!(arena.used(), 0);
            let bytes = arena.push_bytes(arena.capacity());
            assert!(bytes.iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn iteration_follows_configuration_order() {
        let config = PartitionConfig::new()
            .with_arena("z", 64)
            .with_arena("a", 64)
            .with_arena("m", 64);
        let partition = MemoryPartition::new(&config).unwrap();
        let names: Vec<_> = partition.iter().map(Arena::name).collect();
        assert_eq!(names, ["z", "a", "m"]);
        assert_eq!(partition.len(), 3);
    }

    #[test]
    fn ceiling_is_enforced_after_rounding() {
        let page = page_size();
        let config = PartitionConfig::new()
            .with_arena("a", 1)
            .with_arena("b", 1)
            .with_max_total_bytes(page as u64);
        match MemoryPartition::new(&config) {
            Err(ArenaError::PartitionTooLarge { requested, ceiling }) => {
                assert_eq!(requested, 2 * page as u64);
                assert_eq!(ceiling, page as u64);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("partition above the ceiling was mapped"),
        }
    }

    #[test]
    fn invalid_layouts_are_rejected_before_mapping() {
        let zero = PartitionConfig::new().with_arena("a", 0);
        assert!(matches!(
            MemoryPartition::new(&zero),
            Err(ArenaError::ZeroSizedArena { .. })
        ));
        let dup = PartitionConfig::new().with_arena("a", 1).with_arena("a", 1);
        assert!(matches!(
            MemoryPartition::new(&dup),
            Err(ArenaError::DuplicateArena { .. })
        ));
        assert!(matches!(
            MemoryPartition::new(&PartitionConfig::new()),
            Err(ArenaError::EmptyPartition)
        ));
    }

    #[test]
    fn arenas_do_not_bleed_into_each_other() {
        let page = page_size();
        let mut partition =
            MemoryPartition::new(&PartitionConfig::transient_permanent(page, page)).unwrap();
        partition["permanent"].push_bytes(16).fill(0x11);
        partition["transient"].push_bytes(page).fill(0xFF);
        assert!(partition["transient"].try_push_bytes(1).is_err());

        partition.reset("transient");
        let permanent = partition.arena("permanent").unwrap();
        assert_eq!(permanent.used(), 16);
        assert!(permanent.contains((permanent.base_addr() + 15) as *const u8));
        assert!(!permanent.contains((permanent.base_addr() + page) as *const u8));
    }

    #[test]
    fn unknown_arena_lookup() {
        let partition = MemoryPartition::new(&PartitionConfig::new().with_arena("a", 64)).unwrap();
        assert!(partition.arena("b").is_none());
    }

    #[test]
    #[should_panic(expected = "no arena named 'b'")]
    fn unknown_arena_index_panics() {
        let partition = MemoryPartition::new(&PartitionConfig::new().with_arena("a", 64)).unwrap();
        let _ = &partition["b"];
    }

    #[test]
    fn end_to_end_aligned_objects() {
        let partition =
            MemoryPartition::new(&PartitionConfig::new().with_arena("objects", 64 * KIB)).unwrap();
        let arena = &partition["objects"];
        let addrs: Vec<usize> = (0..10)
            .map(|_| arena.push_bytes_aligned(100, 16).as_ptr() as usize)
            .collect();
        assert!(addrs.iter().all(|a| a % 16 == 0));
        assert!(addrs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(arena.used(), 10 * 112);
    }

    #[test]
    fn rollback_goes_through_the_partition() {
        let mut partition = MemoryPartition::new(
            &PartitionConfig::new().with_arena("a", 1024).with_arena("b", 1024),
        )
        .unwrap();
        let marker = partition["a"].marker();
        partition["a"].push_bytes(100).fill(0xAB);
        partition["b"].push_bytes(10);

        partition.clear("a", marker);
        assert_eq!(partition["a"].used(), 0);
        assert_eq!(partition["b"].used(), 10);
        assert!(partition["a"].push_bytes(100).iter().all(|&b| b == 0));

        partition.reset_all();
        assert!(partition.iter().all(|a| a.used() == 0));
    }

    #[test]
    fn handles_clear_scope_and_keep_names_bound() {
        let mut partition = MemoryPartition::new(
            &PartitionConfig::new().with_arena("a", 1024).with_arena("b", 1024),
        )
        .unwrap();
        let a_base = partition["a"].base_addr();
        {
            let mut a = partition.arena_mut("a").unwrap();
            a.push_bytes(8);
            {
                let scratch = a.scope();
                scratch.push_bytes(64);
                assert_eq!(scratch.used(), 72);
            }
            assert_eq!(a.used(), 8);
            a.reset();
        }
        for mut arena in partition.iter_mut() {
            arena.push_bytes(4);
            arena.reset();
        }
        assert!(partition.arena_mut("c").is_none());
        assert_eq!(partition["a"].name(), "a");
        assert_eq!(partition["b"].name(), "b");
        assert_eq!(partition["a"].base_addr(), a_base);
    }

    #[test]
    #[should_panic(expected = "no arena named 'missing'")]
    fn reset_unknown_arena_panics() {
        let mut partition =
            MemoryPartition::new(&PartitionConfig::new().with_arena("a", 64)).unwrap();
        partition.reset("missing");
    }
}
