use std::{io, ptr::NonNull};

use log::{debug, trace};

use crate::{
    backing::{Backing, BoxedBacking},
    block::{BlockHeader, BlockInfo, BlockOffset},
    config::ArenaConfig,
    error::ArenaError,
    freelist::{self, Fit, FreeList},
    heap::Heap,
    kernel::MappedBacking,
    utils::round_up,
};

/// Handle to a block handed out by [`Arena::allocate`].
///
/// It is only meaningful for the arena that returned it and only until it is
/// given back to [`Arena::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Allocation {
    block: BlockOffset,
}

/// A first-fit allocator over a fixed buffer.
///
/// All blocks come out of the single buffer owned by the [`Backing`]; the
/// arena never grows it and never asks anyone else for memory. Free blocks
/// are threaded on an address-ordered free list and merged with their free
/// neighbours as soon as they are released, so releasing everything always
/// gives back one block spanning the whole heap.
///
/// The arena is single-threaded. Wrap it in a lock (see
/// [`crate::GlobalArena`]) to share it.
///
/// ### Caller contract
///
/// Releasing an [`Allocation`] twice, or one obtained from another arena,
/// is a contract violation. It is not detected in release builds and leaves
/// the arena in an unspecified state, though never one that reads or writes
/// outside its buffer. Debug builds assert on double release.
pub struct Arena<B = BoxedBacking> {
    heap: Heap<B>,
    free_list: FreeList,
}

impl Arena<BoxedBacking> {
    /// Builds an arena over a buffer taken once from the Rust allocator.
    pub fn boxed(config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let backing = BoxedBacking::new(config.capacity, config.quantum)?;

        Self::new(config, backing)
    }
}

impl Arena<MappedBacking> {
    /// Builds an arena over a buffer mapped once from the operating system.
    pub fn mapped(config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let backing = MappedBacking::new(config.capacity)?;

        Self::new(config, backing)
    }
}

impl<B: Backing> Arena<B> {
    /// Builds an arena over the first `config.capacity` bytes of `backing`.
    ///
    /// The whole buffer starts out as a single free block.
    pub fn new(config: ArenaConfig, backing: B) -> Result<Self, ArenaError> {
        let heap = Heap::new(backing, &config)?;

        debug!(
            "arena ready: {} bytes in quanta of {} bytes",
            config.capacity, config.quantum
        );

        Ok(Self {
            heap,
            free_list: FreeList::new(BlockOffset::BASE),
        })
    }

    /// Allocates a block with room for at least `size` bytes.
    ///
    /// The request is rounded up to a whole number of quanta; a zero-sized
    /// request gets one quantum. The first free block large enough for the
    /// rounded size plus a header is used. Any excess is split off as a new
    /// free block that takes the original's place on the free list.
    ///
    /// Returns `None` when no free block is large enough. The arena is left
    /// untouched in that case.
    pub fn allocate(&mut self, size: u64) -> Option<Allocation> {
        let header_size = self.heap.header_size();

        let payload = round_up(size, self.heap.quantum());
        let Some(needed) = payload.and_then(|payload| payload.checked_add(header_size)) else {
            debug!("request of {size} bytes exceeds the address space");
            return None;
        };

        let fit = self.free_list.find_free_block(&self.heap, needed);
        let Some(Fit { prev, block, header }) = fit else {
            debug!("arena exhausted: no free block holds {needed} bytes");
            return None;
        };

        let remainder = header.size - needed;

        if remainder == 0 {
            self.free_list.relink(&mut self.heap, prev, header.next());

            trace!("exact fit of {needed} bytes at {}", block.get());
        } else {
            let rest = block.after(needed);
            self.heap.write_header(rest, BlockHeader::free(remainder, header.next()));
            self.free_list.relink(&mut self.heap, prev, Some(rest));

            trace!(
                "split {} bytes at {} into {needed} allocated and {remainder} free",
                header.size,
                block.get()
            );
        }

        self.heap.write_header(block, BlockHeader::allocated(needed));

        Some(Allocation { block })
    }

    /// Gives a block back to the arena. `None` is accepted and ignored.
    ///
    /// The block is put back on the free list at its address position and
    /// merged with the free blocks physically around it.
    pub fn release(&mut self, allocation: Option<Allocation>) {
        let Some(Allocation { block }) = allocation else {
            return;
        };

        let header = self.heap.header(block);
        debug_assert!(
            !header.is_free(),
            "block at offset {} released while already free",
            block.get()
        );

        let prev = self.free_list.insert_free_block(&mut self.heap, block, header.size);

        trace!("released {} bytes at {}", header.size, block.get());

        self.coalesce(block);
        if let Some(prev) = prev {
            self.coalesce(prev);
        }
    }

    /// Merges `block` with its list successors for as long as they are also
    /// its physical neighbours.
    fn coalesce(&mut self, block: BlockOffset) {
        while self.free_list.merge_with_next(&mut self.heap, block) {}
    }

    fn live_header(&self, allocation: Allocation) -> BlockHeader {
        let header = self.heap.header(allocation.block);
        assert!(
            !header.is_free(),
            "allocation at offset {} is not live",
            allocation.block.get()
        );

        header
    }

    /// Content of a live allocation.
    pub fn data(&self, allocation: Allocation) -> &[u8] {
        let header = self.live_header(allocation);
        self.heap.payload(allocation.block, &header)
    }

    /// Mutable content of a live allocation.
    pub fn data_mut(&mut self, allocation: Allocation) -> &mut [u8] {
        let header = self.live_header(allocation);
        self.heap.payload_mut(allocation.block, &header)
    }

    /// Bytes usable by the caller: the request rounded up to the quantum.
    pub fn usable_size(&self, allocation: Allocation) -> usize {
        self.live_header(allocation).size - self.heap.header_size()
    }

    /// Address of the content of `allocation`. Aligned to the quantum.
    pub fn as_ptr(&self, allocation: Allocation) -> NonNull<u8> {
        self.heap.payload_ptr(allocation.block)
    }

    /// Offset of the content of `allocation` from the start of the heap.
    pub fn offset_of(&self, allocation: Allocation) -> usize {
        allocation.block.get() + self.heap.header_size()
    }

    /// Handle for a pointer previously returned by [`Arena::as_ptr`].
    ///
    /// Only the position of `ptr` is checked, not whether the block it points
    /// into is live.
    pub fn allocation_at(&self, ptr: NonNull<u8>) -> Option<Allocation> {
        self.heap.block_of(ptr).map(|block| Allocation { block })
    }

    /// Size of the heap in bytes.
    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    pub fn quantum(&self) -> usize {
        self.heap.quantum()
    }

    /// Sum of the sizes of all free blocks, headers included.
    pub fn free_bytes(&self) -> usize {
        self.free_blocks().map(|block| block.size).sum()
    }

    /// Size of the largest free block, header included. Zero when the heap is
    /// fully allocated.
    pub fn largest_free_block(&self) -> usize {
        self.free_blocks().map(|block| block.size).max().unwrap_or(0)
    }

    pub fn free_block_count(&self) -> usize {
        self.free_blocks().count()
    }

    /// Walks every block of the heap in address order.
    ///
    /// # Panics
    ///
    /// Panics if the walk meets a corrupted header.
    pub fn blocks(&self) -> Blocks<'_, B> {
        Blocks {
            heap: &self.heap,
            current: Some(BlockOffset::BASE),
        }
    }

    /// Walks the free list.
    ///
    /// # Panics
    ///
    /// Panics if the walk meets a corrupted header.
    pub fn free_blocks(&self) -> FreeBlocks<'_, B> {
        FreeBlocks {
            inner: self.free_list.iter(&self.heap),
        }
    }

    /// Writes every block of the heap, then every free block, with its offset
    /// and size. Read only, so it can be called between any two operations.
    ///
    /// # Panics
    ///
    /// Panics on a corrupted heap: a misaligned or empty block, a block that
    /// runs past the end, or a free list with more entries than the heap has
    /// room for.
    pub fn dump<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "All blocks:")?;
        for block in self.blocks() {
            writeln!(out, "  Block starting at {}, size {}", block.offset, block.size)?;
        }

        writeln!(out, "Current free block list:")?;
        let max_free = self.capacity() / self.quantum();
        for (seen, block) in self.free_blocks().enumerate() {
            assert!(seen < max_free, "free list does not terminate");
            writeln!(out, "  Free block starting at {}, size {}", block.offset, block.size)?;
        }

        Ok(())
    }

    /// Verifies the structure of the heap without panicking:
    ///
    /// - every block size is a non-zero multiple of the quantum,
    /// - the blocks tile the heap exactly, with the last one ending at the
    ///   capacity,
    /// - no two free blocks are physical neighbours,
    /// - the free list is strictly increasing in address and holds exactly
    ///   the free blocks of the heap.
    pub fn check(&self) -> Result<(), ArenaError> {
        let quantum = self.quantum();

        let mut free_in_heap = Vec::new();
        let mut prev_free = false;
        let mut current = Some(BlockOffset::BASE);

        while let Some(block) = current {
            let header = self.heap.try_header(block)?;
            check_size(block, &header, quantum)?;

            if header.is_free() {
                if prev_free {
                    return Err(ArenaError::Corrupted {
                        offset: block.get(),
                        reason: "free block follows another free block",
                    });
                }
                free_in_heap.push(block);
            }
            prev_free = header.is_free();

            current = self.heap.try_next_physical(block, &header)?;
        }

        let mut listed = Vec::new();
        let mut current = self.free_list.first();

        while let Some(block) = current {
            if listed.last().is_some_and(|&last| block <= last) {
                return Err(ArenaError::Corrupted {
                    offset: block.get(),
                    reason: "free list is not in increasing address order",
                });
            }

            let header = self.heap.try_header(block)?;
            if !header.is_free() {
                return Err(ArenaError::Corrupted {
                    offset: block.get(),
                    reason: "free list links to an allocated block",
                });
            }

            listed.push(block);
            current = header.next();
        }

        if listed != free_in_heap {
            let offset = listed
                .iter()
                .zip(&free_in_heap)
                .find(|(listed, found)| listed != found)
                .map(|(listed, _)| *listed)
                .or_else(|| listed.get(free_in_heap.len()).copied())
                .or_else(|| free_in_heap.get(listed.len()).copied())
                .map_or(0, BlockOffset::get);

            return Err(ArenaError::Corrupted {
                offset,
                reason: "free list does not hold exactly the free blocks",
            });
        }

        Ok(())
    }
}

fn check_size(block: BlockOffset, header: &BlockHeader, quantum: usize) -> Result<(), ArenaError> {
    if header.size == 0 || header.size % quantum != 0 {
        return Err(ArenaError::Corrupted {
            offset: block.get(),
            reason: "block size is not a positive multiple of the quantum",
        });
    }

    Ok(())
}

/// Iterator returned by [`Arena::blocks`].
pub struct Blocks<'a, B> {
    heap: &'a Heap<B>,
    current: Option<BlockOffset>,
}

impl<B: Backing> Iterator for Blocks<'_, B> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        let header = self.heap.header(block);

        if let Err(err) = check_size(block, &header, self.heap.quantum()) {
            panic!("{err}");
        }

        self.current = self.heap.next_physical(block, &header);

        Some(BlockInfo::new(block, &header))
    }
}

/// Iterator returned by [`Arena::free_blocks`].
pub struct FreeBlocks<'a, B> {
    inner: freelist::Iter<'a, B>,
}

impl<B: Backing> Iterator for FreeBlocks<'_, B> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(block, header)| BlockInfo::new(block, &header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn arena(capacity: usize) -> Arena {
        Arena::boxed(ArenaConfig::with_capacity(capacity)).unwrap()
    }

    fn layout(arena: &Arena) -> Vec<(usize, usize, bool)> {
        arena
            .blocks()
            .map(|block| (block.offset, block.size, block.free))
            .collect()
    }

    fn free_list(arena: &Arena) -> Vec<(usize, usize)> {
        arena
            .free_blocks()
            .map(|block| (block.offset, block.size))
            .collect()
    }

    #[test]
    fn fresh_arena_is_one_free_block() {
        let arena = arena(1024);

        assert_eq!(layout(&arena), vec![(0, 1024, true)]);
        assert_eq!(free_list(&arena), vec![(0, 1024)]);
        assert_eq!(arena.free_bytes(), 1024);
        assert!(arena.check().is_ok());
    }

    #[test]
    fn split_leaves_remainder_right_after() {
        let mut arena = arena(1024);

        let a = arena.allocate(20).unwrap();

        // 20 rounds to 32, plus a 16 byte header.
        assert_eq!(layout(&arena), vec![(0, 48, false), (48, 976, true)]);
        assert_eq!(free_list(&arena), vec![(48, 976)]);
        assert_eq!(arena.offset_of(a), 16);
        assert_eq!(arena.usable_size(a), 32);
        assert!(arena.check().is_ok());
    }

    #[test]
    fn exact_fit_unlinks_the_block() {
        let mut arena = arena(64);

        let a = arena.allocate(48).unwrap();

        assert_eq!(layout(&arena), vec![(0, 64, false)]);
        assert!(free_list(&arena).is_empty());
        assert_eq!(arena.largest_free_block(), 0);
        assert!(arena.allocate(1).is_none());

        arena.release(Some(a));
        assert_eq!(free_list(&arena), vec![(0, 64)]);
    }

    #[test]
    fn exact_fit_in_the_middle_of_the_list() {
        let mut arena = arena(256);
        let a = arena.allocate(16).unwrap();
        let _b = arena.allocate(16).unwrap();
        let c = arena.allocate(16).unwrap();
        let _d = arena.allocate(16).unwrap();

        arena.release(Some(a));
        arena.release(Some(c));
        assert_eq!(free_list(&arena), vec![(0, 32), (64, 32), (128, 128)]);

        let e = arena.allocate(16).unwrap();
        assert_eq!(e, a);
        let f = arena.allocate(16).unwrap();
        assert_eq!(f, c);

        assert_eq!(free_list(&arena), vec![(128, 128)]);
        assert!(arena.check().is_ok());
    }

    #[test]
    fn first_fit_prefers_lower_address() {
        let mut arena = arena(320);

        let a = arena.allocate(16).unwrap(); // 32 byte block at 0
        let _b = arena.allocate(16).unwrap();
        let c = arena.allocate(48).unwrap(); // 64 byte block at 64
        let _d = arena.allocate(16).unwrap();
        let e = arena.allocate(112).unwrap(); // 128 byte block at 160
        let _f = arena.allocate(16).unwrap();
        assert!(free_list(&arena).is_empty());

        arena.release(Some(a));
        arena.release(Some(c));
        arena.release(Some(e));
        assert_eq!(free_list(&arena), vec![(0, 32), (64, 64), (160, 128)]);

        // Fits in both the 64 and the 128 byte block.
        let g = arena.allocate(40).unwrap();
        assert_eq!(arena.offset_of(g), 80);
        assert_eq!(free_list(&arena), vec![(0, 32), (160, 128)]);
    }

    #[test]
    fn exhaustion_leaves_state_untouched() {
        let mut arena = arena(512);
        let _a = arena.allocate(100).unwrap();
        let before = layout(&arena);

        assert!(arena.allocate(1024).is_none());
        assert!(arena.allocate(u64::MAX).is_none());

        assert_eq!(layout(&arena), before);
        assert!(arena.check().is_ok());
    }

    #[test]
    fn null_release_is_a_no_op() {
        let mut arena = arena(256);
        let _a = arena.allocate(10).unwrap();
        let before = layout(&arena);

        arena.release(None);

        assert_eq!(layout(&arena), before);
        assert!(arena.check().is_ok());
    }

    #[test]
    fn zero_sized_request_gets_one_quantum() {
        let mut arena = arena(256);
        let a = arena.allocate(0).unwrap();

        assert_eq!(arena.usable_size(a), 16);
        assert_eq!(layout(&arena)[0], (0, 32, false));
    }

    #[test]
    fn coalesce_adjacent_pair_in_either_order() {
        for forward in [true, false] {
            let mut arena = arena(256);
            let a = arena.allocate(16).unwrap();
            let b = arena.allocate(32).unwrap();
            let _guard = arena.allocate(16).unwrap();

            if forward {
                arena.release(Some(a));
                arena.release(Some(b));
            } else {
                arena.release(Some(b));
                arena.release(Some(a));
            }

            assert_eq!(free_list(&arena), vec![(0, 80), (112, 144)]);
            assert!(arena.check().is_ok());
        }
    }

    #[test]
    fn releasing_middle_block_merges_both_sides() {
        let mut arena = arena(256);
        let a = arena.allocate(16).unwrap();
        let b = arena.allocate(16).unwrap();
        let c = arena.allocate(16).unwrap();

        arena.release(Some(a));
        arena.release(Some(c));
        assert_eq!(free_list(&arena), vec![(0, 32), (64, 192)]);

        arena.release(Some(b));
        assert_eq!(free_list(&arena), vec![(0, 256)]);
        assert!(arena.check().is_ok());
    }

    #[test]
    fn full_release_restores_whole_heap() {
        let config = ArenaConfig::with_capacity(4096);
        let mut arena = Arena::boxed(config).unwrap();

        let allocations: Vec<_> = (0..20).map(|i| arena.allocate(i * 7).unwrap()).collect();
        for allocation in allocations.into_iter().rev().step_by(2) {
            arena.release(Some(allocation));
        }
        // Release the rest by walking the heap for live blocks.
        let live: Vec<_> = arena
            .blocks()
            .filter(|block| !block.free)
            .map(|block| Allocation {
                block: BlockOffset::new(block.offset),
            })
            .collect();
        for allocation in live {
            arena.release(Some(allocation));
        }

        assert_eq!(free_list(&arena), vec![(0, 4096)]);
        assert!(arena.allocate(config.max_payload() as u64).is_some());
    }

    #[test]
    fn data_is_writable_and_isolated() {
        let mut arena = arena(256);
        let a = arena.allocate(16).unwrap();
        let b = arena.allocate(16).unwrap();

        arena.data_mut(a).fill(0xaa);
        arena.data_mut(b).fill(0xbb);

        assert!(arena.data(a).iter().all(|&byte| byte == 0xaa));
        assert!(arena.data(b).iter().all(|&byte| byte == 0xbb));
        assert!(arena.check().is_ok());
    }

    #[test]
    fn pointers_are_quantum_aligned() {
        let mut arena = Arena::boxed(ArenaConfig::new(4096, 64)).unwrap();
        let a = arena.allocate(1).unwrap();
        let b = arena.allocate(100).unwrap();

        assert_eq!(arena.as_ptr(a).as_ptr() as usize % 64, 0);
        assert_eq!(arena.as_ptr(b).as_ptr() as usize % 64, 0);
        assert_eq!(arena.allocation_at(arena.as_ptr(b)), Some(b));
    }

    #[test]
    fn dump_lists_blocks_and_free_list() {
        let mut arena = arena(256);
        let _a = arena.allocate(16).unwrap();

        let mut out = Vec::new();
        arena.dump(&mut out).unwrap();

        let expected = "All blocks:\n\
                        \x20 Block starting at 0, size 32\n\
                        \x20 Block starting at 32, size 224\n\
                        Current free block list:\n\
                        \x20 Free block starting at 32, size 224\n";
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn check_reports_unlisted_free_block() {
        let mut arena = arena(256);
        let _a = arena.allocate(16).unwrap();

        // Mark the allocated block free behind the list's back.
        arena.heap.write_header(BlockOffset::BASE, BlockHeader::free(32, None));

        assert!(matches!(arena.check(), Err(ArenaError::Corrupted { .. })));
    }

    #[test]
    fn check_reports_broken_size() {
        let mut arena = arena(256);
        arena.heap.write_header(BlockOffset::BASE, BlockHeader::free(200, None));

        assert!(matches!(
            arena.check(),
            Err(ArenaError::Corrupted { offset: 0, .. })
        ));
    }

    #[test]
    #[should_panic(expected = "not a positive multiple")]
    fn dump_asserts_on_misaligned_size() {
        let mut arena = arena(256);
        arena.heap.write_header(BlockOffset::BASE, BlockHeader::free(40, None));

        let _ = arena.dump(&mut Vec::new());
    }

    /// One allocated block at 0, then a free block at 32 that links to itself.
    fn self_linked_arena() -> Arena {
        let mut arena = arena(256);
        let _a = arena.allocate(16).unwrap();

        let rest = BlockOffset::new(32);
        arena.heap.write_header(rest, BlockHeader::free(224, Some(rest)));
        arena
    }

    #[test]
    fn check_reports_free_list_cycle() {
        let arena = self_linked_arena();

        assert_eq!(
            arena.check(),
            Err(ArenaError::Corrupted {
                offset: 32,
                reason: "free list is not in increasing address order",
            })
        );
    }

    #[test]
    #[should_panic(expected = "does not terminate")]
    fn dump_asserts_on_free_list_cycle() {
        let arena = self_linked_arena();

        let _ = arena.dump(&mut Vec::new());
    }

    #[test]
    #[should_panic(expected = "extends past the end")]
    fn dump_asserts_on_block_past_the_end() {
        let mut arena = arena(256);
        arena.heap.write_header(BlockOffset::BASE, BlockHeader::free(512, None));

        let _ = arena.dump(&mut Vec::new());
    }

    #[test]
    fn mapped_arena_round_trip() {
        let mut arena = Arena::mapped(ArenaConfig::with_capacity(8192)).unwrap();
        let a = arena.allocate(1000).unwrap();
        arena.data_mut(a)[999] = 1;
        arena.release(Some(a));

        assert_eq!(arena.free_block_count(), 1);
        assert!(arena.check().is_ok());
    }
}
