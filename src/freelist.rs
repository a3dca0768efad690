use log::trace;

use crate::{
    backing::Backing,
    block::{BlockHeader, BlockOffset},
    heap::Heap,
};

/// Linked list to keep track of free blocks.
///
/// The list is intrusive: the link to the next free block lives in the header
/// of each free block, inside the heap itself, so the list needs no storage of
/// its own besides the offset of its first entry.
///
/// ```text
///                          Free List
///
///  head         next free block            next free block
///   |      +--------------------------+  +-------------------+
///   |      |                          |  |                   |
/// +-v------|-+-------+-------+------+-v--|-+-------+------+-v----+
/// |  Free    | Block | Block | ...  | Free | Block | ...  | Free |
/// +----------+-------+-------+------+------+-------+------+------+
/// base                                                       capacity
/// ```
///
/// Entries are always kept in increasing address order. That is what makes
/// coalescing cheap: two free blocks can only be physical neighbours if they
/// are also neighbours on this list.
pub(crate) struct FreeList {
    head: Option<BlockOffset>,
}

/// Result of a first-fit search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Fit {
    /// Free block whose link points at `block`, `None` when `block` is the head.
    pub prev: Option<BlockOffset>,
    pub block: BlockOffset,
    pub header: BlockHeader,
}

impl FreeList {
    /// A list whose only entry is `head`, which must already carry a free
    /// header with no successor.
    pub const fn new(head: BlockOffset) -> Self {
        Self { head: Some(head) }
    }

    #[inline]
    pub fn first(&self) -> Option<BlockOffset> {
        self.head
    }

    pub fn iter<'h, B: Backing>(&self, heap: &'h Heap<B>) -> Iter<'h, B> {
        Iter {
            heap,
            current: self.head,
        }
    }

    /// Returns the first block on the list, in address order, whose total size
    /// is at least `needed` bytes. This is first-fit: a later, better fitting
    /// block is never preferred.
    pub fn find_free_block<B: Backing>(&self, heap: &Heap<B>, needed: usize) -> Option<Fit> {
        let mut prev = None;

        for (block, header) in self.iter(heap) {
            if header.size >= needed {
                return Some(Fit {
                    prev,
                    block,
                    header,
                });
            }
            prev = Some(block);
        }

        None
    }

    /// Makes `next` the successor of `prev`, or the head of the list when
    /// there is no `prev`.
    pub fn relink<B: Backing>(
        &mut self,
        heap: &mut Heap<B>,
        prev: Option<BlockOffset>,
        next: Option<BlockOffset>,
    ) {
        match prev {
            None => self.head = next,
            Some(prev) => {
                let header = heap.header(prev);
                debug_assert!(header.is_free(), "relinking an allocated block");
                heap.write_header(prev, BlockHeader::free(header.size, next));
            }
        }
    }

    /// Inserts `block` of `size` bytes into the list at its address position
    /// and returns its new predecessor.
    pub fn insert_free_block<B: Backing>(
        &mut self,
        heap: &mut Heap<B>,
        block: BlockOffset,
        size: usize,
    ) -> Option<BlockOffset> {
        let head = match self.head {
            Some(head) if head < block => head,
            head => {
                // Empty list, or the block goes before the current head.
                heap.write_header(block, BlockHeader::free(size, head));
                self.head = Some(block);
                return None;
            }
        };

        // Walk until the successor would be past `block`.
        let mut prev = head;
        let mut prev_header = heap.header(prev);
        while let Some(next) = prev_header.next().filter(|&next| next < block) {
            prev = next;
            prev_header = heap.header(next);
        }

        heap.write_header(block, BlockHeader::free(size, prev_header.next()));
        heap.write_header(prev, BlockHeader::free(prev_header.size, Some(block)));

        Some(prev)
    }

    /// Absorbs the list successor of `block` if it is also the block right
    /// after it in memory. Returns whether a merge happened.
    pub fn merge_with_next<B: Backing>(&mut self, heap: &mut Heap<B>, block: BlockOffset) -> bool {
        let header = heap.header(block);

        let Some(next) = header.next() else {
            return false;
        };

        if heap.next_physical(block, &header) != Some(next) {
            return false;
        }

        let next_header = heap.header(next);
        debug_assert!(next_header.is_free(), "free-list entry is not free");

        // The absorbed block is never the head since it comes after `block`.
        heap.write_header(
            block,
            BlockHeader::free(header.size + next_header.size, next_header.next()),
        );

        trace!(
            "merged free block {} ({} bytes) into {} ({} bytes)",
            next.get(),
            next_header.size,
            block.get(),
            header.size
        );

        true
    }
}

/// Iterator over the free list, yielding each entry with its header.
pub(crate) struct Iter<'h, B> {
    heap: &'h Heap<B>,
    current: Option<BlockOffset>,
}

impl<B: Backing> Iterator for Iter<'_, B> {
    type Item = (BlockOffset, BlockHeader);

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;
        let header = self.heap.header(block);

        self.current = header.next();

        Some((block, header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backing::BoxedBacking, config::ArenaConfig};

    /// Lays out `blocks` (size, free) over a fresh heap and threads every free
    /// one onto a list, in address order.
    fn layout(blocks: &[(usize, bool)]) -> (Heap<BoxedBacking>, FreeList) {
        let capacity = blocks.iter().map(|(size, _)| size).sum();
        let config = ArenaConfig::with_capacity(capacity);
        let mut heap = Heap::new(BoxedBacking::new(capacity, 16).unwrap(), &config).unwrap();

        let mut offset = 0;
        let mut free = Vec::new();
        for &(size, is_free) in blocks {
            heap.write_header(BlockOffset::new(offset), BlockHeader::allocated(size));
            if is_free {
                free.push((BlockOffset::new(offset), size));
            }
            offset += size;
        }

        let mut list = FreeList { head: None };
        for (block, size) in free {
            list.insert_free_block(&mut heap, block, size);
        }

        (heap, list)
    }

    fn entries(list: &FreeList, heap: &Heap<BoxedBacking>) -> Vec<(usize, usize)> {
        list.iter(heap)
            .map(|(block, header)| (block.get(), header.size))
            .collect()
    }

    #[test]
    fn first_fit_takes_first_sufficient_block() {
        let (heap, list) = layout(&[(32, true), (32, false), (64, true), (32, false), (128, true)]);

        let fit = list.find_free_block(&heap, 48).unwrap();
        assert_eq!(fit.block, BlockOffset::new(64));
        assert_eq!(fit.prev, Some(BlockOffset::new(0)));
        assert_eq!(fit.header.size, 64);
    }

    #[test]
    fn first_fit_fails_when_nothing_is_large_enough() {
        let (heap, list) = layout(&[(32, true), (32, false), (64, true)]);
        assert!(list.find_free_block(&heap, 80).is_none());
    }

    #[test]
    fn insertion_keeps_address_order() {
        let (mut heap, mut list) = layout(&[
            (32, false),
            (32, true),
            (32, false),
            (32, false),
            (32, true),
        ]);

        // Before the head.
        assert_eq!(list.insert_free_block(&mut heap, BlockOffset::new(0), 32), None);
        // Between two entries.
        assert_eq!(
            list.insert_free_block(&mut heap, BlockOffset::new(96), 32),
            Some(BlockOffset::new(32))
        );

        assert_eq!(entries(&list, &heap), vec![(0, 32), (32, 32), (96, 32), (128, 32)]);
    }

    #[test]
    fn merge_only_when_physically_adjacent() {
        let (mut heap, mut list) = layout(&[(32, true), (32, false), (64, true), (64, true)]);

        // 0 and 64 are list neighbours but not physical ones.
        assert!(!list.merge_with_next(&mut heap, BlockOffset::new(0)));
        assert!(list.merge_with_next(&mut heap, BlockOffset::new(64)));
        assert!(!list.merge_with_next(&mut heap, BlockOffset::new(64)));

        assert_eq!(entries(&list, &heap), vec![(0, 32), (64, 128)]);
    }

    #[test]
    fn relink_replaces_head() {
        let (mut heap, mut list) = layout(&[(32, true), (32, true)]);
        list.relink(&mut heap, None, Some(BlockOffset::new(32)));

        assert_eq!(list.first(), Some(BlockOffset::new(32)));
        assert_eq!(entries(&list, &heap), vec![(32, 32)]);
    }
}
