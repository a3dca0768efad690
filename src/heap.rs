use std::{ptr::NonNull, slice};

use crate::{
    backing::Backing,
    block::{BlockHeader, BlockOffset, RawHeader},
    config::ArenaConfig,
    error::ArenaError,
    utils::align,
};

/// The heap is the fixed buffer seen as a contiguous chain of blocks.
///
/// ```text
/// base                                                             capacity
/// +--------+---------+--------+-------------------+--------+-------------+
/// | Header | Content | Header |      Content      | Header |   Content   |
/// +--------+---------+--------+-------------------+--------+-------------+
/// |<---- block 0 --->|<---------- block 1 ------->|<------ block 2 ----->|
/// ```
///
/// There are no gaps: every block starts exactly where the previous one ends
/// and the last one ends at `capacity`. This struct only knows how to read and
/// write headers at a given offset. Which blocks are free is the business of
/// [`crate::freelist::FreeList`].
///
/// Every access is checked against `capacity`, so even a corrupted header can
/// only ever make the heap touch bytes of its own buffer.
pub(crate) struct Heap<B> {
    backing: B,
    capacity: usize,
    quantum: usize,
}

impl<B: Backing> Heap<B> {
    /// Takes ownership of `backing` and lays one free block over the first
    /// `config.capacity` bytes of it.
    pub fn new(backing: B, config: &ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;

        if backing.len() < config.capacity {
            return Err(ArenaError::BackingTooSmall {
                required: config.capacity,
                available: backing.len(),
            });
        }

        let base = backing.base().as_ptr() as usize;
        if align(base, config.quantum) != base {
            return Err(ArenaError::MisalignedBacking {
                alignment: config.quantum,
            });
        }

        let mut heap = Self {
            backing,
            capacity: config.capacity,
            quantum: config.quantum,
        };

        heap.write_header(BlockOffset::BASE, BlockHeader::free(heap.capacity, None));

        Ok(heap)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Header and quantum are the same size.
    #[inline]
    pub fn header_size(&self) -> usize {
        self.quantum
    }

    #[inline]
    fn ptr(&self, offset: usize) -> *mut u8 {
        // SAFETY: callers check `offset` against `capacity`, which the backing
        // is at least as long as.
        unsafe { self.backing.base().as_ptr().add(offset) }
    }

    fn check_offset(&self, offset: BlockOffset) -> Result<(), ArenaError> {
        if offset.get() % self.quantum != 0 {
            return Err(ArenaError::Corrupted {
                offset: offset.get(),
                reason: "block offset is not quantum aligned",
            });
        }
        if offset.get() >= self.capacity {
            return Err(ArenaError::Corrupted {
                offset: offset.get(),
                reason: "block offset beyond the end of the heap",
            });
        }

        Ok(())
    }

    /// Reads and decodes the header at `offset`.
    pub fn try_header(&self, offset: BlockOffset) -> Result<BlockHeader, ArenaError> {
        self.check_offset(offset)?;

        // SAFETY: `offset` is quantum aligned and below `capacity`, so a whole
        // quantum (at least a `RawHeader`) is in bounds.
        let raw = unsafe { self.ptr(offset.get()).cast::<RawHeader>().read_unaligned() };

        BlockHeader::decode(raw, self.quantum, offset)
    }

    /// Like [`Heap::try_header`] but for the allocation paths, where a broken
    /// header can only come from a contract violation by the caller.
    pub fn header(&self, offset: BlockOffset) -> BlockHeader {
        self.try_header(offset).unwrap_or_else(|err| panic!("{err}"))
    }

    pub fn write_header(&mut self, offset: BlockOffset, header: BlockHeader) {
        if let Err(err) = self.check_offset(offset) {
            panic!("{err}");
        }

        let raw = header.encode(self.quantum);

        // SAFETY: same bounds as in `try_header`, and `&mut self` makes this
        // the only access to the buffer.
        unsafe { self.ptr(offset.get()).cast::<RawHeader>().write_unaligned(raw) }
    }

    /// The block that physically follows `offset`, or `None` when this block
    /// is the last one of the heap.
    pub fn try_next_physical(
        &self,
        offset: BlockOffset,
        header: &BlockHeader,
    ) -> Result<Option<BlockOffset>, ArenaError> {
        let end = offset
            .get()
            .checked_add(header.size)
            .filter(|&end| end <= self.capacity)
            .ok_or(ArenaError::Corrupted {
                offset: offset.get(),
                reason: "block extends past the end of the heap",
            })?;

        Ok((end != self.capacity).then_some(BlockOffset::new(end)))
    }

    pub fn next_physical(&self, offset: BlockOffset, header: &BlockHeader) -> Option<BlockOffset> {
        self.try_next_physical(offset, header)
            .unwrap_or_else(|err| panic!("{err}"))
    }

    /// Content of the block at `offset`. Returns the range as
    /// `(start, len)` after checking it against the heap.
    fn payload_range(&self, offset: BlockOffset, header: &BlockHeader) -> (usize, usize) {
        assert!(
            header.size >= self.header_size() && offset.get() + header.size <= self.capacity,
            "block at offset {} does not fit in the heap",
            offset.get()
        );

        (offset.get() + self.header_size(), header.size - self.header_size())
    }

    pub fn payload(&self, offset: BlockOffset, header: &BlockHeader) -> &[u8] {
        let (start, len) = self.payload_range(offset, header);

        // SAFETY: the range was checked against `capacity` and `&self` keeps
        // writers out for the lifetime of the slice.
        unsafe { slice::from_raw_parts(self.ptr(start), len) }
    }

    pub fn payload_mut(&mut self, offset: BlockOffset, header: &BlockHeader) -> &mut [u8] {
        let (start, len) = self.payload_range(offset, header);

        // SAFETY: as in `payload`, with `&mut self` making the slice unique.
        unsafe { slice::from_raw_parts_mut(self.ptr(start), len) }
    }

    /// Raw pointer to the content of the block at `offset`.
    pub fn payload_ptr(&self, offset: BlockOffset) -> NonNull<u8> {
        let start = offset.get() + self.header_size();
        assert!(start <= self.capacity);

        // SAFETY: `start` is inside (or one past the end of) the buffer.
        unsafe { NonNull::new_unchecked(self.ptr(start)) }
    }

    /// Inverse of [`Heap::payload_ptr`]. `None` when `ptr` cannot be the
    /// content of a block of this heap.
    pub fn block_of(&self, ptr: NonNull<u8>) -> Option<BlockOffset> {
        let base = self.backing.base().as_ptr() as usize;
        let start = (ptr.as_ptr() as usize).checked_sub(base)?;
        let offset = start.checked_sub(self.header_size())?;

        (offset < self.capacity && offset % self.quantum == 0).then_some(BlockOffset::new(offset))
    }
}
