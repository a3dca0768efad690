use std::mem;

use crate::error::ArenaError;

/// Bytes the encoded header needs. The smallest quantum allowed is this size,
/// so the header always fits in the first quantum of its block.
pub(crate) const RAW_HEADER_SIZE: usize = mem::size_of::<RawHeader>();

const TAG_FREE_LAST: u32 = 0x4652_4545;
const TAG_FREE_LINKED: u32 = 0x4c49_4e4b;
const TAG_ALLOCATED: u32 = 0x5553_4544;

/// This is how a header is laid out inside the heap. Content is placed one
/// quantum after the start of the block, so for the default 16 byte quantum
/// the header is exactly this record:
///
/// ```text
/// +---------------------+ <------+
/// |     size (u64)      |        |
/// +---------------------+        |
/// |     tag (u32)       |        | -> Header (one quantum)
/// +---------------------+        |
/// |     next (u32)      |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content
/// |                     |        |
/// +---------------------+ <------+
/// ```
///
/// `size` always counts the header too. `tag` says which variant of
/// [`BlockState`] the block is in, and `next` (the successor's index in quanta)
/// is only meaningful for a free block that has a successor.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawHeader {
    size: u64,
    tag: u32,
    next: u32,
}

/// Byte offset of a block header from the heap base.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct BlockOffset(usize);

impl BlockOffset {
    /// The block sitting at the very start of the heap.
    pub const BASE: Self = Self(0);

    #[inline]
    pub const fn new(offset: usize) -> Self {
        Self(offset)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Offset of the block starting `bytes` after this one.
    #[inline]
    pub const fn after(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }
}

/// Whether a block is free or handed out to a caller.
///
/// Only free blocks take part in the free list, so only they carry a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockState {
    Free { next: Option<BlockOffset> },
    Allocated,
}

/// Decoded view of a [`RawHeader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    /// Size of the block, header included.
    pub size: usize,
    pub state: BlockState,
}

impl BlockHeader {
    pub const fn free(size: usize, next: Option<BlockOffset>) -> Self {
        Self {
            size,
            state: BlockState::Free { next },
        }
    }

    pub const fn allocated(size: usize) -> Self {
        Self {
            size,
            state: BlockState::Allocated,
        }
    }

    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self.state, BlockState::Free { .. })
    }

    /// Free-list successor. `None` both for the last free block and for
    /// allocated blocks.
    #[inline]
    pub const fn next(&self) -> Option<BlockOffset> {
        match self.state {
            BlockState::Free { next } => next,
            BlockState::Allocated => None,
        }
    }

    /// Encodes the header. Links are stored as quantum indices, which a
    /// validated [`crate::ArenaConfig`] guarantees fit in 32 bits.
    pub fn encode(self, quantum: usize) -> RawHeader {
        let (tag, next) = match self.state {
            BlockState::Free { next: None } => (TAG_FREE_LAST, 0),
            BlockState::Free { next: Some(next) } => {
                (TAG_FREE_LINKED, (next.get() / quantum) as u32)
            }
            BlockState::Allocated => (TAG_ALLOCATED, 0),
        };

        RawHeader {
            size: self.size as u64,
            tag,
            next,
        }
    }

    /// Decodes the header found at `offset`.
    pub fn decode(
        raw: RawHeader,
        quantum: usize,
        offset: BlockOffset,
    ) -> Result<Self, ArenaError> {
        let corrupted = |reason| ArenaError::Corrupted {
            offset: offset.get(),
            reason,
        };

        let size = usize::try_from(raw.size)
            .map_err(|_| corrupted("size does not fit the address space"))?;

        let state = match raw.tag {
            TAG_FREE_LAST => BlockState::Free { next: None },
            TAG_FREE_LINKED => {
                let next = (raw.next as usize)
                    .checked_mul(quantum)
                    .ok_or_else(|| corrupted("free-list link out of range"))?;
                BlockState::Free {
                    next: Some(BlockOffset::new(next)),
                }
            }
            TAG_ALLOCATED => BlockState::Allocated,
            _ => return Err(corrupted("unknown block tag")),
        };

        Ok(Self { size, state })
    }
}

/// Public description of one block of the physical chain or the free list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header from the heap base.
    pub offset: usize,
    /// Size of the block in bytes, header included.
    pub size: usize,
    /// Whether the block is currently free.
    pub free: bool,
}

impl BlockInfo {
    pub(crate) fn new(offset: BlockOffset, header: &BlockHeader) -> Self {
        Self {
            offset: offset.get(),
            size: header.size,
            free: header.is_free(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_header_is_16_bytes() {
        assert_eq!(RAW_HEADER_SIZE, 16);
    }

    #[test]
    fn free_link_is_stored_in_quanta() {
        let header = BlockHeader::free(64, Some(BlockOffset::new(320)));
        let raw = header.encode(16);
        assert_eq!(raw.next, 20);

        let decoded = BlockHeader::decode(raw, 16, BlockOffset::BASE).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.next(), Some(BlockOffset::new(320)));
    }

    #[test]
    fn allocated_has_no_link() {
        let header = BlockHeader::allocated(48);
        let decoded = BlockHeader::decode(header.encode(16), 16, BlockOffset::BASE).unwrap();
        assert!(!decoded.is_free());
        assert_eq!(decoded.next(), None);
    }

    #[test]
    fn link_value_cannot_fake_allocated() {
        // Whatever value the link holds, the tag alone decides the variant.
        let raw = RawHeader {
            size: 32,
            tag: TAG_FREE_LINKED,
            next: TAG_ALLOCATED,
        };
        let decoded = BlockHeader::decode(raw, 16, BlockOffset::BASE).unwrap();
        assert!(decoded.is_free());
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let raw = RawHeader {
            size: 32,
            tag: 0xdead_beef,
            next: 0,
        };
        let err = BlockHeader::decode(raw, 16, BlockOffset::new(96)).unwrap_err();
        assert_eq!(
            err,
            ArenaError::Corrupted {
                offset: 96,
                reason: "unknown block tag"
            }
        );
    }
}
