use std::{
    alloc::{self, Layout},
    ptr::NonNull,
};

use crate::error::ArenaError;

/// The fixed buffer an [`crate::Arena`] carves its blocks from.
///
/// The arena never asks for more memory after it has been built: whatever
/// region the backing hands out at construction is all there will ever be.
///
/// # Safety
///
/// Implementors must guarantee that `base()..base() + len()` is a live,
/// writable region owned exclusively by the backing for as long as the
/// backing exists, and that both values never change.
pub unsafe trait Backing {
    /// First byte of the region.
    fn base(&self) -> NonNull<u8>;

    /// Length of the region in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A backing allocated once through [`std::alloc`], aligned to the arena
/// quantum and released when dropped.
///
/// This is the usual choice for arenas embedded in a program. A global
/// allocator cannot use it, see [`crate::kernel::MappedBacking`] instead.
pub struct BoxedBacking {
    base: NonNull<u8>,
    layout: Layout,
}

impl BoxedBacking {
    /// Allocates `len` zeroed bytes aligned to `align`.
    pub fn new(len: usize, align: usize) -> Result<Self, ArenaError> {
        let layout = Layout::from_size_align(len, align).map_err(|_| ArenaError::InvalidConfig {
            reason: "capacity and quantum do not form a valid layout",
        })?;

        if layout.size() == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "capacity must not be zero",
            });
        }

        // SAFETY: `layout` has a non-zero size.
        let base = unsafe { alloc::alloc_zeroed(layout) };

        match NonNull::new(base) {
            Some(base) => Ok(Self { base, layout }),
            None => alloc::handle_alloc_error(layout),
        }
    }
}

unsafe impl Backing for BoxedBacking {
    #[inline]
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for BoxedBacking {
    fn drop(&mut self) {
        // SAFETY: `base` was returned by `alloc_zeroed` with this very layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

// SAFETY: the region is owned exclusively and only reached through `&self` /
// `&mut self` of the owner.
unsafe impl Send for BoxedBacking {}
