use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
};

use spin::Mutex;

use crate::{arena::Arena, config::ArenaConfig, error::ArenaError, kernel::MappedBacking};

/// An [`Arena`] behind a single lock, usable as the process allocator.
///
/// ```rust,ignore
/// use arenalloc::{ArenaConfig, GlobalArena};
///
/// #[global_allocator]
/// static ALLOCATOR: GlobalArena = GlobalArena::new(ArenaConfig::with_capacity(64 << 20));
/// ```
///
/// The buffer is mapped from the operating system on first use and never
/// grows: once it is exhausted `alloc` returns null. Layouts asking for an
/// alignment larger than the quantum are refused the same way.
///
/// Every operation takes the one lock, so callers are serialized. The arena
/// logs through [`log`] while the lock is held, at `debug` level on mapping
/// and exhaustion and at `trace` level on every split and merge. When this is
/// the global allocator, do not enable `debug` or `trace` for this crate on a
/// logger that allocates: it would re-enter the lock and deadlock.
pub struct GlobalArena {
    config: ArenaConfig,
    arena: Mutex<Option<Arena<MappedBacking>>>,
}

impl GlobalArena {
    pub const fn new(config: ArenaConfig) -> Self {
        Self {
            config,
            arena: Mutex::new(None),
        }
    }

    pub const fn with_capacity(capacity: usize) -> Self {
        Self::new(ArenaConfig::with_capacity(capacity))
    }

    /// Runs `f` on the arena, mapping it first if this is the first use.
    /// Returns `None` when the mapping cannot be made.
    fn with_arena<R>(&self, f: impl FnOnce(&mut Arena<MappedBacking>) -> R) -> Option<R> {
        let mut arena = self.arena.lock();

        if arena.is_none() {
            *arena = Arena::mapped(self.config).ok();
        }

        arena.as_mut().map(f)
    }

    /// Free bytes left in the arena, headers included.
    pub fn free_bytes(&self) -> usize {
        self.with_arena(|arena| arena.free_bytes()).unwrap_or(0)
    }

    /// See [`Arena::check`].
    pub fn check(&self) -> Result<(), ArenaError> {
        self.with_arena(|arena| arena.check())
            .unwrap_or(Err(ArenaError::MapFailed {
                len: self.config.capacity,
            }))
    }
}

unsafe impl GlobalAlloc for GlobalArena {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > self.config.quantum {
            return ptr::null_mut();
        }

        self.with_arena(|arena| {
            arena
                .allocate(layout.size() as u64)
                .map(|allocation| arena.as_ptr(allocation).as_ptr())
        })
        .flatten()
        .unwrap_or(ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        self.with_arena(|arena| {
            let allocation = arena.allocation_at(ptr);
            arena.release(allocation);
        });
    }
}
