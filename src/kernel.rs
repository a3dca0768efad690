use std::{
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;

use crate::{backing::Backing, error::ArenaError, utils::align};

/// Virtual memory page size of the computer, cached after the first query.
/// This is usually 4096. Zero means not queried yet.
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Platform layer used to obtain the arena buffer straight from the kernel.
struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The arena only ever needs one region, requested once when it
/// is built and returned when it is dropped.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size.
#[inline]
pub fn page_size() -> usize {
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = unsafe { Kernel::page_size() };
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// A backing mapped directly from the operating system, bypassing any
/// allocator of the process. Its base is page aligned, so any quantum up to
/// the page size is honoured.
///
/// The mapping is made once, rounded up to whole pages, and unmapped on drop.
pub struct MappedBacking {
    base: NonNull<u8>,
    len: usize,
}

impl MappedBacking {
    /// Maps at least `len` bytes of zeroed, read-write memory.
    pub fn new(len: usize) -> Result<Self, ArenaError> {
        if len == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "capacity must not be zero",
            });
        }

        let len = align(len, page_size());

        let base = unsafe { Kernel::request_memory(len) }.ok_or(ArenaError::MapFailed { len })?;

        debug!("mapped {len} bytes at {base:?} for arena backing");

        Ok(Self { base, len })
    }
}

unsafe impl Backing for MappedBacking {
    #[inline]
    fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MappedBacking {
    fn drop(&mut self) {
        unsafe { Kernel::return_memory(self.base.as_ptr(), self.len) }
    }
}

// SAFETY: the mapping is private to this value and only reached through it.
unsafe impl Send for MappedBacking {}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Anonymous private mapping, readable and writable, never executable.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const NO_FD: c_int = -1;
            const NO_OFFSET: off_t = 0;

            let hint = ptr::null_mut::<c_void>();
            let addr = unsafe { mmap(hint, len as size_t, PROT, FLAGS, NO_FD, NO_OFFSET) };

            if addr == libc::MAP_FAILED {
                return None;
            }

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr.cast::<c_void>(), len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Reserved and committed in one call, so the whole range is usable.
            let allocation = Memory::MEM_RESERVE | Memory::MEM_COMMIT;
            let protection = Memory::PAGE_READWRITE;
            let addr = unsafe { Memory::VirtualAlloc(None, len, allocation, protection) };

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            // MEM_RELEASE frees the whole reservation and requires a size of 0.
            let released =
                unsafe { Memory::VirtualFree(addr.cast::<c_void>(), 0, Memory::MEM_RELEASE) };
            debug_assert!(released.is_ok(), "VirtualFree failed");
        }

        unsafe fn page_size() -> usize {
            let mut info = MaybeUninit::uninit();

            unsafe {
                SystemInformation::GetSystemInfo(info.as_mut_ptr());
                info.assume_init().dwPageSize as usize
            }
        }
    }
}
