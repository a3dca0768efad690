//! Arena configuration parameters.

use crate::{block::RAW_HEADER_SIZE, error::ArenaError};

/// Configuration for a fixed arena.
///
/// Both values are fixed for the lifetime of the arena: the buffer never
/// grows and the rounding unit never changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Total size of the heap buffer in bytes.
    ///
    /// Default: 16 MiB (`DEFAULT_QUANTUM * 1_048_576`).
    /// Must be a multiple of `quantum` and hold at least two quanta.
    pub capacity: usize,

    /// Rounding and alignment unit. Every block size is a multiple of it and
    /// every block header occupies exactly one quantum.
    ///
    /// Default: 16. Must be a power of two and at least 16.
    pub quantum: usize,
}

impl ArenaConfig {
    /// Default quantum, which is the size of the encoded block header.
    pub const DEFAULT_QUANTUM: usize = RAW_HEADER_SIZE;

    /// Default capacity: one mebi-quantum.
    pub const DEFAULT_CAPACITY: usize = Self::DEFAULT_QUANTUM * 1024 * 1024;

    /// Create a new config. Nothing is checked until [`ArenaConfig::validate`].
    pub const fn new(capacity: usize, quantum: usize) -> Self {
        Self { capacity, quantum }
    }

    /// Config with the given capacity and the default quantum.
    pub const fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, Self::DEFAULT_QUANTUM)
    }

    /// Bytes taken by a block header.
    #[inline]
    pub const fn header_size(&self) -> usize {
        self.quantum
    }

    /// Largest payload a single allocation can get from a fresh arena.
    #[inline]
    pub const fn max_payload(&self) -> usize {
        self.capacity - self.header_size()
    }

    /// Checks every constraint documented on the fields.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if !self.quantum.is_power_of_two() {
            return Err(ArenaError::InvalidConfig {
                reason: "quantum must be a power of two",
            });
        }
        if self.quantum < RAW_HEADER_SIZE {
            return Err(ArenaError::InvalidConfig {
                reason: "quantum must be at least the header size (16 bytes)",
            });
        }
        if self.capacity % self.quantum != 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "capacity must be a multiple of quantum",
            });
        }
        if self.capacity / self.quantum < 2 {
            return Err(ArenaError::InvalidConfig {
                reason: "capacity must hold at least two quanta",
            });
        }
        // Free-list links are stored as 32-bit quantum indices.
        if self.capacity / self.quantum - 1 > u32::MAX as usize {
            return Err(ArenaError::InvalidConfig {
                reason: "capacity has more quanta than a link can index",
            });
        }

        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_QUANTUM)
    }
}
