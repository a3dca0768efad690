//! Arena error types.

use std::error::Error;
use std::fmt;

/// Errors reported while building an arena or verifying its structure.
///
/// Allocation itself never produces one of these: exhaustion is signalled by
/// [`crate::Arena::allocate`] returning `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The [`crate::ArenaConfig`] violates one of its constraints.
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: &'static str,
    },
    /// The backing buffer is shorter than the configured capacity.
    BackingTooSmall {
        /// Bytes the configuration asks for.
        required: usize,
        /// Bytes the backing actually provides.
        available: usize,
    },
    /// The backing buffer does not start on a quantum boundary.
    MisalignedBacking {
        /// The alignment the base address must satisfy.
        alignment: usize,
    },
    /// The platform refused to map the backing region.
    MapFailed {
        /// Length of the requested mapping in bytes.
        len: usize,
    },
    /// A structural invariant of the heap does not hold.
    Corrupted {
        /// Byte offset from the heap base of the offending block.
        offset: usize,
        /// Which invariant was broken.
        reason: &'static str,
    },
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => {
                write!(f, "invalid arena config: {reason}")
            }
            Self::BackingTooSmall {
                required,
                available,
            } => {
                write!(
                    f,
                    "backing buffer too small: required {required} bytes, available {available} bytes"
                )
            }
            Self::MisalignedBacking { alignment } => {
                write!(f, "backing buffer is not aligned to {alignment} bytes")
            }
            Self::MapFailed { len } => {
                write!(f, "failed to map {len} bytes for the arena")
            }
            Self::Corrupted { offset, reason } => {
                write!(f, "heap corrupted at offset {offset}: {reason}")
            }
        }
    }
}

impl Error for ArenaError {}
