//! # arenalloc - a first-fit allocator over a fixed arena
//!
//! An [`Arena`] manages one buffer whose size is fixed when the arena is
//! built and serves variable-size allocations out of it. It never asks the
//! system for more memory: when the buffer is used up, [`Arena::allocate`]
//! returns `None`.
//!
//! ```text
//!   base                                                              capacity
//!   +--------+------+--------+-----------+--------+----+--------+------------+
//!   | Header | Used | Header |   Free    | Header |Used| Header |    Free    |
//!   +--------+------+--------+-----------+--------+----+--------+------------+
//!                        ^                                   ^
//!   free list:  head ----+-----------------------------------+
//! ```
//!
//! Every block starts with a header of one quantum (16 bytes by default)
//! holding its size and, when free, the offset of the next free block. Free
//! blocks form a list kept in address order:
//!
//! - allocation takes the **first** free block that is large enough and
//!   splits off what it does not need,
//! - release puts the block back in order and merges it with any free block
//!   right before or after it.
//!
//! ## Quick Start
//!
//! ```rust
//! use arenalloc::{Arena, ArenaConfig};
//!
//! let mut arena = Arena::boxed(ArenaConfig::with_capacity(4096)).unwrap();
//!
//! let block = arena.allocate(100).unwrap();
//! arena.data_mut(block)[..5].copy_from_slice(b"hello");
//! assert_eq!(&arena.data(block)[..5], b"hello");
//!
//! arena.release(Some(block));
//! assert_eq!(arena.free_bytes(), 4096);
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   arenalloc
//!   ├── arena     - Arena: allocate, release, diagnostics
//!   ├── backing   - Backing trait and the boxed buffer
//!   ├── block     - On-heap header encoding
//!   ├── config    - ArenaConfig
//!   ├── error     - ArenaError
//!   ├── freelist  - Address ordered free list
//!   ├── global    - GlobalArena, the locked GlobalAlloc wrapper
//!   ├── heap      - Bounds checked view of the buffer
//!   ├── kernel    - Buffers mapped from the operating system
//!   └── utils     - Alignment helpers
//! ```
//!
//! ## Limitations
//!
//! - [`Arena`] is single-threaded; [`GlobalArena`] serializes callers with
//!   one lock.
//! - Content is aligned to the quantum and nothing more.
//! - Releasing a block twice or releasing a foreign block is a caller error
//!   and is not detected in release builds.

mod arena;
mod backing;
mod block;
mod config;
mod error;
mod freelist;
mod global;
mod heap;
pub mod kernel;
pub mod utils;

pub use arena::{Allocation, Arena, Blocks, FreeBlocks};
pub use backing::{Backing, BoxedBacking};
pub use block::BlockInfo;
pub use config::ArenaConfig;
pub use error::ArenaError;
pub use global::GlobalArena;
pub use kernel::MappedBacking;
