//! A single-threaded best-fit memory allocator with generational block
//! bookkeeping.
//!
//! The crate provides the classic `malloc`/`calloc`/`realloc`/`free` quartet
//! as methods on an explicit allocator object, plus a fragmentation
//! diagnostic. The managed heap is a contiguous region obtained from a
//! [grower](#growers) and extended on demand; memory is never handed back to
//! the operating system. Everything that is freed goes back into the block
//! directory and gets reused.
//!
//! # Usage
//! ```
//! use bestfit_malloc::BestFitMalloc;
//! use bestfit_malloc::growers::ArenaGrower;
//!
//! let mut region = vec![0_u8; 4096];
//! let grower = ArenaGrower::new(region.as_mut_ptr(), region.len());
//! let mut malloc = unsafe { BestFitMalloc::with_grower(grower) };
//!
//! let p = malloc.allocate(24).expect("the region has room");
//! unsafe { p.as_ptr().write_bytes(0xAB, 24) };
//! malloc.release(p.as_ptr()).unwrap();
//! assert_eq!(malloc.total_fragmentation(), 0);
//! ```
//!
//! On Linux the same allocator can manage the process data segment through
//! [`BrkGrower`](growers::BrkGrower) instead.
//!
//! # Mode of operation
//! The allocator keeps an address-ordered directory of every block it has
//! ever carved out of the heap:
//! - An allocation walks the directory for the *smallest* free block that
//!   can hold the rounded request (best fit, exact match preferred). A block
//!   with too much excess is split, the remainder staying free.
//! - If nothing fits, the grower extends the heap and a fresh block is
//!   appended at the tail.
//! - A release marks the block free and eagerly merges it with free
//!   directory neighbors, reclaiming their header space.
//!
//! ## Blocks and stamps
//! Each block is `HEADER_SIZE` reserved bytes followed by a payload whose
//! size is a multiple of 8. Unlike a textbook malloc, the block metadata
//! does not live in those reserved bytes: descriptors sit in a generational
//! slot arena and the directory links their handles. The reserved bytes
//! only hold a stamp that routes a payload pointer back to its handle, which
//! is how stale and bogus pointers are caught and reported as typed errors
//! instead of corrupting the heap.
//!
//! ## Growers
//! A grower is the allocator's window onto its contiguous buffer. The
//! allocator is generic over [`Grower`](growers::Grower), so the engine runs
//! unchanged on the program break or on any caller-provided region.
//!
//! # Concurrency
//! None. The allocator is strictly single-threaded by design: every
//! operation runs synchronously to completion and heap growth must be
//! serialized by the caller. Wrap the allocator yourself if you need to
//! share it.

pub use crate::bestfit::{BestFitMalloc, ReleaseError};

mod arena;
mod bestfit;
mod block;
mod directory;
pub mod growers;
mod util;
