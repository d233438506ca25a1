//! Block descriptors, layout constants, and the on-heap [`Stamp`] format.

use std::mem::{align_of, size_of};

use static_assertions::{const_assert, const_assert_eq};

use crate::arena::BlockHandle;

/// Payload sizes are rounded up to a multiple of this, and every payload
/// starts on such a boundary.
pub const BLOCK_ALIGN: usize = 8;

/// Bytes reserved in front of every payload. The reserved region holds the
/// block's [`Stamp`].
pub const HEADER_SIZE: usize = size_of::<Stamp>();

/// Smallest payload a split remainder may have. A free block is only split
/// when the excess strictly exceeds `HEADER_SIZE + MIN_REMAINDER`.
pub const MIN_REMAINDER: usize = BLOCK_ALIGN;

const_assert_eq!(HEADER_SIZE, 16);
const_assert_eq!(HEADER_SIZE % BLOCK_ALIGN, 0);
const_assert!(align_of::<Stamp>() <= BLOCK_ALIGN);

const STAMP_SEAL: u64 = u64::from_le_bytes(*b"bfmblock");

/// Marker written into the reserved bytes in front of a payload when the
/// block is handed out or carved.
///
/// The stamp routes a raw payload pointer back to the arena slot owning the
/// block: the seal rejects pointers into payload interiors, and the recorded
/// index/generation pair is validated against the arena so that stale
/// pointers (to blocks long since absorbed by coalescing) are detected
/// instead of silently corrupting the directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Stamp {
    seal: u64,
    index: u32,
    generation: u32,
}

impl Stamp {
    #[inline]
    pub fn for_handle(handle: BlockHandle) -> Stamp {
        Stamp {
            seal: STAMP_SEAL,
            index: handle.index(),
            generation: handle.generation(),
        }
    }

    /// Returns the recorded handle, or `None` if the seal bytes do not match
    /// (the location never held a stamp, or a payload write clobbered it).
    #[inline]
    pub fn handle(&self) -> Option<BlockHandle> {
        (self.seal == STAMP_SEAL).then(|| BlockHandle::new(self.index, self.generation))
    }
}

/// Diagnostic tag recording how a block last entered the directory.
/// Carries no behavioral weight.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Provenance {
    /// Created by a fresh heap growth.
    Fresh = 0x1234_5678,
    /// Handed out again from the directory after a release.
    Reused = 0x7777_7777,
    /// Remainder carved off an oversized block by the splitter.
    Carved = 0x00CA_4FED,
}

/// Bookkeeping for one managed block.
///
/// Descriptors live in the slot arena; the managed heap itself only carries
/// the per-block [`Stamp`] plus payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Offset of the block (its stamp region) from the start of the managed
    /// heap. Always a multiple of [`BLOCK_ALIGN`].
    pub offset: usize,
    /// Payload size in bytes, excluding the stamp region.
    /// Always a multiple of [`BLOCK_ALIGN`].
    pub size: usize,
    /// Whether the block is currently unallocated.
    pub free: bool,
    /// Bytes reserved beyond the owner's original request (internal
    /// fragmentation). Meaningful only while the block is occupied.
    pub slack: usize,
    /// Directory predecessor, in ascending address order.
    pub prev: Option<BlockHandle>,
    /// Directory successor, in ascending address order.
    pub next: Option<BlockHandle>,
    pub provenance: Provenance,
}

impl Block {
    /// Heap offset of the first payload byte.
    #[inline]
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Heap offset one past the last payload byte.
    #[inline]
    pub fn end_offset(&self) -> usize {
        self.offset + HEADER_SIZE + self.size
    }
}
