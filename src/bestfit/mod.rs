//! The [`BestFitMalloc`] allocator.
//
// # Implementation notes
// ## Block requirements
// Payload sizes are rounded up to a multiple of `BLOCK_ALIGN` before any
// directory work happens, so every block the engine manages satisfies the
// directory invariants (aligned offsets, sizes divisible by 8). The public
// operations do the rounding; the private ones assume it.
//
// ## Pointer validation
// Raw payload pointers coming back through `release`/`resize` are never
// trusted. They are bounds-checked against the managed region, then routed
// through the on-heap stamp to an arena handle, and the arena's generation
// check rejects anything stale. Only after all of that is the directory
// mutated.

use crate::arena::{BlockHandle, SlotArena};
use crate::block::{Block, Provenance, Stamp, BLOCK_ALIGN, HEADER_SIZE, MIN_REMAINDER};
use crate::directory::Directory;
use crate::growers::Grower;
use crate::util::{checked_ptr_add, round_to_block};

use core::ptr::{copy_nonoverlapping, write_bytes, NonNull};
use std::fmt;

use tracing::{debug, error, instrument, Level};

/// Errors reported by [`BestFitMalloc::release`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReleaseError {
    /// The pointed-to block is already free. The directory is still
    /// consistent; the caller decides whether to abort, log, or ignore.
    AlreadyFree,
    /// The pointer does not name a live allocation of this allocator:
    /// out of bounds, misaligned, clobbered stamp, or a stale handle to a
    /// block long since absorbed by coalescing.
    UnknownPointer,
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseError::AlreadyFree => write!(f, "block is already free"),
            ReleaseError::UnknownPointer => {
                write!(f, "pointer does not name a live allocation")
            }
        }
    }
}

impl std::error::Error for ReleaseError {}

/// Outcome of a best-fit walk.
#[derive(Debug)]
enum Fit {
    /// A free block able to hold the request, already split down to size
    /// where worthwhile.
    Found(BlockHandle),
    /// No free block fits; `last` is the directory tail, where fresh space
    /// gets appended.
    Exhausted { last: BlockHandle },
}

/// A single-threaded best-fit allocator over a growable contiguous heap.
///
/// The allocator owns all of its state: the descriptor arena, the
/// address-ordered directory, the grower, and the heap-start/heap-top
/// cursors. Freed memory is reclaimed into the directory and reused; it is
/// never returned to the grower.
pub struct BestFitMalloc<G: Grower> {
    arena: SlotArena,
    directory: Directory,
    grower: G,
    heap_start: Option<NonNull<u8>>,
    heap_top: Option<NonNull<u8>>,
}

impl<G: Grower> fmt::Debug for BestFitMalloc<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BestFitMalloc")
            .field("blocks", &self.arena.len())
            .field("heap_start", &self.heap_start)
            .field("heap_top", &self.heap_top)
            .finish()
    }
}

impl<G: Grower> BestFitMalloc<G> {
    /// Creates an allocator instance with the specified grower.
    ///
    /// # Safety
    /// Callers must make sure that the provided grower will be the only
    /// object managing its underlying buffer for the lifetime of the
    /// returned allocator.
    pub const unsafe fn with_grower(grower: G) -> Self {
        BestFitMalloc {
            arena: SlotArena::new(),
            directory: Directory::new(),
            grower,
            heap_start: None,
            heap_top: None,
        }
    }

    /// Allocates at least `size` bytes and returns the payload address, or
    /// `None` if `size` is zero or the heap cannot grow.
    ///
    /// The payload is 8-byte aligned, at least `size` bytes long, and owned
    /// exclusively by the caller until released.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            debug!("Zero-sized request rejected.");
            return None;
        }
        let rounded = round_to_block(size)?;

        let handle = match self.find_best_fit(rounded) {
            None => self.request_space(None, rounded)?,
            Some(Fit::Found(handle)) => {
                let block = &mut self.arena[handle];
                block.free = false;
                block.provenance = Provenance::Reused;
                self.write_stamp(handle);
                debug!(?handle, "Reusing free block.");
                handle
            }
            Some(Fit::Exhausted { last }) => {
                debug!("No free block fits, requesting heap growth.");
                self.request_space(Some(last), rounded)?
            }
        };

        let block = &mut self.arena[handle];
        debug_assert!(block.size >= rounded);
        block.slack = block.size - size;
        Some(self.payload_ptr(handle))
    }

    /// Allocates room for `count` elements of `elem_size` bytes each and
    /// zero-fills it. Fails with `None` when the total overflows, when the
    /// total is zero, or when the underlying allocation fails; nothing is
    /// written on failure.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn allocate_zeroed(&mut self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        let Some(size) = count.checked_mul(elem_size) else {
            error!(count, elem_size, "Requested element total overflows usize.");
            return None;
        };
        let payload = self.allocate(size)?;
        unsafe { write_bytes(payload.as_ptr(), 0, size) };
        Some(payload)
    }

    /// Releases the allocation behind `ptr`, eagerly merging it with free
    /// directory neighbors. A null `ptr` is a no-op.
    #[instrument(level = "info", ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn release(&mut self, ptr: *mut u8) -> Result<(), ReleaseError> {
        let Some(payload) = NonNull::new(ptr) else {
            debug!("Releasing a null pointer is a no-op.");
            return Ok(());
        };
        let handle = self
            .lookup(payload)
            .ok_or(ReleaseError::UnknownPointer)?;
        if self.arena[handle].free {
            error!(?handle, "Double release detected.");
            return Err(ReleaseError::AlreadyFree);
        }
        self.coalesce(handle);
        Ok(())
    }

    /// Resizes the allocation behind `ptr` to at least `new_size` bytes.
    ///
    /// A null `ptr` behaves exactly like [`allocate`](Self::allocate).
    /// Shrinks happen in place and keep the pointer; grows move the payload
    /// to a fresh block. On any failure the original allocation and its
    /// contents are left fully intact and `None` is returned.
    #[instrument(level = "info", ret(level = Level::INFO))]
    pub fn resize(&mut self, ptr: *mut u8, new_size: usize) -> Option<NonNull<u8>> {
        let Some(payload) = NonNull::new(ptr) else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            debug!("Zero-sized resize rejected, block left intact.");
            return None;
        }
        let handle = self.lookup(payload)?;
        if self.arena[handle].free {
            error!(?handle, "Resize through a pointer to a free block.");
            return None;
        }
        let rounded = round_to_block(new_size)?;
        let current = self.arena[handle].size;

        if current >= rounded {
            // Shrink in place; the pointer never moves.
            if rounded
                .checked_add(HEADER_SIZE + MIN_REMAINDER)
                .is_some_and(|threshold| current > threshold)
            {
                self.split(handle, rounded);
            }
            let block = &mut self.arena[handle];
            block.slack = block.size - new_size;
            return Some(payload);
        }

        // Grow by moving: allocate, copy the whole old payload, release.
        debug!(?handle, current, rounded, "Growing through a fresh allocation.");
        let new_payload = self.allocate(new_size)?;
        unsafe { copy_nonoverlapping(payload.as_ptr(), new_payload.as_ptr(), current) };
        let released = self.release(payload.as_ptr());
        debug_assert!(released.is_ok(), "source block of a grow failed to release");
        Some(new_payload)
    }

    /// Combined fragmentation diagnostic, in bytes: payload sizes of free
    /// blocks that have at least one directory neighbor (external) plus the
    /// slack of every occupied block (internal).
    ///
    /// A sole free block with no neighbors is deliberately excluded from the
    /// external tally.
    pub fn total_fragmentation(&self) -> usize {
        self.directory
            .iter(&self.arena)
            .map(|(_, block)| {
                if block.free {
                    if block.prev.is_some() || block.next.is_some() {
                        block.size
                    } else {
                        0
                    }
                } else {
                    block.slack
                }
            })
            .sum()
    }

    /// Current directory length. Diagnostics only.
    pub fn block_count(&self) -> usize {
        self.arena.len()
    }

    /// Walks the directory for the tightest free block holding `size` bytes.
    ///
    /// The first free block large enough becomes the candidate; any later
    /// free block that fits and is strictly smaller replaces it; an exact
    /// fit stops the scan immediately. A winning candidate is split when its
    /// excess strictly exceeds `HEADER_SIZE + MIN_REMAINDER`. Returns `None`
    /// when the directory is empty.
    #[instrument(level = "debug", ret(level = Level::DEBUG))]
    fn find_best_fit(&mut self, size: usize) -> Option<Fit> {
        let mut cursor = self.directory.head()?;
        let mut best: Option<BlockHandle> = None;

        loop {
            let block = &self.arena[cursor];
            if block.free && block.size >= size {
                let tighter = match best {
                    None => true,
                    Some(candidate) => block.size < self.arena[candidate].size,
                };
                if tighter {
                    if block.size == size {
                        debug!(handle = ?cursor, "Exact fit, stopping scan.");
                        return Some(Fit::Found(cursor));
                    }
                    best = Some(cursor);
                }
            }
            match self.arena[cursor].next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        match best {
            Some(handle) => {
                let splittable = size
                    .checked_add(HEADER_SIZE + MIN_REMAINDER)
                    .is_some_and(|threshold| self.arena[handle].size > threshold);
                if splittable {
                    self.split(handle, size);
                }
                Some(Fit::Found(handle))
            }
            // The scan doubles as the tail find for the append path.
            None => Some(Fit::Exhausted { last: cursor }),
        }
    }

    /// Extends the heap by `HEADER_SIZE + size` bytes and appends the fresh
    /// block after `last` (`None` only for the very first block).
    #[instrument(level = "debug", ret(level = Level::DEBUG))]
    fn request_space(&mut self, last: Option<BlockHandle>, size: usize) -> Option<BlockHandle> {
        if self.heap_start.is_none() {
            let base = unsafe { self.grower.grow(0) }.ok()?;
            debug!(?base, "Recorded heap base.");
            self.heap_start = Some(base);
            self.heap_top = Some(base);
        }
        let top = self.heap_top?;
        let total = HEADER_SIZE.checked_add(size)?;

        let old_end = match unsafe { self.grower.grow(total) } {
            Ok(p) => p,
            Err(()) => {
                error!(size, "Heap growth failed.");
                return None;
            }
        };
        // Growth is serialized by design; anything else moving the heap top
        // between our calls has corrupted the region.
        assert_eq!(old_end, top, "heap top moved underneath the allocator");

        let offset = old_end.as_ptr() as usize - self.heap_base().as_ptr() as usize;
        let new_top = checked_ptr_add(old_end.as_ptr(), total)? as *mut u8;
        self.heap_top = NonNull::new(new_top);
        debug_assert!(offset + HEADER_SIZE + size <= self.heap_len());

        let handle = self.arena.insert(Block {
            offset,
            size,
            free: false,
            slack: 0,
            prev: None,
            next: None,
            provenance: Provenance::Fresh,
        });
        self.directory.append(&mut self.arena, last, handle);
        self.write_stamp(handle);
        debug!(?handle, offset, size, "Appended freshly grown block.");
        Some(handle)
    }

    /// Carves the excess of `handle` past `needed` bytes into a new free
    /// block spliced in immediately after it.
    #[instrument(level = "debug")]
    fn split(&mut self, handle: BlockHandle, needed: usize) {
        let (offset, old_size) = {
            let block = &self.arena[handle];
            (block.offset, block.size)
        };
        debug_assert_eq!(needed % BLOCK_ALIGN, 0);
        debug_assert!(old_size > needed + HEADER_SIZE + MIN_REMAINDER);

        let remainder_offset = offset + HEADER_SIZE + needed;
        let remainder_size = old_size - HEADER_SIZE - needed;
        // Validate the remainder extent before it gets a handle.
        assert!(
            remainder_offset + HEADER_SIZE + remainder_size <= self.heap_len(),
            "split remainder escapes the managed region"
        );

        let remainder = self.arena.insert(Block {
            offset: remainder_offset,
            size: remainder_size,
            free: true,
            slack: 0,
            prev: None,
            next: None,
            provenance: Provenance::Carved,
        });
        self.directory.link_after(&mut self.arena, handle, remainder);
        self.arena[handle].size = needed;
        self.write_stamp(remainder);
        debug!(parent = ?handle, ?remainder, remainder_size, "Carved off remainder.");
    }

    /// Marks `handle` free and absorbs whichever of its directory neighbors
    /// are free. Only the immediate neighbors are considered; longer free
    /// runs get merged by later releases next to them.
    #[instrument(level = "debug")]
    fn coalesce(&mut self, handle: BlockHandle) {
        let (prev, next) = {
            let block = &self.arena[handle];
            (block.prev, block.next)
        };
        let free_prev = prev.filter(|&p| self.arena[p].free);
        let free_next = next.filter(|&n| self.arena[n].free);

        match (free_prev, free_next) {
            (None, None) => {
                let block = &mut self.arena[handle];
                block.free = true;
                block.slack = 0;
                debug!(?handle, "Released with no free neighbors.");
            }
            (Some(prev), None) => {
                self.absorb(prev, handle);
                debug!(survivor = ?prev, absorbed = ?handle, "Merged into free predecessor.");
            }
            (None, Some(next)) => {
                self.absorb(handle, next);
                debug!(survivor = ?handle, absorbed = ?next, "Absorbed free successor.");
            }
            (Some(prev), Some(next)) => {
                self.absorb(prev, handle);
                self.absorb(prev, next);
                debug!(survivor = ?prev, "Merged with both free neighbors.");
            }
        }
    }

    /// Folds `victim`, the directory successor of `survivor`, into
    /// `survivor`, reclaiming the victim's header bytes. The survivor ends
    /// up free with zero slack; the victim's handle goes stale.
    fn absorb(&mut self, survivor: BlockHandle, victim: BlockHandle) {
        debug_assert_eq!(self.arena[survivor].next, Some(victim));
        debug_assert_eq!(
            self.arena[survivor].end_offset(),
            self.arena[victim].offset,
            "directory neighbors should be physically adjacent"
        );
        self.directory.unlink(&mut self.arena, victim);
        let removed = self.arena.remove(victim).expect("victim was just unlinked");
        let block = &mut self.arena[survivor];
        block.size += removed.size + HEADER_SIZE;
        block.slack = 0;
        block.free = true;
    }

    /// Maps a payload pointer back to its handle, or `None` if the pointer
    /// does not name a live block.
    fn lookup(&self, payload: NonNull<u8>) -> Option<BlockHandle> {
        let base = self.heap_start?.as_ptr() as usize;
        let top = self.heap_top?.as_ptr() as usize;
        let addr = payload.as_ptr() as usize;
        if addr % BLOCK_ALIGN != 0 || addr < base + HEADER_SIZE || addr >= top {
            return None;
        }
        let offset = addr - base;
        let stamp = unsafe {
            // In bounds per the check above; the region is readable by the
            // grower contract.
            self.heap_base()
                .as_ptr()
                .add(offset - HEADER_SIZE)
                .cast::<Stamp>()
                .read()
        };
        let handle = stamp.handle()?;
        let block = self.arena.get(handle)?;
        (block.payload_offset() == offset).then_some(handle)
    }

    /// Writes the routing stamp for `handle` into its reserved header bytes.
    fn write_stamp(&mut self, handle: BlockHandle) {
        let offset = self.arena[handle].offset;
        let stamp = Stamp::for_handle(handle);
        unsafe {
            // Offsets are validated against the region extent when blocks
            // are created, and stamp alignment is pinned to BLOCK_ALIGN.
            self.heap_base()
                .as_ptr()
                .add(offset)
                .cast::<Stamp>()
                .write(stamp);
        }
    }

    fn payload_ptr(&self, handle: BlockHandle) -> NonNull<u8> {
        let offset = self.arena[handle].payload_offset();
        unsafe { NonNull::new_unchecked(self.heap_base().as_ptr().add(offset)) }
    }

    fn heap_base(&self) -> NonNull<u8> {
        self.heap_start
            .expect("blocks exist only after the heap base is recorded")
    }

    fn heap_len(&self) -> usize {
        match (self.heap_start, self.heap_top) {
            (Some(start), Some(top)) => top.as_ptr() as usize - start.as_ptr() as usize,
            _ => 0,
        }
    }
}
