//! [`Grower`] trait and the growers shipped with the crate.
//!
//! A grower is the allocator's window onto the contiguous heap region it
//! manages. [`BestFitMalloc`](crate::BestFitMalloc) is generic over its
//! grower, so the same engine runs on the process data segment
//! ([`BrkGrower`]) or on a caller-provided buffer ([`ArenaGrower`]).

use crate::block::BLOCK_ALIGN;
use crate::util::{checked_ptr_add, find_aligned};

use core::ptr::NonNull;

use libc::{brk, sbrk};

/// A trait for types that act as a contiguous growable buffer.
///
/// # Safety
/// Implementors must uphold all of the following:
/// * `grow(0)` does not grow the buffer; it only reports the current end.
/// * `grow(size)` extends the buffer by exactly `size` bytes and returns the
///   previous end, so consecutive grows hand out adjacent regions.
/// * bytes of the grown region stay valid for reads and writes until the
///   grower is dropped, and may be read as initialized `u8`s.
/// * copying, cloning, or moving the grower must not invalidate pointers to
///   the buffer it manages. This generally means that growers should not own
///   but reference their underlying buffers.
pub unsafe trait Grower {
    /// Grows the underlying buffer by exactly `size` bytes.
    /// Returns the old end of the buffer or `Err(())` if the growth failed.
    ///
    /// # Safety
    /// Callers must serialize calls to `grow`; no implementor is expected to
    /// tolerate concurrent growth of the same buffer.
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()>;
}

/// A grower that uses [`libc::brk`] to operate on the end of the process's
/// data segment. Memory is never returned to the operating system.
#[derive(Debug)]
pub struct BrkGrower {
    heap_end: Option<NonNull<u8>>,
}

impl BrkGrower {
    #[inline(always)]
    pub const fn new() -> Self {
        BrkGrower { heap_end: None }
    }

    /// Tries to initialize the grower by calling `sbrk(0)` to get the initial
    /// heap end, rounded up to [`BLOCK_ALIGN`].
    ///
    /// # Safety
    /// This function is unsafe since it assumes that the grower
    /// wasn't previously initialized and that there aren't any other
    /// objects (growers or not) managing the program break.
    unsafe fn try_init(&mut self) -> Result<(), ()> {
        debug_assert!(self.heap_end.is_none());
        let heap_end = unsafe { sbrk(0) };
        debug_assert_ne!(heap_end as isize, -1, "Calling sbrk(0) should never fail.");
        debug_assert_ne!(heap_end as usize, 0);
        let aligned = find_aligned(heap_end.cast(), BLOCK_ALIGN).ok_or(())? as *mut u8;
        if aligned != heap_end.cast() {
            // Claim the alignment gap so the first block starts aligned.
            if unsafe { brk(aligned.cast()) == -1 } {
                return Err(());
            }
        }
        self.heap_end = NonNull::new(aligned);
        debug_assert!(self.heap_end.is_some());
        Ok(())
    }
}

impl Default for BrkGrower {
    fn default() -> Self {
        BrkGrower::new()
    }
}

unsafe impl Grower for BrkGrower {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        if self.heap_end.is_none() {
            unsafe { self.try_init()? };
        }
        let heap_end = self.heap_end.ok_or(())?;
        if size == 0 {
            return Ok(heap_end);
        }
        let new_heap_end: *mut u8 = checked_ptr_add(heap_end.as_ptr(), size).ok_or(())? as _;
        if unsafe { brk(new_heap_end.cast()) == -1 } {
            return Err(());
        }
        self.heap_end = NonNull::new(new_heap_end);
        Ok(heap_end)
    }
}

/// A grower over a fixed caller-provided buffer. Growth fails once the
/// buffer is exhausted. Useful for tests and for embedding the allocator in
/// a preallocated region.
#[derive(Debug)]
pub struct ArenaGrower {
    heap_end: *mut u8,
    arena_end: *mut u8,
}

impl ArenaGrower {
    /// Creates a grower over `size` bytes starting at `buf`. The usable
    /// region begins at the first [`BLOCK_ALIGN`]-aligned address inside the
    /// buffer.
    pub fn new(buf: *mut u8, size: usize) -> Self {
        let arena_end = buf.wrapping_add(size);
        let heap_end = match find_aligned(buf, BLOCK_ALIGN) {
            Some(p) if (p as usize) <= arena_end as usize => p as *mut u8,
            _ => arena_end,
        };
        ArenaGrower {
            heap_end,
            arena_end,
        }
    }
}

unsafe impl Grower for ArenaGrower {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        let heap_end = self.heap_end;
        if size == 0 {
            return NonNull::new(heap_end).ok_or(());
        }
        let new_heap_end = checked_ptr_add(heap_end, size).ok_or(())? as *mut u8;
        if new_heap_end > self.arena_end {
            return Err(());
        }
        self.heap_end = new_heap_end;
        NonNull::new(heap_end).ok_or(())
    }
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    unsafe fn grow(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        (*self).grow(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(8))]
    struct AlignedBuf<const N: usize>([u8; N]);

    #[test]
    fn arena_grower_hands_out_adjacent_regions() {
        let mut buf = AlignedBuf([0_u8; 2048]);
        let p = buf.0.as_mut_ptr();
        let mut arena = ArenaGrower::new(p, 2048);
        unsafe {
            assert_eq!(p, arena.grow(0).unwrap().as_ptr());
            assert_eq!(p, arena.grow(24).unwrap().as_ptr());
            assert_eq!(p.add(24), arena.grow(16).unwrap().as_ptr());
            assert_eq!(p.add(40), arena.grow(2048 - 40).unwrap().as_ptr());
            assert_eq!(p.add(2048), arena.grow(0).unwrap().as_ptr());
            assert!(arena.grow(1).is_err());
            assert!(arena.grow(8).is_err());
        }
    }

    #[test]
    fn arena_grower_with_no_capacity() {
        let mut buf = AlignedBuf([0_u8; 64]);
        let mut arena = ArenaGrower::new(buf.0.as_mut_ptr(), 0);
        unsafe {
            assert!(arena.grow(1).is_err());
            assert!(arena.grow(4).is_err());
            assert!(arena.grow(8).is_err());
        }
    }

    #[test]
    fn arena_grower_aligns_its_start() {
        let mut buf = AlignedBuf([0_u8; 64]);
        let base = buf.0.as_mut_ptr();
        let mut arena = ArenaGrower::new(base.wrapping_add(3), 32);
        unsafe {
            let start = arena.grow(0).unwrap().as_ptr();
            assert_eq!(start as usize % BLOCK_ALIGN, 0);
            assert_eq!(start, base.add(8));
        }
    }

    #[test]
    fn arena_grower_grows_exactly() {
        let mut buf = AlignedBuf([0_u8; 128]);
        let p = buf.0.as_mut_ptr();
        let mut arena = ArenaGrower::new(p, 40);
        unsafe {
            assert_eq!(p, arena.grow(8).unwrap().as_ptr());
            assert_eq!(p.add(8), arena.grow(32).unwrap().as_ptr());
            assert!(arena.grow(8).is_err());
            // grow(0) still reports the end after a failed growth.
            assert_eq!(p.add(40), arena.grow(0).unwrap().as_ptr());
        }
    }
}
