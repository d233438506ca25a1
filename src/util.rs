//! Size rounding and checked pointer helpers.

use crate::block::BLOCK_ALIGN;

/// Rounds `size` up to the next multiple of [`BLOCK_ALIGN`]
/// or `None` if the rounded size does not fit in a `usize`.
#[inline]
pub(crate) fn round_to_block(size: usize) -> Option<usize> {
    size.checked_add(BLOCK_ALIGN - 1)
        .map(|s| s & !(BLOCK_ALIGN - 1))
}

/// Returns the smallest (in address) `align`-aligned pointer
/// with an address greater or equal to that of `ptr`
/// or `None` if no such pointer exists.
///
/// # Panics
/// Panics if `align` is not a power-of-two.
#[inline]
pub(crate) fn find_aligned(ptr: *const u8, align: usize) -> Option<*const u8> {
    let offset = ptr.align_offset(align);
    debug_assert_ne!(
        offset,
        usize::MAX,
        "align_offset() on a *const u8 should never fail."
    );
    if usize::MAX - offset < ptr as usize {
        return None;
    }
    Some(ptr.wrapping_add(offset))
}

/// Offsets `ptr` by `offset` bytes, or `None` if the result would leave the
/// address space.
#[inline(always)]
pub(crate) fn checked_ptr_add(ptr: *const u8, offset: usize) -> Option<*const u8> {
    (ptr as usize <= usize::MAX - offset).then(|| ptr.wrapping_add(offset))
}
