//! Alignment and pointer arithmetic helpers shared by the allocators.

use core::ptr::NonNull;

use static_assertions::const_assert;

/// Minimum alignment of every pointer handed out by the allocators in this crate.
pub const ALLOC_ALIGNMENT: usize = 16;

const_assert!(ALLOC_ALIGNMENT.is_power_of_two());
const_assert!(ALLOC_ALIGNMENT >= core::mem::align_of::<usize>());

/// Rounds `size` up to the next multiple of [`ALLOC_ALIGNMENT`].
///
/// Returns `None` if the rounded size doesn't fit in a `usize`.
#[inline]
pub const fn aligned_size(size: usize) -> Option<usize> {
    round_up(size, ALLOC_ALIGNMENT)
}

/// Rounds `size` up to the next multiple of `align`, which must be a power of two.
#[inline]
pub const fn round_up(size: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    match size.checked_add(align - 1) {
        Some(s) => Some(s & !(align - 1)),
        None => None,
    }
}

/// Returns whether `ptr` is aligned to `align`, which must be a power of two.
#[inline(always)]
pub fn is_aligned(ptr: *const u8, align: usize) -> bool {
    debug_assert!(align.is_power_of_two());
    ptr as usize & (align - 1) == 0
}

/// Returns the distance in bytes from `base` to `ptr`, or `None` if `ptr` is below `base`.
#[inline(always)]
pub(crate) fn offset_from(base: NonNull<u8>, ptr: NonNull<u8>) -> Option<usize> {
    (ptr.as_ptr() as usize).checked_sub(base.as_ptr() as usize)
}
