//! The [`Allocator`] contract and the allocators that implement it.
//!
//! Every allocator hands out memory aligned to at least [`ALLOC_ALIGNMENT`] and keeps a
//! running count of the bytes currently allocated through it. Allocators differ in whether
//! they can free individual allocations and whether they can be shared between threads:
//!
//! | allocator | frees | thread-safe |
//! |---|---|---|
//! | [`SystemAllocator`] | yes | yes (as safe as the platform heap) |
//! | [`BufferAllocator`] | no  | no (`!Sync`) |
//! | [`PoolAllocator`]   | yes | yes (spinlock) |

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use crate::error::AllocError;
pub use crate::util::{aligned_size, ALLOC_ALIGNMENT};

pub mod buffer;
pub mod pool;
pub mod system;

pub use buffer::BufferAllocator;
pub use pool::{ChunkIndex, PoolAllocator};
pub use system::{SystemAllocator, NO_LIMIT};

/// The minimal allocator contract.
///
/// # Safety
/// Implementors must return memory that is valid for reads and writes of `size` bytes,
/// aligned to at least [`ALLOC_ALIGNMENT`] and not aliased by any other live allocation.
pub unsafe trait Allocator {
    /// Allocates `size` bytes.
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Frees memory previously returned by [`alloc`](Allocator::alloc).
    ///
    /// Allocators that can't free individual allocations return
    /// [`AllocError::PermissionDenied`].
    ///
    /// # Safety
    /// `ptr` must have been returned by this allocator and not freed since.
    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let _ = ptr;
        Err(AllocError::PermissionDenied)
    }

    /// Returns whether [`free`](Allocator::free) is supported.
    ///
    /// Memory from an allocator that can't free must never be freed, and the allocator may
    /// go away before its allocations do, so callers shouldn't hold on to it.
    fn can_free(&self) -> bool {
        false
    }

    /// Returns the number of bytes currently allocated.
    fn size(&self) -> usize;
}

/// An [`Allocator`] that also supports custom alignment and reallocation.
///
/// # Safety
/// Same requirements as [`Allocator`]; additionally memory from
/// [`aligned_alloc`](GeneralAllocator::aligned_alloc) must honor the requested alignment.
pub unsafe trait GeneralAllocator: Allocator {
    /// Allocates `size` bytes aligned to `alignment`, which must be a power of two.
    fn aligned_alloc(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError>;

    /// Resizes an allocation, moving it if needed.
    ///
    /// A `None` pointer behaves like [`alloc`](Allocator::alloc). A `size` of 0 frees the
    /// allocation and returns `Ok(None)`.
    ///
    /// # Safety
    /// `ptr`, if present, must have been returned by this allocator and not freed since.
    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError>;
}

unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        (**self).alloc(size)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        (**self).free(ptr)
    }

    fn can_free(&self) -> bool {
        (**self).can_free()
    }

    fn size(&self) -> usize {
        (**self).size()
    }
}

/// Allocates uninitialized storage for a single `T`.
pub fn alloc_object<T, A: Allocator + ?Sized>(allocator: &A) -> Result<NonNull<T>, AllocError> {
    alloc_array(allocator, 1)
}

/// Allocates uninitialized storage for `count` consecutive `T`s.
pub fn alloc_array<T, A: Allocator + ?Sized>(
    allocator: &A,
    count: usize,
) -> Result<NonNull<T>, AllocError> {
    if align_of::<T>() > ALLOC_ALIGNMENT {
        return Err(AllocError::InvalidArgument("type alignment exceeds ALLOC_ALIGNMENT"));
    }
    let size = size_of::<T>()
        .checked_mul(count)
        .ok_or(AllocError::OutOfMemory)?;
    Ok(allocator.alloc(size)?.cast())
}
