//! A bump allocator over a caller-supplied buffer.

use core::cell::Cell;
use core::marker::PhantomData;
use core::ptr::NonNull;

use tracing::trace;

use super::Allocator;
use crate::error::AllocError;
use crate::util::{aligned_size, is_aligned, ALLOC_ALIGNMENT};

/// An arena allocator that carves consecutive allocations out of a fixed buffer.
///
/// Allocations can't be freed individually, the whole buffer is reclaimed at once with
/// [`reset`](BufferAllocator::reset) or by dropping the allocator and reusing the buffer.
/// The allocator's [`size`](Allocator::size) doubles as the offset of the next allocation.
///
/// The bump offset isn't updated atomically, so the allocator is `!Sync`: it can be moved
/// to another thread but not shared between threads.
pub struct BufferAllocator<'a> {
    buffer: NonNull<u8>,
    buffer_size: usize,
    size: Cell<usize>,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl core::fmt::Debug for BufferAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferAllocator")
            .field("buffer", &self.buffer)
            .field("buffer_size", &self.buffer_size)
            .field("size", &self.size.get())
            .finish()
    }
}

// The allocator exclusively borrows its buffer, moving it doesn't invalidate anything.
unsafe impl Send for BufferAllocator<'_> {}

impl<'a> BufferAllocator<'a> {
    /// Creates an allocator over `buffer`.
    ///
    /// The buffer must be non-empty and start at an [`ALLOC_ALIGNMENT`]-aligned address.
    pub fn new(buffer: &'a mut [u8]) -> Result<Self, AllocError> {
        let size = buffer.len();
        let Some(ptr) = NonNull::new(buffer.as_mut_ptr()).filter(|_| size > 0) else {
            return Err(AllocError::InvalidArgument("buffer must be non-empty"));
        };
        unsafe { Self::from_raw_parts(ptr, size) }
    }

    /// Creates an allocator over `buffer_size` bytes starting at `buffer`.
    ///
    /// This is used to carve a single allocation from another allocator into several objects.
    ///
    /// # Safety
    /// The memory must be valid for reads and writes for `'a` and not accessed through any
    /// other path while the allocator or its allocations are in use.
    pub unsafe fn from_raw_parts(buffer: NonNull<u8>, buffer_size: usize) -> Result<Self, AllocError> {
        if buffer_size == 0 {
            return Err(AllocError::InvalidArgument("buffer must be non-empty"));
        }
        if !is_aligned(buffer.as_ptr(), ALLOC_ALIGNMENT) {
            return Err(AllocError::InvalidArgument("buffer must be aligned to ALLOC_ALIGNMENT"));
        }
        Ok(BufferAllocator {
            buffer,
            buffer_size,
            size: Cell::new(0),
            _buffer: PhantomData,
        })
    }

    /// Returns the start of the managed buffer.
    #[inline]
    pub fn buffer(&self) -> NonNull<u8> {
        self.buffer
    }

    /// Returns the size of the managed buffer.
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns how many bytes are left for further allocations.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer_size - self.size.get()
    }

    /// Discards every allocation and starts again from the beginning of the buffer.
    ///
    /// Taking `&mut self` ensures no allocation borrowed from the allocator is still in use.
    pub fn reset(&mut self) {
        trace!(size = self.size.get(), "Resetting buffer allocator.");
        self.size.set(0);
    }
}

unsafe impl Allocator for BufferAllocator<'_> {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidArgument("size must be non-zero"));
        }

        let offset = self.size.get();
        let new_offset = aligned_size(size)
            .and_then(|size| offset.checked_add(size))
            .filter(|&end| end <= self.buffer_size)
            .ok_or_else(|| {
                trace!(offset, size, buffer_size = self.buffer_size, "Buffer exhausted.");
                AllocError::OutOfMemory
            })?;

        self.size.set(new_offset);
        debug_assert!(is_aligned(unsafe { self.buffer.as_ptr().add(offset) }, ALLOC_ALIGNMENT));
        Ok(unsafe { NonNull::new_unchecked(self.buffer.as_ptr().add(offset)) })
    }

    fn size(&self) -> usize {
        self.size.get()
    }
}
