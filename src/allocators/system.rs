//! An allocator over the platform heap.

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, instrument, trace, Level};

use super::{Allocator, GeneralAllocator};
use crate::error::AllocError;
use crate::header::Header;
use crate::util::{aligned_size, ALLOC_ALIGNMENT};

/// Limit value that disables the byte limit of a [`SystemAllocator`].
pub const NO_LIMIT: usize = usize::MAX;

/// An allocator that forwards to the platform heap (`posix_memalign`/`free`).
///
/// The allocator keeps track of the bytes it has handed out and can optionally refuse
/// allocations that would exceed a byte limit. Sizes are accounted rounded up to
/// [`ALLOC_ALIGNMENT`]. All counters are atomic, so the allocator can be shared between
/// threads as long as the platform heap is thread-safe.
#[derive(Debug)]
pub struct SystemAllocator {
    size: AtomicUsize,
    total_allocations: AtomicUsize,
    current_allocations: AtomicUsize,
    limit: usize,
}

impl SystemAllocator {
    /// Creates a system allocator that fails once `limit` bytes are allocated.
    ///
    /// Pass [`NO_LIMIT`] to disable the limit. A limit of 0 is rejected since nothing
    /// could ever be allocated.
    pub fn new(limit: usize) -> Result<Self, AllocError> {
        if limit == 0 {
            return Err(AllocError::InvalidArgument("limit must be non-zero"));
        }
        Ok(SystemAllocator {
            size: AtomicUsize::new(0),
            total_allocations: AtomicUsize::new(0),
            current_allocations: AtomicUsize::new(0),
            limit,
        })
    }

    /// Creates a system allocator without a byte limit.
    pub const fn unlimited() -> Self {
        SystemAllocator {
            size: AtomicUsize::new(0),
            total_allocations: AtomicUsize::new(0),
            current_allocations: AtomicUsize::new(0),
            limit: NO_LIMIT,
        }
    }

    /// Returns the byte limit, or [`NO_LIMIT`].
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of successful allocations and reallocations made so far.
    #[inline]
    pub fn total_allocations(&self) -> usize {
        self.total_allocations.load(Ordering::Relaxed)
    }

    /// Returns the number of allocations that haven't been freed yet.
    #[inline]
    pub fn current_allocations(&self) -> usize {
        self.current_allocations.load(Ordering::Relaxed)
    }

    /// Accounts `size` bytes against the limit, failing without side effects if the
    /// limit would be exceeded.
    fn reserve(&self, size: usize) -> Result<(), AllocError> {
        let limit = self.limit;
        self.size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(size).filter(|&new| new <= limit)
            })
            .map(|_| ())
            .map_err(|current| {
                debug!(current, size, limit, "Allocation would exceed the limit.");
                AllocError::OutOfMemory
            })
    }

    #[inline]
    fn unreserve(&self, size: usize) {
        let old = self.size.fetch_sub(size, Ordering::Relaxed);
        debug_assert!(old >= size, "Allocator size underflow.");
    }

    #[instrument(level = "trace", skip(self), ret(level = Level::TRACE), err(Debug, level = Level::DEBUG))]
    fn __alloc(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidArgument("size must be non-zero"));
        }
        if !alignment.is_power_of_two() {
            return Err(AllocError::InvalidArgument("alignment must be a power of two"));
        }

        let accounted = aligned_size(size).ok_or(AllocError::OutOfMemory)?;
        self.reserve(accounted)?;
        let obj_start = self
            .alloc_block(alignment.max(ALLOC_ALIGNMENT), accounted)
            .inspect_err(|_| self.unreserve(accounted))?;

        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.current_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(obj_start)
    }

    /// Gets a heap block for `accounted` bytes aligned to `align` and writes its header.
    /// Doesn't touch the counters.
    fn alloc_block(&self, align: usize, accounted: usize) -> Result<NonNull<u8>, AllocError> {
        let offset = Header::offset_for(align);
        let block_size = offset.checked_add(accounted).ok_or(AllocError::OutOfMemory)?;

        let mut block: *mut libc::c_void = ptr::null_mut();
        // posix_memalign requires a multiple of the pointer size, which `align` always is.
        let result = unsafe { libc::posix_memalign(&mut block, align, block_size) };
        if result != 0 || block.is_null() {
            debug!(result, block_size, align, "Platform heap refused the allocation.");
            return Err(AllocError::OutOfMemory);
        }

        let obj_start = unsafe { NonNull::new_unchecked(block.cast::<u8>().add(offset)) };
        unsafe {
            Header {
                size: accounted,
                offset,
            }
            .write_before(obj_start);
        }
        Ok(obj_start)
    }

    /// Returns the heap block holding `obj_start` to the platform and hands back its header.
    /// Doesn't touch the counters.
    ///
    /// # Safety
    /// `obj_start` must have been returned by this allocator and not freed since.
    unsafe fn free_block(&self, obj_start: NonNull<u8>) -> Header {
        let header = Header::read_before(obj_start);
        debug_assert_eq!(header.size % ALLOC_ALIGNMENT, 0, "Corrupt allocation header.");
        trace!(?obj_start, ?header, "Freeing allocation.");
        libc::free(header.block_start(obj_start).cast());
        header
    }

    /// Releases an allocation back to the platform heap.
    ///
    /// # Safety
    /// `obj_start` must have been returned by this allocator and not freed since.
    unsafe fn __free(&self, obj_start: NonNull<u8>) {
        let header = self.free_block(obj_start);
        self.unreserve(header.size);
        let old = self.current_allocations.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(old > 0, "Freed more allocations than were made.");
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        SystemAllocator::unlimited()
    }
}

unsafe impl Allocator for SystemAllocator {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.__alloc(ALLOC_ALIGNMENT, size)
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        self.__free(ptr);
        Ok(())
    }

    fn can_free(&self) -> bool {
        true
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

unsafe impl GeneralAllocator for SystemAllocator {
    fn aligned_alloc(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.__alloc(alignment, size)
    }

    unsafe fn realloc(
        &self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        if size == 0 {
            if let Some(obj_start) = ptr {
                self.__free(obj_start);
            }
            return Ok(None);
        }
        let Some(obj_start) = ptr else {
            return self.alloc(size).map(Some);
        };

        // Keep the alignment the allocation was made with.
        let header = Header::read_before(obj_start);
        let align = header.offset.max(ALLOC_ALIGNMENT);
        let accounted = aligned_size(size).ok_or(AllocError::OutOfMemory)?;

        // Only the growth counts against the limit, the old block goes away.
        let growth = accounted.saturating_sub(header.size);
        self.reserve(growth)?;
        let new_obj_start = self
            .alloc_block(align, accounted)
            .inspect_err(|_| self.unreserve(growth))?;

        ptr::copy_nonoverlapping(
            obj_start.as_ptr(),
            new_obj_start.as_ptr(),
            header.size.min(accounted),
        );
        self.free_block(obj_start);
        self.unreserve(header.size.saturating_sub(accounted));

        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        debug!(?obj_start, ?new_obj_start, size, "Moved allocation.");
        Ok(Some(new_obj_start))
    }
}
