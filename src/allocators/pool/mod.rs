//! A fixed-size chunk allocator.
//!
// # Implementation notes
// ## Free list
// The pool doesn't keep any bookkeeping outside of its buffer. Every free chunk stores the
// index of the next free chunk in its first machine word and the pool only remembers the
// index of the first free chunk (`head`). Allocation pops the head, freeing pushes the
// chunk back on top, both O(1).
//
// ## Lazy initialization
// Linking every chunk up front would touch the whole buffer on creation. Instead chunks
// at and after `initialized_count` are implicitly free and linked in order: when `head`
// reaches `initialized_count` the chunk gets its link written right before it is popped.
// Once a chunk is initialized it never goes back to being uninitialized (apart from `reset`).
//
// ## Locking
// All free-list state sits behind a spinlock. The critical section only does index
// arithmetic and reads/writes a single word inside the chunk; it never allocates or
// blocks, so spinning is cheaper than parking the thread.

use core::fmt::Debug;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex as SpinMutex;
use static_assertions::const_assert;
use tracing::{debug, instrument, trace, Level};

use super::Allocator;
use crate::error::AllocError;
use crate::util::{aligned_size, is_aligned, offset_from, ALLOC_ALIGNMENT};

/// Free-list terminator.
pub const NO_CHUNK: usize = usize::MAX;

// Every chunk must be able to hold the index of the next free chunk.
const_assert!(size_of::<usize>() <= ALLOC_ALIGNMENT);

/// Index of a chunk handed out by a [`PoolAllocator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkIndex(usize);

impl ChunkIndex {
    /// Returns the position of the chunk inside the pool's buffer.
    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct FreeList {
    head: usize,
    free_count: usize,
    initialized_count: usize,
}

impl FreeList {
    const fn new(chunk_count: usize) -> Self {
        FreeList {
            head: 0,
            free_count: chunk_count,
            initialized_count: 0,
        }
    }
}

/// An allocator that hands out fixed-size chunks from a caller-supplied buffer.
///
/// Use [`buffer_size`](PoolAllocator::buffer_size) to size the buffer. Chunks are
/// [`ALLOC_ALIGNMENT`]-aligned and their size is rounded up to a multiple of it.
///
/// The pool is internally synchronized and can be shared between threads. It exposes two
/// equivalent interfaces: [`alloc_chunk`](PoolAllocator::alloc_chunk) /
/// [`free_chunk`](PoolAllocator::free_chunk) work with chunk indices, while the
/// [`Allocator`] implementation works with pointers.
pub struct PoolAllocator<'a> {
    buffer: NonNull<u8>,
    buffer_size: usize,
    chunk_size: usize,
    chunk_count: usize,
    free_list: SpinMutex<FreeList>,
    size: AtomicUsize,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl Debug for PoolAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("buffer", &self.buffer)
            .field("buffer_size", &self.buffer_size)
            .field("chunk_size", &self.chunk_size)
            .field("chunk_count", &self.chunk_count)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

// All mutation of the buffer goes through the spinlock, chunks themselves are only handed
// out to one owner at a time.
unsafe impl Send for PoolAllocator<'_> {}
unsafe impl Sync for PoolAllocator<'_> {}

impl<'a> PoolAllocator<'a> {
    /// Returns the buffer size needed for `chunk_count` chunks of `chunk_size` bytes,
    /// or `None` on overflow.
    pub const fn buffer_size(chunk_size: usize, chunk_count: usize) -> Option<usize> {
        match aligned_size(chunk_size) {
            Some(size) => size.checked_mul(chunk_count),
            None => None,
        }
    }

    /// Creates a pool of `chunk_count` chunks of `chunk_size` bytes over `buffer`.
    ///
    /// The buffer must start at an [`ALLOC_ALIGNMENT`]-aligned address and be at least
    /// [`buffer_size`](PoolAllocator::buffer_size) bytes long. Its contents don't need to
    /// be initialized.
    pub fn new(chunk_size: usize, chunk_count: usize, buffer: &'a mut [u8]) -> Result<Self, AllocError> {
        let size = buffer.len();
        let ptr = NonNull::new(buffer.as_mut_ptr())
            .ok_or(AllocError::InvalidArgument("buffer must be non-null"))?;
        unsafe { Self::from_raw_parts(chunk_size, chunk_count, ptr, size) }
    }

    /// Creates a pool over `buffer_size` bytes starting at `buffer`.
    ///
    /// # Safety
    /// The memory must be valid for reads and writes for `'a` and not accessed through any
    /// other path while the pool or its chunks are in use.
    #[instrument(level = "debug", skip(buffer), err(Debug, level = Level::DEBUG))]
    pub unsafe fn from_raw_parts(
        chunk_size: usize,
        chunk_count: usize,
        buffer: NonNull<u8>,
        buffer_size: usize,
    ) -> Result<Self, AllocError> {
        if chunk_size == 0 || chunk_count == 0 {
            return Err(AllocError::InvalidArgument("chunk size and count must be non-zero"));
        }
        if chunk_count == NO_CHUNK {
            return Err(AllocError::InvalidArgument("too many chunks"));
        }
        match Self::buffer_size(chunk_size, chunk_count) {
            Some(required) if required <= buffer_size => {}
            _ => return Err(AllocError::InvalidArgument("buffer is too small")),
        }
        if !is_aligned(buffer.as_ptr(), ALLOC_ALIGNMENT) {
            return Err(AllocError::InvalidArgument("buffer must be aligned to ALLOC_ALIGNMENT"));
        }

        let chunk_size = aligned_size(chunk_size).unwrap_or(chunk_size);
        debug!(chunk_size, chunk_count, "Created pool.");
        Ok(PoolAllocator {
            buffer,
            buffer_size,
            chunk_size,
            chunk_count,
            free_list: SpinMutex::new(FreeList::new(chunk_count)),
            size: AtomicUsize::new(0),
            _buffer: PhantomData,
        })
    }

    /// Size of each chunk, rounded up to [`ALLOC_ALIGNMENT`].
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    #[inline]
    pub fn buffer(&self) -> NonNull<u8> {
        self.buffer
    }

    #[inline]
    pub fn buffer_len(&self) -> usize {
        self.buffer_size
    }

    /// Returns the index of the next chunk to be handed out, or [`NO_CHUNK`].
    pub fn head(&self) -> usize {
        self.free_list.lock().head
    }

    /// Returns how many chunks are available.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().free_count
    }

    /// Returns how many chunks have been linked into the free list at least once.
    pub fn initialized_count(&self) -> usize {
        self.free_list.lock().initialized_count
    }

    /// Returns a pointer to the start of the chunk at `index`.
    #[inline]
    pub fn chunk_ptr(&self, index: ChunkIndex) -> NonNull<u8> {
        debug_assert!(index.0 < self.chunk_count, "Chunk index out of range.");
        unsafe { NonNull::new_unchecked(self.buffer.as_ptr().add(index.0 * self.chunk_size)) }
    }

    /// Returns the index of the chunk starting at `ptr`.
    ///
    /// `ptr` must point at the start of one of the pool's chunks.
    #[inline]
    pub fn chunk_index(&self, ptr: NonNull<u8>) -> ChunkIndex {
        let offset = offset_from(self.buffer, ptr);
        debug_assert!(offset.is_some(), "Pointer is below the pool's buffer.");
        let offset = offset.unwrap_or(usize::MAX);
        debug_assert_eq!(offset % self.chunk_size, 0, "Pointer isn't at a chunk boundary.");
        debug_assert!(offset / self.chunk_size < self.chunk_count, "Pointer is past the pool's buffer.");
        ChunkIndex(offset / self.chunk_size)
    }

    /// Reads the free-list link stored in chunk `index`.
    ///
    /// # Safety
    /// The chunk must be free and initialized, and the free list locked.
    #[inline(always)]
    unsafe fn next_free(&self, index: usize) -> usize {
        self.chunk_ptr(ChunkIndex(index)).as_ptr().cast::<usize>().read()
    }

    /// Writes the free-list link of chunk `index`.
    ///
    /// # Safety
    /// The chunk must not be allocated, and the free list locked.
    #[inline(always)]
    unsafe fn set_next_free(&self, index: usize, next: usize) {
        self.chunk_ptr(ChunkIndex(index)).as_ptr().cast::<usize>().write(next)
    }

    /// Takes a chunk off the free list.
    pub fn alloc_chunk(&self) -> Result<ChunkIndex, AllocError> {
        let index = {
            let mut list = self.free_list.lock();
            if list.free_count == 0 {
                drop(list);
                trace!("Pool exhausted.");
                return Err(AllocError::OutOfMemory);
            }

            let index = list.head;
            debug_assert!(index < self.chunk_count, "Free list head out of range.");
            unsafe {
                if index == list.initialized_count {
                    let next = index + 1;
                    self.set_next_free(index, if next < self.chunk_count { next } else { NO_CHUNK });
                    list.initialized_count += 1;
                }
                list.head = self.next_free(index);
            }
            list.free_count -= 1;
            index
        };

        self.size.fetch_add(self.chunk_size, Ordering::Relaxed);
        Ok(ChunkIndex(index))
    }

    /// Returns a chunk to the free list.
    ///
    /// # Safety
    /// `index` must have been returned by [`alloc_chunk`](PoolAllocator::alloc_chunk) (or be
    /// the index of a pointer returned by [`alloc`](Allocator::alloc)) and not freed since.
    pub unsafe fn free_chunk(&self, index: ChunkIndex) {
        debug_assert!(index.0 < self.chunk_count, "Chunk index out of range.");
        {
            let mut list = self.free_list.lock();
            debug_assert!(index.0 < list.initialized_count, "Freeing a chunk that was never allocated.");
            debug_assert!(list.free_count < self.chunk_count, "Freeing more chunks than the pool holds.");
            self.set_next_free(index.0, list.head);
            list.head = index.0;
            list.free_count += 1;
        }
        let old = self.size.fetch_sub(self.chunk_size, Ordering::Relaxed);
        debug_assert!(old >= self.chunk_size, "Pool size underflow.");
    }

    /// Makes every chunk available again.
    ///
    /// Taking `&mut self` ensures no other thread is using the pool; chunks handed out
    /// before the reset must no longer be used.
    pub fn reset(&mut self) {
        *self.free_list.get_mut() = FreeList::new(self.chunk_count);
        *self.size.get_mut() = 0;
        trace!(chunk_count = self.chunk_count, "Reset pool.");
    }

    /// Walks the free list and checks that it is consistent with the counters.
    ///
    /// This is O(free chunks) and meant for tests and debugging.
    pub fn validate(&self) -> bool {
        let list = self.free_list.lock();
        if list.free_count > self.chunk_count || list.initialized_count > self.chunk_count {
            return false;
        }

        let mut current = list.head;
        for visited in 0..list.free_count {
            if current >= self.chunk_count {
                return false;
            }
            if current >= list.initialized_count {
                // The rest of the list is the implicitly linked, never touched tail.
                return current == list.initialized_count
                    && list.free_count - visited == self.chunk_count - list.initialized_count;
            }
            current = unsafe { self.next_free(current) };
        }
        current == NO_CHUNK
    }
}

unsafe impl Allocator for PoolAllocator<'_> {
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 || size > self.chunk_size {
            return Err(AllocError::InvalidArgument("size must be in 1..=chunk_size"));
        }
        self.alloc_chunk().map(|index| self.chunk_ptr(index))
    }

    unsafe fn free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let index = self.chunk_index(ptr);
        self.free_chunk(index);
        Ok(())
    }

    fn can_free(&self) -> bool {
        true
    }

    fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests;
