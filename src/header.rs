//! Defines the [`Header`] that precedes every [`SystemAllocator`] allocation.
//!
//! [`SystemAllocator`]: crate::allocators::SystemAllocator

use core::mem::{align_of, size_of};
use core::ptr::NonNull;

use static_assertions::const_assert;

use crate::util::ALLOC_ALIGNMENT;

pub const HEADER_SIZE: usize = size_of::<Header>();
pub const HEADER_ALIGN: usize = align_of::<Header>();

// The header must fit in the padding in front of a minimally aligned allocation.
const_assert!(HEADER_SIZE <= ALLOC_ALIGNMENT);
const_assert!(HEADER_ALIGN <= ALLOC_ALIGNMENT);

/// Bookkeeping stored directly in front of an allocation handed out by the system allocator.
///
/// The heap block returned by the platform starts `offset` bytes before the allocation,
/// the header occupies the last [`HEADER_SIZE`] bytes of that gap.
///
/// ```text
/// block start                 allocation
/// |<---------- offset ---------->|
/// [ padding ... | size | offset ][ object ... ]
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    /// Bytes accounted to the allocator for this allocation.
    pub size: usize,
    /// Distance from the start of the heap block to the allocation.
    pub offset: usize,
}

impl Header {
    /// Returns the offset needed in front of an allocation with alignment `align`
    /// so that both the header and the allocation are properly aligned.
    #[inline]
    pub const fn offset_for(align: usize) -> usize {
        if align > HEADER_SIZE {
            align
        } else {
            ALLOC_ALIGNMENT
        }
    }

    /// Writes `self` in front of `obj_start`.
    ///
    /// # Safety
    /// `obj_start` must be preceded by at least [`HEADER_SIZE`] writable bytes
    /// that belong to the same heap block.
    #[inline]
    pub unsafe fn write_before(self, obj_start: NonNull<u8>) {
        let header: *mut Header = obj_start.as_ptr().sub(HEADER_SIZE).cast();
        debug_assert_eq!(header as usize % HEADER_ALIGN, 0);
        header.write(self);
    }

    /// Reads the header in front of `obj_start`.
    ///
    /// # Safety
    /// `obj_start` must have been returned by the system allocator and not freed yet.
    #[inline]
    pub unsafe fn read_before(obj_start: NonNull<u8>) -> Header {
        let header: *const Header = obj_start.as_ptr().sub(HEADER_SIZE).cast();
        header.read()
    }

    /// Returns the start of the heap block that holds `obj_start`.
    ///
    /// # Safety
    /// `self` must be the header read from in front of `obj_start`.
    #[inline]
    pub unsafe fn block_start(&self, obj_start: NonNull<u8>) -> *mut u8 {
        obj_start.as_ptr().sub(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Block([u8; 256]);

    #[test]
    fn test_1() {
        assert_eq!(Header::offset_for(1), ALLOC_ALIGNMENT);
        assert_eq!(Header::offset_for(16), ALLOC_ALIGNMENT);
        assert_eq!(Header::offset_for(32), 32);
        assert_eq!(Header::offset_for(4096), 4096);
    }

    #[test]
    fn test_2() {
        let mut block = Block([0; 256]);
        let start = block.0.as_mut_ptr();
        let offset = Header::offset_for(64);
        let obj_start = NonNull::new(unsafe { start.add(offset) }).unwrap();

        let header = Header { size: 128, offset };
        unsafe {
            header.write_before(obj_start);
            let read = Header::read_before(obj_start);
            assert_eq!(read, header);
            assert_eq!(read.block_start(obj_start), start);
        }
    }
}
