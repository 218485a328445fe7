//! Range sub-allocation for one large device buffer
//!
//! Uniform and geometry data share a handful of big GPU buffers; objects
//! get `{offset, size}` slices of them. The bytes live on the device, so
//! this side only parcels out ranges.

use super::free_list::{FreeList, FreeListError};

/// A byte range inside a sub-allocated device buffer. This is the handle
/// backend buffer wrappers bind from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRange {
    pub offset: u64,
    pub size: u64,
}

/// Range bookkeeping for a single fixed-capacity device buffer.
pub struct SuballocatedBuffer {
    capacity: u64,
    free_list: FreeList,
}

impl SuballocatedBuffer {
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "cannot sub-allocate an empty buffer");
        Self {
            capacity,
            free_list: FreeList::new(capacity),
        }
    }

    /// Reserve a range, lowest offset first. `None` when the buffer cannot
    /// fit `size` contiguous bytes.
    pub fn allocate(&mut self, size: u64) -> Option<BufferRange> {
        let offset = self.free_list.allocate_block(size)?;
        Some(BufferRange { offset, size })
    }

    /// Give a range back. Ranges that never came from this buffer surface
    /// as errors from the underlying list.
    pub fn free(&mut self, range: BufferRange) -> Result<(), FreeListError> {
        self.free_list.free_block(range.size, range.offset)
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn space_left(&self) -> u64 {
        self.free_list.space_left()
    }
}
