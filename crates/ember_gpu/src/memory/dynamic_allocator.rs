//! Pointer-handing arena allocator
//!
//! Owns a contiguous byte arena and a [`FreeList`] tracking its holes.
//! Callers get raw pointers into the arena and must hand them back with the
//! size they asked for; anything outside the arena is rejected before the
//! free list is touched.

use super::free_list::{FreeList, FreeListError};
use std::ptr::NonNull;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("pointer {addr:#x} outside of allocator range {base:#x}..{end:#x}")]
    OutOfRange { addr: usize, base: usize, end: usize },
    #[error("write of {len} bytes at offset {offset} overruns the {total_size} byte arena")]
    WriteOverrun {
        offset: u64,
        len: usize,
        total_size: u64,
    },
    #[error(transparent)]
    FreeList(#[from] FreeListError),
}

/// General-purpose allocator over one owned arena.
///
/// The arena's lifetime equals the allocator's; no other component touches
/// its bytes. Not synchronized, callers on multiple threads need external
/// locking.
pub struct DynamicAllocator {
    total_size: u64,
    free_list: FreeList,
    memory: Box<[u8]>,
    live_allocations: u64,
}

impl DynamicAllocator {
    pub fn new(total_size: u64) -> Self {
        assert!(total_size > 0, "cannot create an allocator of size 0");
        Self {
            total_size,
            free_list: FreeList::new(total_size),
            memory: vec![0u8; total_size as usize].into_boxed_slice(),
            live_allocations: 0,
        }
    }

    /// Hand out `size` bytes, or `None` when no hole is large enough.
    /// Never returns a partial allocation.
    pub fn allocate(&mut self, size: u64) -> Option<NonNull<u8>> {
        assert!(size > 0, "cannot allocate a memory block of size 0");
        match self.free_list.allocate_block(size) {
            Some(offset) => {
                self.live_allocations += 1;
                tracing::trace!(size, offset, "allocated arena block");
                // SAFETY: the free list only returns offsets with
                // offset + size <= total_size, and the arena base of a
                // non-empty boxed slice is never null.
                Some(unsafe { NonNull::new_unchecked(self.memory.as_mut_ptr().add(offset as usize)) })
            }
            None => {
                tracing::error!(
                    size,
                    space_left = self.free_list.space_left(),
                    "could not allocate memory, not enough left"
                );
                None
            }
        }
    }

    /// Return a block to the arena.
    ///
    /// A pointer outside `[base, base + total_size)` is reported and the
    /// allocator state is left untouched.
    pub fn free(&mut self, block: NonNull<u8>, size: u64) -> Result<(), AllocatorError> {
        let offset = match self.offset_of(block) {
            Ok(offset) => offset,
            Err(error) => {
                tracing::error!(%error, size, "rejected free");
                return Err(error);
            }
        };
        self.free_list.free_block(size, offset)?;
        self.live_allocations = self.live_allocations.saturating_sub(1);
        tracing::trace!(size, offset, "freed arena block");
        Ok(())
    }

    /// Translate an arena pointer back to its offset, validating provenance.
    pub fn offset_of(&self, block: NonNull<u8>) -> Result<u64, AllocatorError> {
        let base = self.memory.as_ptr() as usize;
        let end = base + self.total_size as usize;
        let addr = block.as_ptr() as usize;
        if addr < base || addr >= end {
            return Err(AllocatorError::OutOfRange { addr, base, end });
        }
        Ok((addr - base) as u64)
    }

    /// Copy plain-old-data into an allocated block, bounds checked.
    pub fn write<T: bytemuck::Pod>(
        &mut self,
        block: NonNull<u8>,
        value: &T,
    ) -> Result<(), AllocatorError> {
        let offset = self.offset_of(block)?;
        let bytes = bytemuck::bytes_of(value);
        let end = offset as usize + bytes.len();
        if end > self.memory.len() {
            return Err(AllocatorError::WriteOverrun {
                offset,
                len: bytes.len(),
                total_size: self.total_size,
            });
        }
        self.memory[offset as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Read plain-old-data back out of the arena, bounds checked.
    pub fn read<T: bytemuck::Pod>(&self, block: NonNull<u8>) -> Result<T, AllocatorError> {
        let offset = self.offset_of(block)?;
        let len = std::mem::size_of::<T>();
        let end = offset as usize + len;
        if end > self.memory.len() {
            return Err(AllocatorError::WriteOverrun {
                offset,
                len,
                total_size: self.total_size,
            });
        }
        Ok(bytemuck::pod_read_unaligned(
            &self.memory[offset as usize..end],
        ))
    }

    #[inline]
    pub fn space_left(&self) -> u64 {
        self.free_list.space_left()
    }

    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    #[inline]
    pub fn bytes_in_use(&self) -> u64 {
        self.total_size - self.free_list.space_left()
    }

    #[inline]
    pub fn allocation_count(&self) -> u64 {
        self.live_allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_round_trip() {
        let mut allocator = DynamicAllocator::new(1024);
        let block = allocator.allocate(128).unwrap();
        assert_eq!(allocator.offset_of(block).unwrap(), 0);
        assert_eq!(allocator.space_left(), 896);
        assert_eq!(allocator.bytes_in_use(), 128);
        assert_eq!(allocator.allocation_count(), 1);

        allocator.free(block, 128).unwrap();
        assert_eq!(allocator.space_left(), 1024);
        assert_eq!(allocator.allocation_count(), 0);
    }

    #[test]
    fn exhaustion_returns_none_not_partial() {
        let mut allocator = DynamicAllocator::new(256);
        let _block = allocator.allocate(200).unwrap();
        assert!(allocator.allocate(100).is_none());
        // The failed request must not have nibbled at the remaining space.
        assert_eq!(allocator.space_left(), 56);
    }

    #[test]
    fn out_of_range_free_is_rejected_without_mutation() {
        let mut allocator = DynamicAllocator::new(512);
        let _block = allocator.allocate(64).unwrap();
        let space = allocator.space_left();

        let outside = NonNull::new(0x10usize as *mut u8).unwrap();
        let err = allocator.free(outside, 64).unwrap_err();
        assert!(matches!(err, AllocatorError::OutOfRange { .. }));
        assert_eq!(allocator.space_left(), space);
        assert_eq!(allocator.allocation_count(), 1);
    }

    #[test]
    fn one_past_the_end_is_outside() {
        let mut allocator = DynamicAllocator::new(64);
        let block = allocator.allocate(64).unwrap();
        // SAFETY: one-past-the-end of the arena allocation is a valid
        // pointer value to form, never dereferenced.
        let past = unsafe { NonNull::new_unchecked(block.as_ptr().add(64)) };
        assert!(matches!(
            allocator.offset_of(past),
            Err(AllocatorError::OutOfRange { .. })
        ));
    }

    #[test]
    fn pointers_map_back_to_free_list_offsets() {
        let mut allocator = DynamicAllocator::new(1024);
        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(200).unwrap();
        assert_eq!(allocator.offset_of(a).unwrap(), 0);
        assert_eq!(allocator.offset_of(b).unwrap(), 100);

        // Free the first hole, then first-fit must reuse it.
        allocator.free(a, 100).unwrap();
        let c = allocator.allocate(50).unwrap();
        assert_eq!(allocator.offset_of(c).unwrap(), 0);
    }

    #[test]
    fn write_and_read_round_trip() {
        let mut allocator = DynamicAllocator::new(256);
        let block = allocator.allocate(16).unwrap();
        allocator.write(block, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let back: [f32; 4] = allocator.read(block).unwrap();
        assert_eq!(back, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn write_past_arena_end_is_rejected() {
        let mut allocator = DynamicAllocator::new(64);
        let block = allocator.allocate(64).unwrap();
        // SAFETY: stays within the arena allocation, never dereferenced.
        let near_end = unsafe { NonNull::new_unchecked(block.as_ptr().add(60)) };
        let err = allocator.write(near_end, &[0u64; 2]).unwrap_err();
        assert!(matches!(err, AllocatorError::WriteOverrun { .. }));
    }

    #[test]
    #[should_panic(expected = "size 0")]
    fn zero_size_allocation_panics() {
        let mut allocator = DynamicAllocator::new(64);
        allocator.allocate(0);
    }
}
