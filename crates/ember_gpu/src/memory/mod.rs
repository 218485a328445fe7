//! GPU memory management
//!
//! Free-list arena allocation and device-buffer range sub-allocation.

mod buffer;
mod dynamic_allocator;
mod free_list;

pub use buffer::{BufferRange, SuballocatedBuffer};
pub use dynamic_allocator::{AllocatorError, DynamicAllocator};
pub use free_list::{FreeList, FreeListError};
