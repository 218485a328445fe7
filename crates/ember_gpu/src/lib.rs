//! Ember GPU Resource Layer
//!
//! Owns the memory side of rendering:
//! - Free-list arena allocation and device-buffer sub-allocation
//! - Per-object descriptor state across frames in flight
//! - The fence-gated acquire/release protocol between them
//!
//! Backends plug in at two seams: they implement [`FenceProvider`] and they
//! consume the raw blocks and [`BufferRange`]s handed out here. Nothing in
//! this crate talks to a graphics API directly.

pub mod descriptor;
pub mod frame;
pub mod lifecycle;
pub mod memory;

pub use descriptor::{BindingState, BindingUpdate, DescriptorTracker, ResourceTag, SlotId};
pub use frame::{FenceProvider, FrameCoordinator, FrameError, MAX_FRAMES_IN_FLIGHT};
pub use lifecycle::{InstanceResources, LifecycleConfig, ResourceLifecycle};
pub use memory::{
    AllocatorError, BufferRange, DynamicAllocator, FreeList, FreeListError, SuballocatedBuffer,
};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
