//! Acquire/release protocol tying objects to GPU memory
//!
//! Composition root of the crate: one arena allocator for staging data, one
//! sub-allocated uniform buffer, the descriptor tracker, and the frame
//! coordinator. Creation hands out resources immediately; destruction is
//! always deferred until every frame in flight at release time has passed
//! its fence, so nothing the GPU may still read is ever recycled early.

use crate::descriptor::{BindingUpdate, DescriptorTracker, ResourceTag, SlotId};
use crate::frame::{FenceProvider, FrameCoordinator, FrameError, MAX_FRAMES_IN_FLIGHT};
use crate::memory::{
    AllocatorError, BufferRange, DynamicAllocator, SuballocatedBuffer,
};
use ember_metrics::AllocCounters;
use std::ptr::NonNull;
use std::time::Duration;

/// Sizing for one [`ResourceLifecycle`].
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Staging arena backing CPU-side uploads, in bytes.
    pub arena_size: u64,
    /// Device uniform buffer sub-allocated per instance, in bytes.
    pub uniform_buffer_size: u64,
    /// Hard ceiling on simultaneously live instances.
    pub instance_capacity: usize,
    /// Swapchain depth, 2 or 3.
    pub frames_in_flight: usize,
    /// Budget for each in-flight fence wait; expiry means device lost.
    pub fence_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            arena_size: 16 * 1024 * 1024,
            uniform_buffer_size: 1024 * 1024,
            instance_capacity: 1024,
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            fence_timeout: Duration::from_secs(2),
        }
    }
}

/// Everything one renderable object owns on the GPU side.
#[derive(Debug, Clone, Copy)]
pub struct InstanceResources {
    pub slot: SlotId,
    /// Uniform slice, absent when the object declared a zero stride.
    pub uniform_range: Option<BufferRange>,
}

enum DeferredRelease {
    ArenaBlock { block: NonNull<u8>, size: u64 },
    UniformRange(BufferRange),
    DescriptorSlot(SlotId),
}

pub struct ResourceLifecycle {
    allocator: DynamicAllocator,
    uniforms: SuballocatedBuffer,
    descriptors: DescriptorTracker,
    frames: FrameCoordinator<DeferredRelease>,
    counters: AllocCounters,
}

impl ResourceLifecycle {
    pub fn new(config: LifecycleConfig) -> Self {
        tracing::info!(
            arena_size = config.arena_size,
            uniform_buffer_size = config.uniform_buffer_size,
            instance_capacity = config.instance_capacity,
            frames_in_flight = config.frames_in_flight,
            "creating resource lifecycle"
        );
        Self {
            allocator: DynamicAllocator::new(config.arena_size),
            uniforms: SuballocatedBuffer::new(config.uniform_buffer_size),
            descriptors: DescriptorTracker::new(config.instance_capacity),
            frames: FrameCoordinator::new(config.frames_in_flight, config.fence_timeout),
            counters: AllocCounters::new(),
        }
    }

    /// Wait out this slot's fence and reclaim everything whose safety
    /// window has elapsed. Returns the frame slot to record against.
    pub fn begin_frame(
        &mut self,
        fences: &mut impl FenceProvider,
    ) -> Result<usize, FrameError> {
        for release in self.frames.begin_frame(fences)? {
            self.execute_release(release);
        }
        Ok(self.frames.current_slot())
    }

    pub fn end_frame(&mut self) {
        self.frames.end_frame();
    }

    /// Acquire a descriptor slot plus a `uniform_size`-byte uniform range.
    ///
    /// Fails on slot-pool or uniform-buffer exhaustion; a partially
    /// acquired slot is rolled back so failure never leaks.
    pub fn create_instance(&mut self, uniform_size: u64) -> Option<InstanceResources> {
        let slot = self.descriptors.acquire()?;
        let uniform_range = if uniform_size > 0 {
            match self.uniforms.allocate(uniform_size) {
                Some(range) => Some(range),
                None => {
                    tracing::warn!(
                        uniform_size,
                        space_left = self.uniforms.space_left(),
                        "no uniform range for new instance"
                    );
                    self.descriptors.release(slot);
                    return None;
                }
            }
        } else {
            tracing::debug!("uniform stride is zero, not reserving a range");
            None
        };
        self.counters.record_instance_created();
        tracing::trace!(slot = slot.index(), ?uniform_range, "instance resources acquired");
        Some(InstanceResources { slot, uniform_range })
    }

    /// Queue an instance's slot and uniform range for reclamation once no
    /// frame in flight can reference them.
    pub fn destroy_instance(&mut self, instance: InstanceResources) {
        if let Some(range) = instance.uniform_range {
            self.defer(DeferredRelease::UniformRange(range));
        }
        self.defer(DeferredRelease::DescriptorSlot(instance.slot));
        self.counters.record_instance_destroyed();
    }

    /// Refresh the instance's descriptor record for the current frame slot.
    pub fn prepare_instance(&mut self, slot: SlotId, tag: ResourceTag) -> BindingUpdate {
        let update = self
            .descriptors
            .update_binding(slot, self.frames.current_slot(), tag);
        match update {
            BindingUpdate::Rewrite => self.counters.record_rebind(),
            BindingUpdate::Cached => self.counters.record_cached_bind(),
        }
        update
    }

    /// Allocate staging memory from the arena, effective immediately.
    pub fn allocate(&mut self, size: u64) -> Option<NonNull<u8>> {
        let block = self.allocator.allocate(size)?;
        self.counters.record_arena_allocation();
        Some(block)
    }

    /// Queue an arena block for reclamation. Provenance is validated now,
    /// before the pointer goes anywhere near the retire queue.
    pub fn release(&mut self, block: NonNull<u8>, size: u64) -> Result<(), AllocatorError> {
        self.allocator.offset_of(block)?;
        self.defer(DeferredRelease::ArenaBlock { block, size });
        Ok(())
    }

    /// Stage plain-old-data into an allocated arena block.
    pub fn write<T: bytemuck::Pod>(
        &mut self,
        block: NonNull<u8>,
        value: &T,
    ) -> Result<(), AllocatorError> {
        self.allocator.write(block, value)
    }

    #[inline]
    pub fn arena_space_left(&self) -> u64 {
        self.allocator.space_left()
    }

    #[inline]
    pub fn uniform_space_left(&self) -> u64 {
        self.uniforms.space_left()
    }

    #[inline]
    pub fn live_instances(&self) -> usize {
        self.descriptors.live_count()
    }

    #[inline]
    pub fn pending_retires(&self) -> usize {
        self.frames.pending_retires()
    }

    #[inline]
    pub fn counters(&self) -> &AllocCounters {
        &self.counters
    }

    fn defer(&mut self, release: DeferredRelease) {
        self.frames.defer(release);
        self.counters.record_deferred();
    }

    fn execute_release(&mut self, release: DeferredRelease) {
        match release {
            DeferredRelease::ArenaBlock { block, size } => {
                if let Err(error) = self.allocator.free(block, size) {
                    tracing::error!(%error, size, "deferred arena free failed");
                }
            }
            DeferredRelease::UniformRange(range) => {
                if let Err(error) = self.uniforms.free(range) {
                    tracing::error!(%error, ?range, "deferred uniform free failed");
                }
            }
            DeferredRelease::DescriptorSlot(slot) => self.descriptors.release(slot),
        }
        self.counters.record_retired();
    }
}
