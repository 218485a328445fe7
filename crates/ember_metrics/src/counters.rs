//! Event counters for the GPU resource lifecycle

/// Tallies of allocator and descriptor events over a run.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllocCounters {
    arena_allocations: u64,
    instances_created: u64,
    instances_destroyed: u64,
    rebinds: u64,
    cached_binds: u64,
    deferred_releases: u64,
    retired_releases: u64,
}

impl AllocCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_arena_allocation(&mut self) {
        self.arena_allocations += 1;
    }

    pub fn record_instance_created(&mut self) {
        self.instances_created += 1;
    }

    pub fn record_instance_destroyed(&mut self) {
        self.instances_destroyed += 1;
    }

    pub fn record_rebind(&mut self) {
        self.rebinds += 1;
    }

    pub fn record_cached_bind(&mut self) {
        self.cached_binds += 1;
    }

    pub fn record_deferred(&mut self) {
        self.deferred_releases += 1;
    }

    pub fn record_retired(&mut self) {
        self.retired_releases += 1;
    }

    pub fn arena_allocations(&self) -> u64 {
        self.arena_allocations
    }

    pub fn instances_created(&self) -> u64 {
        self.instances_created
    }

    pub fn instances_destroyed(&self) -> u64 {
        self.instances_destroyed
    }

    pub fn rebinds(&self) -> u64 {
        self.rebinds
    }

    pub fn cached_binds(&self) -> u64 {
        self.cached_binds
    }

    pub fn deferred_releases(&self) -> u64 {
        self.deferred_releases
    }

    /// Deferred releases that have completed their safety window.
    pub fn retired_releases(&self) -> u64 {
        self.retired_releases
    }

    /// Releases still waiting on frames in flight.
    pub fn outstanding_releases(&self) -> u64 {
        self.deferred_releases - self.retired_releases
    }
}
