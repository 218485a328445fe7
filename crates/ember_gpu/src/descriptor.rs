//! Per-object descriptor binding state across frames in flight
//!
//! Every object that owns GPU-visible resources (a material's samplers, a
//! geometry's uniform slice) gets a slot here. Each slot records, per frame
//! in flight, the tag its descriptor set was last written under. A bound
//! descriptor whose recorded tag no longer matches the object's live tag is
//! stale and must be rewritten before that frame's draw consumes it;
//! a matching tag skips the upload. Staleness is discovered lazily, one
//! frame slot at a time, so replacing an object's data never touches slots
//! that have not come around yet.

use crate::frame::MAX_FRAMES_IN_FLIGHT;

/// Generation/id pair identifying one revision of an object's GPU data.
///
/// The id is stable for the object's lifetime; the generation is bumped
/// whenever the underlying data is replaced, invalidating cached bindings
/// without any immediate GPU-side teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceTag {
    pub id: u32,
    pub generation: u32,
}

impl ResourceTag {
    pub fn new(id: u32) -> Self {
        Self { id, generation: 1 }
    }

    /// Mark the underlying data as replaced.
    pub fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// What one frame slot knows about its descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingState {
    /// No descriptor has ever been written for this frame slot.
    #[default]
    Unbound,
    /// A descriptor was written while the object carried this tag. The
    /// binding is stale as soon as the recorded tag stops matching.
    Bound(ResourceTag),
}

impl BindingState {
    /// Whether a draw through this slot needs the descriptor rewritten
    /// for an object currently carrying `live`.
    pub fn is_stale_for(&self, live: ResourceTag) -> bool {
        match self {
            BindingState::Unbound => true,
            BindingState::Bound(recorded) => *recorded != live,
        }
    }
}

/// Outcome of refreshing one frame slot's binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingUpdate {
    /// First use or stale tag: write the descriptor, then draw.
    Rewrite,
    /// Recorded tag matches: the cached descriptor can be bound as-is.
    Cached,
}

/// Handle to one tracked object slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    live: bool,
    bindings: [BindingState; MAX_FRAMES_IN_FLIGHT],
}

impl Slot {
    fn vacant() -> Self {
        Self {
            live: false,
            bindings: [BindingState::Unbound; MAX_FRAMES_IN_FLIGHT],
        }
    }
}

/// Fixed-capacity pool of object slots with per-frame binding records.
///
/// The capacity is a hard ceiling on simultaneously live objects, not a
/// growable collection; acquisition fails once it is reached.
pub struct DescriptorTracker {
    slots: Vec<Slot>,
    live: usize,
}

impl DescriptorTracker {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "descriptor pool needs at least one slot");
        Self {
            slots: vec![Slot::vacant(); capacity],
            live: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Claim the lowest vacant slot with all bindings reset.
    pub fn acquire(&mut self) -> Option<SlotId> {
        match self.slots.iter().position(|slot| !slot.live) {
            Some(index) => {
                self.slots[index] = Slot {
                    live: true,
                    bindings: [BindingState::Unbound; MAX_FRAMES_IN_FLIGHT],
                };
                self.live += 1;
                Some(SlotId(index as u32))
            }
            None => {
                tracing::warn!(
                    capacity = self.slots.len(),
                    "could not acquire a descriptor slot, pool is full"
                );
                None
            }
        }
    }

    /// Return a slot to the pool.
    ///
    /// Callers must route releases through the frame lifecycle so that no
    /// frame still in flight reads the slot; by the time this runs the slot
    /// must be unreferenced.
    pub fn release(&mut self, slot: SlotId) {
        let entry = &mut self.slots[slot.index()];
        if !entry.live {
            tracing::warn!(slot = slot.index(), "releasing a slot that is not live");
            return;
        }
        *entry = Slot::vacant();
        self.live -= 1;
    }

    /// Refresh the binding record for `frame_index` against the object's
    /// live tag. Records the tag when a rewrite is needed.
    pub fn update_binding(
        &mut self,
        slot: SlotId,
        frame_index: usize,
        live: ResourceTag,
    ) -> BindingUpdate {
        assert!(frame_index < MAX_FRAMES_IN_FLIGHT);
        let entry = &mut self.slots[slot.index()];
        assert!(entry.live, "binding update on a vacant slot");

        let binding = &mut entry.bindings[frame_index];
        if binding.is_stale_for(live) {
            *binding = BindingState::Bound(live);
            BindingUpdate::Rewrite
        } else {
            BindingUpdate::Cached
        }
    }

    /// Recorded state for one frame slot, for diagnostics and tests.
    pub fn binding(&self, slot: SlotId, frame_index: usize) -> BindingState {
        self.slots[slot.index()].bindings[frame_index]
    }
}
