//! Ordered free-range list over a fixed-size arena
//!
//! Tracks which byte ranges of an arena are unallocated. Ranges live in a
//! singly linked list sorted by offset; adjacent ranges are merged as soon
//! as they appear so fragmentation never accumulates in the bookkeeping.

use thiserror::Error;

/// Sentinel marking a recycled node slot.
const INVALID_ID: u64 = u64::MAX;

/// One node slot per pointer-sized cell of the arena bounds the pool.
const NODE_GRANULARITY: u64 = std::mem::size_of::<*const u8>() as u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FreeListError {
    #[error("block {{offset: {offset}, size: {size}}} ends past the {total_size} byte arena")]
    BlockOutOfBounds {
        offset: u64,
        size: u64,
        total_size: u64,
    },
    #[error("free-node pool exhausted, all {max_entries} entries in use")]
    NodePoolExhausted { max_entries: u64 },
}

/// A free range, or a recycled slot waiting on the recycle chain.
/// Recycled slots carry the `INVALID_ID` sentinel in both fields and reuse
/// `next` as the chain link.
#[derive(Debug, Clone, Copy)]
struct Node {
    offset: u64,
    size: u64,
    next: Option<u32>,
}

impl Node {
    fn invalid() -> Self {
        Self {
            offset: INVALID_ID,
            size: INVALID_ID,
            next: None,
        }
    }

    #[inline]
    fn is_invalid(&self) -> bool {
        self.offset == INVALID_ID && self.size == INVALID_ID
    }
}

/// Free-range bookkeeping for a `total_size`-byte arena.
///
/// Nodes are drawn from a slot array that grows on demand up to
/// `max_entries` and are recycled through an embedded index chain, so the
/// list itself never allocates per node once a slot exists.
pub struct FreeList {
    total_size: u64,
    max_entries: u64,
    nodes: Vec<Node>,
    head: Option<u32>,
    recycled: Option<u32>,
}

impl FreeList {
    /// Create a list with a single range spanning the whole arena.
    pub fn new(total_size: u64) -> Self {
        assert!(total_size > 0, "cannot track an empty arena");
        let max_entries = (total_size / NODE_GRANULARITY).max(1);
        tracing::trace!(total_size, max_entries, "creating free list");
        Self {
            total_size,
            max_entries,
            nodes: vec![Node {
                offset: 0,
                size: total_size,
                next: None,
            }],
            head: Some(0),
            recycled: None,
        }
    }

    /// Reserve `size` bytes, first-fit in offset order.
    ///
    /// An exact-size range is unlinked outright; a larger one shrinks in
    /// place and keeps its list position. Returns the range's starting
    /// offset, or `None` when no range is large enough.
    pub fn allocate_block(&mut self, size: u64) -> Option<u64> {
        assert!(size > 0, "cannot allocate a zero-sized block");

        let mut previous: Option<u32> = None;
        let mut current = self.head;
        while let Some(index) = current {
            let node = self.nodes[index as usize];
            if node.size == size {
                match previous {
                    Some(prev) => self.nodes[prev as usize].next = node.next,
                    None => self.head = node.next,
                }
                self.recycle(index);
                return Some(node.offset);
            } else if node.size > size {
                let slot = &mut self.nodes[index as usize];
                slot.offset += size;
                slot.size -= size;
                return Some(node.offset);
            }
            previous = current;
            current = node.next;
        }

        tracing::warn!(
            requested = size,
            space_left = self.space_left(),
            "no free block with enough memory"
        );
        None
    }

    /// Return `size` bytes starting at `offset` to the list.
    ///
    /// The range is placed in offset order and merged with any neighbor it
    /// touches. A range ending past the arena is rejected without mutating
    /// the list, as is a placement that would exceed the node pool.
    pub fn free_block(&mut self, size: u64, offset: u64) -> Result<(), FreeListError> {
        assert!(size > 0, "cannot free a zero-sized block");
        match offset.checked_add(size) {
            Some(end) if end <= self.total_size => {}
            _ => {
                return Err(FreeListError::BlockOutOfBounds {
                    offset,
                    size,
                    total_size: self.total_size,
                })
            }
        }

        let mut previous: Option<u32> = None;
        let mut current = self.head;
        while let Some(index) = current {
            let node = self.nodes[index as usize];
            if node.offset == offset {
                // The range starts exactly where a tracked one does. Only a
                // double free lands here; the tracked range grows and takes
                // its successor with it when they touch.
                self.nodes[index as usize].size += size;
                self.merge_with_next(index);
                return Ok(());
            } else if node.offset > offset {
                let inserted = self.acquire_node(offset, size, Some(index))?;
                match previous {
                    Some(prev) => self.nodes[prev as usize].next = Some(inserted),
                    None => self.head = Some(inserted),
                }
                self.merge_with_next(inserted);
                if let Some(prev) = previous {
                    self.try_merge(prev, inserted);
                }
                return Ok(());
            }
            previous = current;
            current = node.next;
        }

        // Past every tracked range, or the list is empty: the range becomes
        // the new tail.
        let appended = self.acquire_node(offset, size, None)?;
        match previous {
            Some(prev) => {
                self.nodes[prev as usize].next = Some(appended);
                self.try_merge(prev, appended);
            }
            None => self.head = Some(appended),
        }
        Ok(())
    }

    /// Sum of all free range sizes. O(live ranges).
    pub fn space_left(&self) -> u64 {
        let mut total = 0;
        let mut current = self.head;
        while let Some(index) = current {
            let node = &self.nodes[index as usize];
            total += node.size;
            current = node.next;
        }
        total
    }

    /// Reset to a single range spanning the whole arena.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node {
            offset: 0,
            size: self.total_size,
            next: None,
        });
        self.head = Some(0);
        self.recycled = None;
    }

    #[inline]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Live `(offset, size)` ranges in ascending offset order.
    pub fn free_ranges(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        std::iter::successors(self.head, |&index| self.nodes[index as usize].next).map(|index| {
            let node = &self.nodes[index as usize];
            (node.offset, node.size)
        })
    }

    pub fn free_range_count(&self) -> usize {
        self.free_ranges().count()
    }

    /// Merge `index` with its successor when the two ranges touch.
    fn merge_with_next(&mut self, index: u32) {
        if let Some(next) = self.nodes[index as usize].next {
            self.try_merge(index, next);
        }
    }

    /// Fold `second` into `first` if `first` ends exactly where `second`
    /// begins. `second` must be `first`'s direct successor.
    fn try_merge(&mut self, first: u32, second: u32) {
        let a = self.nodes[first as usize];
        let b = self.nodes[second as usize];
        if a.offset + a.size == b.offset {
            let slot = &mut self.nodes[first as usize];
            slot.size += b.size;
            slot.next = b.next;
            self.recycle(second);
        }
    }

    /// Take a node slot off the recycle chain, or grow the pool while the
    /// entry bound allows it.
    fn acquire_node(
        &mut self,
        offset: u64,
        size: u64,
        next: Option<u32>,
    ) -> Result<u32, FreeListError> {
        if let Some(index) = self.recycled {
            debug_assert!(self.nodes[index as usize].is_invalid());
            self.recycled = self.nodes[index as usize].next;
            self.nodes[index as usize] = Node { offset, size, next };
            return Ok(index);
        }
        if (self.nodes.len() as u64) < self.max_entries {
            let index = self.nodes.len() as u32;
            self.nodes.push(Node { offset, size, next });
            return Ok(index);
        }
        Err(FreeListError::NodePoolExhausted {
            max_entries: self.max_entries,
        })
    }

    fn recycle(&mut self, index: u32) {
        let mut node = Node::invalid();
        node.next = self.recycled;
        self.nodes[index as usize] = node;
        self.recycled = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(list: &FreeList) -> Vec<(u64, u64)> {
        list.free_ranges().collect()
    }

    /// No two neighbors may touch; they would have been merged.
    fn assert_coalesced(list: &FreeList) {
        let ranges = ranges(list);
        for pair in ranges.windows(2) {
            assert!(
                pair[0].0 + pair[0].1 < pair[1].0,
                "adjacent ranges left unmerged: {:?}",
                ranges
            );
        }
    }

    #[test]
    fn starts_as_single_full_range() {
        let list = FreeList::new(1024);
        assert_eq!(list.space_left(), 1024);
        assert_eq!(ranges(&list), vec![(0, 1024)]);
    }

    #[test]
    fn test_first_fit_reuses_lowest_offset() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.allocate_block(100), Some(0));
        assert_eq!(list.allocate_block(200), Some(100));
        list.free_block(100, 0).unwrap();

        // [0, 100) free, [100, 300) allocated, [300, 1024) free; the two
        // free ranges are not adjacent and must not have merged.
        assert_eq!(list.space_left(), 824);
        assert_eq!(ranges(&list), vec![(0, 100), (300, 724)]);

        // First fit: the hole at 0 wins over the tail.
        assert_eq!(list.allocate_block(50), Some(0));
        assert_coalesced(&list);
    }

    #[test]
    fn exact_fit_unlinks_the_node() {
        let mut list = FreeList::new(256);
        assert_eq!(list.allocate_block(56), Some(0));
        list.free_block(16, 8).unwrap(); // hole [8, 24)
        assert_eq!(list.free_range_count(), 2);

        // Exactly fills the hole: the node disappears.
        assert_eq!(list.allocate_block(16), Some(8));
        assert_eq!(ranges(&list), vec![(56, 200)]);
    }

    #[test]
    fn forward_merge_absorbs_successor() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.allocate_block(100), Some(0));
        let before = list.space_left();

        // [0, 100) ends exactly where the tail begins.
        list.free_block(100, 0).unwrap();
        assert_eq!(list.space_left(), before + 100);
        assert_eq!(ranges(&list), vec![(0, 1024)]);
    }

    #[test]
    fn backward_merge_extends_predecessor() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.allocate_block(100), Some(0));
        assert_eq!(list.allocate_block(100), Some(100));
        list.free_block(100, 0).unwrap();
        assert_eq!(list.free_range_count(), 2);

        // [100, 200) bridges the hole at 0 and the tail at 200.
        list.free_block(100, 100).unwrap();
        assert_eq!(ranges(&list), vec![(0, 1024)]);
    }

    #[test]
    fn merge_drops_node_count_by_one() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.allocate_block(100), Some(0));
        assert_eq!(list.allocate_block(100), Some(100));
        assert_eq!(list.allocate_block(100), Some(200));
        list.free_block(100, 0).unwrap();
        let count = list.free_range_count();
        let space = list.space_left();

        // End of [100, 200) touches nothing; start touches the hole at 0.
        list.free_block(100, 100).unwrap();
        assert_eq!(list.free_range_count(), count);
        // End of [200, 300) touches the tail, start touches the merged hole:
        // three ranges collapse into one.
        list.free_block(100, 200).unwrap();
        assert_eq!(list.free_range_count(), count - 1);
        assert_eq!(list.space_left(), space + 200);
        assert_eq!(ranges(&list), vec![(0, 1024)]);
    }

    #[test]
    fn test_round_trip_restores_full_range() {
        let mut list = FreeList::new(512);
        let offset = list.allocate_block(64).unwrap();
        list.free_block(64, offset).unwrap();
        assert_eq!(list.space_left(), 512);
        assert_eq!(ranges(&list), vec![(0, 512)]);
    }

    #[test]
    fn draining_the_arena_and_freeing_restores_it() {
        let mut list = FreeList::new(4096);
        assert_eq!(list.allocate_block(4096), Some(0));
        assert_eq!(list.space_left(), 0);
        assert_eq!(list.free_range_count(), 0);

        list.free_block(4096, 0).unwrap();
        assert_eq!(ranges(&list), vec![(0, 4096)]);
    }

    #[test]
    fn boundary_full_allocation_succeeds_once() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.allocate_block(1024), Some(0));
        assert_eq!(list.allocate_block(1), None);
        assert_eq!(list.space_left(), 0);
    }

    #[test]
    fn test_full_cycle_is_idempotent() {
        let sizes = [64u64, 8, 128, 32, 256, 16];
        let orders: [&[usize]; 3] = [
            &[0, 1, 2, 3, 4, 5], // in order
            &[5, 4, 3, 2, 1, 0], // reverse
            &[2, 5, 0, 3, 1, 4], // interleaved
        ];
        for order in orders {
            let mut list = FreeList::new(1024);
            let mut blocks = Vec::new();
            for &size in &sizes {
                let offset = list.allocate_block(size).unwrap();
                blocks.push((size, offset));
            }
            for &i in order {
                let (size, offset) = blocks[i];
                list.free_block(size, offset).unwrap();
                assert_coalesced(&list);
            }
            assert_eq!(list.space_left(), 1024);
            assert_eq!(ranges(&list), vec![(0, 1024)]);
        }
    }

    #[test]
    fn conservation_holds_across_churn() {
        let mut list = FreeList::new(2048);
        let mut outstanding: Vec<(u64, u64)> = Vec::new();
        let script: [(bool, u64); 9] = [
            (true, 100),
            (true, 300),
            (true, 50),
            (false, 1),
            (true, 200),
            (false, 0),
            (true, 700),
            (false, 2),
            (true, 64),
        ];
        for (is_alloc, arg) in script {
            if is_alloc {
                let offset = list.allocate_block(arg).unwrap();
                outstanding.push((arg, offset));
            } else {
                let (size, offset) = outstanding.remove(arg as usize);
                list.free_block(size, offset).unwrap();
            }
            let in_use: u64 = outstanding.iter().map(|(size, _)| size).sum();
            assert_eq!(list.space_left() + in_use, 2048);
            assert_coalesced(&list);
        }
    }

    #[test]
    fn refreeing_a_tracked_start_extends_the_range() {
        // Reachable only through a double free; the tracked range grows
        // rather than the list corrupting.
        let mut list = FreeList::new(64);
        assert_eq!(list.allocate_block(16), Some(0));
        list.free_block(16, 0).unwrap();
        assert_eq!(ranges(&list), vec![(0, 64)]);

        list.free_block(8, 0).unwrap();
        assert_eq!(list.space_left(), 72);
        assert_eq!(list.free_range_count(), 1);
    }

    #[test]
    fn free_past_capacity_is_rejected_without_mutation() {
        let mut list = FreeList::new(256);
        assert_eq!(list.allocate_block(64), Some(0));
        let before = ranges(&list);

        let err = list.free_block(64, 512).unwrap_err();
        assert_eq!(
            err,
            FreeListError::BlockOutOfBounds {
                offset: 512,
                size: 64,
                total_size: 256
            }
        );
        // Overflowing offset + size must not wrap around into range.
        let err = list.free_block(2, u64::MAX - 1).unwrap_err();
        assert!(matches!(err, FreeListError::BlockOutOfBounds { .. }));
        assert_eq!(ranges(&list), before);
    }

    #[test]
    fn node_pool_exhaustion_is_reported() {
        // 32 bytes / 8 per entry = 4 node slots.
        let mut list = FreeList::new(32);
        assert_eq!(list.allocate_block(32), Some(0));
        for offset in [0u64, 8, 16, 24] {
            list.free_block(4, offset).unwrap();
        }
        assert_eq!(list.free_range_count(), 4);

        // A fifth disjoint range has no slot left.
        let err = list.free_block(2, 29).unwrap_err();
        assert_eq!(err, FreeListError::NodePoolExhausted { max_entries: 4 });
        assert_eq!(list.free_range_count(), 4);
        assert_eq!(list.space_left(), 16);
    }

    #[test]
    fn clear_resets_to_full_capacity() {
        let mut list = FreeList::new(1024);
        list.allocate_block(100).unwrap();
        list.allocate_block(200).unwrap();
        list.free_block(100, 0).unwrap();

        list.clear();
        assert_eq!(list.space_left(), 1024);
        assert_eq!(ranges(&list), vec![(0, 1024)]);
        assert_eq!(list.allocate_block(1024), Some(0));
    }

    #[test]
    fn recycled_nodes_are_reused() {
        let mut list = FreeList::new(1024);
        // Burn through splits and merges repeatedly; the pool must keep
        // serving nodes well past max_entries total placements.
        for _ in 0..64 {
            let a = list.allocate_block(100).unwrap();
            let b = list.allocate_block(100).unwrap();
            list.free_block(100, a).unwrap();
            list.free_block(100, b).unwrap();
        }
        assert_eq!(list.space_left(), 1024);
        assert_eq!(ranges(&list), vec![(0, 1024)]);
    }

    #[test]
    #[should_panic(expected = "zero-sized")]
    fn zero_size_allocation_panics() {
        let mut list = FreeList::new(64);
        list.allocate_block(0);
    }

    #[test]
    #[should_panic(expected = "zero-sized")]
    fn zero_size_free_panics() {
        let mut list = FreeList::new(64);
        let _ = list.free_block(0, 8);
    }
}
