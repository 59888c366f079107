//! 1D free-space management for the geometry buffer.

use std::collections::{BTreeMap, BTreeSet};

/// Allocator of contiguous intervals inside `[0, size)`.
///
/// Free space is tracked twice: by start offset, so a freed interval can
/// find its neighbors for coalescing, and by length, so an allocation can
/// find a fitting interval without scanning. Free intervals are pairwise
/// disjoint and never adjacent; any two touching intervals are merged the
/// moment they meet.
///
/// The allocator never grows on its own. When it is exhausted,
/// [`allocate_interval`](IntervalAllocator::allocate_interval) returns
/// `None` and the caller decides whether to [`resize`](IntervalAllocator::resize).
pub struct IntervalAllocator {
    /// Total capacity in blocks.
    size: u32,
    /// Free intervals keyed by start offset.
    by_start: BTreeMap<u32, u32>,
    /// Start offsets of free intervals, grouped by interval length.
    by_length: BTreeMap<u32, BTreeSet<u32>>,
}

impl IntervalAllocator {
    /// Create an allocator whose entire `[0, size)` range is free.
    pub fn new(size: u32) -> Self {
        let mut allocator = Self {
            size,
            by_start: BTreeMap::new(),
            by_length: BTreeMap::new(),
        };
        if size > 0 {
            allocator.insert_free(0, size);
        }
        allocator
    }

    /// Current total capacity in blocks.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Sum of all free interval lengths.
    pub fn free_total(&self) -> u32 {
        self.by_start.values().sum()
    }

    /// Reserve `count` contiguous blocks and return their start offset.
    ///
    /// The smallest fitting interval is used, ties broken by the lowest
    /// start offset, so allocation order is deterministic. Returns `None`
    /// without mutating any state when no free interval is large enough.
    ///
    /// Panics if `count` is zero.
    pub fn allocate_interval(&mut self, count: u32) -> Option<u32> {
        assert!(count > 0, "empty interval allocation");

        let (&length, starts) = self.by_length.range(count..).next()?;
        let &start = starts.first().expect("length index entries are never empty");

        self.remove_free(start, length);
        if length > count {
            self.insert_free(start + count, length - count);
        }
        Some(start)
    }

    /// Return `[offset, offset + count)` to the free pool.
    ///
    /// The range is merged with the free intervals immediately before and
    /// after it, if any. The caller must pass exactly a range previously
    /// handed out by [`allocate_interval`](IntervalAllocator::allocate_interval);
    /// the allocator does not track ownership.
    pub fn free_interval(&mut self, offset: u32, count: u32) {
        assert!(count > 0, "empty interval free");
        assert!(
            offset + count <= self.size,
            "freed interval [{offset}, {}) exceeds capacity {}",
            offset + count,
            self.size
        );

        let mut start = offset;
        let mut length = count;

        // Neighbor ending exactly at `offset`.
        if let Some((&left_start, &left_length)) = self.by_start.range(..offset).next_back() {
            debug_assert!(left_start + left_length <= offset, "double free");
            if left_start + left_length == offset {
                self.remove_free(left_start, left_length);
                start = left_start;
                length += left_length;
            }
        }

        // Neighbor beginning exactly at `offset + count`.
        if let Some(&right_length) = self.by_start.get(&(offset + count)) {
            self.remove_free(offset + count, right_length);
            length += right_length;
        }

        self.insert_free(start, length);
    }

    /// Extend the capacity to `new_size`, freeing `[old_size, new_size)`.
    ///
    /// A free interval ending at the old capacity is merged with the new
    /// tail. `new_size` must not be smaller than the current capacity;
    /// growing by zero is a no-op.
    pub fn resize(&mut self, new_size: u32) {
        assert!(
            new_size >= self.size,
            "interval allocator cannot shrink ({} -> {new_size})",
            self.size
        );
        if new_size == self.size {
            return;
        }

        let old_size = self.size;
        self.size = new_size;
        self.free_interval(old_size, new_size - old_size);
    }

    /// Discard all state and become a single free interval `[0, new_size)`.
    pub fn reset(&mut self, new_size: u32) {
        self.by_start.clear();
        self.by_length.clear();
        self.size = new_size;
        if new_size > 0 {
            self.insert_free(0, new_size);
        }
    }

    fn insert_free(&mut self, start: u32, length: u32) {
        let previous = self.by_start.insert(start, length);
        debug_assert!(previous.is_none(), "overlapping free intervals");
        self.by_length.entry(length).or_default().insert(start);
    }

    fn remove_free(&mut self, start: u32, length: u32) {
        self.by_start.remove(&start);
        let starts = self
            .by_length
            .get_mut(&length)
            .expect("length index out of sync");
        starts.remove(&start);
        if starts.is_empty() {
            self.by_length.remove(&length);
        }
    }
}

impl std::fmt::Debug for IntervalAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalAllocator")
            .field("size", &self.size)
            .field("free_total", &self.free_total())
            .field("free_intervals", &self.by_start.len())
            .finish()
    }
}
