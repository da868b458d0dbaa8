//! Partitioned streams: a fixed number of per-worker enumerators plus the
//! [`IndexState`] tag describing what their order keys still guarantee.
//!
//! The inlined `MoveNext(&mut element, &mut key) -> bool` contract (Design
//! Note 9) is kept instead of a boxed `Iterator<Item = (T, OrderKey)>`: every
//! operator in the chain calls it once per pulled element, so avoiding a
//! per-pull `Option` allocation and a second vtable indirection on the
//! tuple matters on the hot path. The one adaptation from the note's literal
//! `&mut T` out-parameter is using `&mut Option<T>` rather than `&mut T`
//! directly — C#'s `ref T` can alias an already-initialized local no matter
//! what `T` is, but safe Rust has no way to hand back a `&mut T` for an
//! arbitrary, non-`Default` element type without one.

use crate::order_key::{IndexState, OrderKey};

/// One partition's pull-based enumerator.
///
/// `move_next` writes the next element and its key into the out parameters
/// and returns `true`, or returns `false` once the partition is exhausted
/// (in which case the out parameters are left untouched).
pub trait PartitionEnumerator<T>: Send {
    /// Pull the next `(element, key)` pair, if any remain.
    fn move_next(&mut self, element: &mut Option<T>, key: &mut OrderKey) -> bool;
}

/// A boxed [`PartitionEnumerator`], the concrete type threaded through
/// [`PartitionedStream`].
pub type BoxedEnumerator<T> = Box<dyn PartitionEnumerator<T>>;

/// A fixed-width set of per-partition enumerators, tagged with the
/// [`IndexState`] their keys currently satisfy.
pub struct PartitionedStream<T> {
    /// One enumerator per worker partition. Length is the degree of
    /// parallelism for this stream.
    pub partitions: Vec<BoxedEnumerator<T>>,
    /// What the keys across `partitions` currently guarantee.
    pub index_state: IndexState,
}

impl<T> PartitionedStream<T> {
    /// Build a stream from already-constructed per-partition enumerators.
    #[must_use]
    pub fn new(partitions: Vec<BoxedEnumerator<T>>, index_state: IndexState) -> Self {
        Self {
            partitions,
            index_state,
        }
    }

    /// Degree of parallelism, i.e. number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// Adapts a plain `Vec<T>` slice (already split) into a
/// [`PartitionEnumerator`] that yields dense [`OrderKey::Position`] keys
/// starting at `base_index`. The workhorse behind every contiguous-range
/// partitioner (spec §4.1).
pub struct SlicePartitionEnumerator<T> {
    data: std::vec::IntoIter<T>,
    next_index: u64,
}

impl<T> SlicePartitionEnumerator<T> {
    /// Build an enumerator over `data`, whose first element gets order key
    /// `base_index`.
    #[must_use]
    pub fn new(data: Vec<T>, base_index: u64) -> Self {
        Self {
            data: data.into_iter(),
            next_index: base_index,
        }
    }
}

impl<T: Send> PartitionEnumerator<T> for SlicePartitionEnumerator<T> {
    fn move_next(&mut self, element: &mut Option<T>, key: &mut OrderKey) -> bool {
        match self.data.next() {
            Some(v) => {
                *element = Some(v);
                *key = OrderKey::Position(self.next_index);
                self.next_index += 1;
                true
            }
            None => false,
        }
    }
}

/// Adapts an already-keyed `Vec<(OrderKey, T)>` into a
/// [`PartitionEnumerator`], used by [`crate::exchange`] and
/// [`crate::mergesort`] to hand back materialized, re-keyed partitions.
pub struct VecPartitionEnumerator<T> {
    data: std::vec::IntoIter<(OrderKey, T)>,
}

impl<T> VecPartitionEnumerator<T> {
    /// Build an enumerator over already-keyed pairs, in the order given.
    #[must_use]
    pub fn new(data: Vec<(OrderKey, T)>) -> Self {
        Self { data: data.into_iter() }
    }
}

impl<T: Send> PartitionEnumerator<T> for VecPartitionEnumerator<T> {
    fn move_next(&mut self, element: &mut Option<T>, key: &mut OrderKey) -> bool {
        match self.data.next() {
            Some((k, v)) => {
                *element = Some(v);
                *key = k;
                true
            }
            None => false,
        }
    }
}
