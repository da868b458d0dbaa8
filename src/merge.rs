//! Merge strategies (spec §4.6): turn a [`PartitionedStream`] back into one
//! sequence, the last step before a result leaves the engine.
//!
//! Five shapes, picked by [`merge`] from [`QuerySettings`] and whether the
//! caller needs order preserved:
//! - default pipelined: unordered, round-robin across per-partition
//!   channels, streamed as partitions produce.
//! - stop-and-go: unordered, every partition fully drained before anything
//!   is returned (`MergeOptions::FullyBuffered`).
//! - order-preserving fully-buffered: drives [`crate::mergesort`] to
//!   completion, then concatenates partitions left to right.
//! - order-preserving pipelined: a k-way merge over per-partition channels,
//!   backed by a small heap, so the smallest available key is always
//!   emitted next without waiting for every partition to finish.
//! - for-effect: no merge at all — every partition applies the sink action
//!   to its own elements, in parallel, with no ordering or collection.
//!
//! None of this has a teacher analog (Beam-batch's `run_collect` just calls
//! `.collect()` on a `rayon` parallel iterator); the pipelined shapes are
//! grounded on `examples/other_examples/6447f1b2_umbgtt10-fluxion__fluxion
//! -stream-src-ordered_merge.rs`'s producer/consumer k-way merge.

use crate::channel::{bounded_chunk_channel, ChunkReceiver};
use crate::error::{AggregatedError, EngineError};
use crate::order_key::{KeyComparer, OrderKey, ReverseComparer};
use crate::partition::PartitionedStream;
use crate::primitives::{AtomicCell, BoundedMaxHeap, HeapEntry};
use crate::query::Elem;
use crate::settings::{MergeOptions, QuerySettings, TaskScheduler};
use std::collections::VecDeque;
use std::sync::Arc;

/// Above this many partitions, drop to the lower backpressure capacity so
/// total buffered memory doesn't grow with the degree of parallelism.
const HIGH_DOP_THRESHOLD: usize = 8;
const LOW_BACKPRESSURE_CAPACITY: usize = 1024;
const HIGH_BACKPRESSURE_CAPACITY: usize = 8192;

fn backpressure_capacity(partition_count: usize) -> usize {
    if partition_count <= HIGH_DOP_THRESHOLD {
        HIGH_BACKPRESSURE_CAPACITY
    } else {
        LOW_BACKPRESSURE_CAPACITY
    }
}

/// How many elements a producer accumulates before handing a chunk to its
/// channel (spec §4.6 item 4): `NotBuffered` hands off one at a time for the
/// lowest latency, everything else batches to amortize the channel's
/// lock/condvar overhead across more elements per wakeup.
const AUTO_BUFFERED_BATCH_SIZE: usize = 16;

fn batch_size_for(options: MergeOptions) -> usize {
    match options {
        MergeOptions::NotBuffered => 1,
        MergeOptions::AutoBuffered | MergeOptions::FullyBuffered => AUTO_BUFFERED_BATCH_SIZE,
    }
}

/// Pick and run the appropriate merge strategy for `stream`, given the
/// resolved settings and an optional ordering comparator (`Some` whenever
/// the upstream operator tree still cares about order).
#[must_use]
pub fn merge<T: Elem>(
    stream: PartitionedStream<T>,
    settings: &QuerySettings,
    cmp: Option<Arc<dyn KeyComparer>>,
    scheduler: Arc<dyn TaskScheduler>,
) -> Box<dyn Iterator<Item = T> + Send> {
    let merge_options = settings.resolved_merge_options();
    match (cmp, merge_options) {
        (Some(cmp), MergeOptions::FullyBuffered) => order_preserving_fully_buffered_merge(stream, cmp, scheduler.as_ref()),
        (Some(cmp), _) => order_preserving_pipelined_merge(stream, cmp, scheduler, merge_options),
        (None, MergeOptions::FullyBuffered) => stop_and_go_merge(stream, scheduler.as_ref()),
        (None, _) => default_pipelined_merge(stream, scheduler, merge_options),
    }
}

/// Unordered, round-robin, pipelined: each partition streams into its own
/// bounded channel from a background driver thread, batching
/// [`batch_size_for`] elements per hand-off; the returned iterator
/// round-robins the still-open receivers, buffering whatever a chunk didn't
/// immediately hand back so no element beyond the first in a chunk is ever
/// dropped.
#[must_use]
pub fn default_pipelined_merge<T: Elem>(
    stream: PartitionedStream<T>,
    scheduler: Arc<dyn TaskScheduler>,
    merge_options: MergeOptions,
) -> Box<dyn Iterator<Item = T> + Send> {
    let batch_size = batch_size_for(merge_options);
    let capacity = backpressure_capacity(stream.partition_count());
    let mut receivers = VecDeque::with_capacity(stream.partition_count());
    let mut producer_tasks: Vec<Box<dyn FnOnce() + Send>> = Vec::with_capacity(stream.partition_count());

    for mut enumerator in stream.partitions {
        let (tx, rx) = bounded_chunk_channel::<T>(capacity);
        receivers.push_back((rx, Vec::<T>::new().into_iter()));
        producer_tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut batch = Vec::with_capacity(batch_size);
            loop {
                if !enumerator.move_next(&mut elem, &mut key) {
                    if !batch.is_empty() {
                        let _ = tx.send_chunk(std::mem::take(&mut batch));
                    }
                    break;
                }
                batch.push(elem.take().unwrap());
                if batch.len() >= batch_size && !tx.send_chunk(std::mem::take(&mut batch)) {
                    break;
                }
            }
        }));
    }

    std::thread::spawn(move || {
        scheduler.run_all(producer_tasks);
    });

    Box::new(RoundRobinIter { receivers })
}

struct RoundRobinIter<T> {
    receivers: VecDeque<(ChunkReceiver<T>, std::vec::IntoIter<T>)>,
}

impl<T> Iterator for RoundRobinIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while let Some((rx, mut pending)) = self.receivers.pop_front() {
            if let Some(v) = pending.next() {
                self.receivers.push_back((rx, pending));
                return Some(v);
            }
            match rx.recv_chunk() {
                Some(chunk) => {
                    let mut iter = chunk.into_iter();
                    let next = iter.next();
                    self.receivers.push_back((rx, iter));
                    if next.is_some() {
                        return next;
                    }
                }
                None => {
                    // Partition exhausted; drop it and keep rotating.
                }
            }
        }
        None
    }
}

/// Unordered, fully buffered: drain every partition to completion (in
/// parallel) before returning anything.
#[must_use]
pub fn stop_and_go_merge<T: Elem>(stream: PartitionedStream<T>, scheduler: &dyn TaskScheduler) -> Box<dyn Iterator<Item = T> + Send> {
    let results: Arc<Vec<AtomicCell<Vec<T>>>> = Arc::new((0..stream.partition_count()).map(|_| AtomicCell::new()).collect());

    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let results = Arc::clone(&results);
        tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut out = Vec::new();
            while enumerator.move_next(&mut elem, &mut key) {
                out.push(elem.take().unwrap());
            }
            results[i].put(out);
        }));
    }
    scheduler.run_all(tasks);

    let all: Vec<T> = (0..results.len()).flat_map(|i| results[i].take().unwrap_or_default()).collect();
    Box::new(all.into_iter())
}

/// Ordered, fully buffered: sort the whole stream with
/// [`crate::mergesort::cooperative_parallel_mergesort`], then concatenate
/// partitions left to right (already the globally sorted order).
#[must_use]
pub fn order_preserving_fully_buffered_merge<T: Elem>(
    stream: PartitionedStream<T>,
    cmp: Arc<dyn KeyComparer>,
    scheduler: &dyn TaskScheduler,
) -> Box<dyn Iterator<Item = T> + Send> {
    let sorted = crate::mergesort::cooperative_parallel_mergesort(stream, cmp, scheduler);
    stop_and_go_merge(sorted, scheduler)
}

/// Ordered, pipelined: a k-way merge over one bounded channel per partition.
/// The consumer keeps a heap holding the next candidate from each still-open
/// partition and always emits the smallest; refilling after a pop only
/// blocks on that one partition's channel, so the merge proceeds as soon as
/// the globally-next element is available rather than waiting for every
/// partition to finish.
#[must_use]
pub fn order_preserving_pipelined_merge<T: Elem>(
    stream: PartitionedStream<T>,
    cmp: Arc<dyn KeyComparer>,
    scheduler: Arc<dyn TaskScheduler>,
    merge_options: MergeOptions,
) -> Box<dyn Iterator<Item = T> + Send> {
    let batch_size = batch_size_for(merge_options);
    let capacity = backpressure_capacity(stream.partition_count());
    let partition_count = stream.partition_count();
    let mut receivers = Vec::with_capacity(partition_count);
    let mut producer_tasks: Vec<Box<dyn FnOnce() + Send>> = Vec::with_capacity(partition_count);

    for mut enumerator in stream.partitions {
        let (tx, rx) = bounded_chunk_channel::<(OrderKey, T)>(capacity);
        receivers.push(Some(rx));
        producer_tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut batch = Vec::with_capacity(batch_size);
            loop {
                if !enumerator.move_next(&mut elem, &mut key) {
                    if !batch.is_empty() {
                        let _ = tx.send_chunk(std::mem::take(&mut batch));
                    }
                    break;
                }
                let value = elem.take().unwrap();
                batch.push((key.clone(), value));
                if batch.len() >= batch_size && !tx.send_chunk(std::mem::take(&mut batch)) {
                    break;
                }
            }
        }));
    }

    std::thread::spawn(move || {
        scheduler.run_all(producer_tasks);
    });

    let heap = BoundedMaxHeap::new(partition_count.max(1), Arc::new(ReverseComparer(TransparentComparer(cmp))));
    let mut merger = PipelinedOrderedMerge {
        receivers,
        pending: (0..partition_count).map(|_| VecDeque::new()).collect(),
        heap,
        primed: false,
    };
    merger.prime();
    Box::new(merger)
}

/// Forwards to a boxed [`KeyComparer`]; exists only so it can sit behind
/// [`ReverseComparer`] without `ReverseComparer` needing to hold a trait
/// object directly.
struct TransparentComparer(Arc<dyn KeyComparer>);

impl KeyComparer for TransparentComparer {
    fn compare(&self, a: &OrderKey, b: &OrderKey) -> std::cmp::Ordering {
        self.0.compare(a, b)
    }
}

struct PipelinedOrderedMerge<T> {
    receivers: Vec<Option<ChunkReceiver<(OrderKey, T)>>>,
    /// Whatever a chunk didn't immediately hand to the heap, per partition —
    /// a `recv_chunk` can return more than one element per [`batch_size_for`].
    pending: Vec<VecDeque<(OrderKey, T)>>,
    heap: BoundedMaxHeap<(usize, T)>,
    primed: bool,
}

impl<T> PipelinedOrderedMerge<T> {
    fn try_fill(&mut self, idx: usize) {
        loop {
            if let Some((key, value)) = self.pending[idx].pop_front() {
                self.heap.push_or_reject(HeapEntry { value: (idx, value), key });
                return;
            }
            match self.receivers[idx].as_ref().and_then(|rx| rx.recv_chunk()) {
                Some(chunk) => {
                    self.pending[idx] = chunk.into();
                }
                None => {
                    self.receivers[idx] = None;
                    return;
                }
            }
        }
    }

    fn prime(&mut self) {
        for idx in 0..self.receivers.len() {
            self.try_fill(idx);
        }
        self.primed = true;
    }
}

impl<T> Iterator for PipelinedOrderedMerge<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if !self.primed {
            self.prime();
        }
        let entry = self.heap.pop_max()?;
        let (idx, value) = entry.value;
        self.try_fill(idx);
        Some(value)
    }
}

/// For-effect: apply `action` to every element of every partition in
/// parallel, with no ordering and no collection. Errors from every
/// partition are gathered into one [`AggregatedError`] and classified
/// per [`AggregatedError::classify`].
///
/// # Errors
/// Returns the classified aggregate of whatever [`EngineError`]s the action
/// raised across partitions, or propagates a critical error untouched.
pub fn for_effect_merge<T: Elem>(
    stream: PartitionedStream<T>,
    action: Arc<dyn Fn(T) -> Result<(), EngineError> + Send + Sync>,
    scheduler: &dyn TaskScheduler,
) -> Result<(), EngineError> {
    let errors: Arc<Vec<AtomicCell<EngineError>>> = Arc::new((0..stream.partition_count()).map(|_| AtomicCell::new()).collect());

    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let action = Arc::clone(&action);
        let errors = Arc::clone(&errors);
        tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            while enumerator.move_next(&mut elem, &mut key) {
                let value = elem.take().unwrap();
                if let Err(e) = action(value) {
                    errors[i].put(e);
                    break;
                }
            }
        }));
    }
    scheduler.run_all(tasks);

    let collected: Vec<EngineError> = (0..errors.len()).filter_map(|i| errors[i].take()).collect();
    if collected.is_empty() {
        Ok(())
    } else {
        Err(AggregatedError::new(collected).classify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_key::NaturalKeyComparer;
    use crate::partitioners::contiguous_range_partition;
    use crate::settings::RayonScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_pipelined_merge_yields_every_element() {
        let data: Vec<i32> = (0..50).collect();
        let stream = contiguous_range_partition(data, 4);
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(RayonScheduler);
        let mut out: Vec<i32> = default_pipelined_merge(stream, scheduler, MergeOptions::AutoBuffered).collect();
        out.sort_unstable();
        assert_eq!(out, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn default_pipelined_merge_not_buffered_yields_every_element() {
        let data: Vec<i32> = (0..200).collect();
        let stream = contiguous_range_partition(data, 4);
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(RayonScheduler);
        let mut out: Vec<i32> = default_pipelined_merge(stream, scheduler, MergeOptions::NotBuffered).collect();
        out.sort_unstable();
        assert_eq!(out, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn stop_and_go_merge_yields_every_element() {
        let data: Vec<i32> = (0..50).collect();
        let stream = contiguous_range_partition(data, 4);
        let scheduler = RayonScheduler;
        let mut out: Vec<i32> = stop_and_go_merge(stream, &scheduler).collect();
        out.sort_unstable();
        assert_eq!(out, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn order_preserving_pipelined_merge_emits_sorted_order() {
        let data = vec![5, 3, 8, 1, 9, 2, 7, 0, 6, 4];
        let stream = contiguous_range_partition(data, 3);
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(RayonScheduler);
        let out: Vec<i32> = order_preserving_pipelined_merge(stream, Arc::new(NaturalKeyComparer), scheduler, MergeOptions::AutoBuffered).collect();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn order_preserving_pipelined_merge_with_larger_batches_reconstructs_original_order() {
        let data: Vec<i32> = (0..500).map(|i| (i * 37) % 500).collect();
        let stream = contiguous_range_partition(data.clone(), 5);
        let scheduler: Arc<dyn TaskScheduler> = Arc::new(RayonScheduler);
        let out: Vec<i32> =
            order_preserving_pipelined_merge(stream, Arc::new(NaturalKeyComparer), scheduler, MergeOptions::AutoBuffered).collect();
        assert_eq!(out, data);
    }

    #[test]
    fn order_preserving_fully_buffered_merge_emits_sorted_order() {
        let data = vec![5, 3, 8, 1, 9, 2, 7, 0, 6, 4];
        let stream = contiguous_range_partition(data, 3);
        let scheduler = RayonScheduler;
        let out: Vec<i32> = order_preserving_fully_buffered_merge(stream, Arc::new(NaturalKeyComparer), &scheduler).collect();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn for_effect_merge_visits_every_element() {
        let data: Vec<i32> = (0..50).collect();
        let stream = contiguous_range_partition(data, 4);
        let scheduler = RayonScheduler;
        let counter = Arc::new(AtomicUsize::new(0));
        let action_counter = Arc::clone(&counter);
        let action: Arc<dyn Fn(i32) -> Result<(), EngineError> + Send + Sync> =
            Arc::new(move |_| {
                action_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        for_effect_merge(stream, action, &scheduler).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
