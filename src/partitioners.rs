//! Source partitioners (spec §4.1): turn one sequence into a
//! [`PartitionedStream`] of `N` per-worker enumerators.
//!
//! Contiguous-range splitting for indexible sources is grounded on
//! `examples/other_examples/671492c0_umbgtt10-fluxion__fluxion-stream-src
//! -partition-mod.rs` / `9670dbca_...-partition.rs` (both split a known-
//! length buffer into `N` contiguous ranges up front). The opaque-sequence
//! partitioner's "read a growing chunk from a shared iterator under a lock"
//! shape is modeled on
//! `examples/other_examples/a34dd2f3_mylinyuzhi-codex__...worker_pool.rs`'s
//! shared-work-queue pattern.

use crate::order_key::{IndexState, OrderKey};
use crate::partition::{BoxedEnumerator, PartitionEnumerator, PartitionedStream, SlicePartitionEnumerator};
use parking_lot::Mutex;
use std::sync::Arc;

/// Smallest chunk size the opaque-sequence partitioner reads per lock
/// acquisition; doubles on each subsequent read up to
/// [`OPAQUE_MAX_CHUNK`], trading early load-balance for fewer lock
/// round-trips as the source turns out to be long (spec §4.1).
const OPAQUE_MIN_CHUNK: usize = 1;
/// Upper bound on the opaque-sequence partitioner's chunk size.
const OPAQUE_MAX_CHUNK: usize = 512;

/// Split an already-materialized, random-accessible source into `dop`
/// contiguous ranges. Every partition's keys are a dense, correctly-ordered
/// run of [`OrderKey::Position`] values, so the resulting stream is tagged
/// [`IndexState::Indexible`].
#[must_use]
pub fn contiguous_range_partition<T: Send + 'static>(
    data: Vec<T>,
    dop: usize,
) -> PartitionedStream<T> {
    let dop = dop.max(1);
    let len = data.len();
    let base = len / dop;
    let rem = len % dop;

    let mut data = data;
    let mut partitions: Vec<BoxedEnumerator<T>> = Vec::with_capacity(dop);
    let mut start = 0usize;
    let mut remaining = std::mem::take(&mut data);
    for p in 0..dop {
        let this_len = base + usize::from(p < rem);
        let tail = remaining.split_off(this_len.min(remaining.len()));
        let chunk = std::mem::replace(&mut remaining, tail);
        partitions.push(Box::new(SlicePartitionEnumerator::new(chunk, start as u64)));
        start += this_len;
    }

    PartitionedStream::new(partitions, IndexState::Indexible)
}

/// Target bytes per chunk the striped partitioner aims for when sizing its
/// chunk length from an element's byte size (spec §4.1: "`C · size_of(T) ≈
/// 512 bytes`").
const STRIPE_TARGET_BYTES: usize = 512;

/// Chunk length `C` for an element of `elem_size` bytes, sized so that
/// `C * elem_size` is close to [`STRIPE_TARGET_BYTES`] without ever dropping
/// to zero (a zero-sized or huge element still gets a chunk of at least 1).
#[must_use]
pub fn chunk_size_from_elem_size(elem_size: usize) -> usize {
    (STRIPE_TARGET_BYTES / elem_size.max(1)).max(1)
}

/// [`chunk_size_from_elem_size`] for a concrete element type `T`.
#[must_use]
pub fn chunk_size_for<T>() -> usize {
    chunk_size_from_elem_size(std::mem::size_of::<T>())
}

/// Split an indexible source into `dop` partitions of `chunk`-sized blocks,
/// laid out in repeating sections: section `s` spans `dop * chunk` source
/// indices, and within it partition `i` owns the contiguous sub-range
/// `[s*dop*chunk + i*chunk, s*dop*chunk + (i+1)*chunk)` (spec §4.1,
/// "striped"). Equivalently, index `idx` belongs to partition
/// `(idx % (dop*chunk)) / chunk`. A final, short section is redistributed by
/// the same formula with no special case: whichever partitions its
/// truncated range still reaches simply receive one fewer block than the
/// rest. Each partition's keys are a dense, strictly-increasing subsequence
/// of the original positions, so the stream is tagged [`IndexState::Indexible`].
#[must_use]
fn striped_partition_with_chunk<T: Send + 'static>(data: Vec<T>, dop: usize, chunk: usize) -> PartitionedStream<T> {
    let dop = dop.max(1);
    let chunk = chunk.max(1);
    let section_size = dop * chunk;
    let mut buckets: Vec<Vec<(u64, T)>> = (0..dop).map(|_| Vec::new()).collect();
    for (i, v) in data.into_iter().enumerate() {
        let partition = (i % section_size) / chunk;
        buckets[partition].push((i as u64, v));
    }
    let partitions: Vec<BoxedEnumerator<T>> = buckets
        .into_iter()
        .map(|bucket| -> BoxedEnumerator<T> { Box::new(StripedEnumerator { data: bucket.into_iter() }) })
        .collect();
    PartitionedStream::new(partitions, IndexState::Indexible)
}

/// Split an indexible source into `dop` partitions of chunked, sectioned
/// blocks sized from `T`'s own byte size via [`chunk_size_for`] (spec
/// §4.1, "striped"). See [`striped_partition_with_chunk`] for the exact
/// layout.
#[must_use]
pub fn striped_partition<T: Send + 'static>(data: Vec<T>, dop: usize) -> PartitionedStream<T> {
    striped_partition_with_chunk(data, dop, chunk_size_for::<T>())
}

struct StripedEnumerator<T> {
    data: std::vec::IntoIter<(u64, T)>,
}

impl<T: Send> PartitionEnumerator<T> for StripedEnumerator<T> {
    fn move_next(&mut self, element: &mut Option<T>, key: &mut OrderKey) -> bool {
        match self.data.next() {
            Some((idx, v)) => {
                *element = Some(v);
                *key = OrderKey::Position(idx);
                true
            }
            None => false,
        }
    }
}

/// Shared state behind the opaque-sequence partitioner: a single iterator
/// guarded by a mutex, plus the running position counter used to mint dense
/// keys across whichever partition happens to read a given element.
struct OpaqueSource<T> {
    iter: Mutex<Box<dyn Iterator<Item = T> + Send>>,
    next_index: Mutex<u64>,
}

/// Partition an opaque (non-indexible, e.g. produced by a user
/// `Iterator`) source by racing all workers to pull growing chunks from one
/// shared iterator behind a lock. No upfront length is required; order keys
/// are still dense and correctly assigned (the lock, not the partitioner,
/// serializes index assignment), so the stream is [`IndexState::Correct`].
#[must_use]
pub fn opaque_sequence_partition<T, I>(source: I, dop: usize) -> PartitionedStream<T>
where
    T: Send + 'static,
    I: Iterator<Item = T> + Send + 'static,
{
    let dop = dop.max(1);
    let shared = Arc::new(OpaqueSource {
        iter: Mutex::new(Box::new(source)),
        next_index: Mutex::new(0),
    });
    let partitions: Vec<BoxedEnumerator<T>> = (0..dop)
        .map(|_| -> BoxedEnumerator<T> {
            Box::new(OpaqueSequenceEnumerator {
                shared: Arc::clone(&shared),
                chunk_size: OPAQUE_MIN_CHUNK,
                pending: Vec::new().into_iter(),
            })
        })
        .collect();
    PartitionedStream::new(partitions, IndexState::Correct)
}

struct OpaqueSequenceEnumerator<T> {
    shared: Arc<OpaqueSource<T>>,
    chunk_size: usize,
    pending: std::vec::IntoIter<(u64, T)>,
}

impl<T: Send> OpaqueSequenceEnumerator<T> {
    fn refill(&mut self) -> bool {
        let mut iter = self.shared.iter.lock();
        let mut index = self.shared.next_index.lock();
        let mut chunk = Vec::with_capacity(self.chunk_size);
        for _ in 0..self.chunk_size {
            match iter.next() {
                Some(v) => {
                    chunk.push((*index, v));
                    *index += 1;
                }
                None => break,
            }
        }
        drop(index);
        drop(iter);
        let got_any = !chunk.is_empty();
        self.pending = chunk.into_iter();
        self.chunk_size = (self.chunk_size * 2).min(OPAQUE_MAX_CHUNK);
        got_any
    }
}

impl<T: Send> PartitionEnumerator<T> for OpaqueSequenceEnumerator<T> {
    fn move_next(&mut self, element: &mut Option<T>, key: &mut OrderKey) -> bool {
        loop {
            if let Some((idx, v)) = self.pending.next() {
                *element = Some(v);
                *key = OrderKey::Position(idx);
                return true;
            }
            if !self.refill() {
                return false;
            }
        }
    }
}

/// Wrap a caller-supplied, already-partitioned `Vec<Vec<T>>` directly
/// (spec §4.1, "custom"). Used when a caller hands the engine pre-split
/// work (e.g. per-file partitions); each sub-vector's keys are dense within
/// itself but the partitioner has no way to know how sub-vectors relate to
/// each other, so the stream is tagged [`IndexState::Shuffled`].
#[must_use]
pub fn custom_partition<T: Send + 'static>(parts: Vec<Vec<T>>) -> PartitionedStream<T> {
    let partitions: Vec<BoxedEnumerator<T>> = parts
        .into_iter()
        .map(|p| -> BoxedEnumerator<T> { Box::new(SlicePartitionEnumerator::new(p, 0)) })
        .collect();
    PartitionedStream::new(partitions, IndexState::Shuffled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(mut e: BoxedEnumerator<T>) -> Vec<(T, u64)> {
        let mut elem = None;
        let mut key = OrderKey::Position(0);
        let mut out = Vec::new();
        while e.move_next(&mut elem, &mut key) {
            out.push((elem.take().unwrap(), key.rank()));
        }
        out
    }

    #[test]
    fn contiguous_range_covers_every_element_exactly_once() {
        let data: Vec<i32> = (0..23).collect();
        let stream = contiguous_range_partition(data, 4);
        assert_eq!(stream.index_state, IndexState::Indexible);
        let mut all: Vec<i32> = stream
            .partitions
            .into_iter()
            .flat_map(|e| drain(e).into_iter().map(|(v, _)| v))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..23).collect::<Vec<_>>());
    }

    #[test]
    fn chunk_size_from_elem_size_targets_512_bytes() {
        assert_eq!(chunk_size_from_elem_size(4), 128);
        assert_eq!(chunk_size_from_elem_size(512), 1);
        assert_eq!(chunk_size_from_elem_size(4096), 1);
        assert_eq!(chunk_size_from_elem_size(0), 512);
    }

    #[test]
    fn striped_with_chunk_lays_out_contiguous_blocks_per_section() {
        // dop=2, chunk=2: section size 4. Section 0 is [0,2) -> p0, [2,4) -> p1.
        // Section 1 (indices 4..8) repeats the same split.
        let data: Vec<i32> = (0..8).collect();
        let stream = striped_partition_with_chunk(data, 2, 2);
        assert_eq!(stream.index_state, IndexState::Indexible);
        let mut partitions = stream.partitions.into_iter();
        let first = drain(partitions.next().unwrap());
        let second = drain(partitions.next().unwrap());
        assert_eq!(first, vec![(0, 0), (1, 1), (4, 4), (5, 5)]);
        assert_eq!(second, vec![(2, 2), (3, 3), (6, 6), (7, 7)]);
    }

    #[test]
    fn striped_with_chunk_redistributes_a_short_final_section() {
        // dop=2, chunk=2, 6 elements: one full section (0..4) plus a short
        // tail (4..6) that only reaches partition 0.
        let data: Vec<i32> = (0..6).collect();
        let stream = striped_partition_with_chunk(data, 2, 2);
        let mut partitions = stream.partitions.into_iter();
        let first = drain(partitions.next().unwrap());
        let second = drain(partitions.next().unwrap());
        assert_eq!(first, vec![(0, 0), (1, 1), (4, 4), (5, 5)]);
        assert_eq!(second, vec![(2, 2), (3, 3)]);
    }

    #[test]
    fn striped_partition_covers_every_element_exactly_once_and_is_indexible() {
        let data: Vec<i32> = (0..97).collect();
        let stream = striped_partition(data, 4);
        assert_eq!(stream.index_state, IndexState::Indexible);
        let mut all: Vec<i32> = stream
            .partitions
            .into_iter()
            .flat_map(|e| drain(e).into_iter().map(|(v, _)| v))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..97).collect::<Vec<_>>());
    }

    #[test]
    fn opaque_sequence_covers_every_element_exactly_once() {
        let stream = opaque_sequence_partition(0..100i32, 5);
        assert_eq!(stream.index_state, IndexState::Correct);
        let mut all: Vec<i32> = stream
            .partitions
            .into_iter()
            .flat_map(|e| drain(e).into_iter().map(|(v, _)| v))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn custom_partition_preserves_each_sub_vector() {
        let stream = custom_partition(vec![vec![1, 2], vec![3], vec![4, 5, 6]]);
        assert_eq!(stream.index_state, IndexState::Shuffled);
        assert_eq!(stream.partition_count(), 3);
    }
}
