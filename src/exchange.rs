//! Hash-repartition exchange (spec §4.4): reshuffles a partitioned stream by
//! key so that every element with the same key ends up in the same output
//! partition, regardless of which input partition it started in. The
//! backbone behind `GroupBy`, `Join`/`GroupJoin`, and `Distinct`/`Union`/
//! `Intersect`/`Except`.
//!
//! The N×N bucket matrix plus countdown-then-barrier handoff is grounded on
//! `examples/other_examples/0db012da_Xuxiaotuan-blaze__...shuffle-sort
//! _repartitioner.rs` / `f936cbfe_hannerwang-blaze__...repartitioner.rs`
//! (both implement exactly this "every producer writes its own row, every
//! consumer drains its own column" shuffle shape).

use crate::order_key::OrderKey;
use crate::partition::{BoxedEnumerator, PartitionEnumerator, PartitionedStream, VecPartitionEnumerator};
use crate::primitives::{AtomicCell, CountdownLatch};
use crate::query::Elem;
use crate::settings::TaskScheduler;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The smallest power of two at least 503 and at least `n`. 503 is a prime
/// gap chosen (spec §4.4) so the modulus doesn't alias with small, common
/// partition counts before the final `% n` fold; keeping it a power of two
/// lets each worker compute its bucket with a mask instead of a division.
#[must_use]
pub fn distribution_mod(n: usize) -> usize {
    let mut m = 1usize;
    while m < 503 || m < n.max(1) {
        m *= 2;
    }
    m
}

fn bucket_of<K: Hash>(key: &K, dist_mod: usize, dop_out: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let h = (hasher.finish() as usize) % dist_mod;
    h % dop_out
}

/// Hash-repartition `upstream` by the key `key_fn` extracts from each
/// element, producing a new stream with the same number of partitions.
///
/// Every producer writes only its own row of the matrix (no cross-thread
/// contention while producing); a [`CountdownLatch`] acts as the barrier
/// between the write phase and the read phase. Each consumer then drains its
/// column starting at its own row ("diagonal") before visiting its peers',
/// spreading lock contention across rows instead of every consumer racing
/// row 0 first.
///
/// The result loses whatever order the input had — hashing by key is
/// inherently order-destroying — so it is always tagged
/// [`crate::order_key::IndexState::Shuffled`].
pub fn hash_repartition<T, K>(
    upstream: PartitionedStream<T>,
    key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
    scheduler: &dyn TaskScheduler,
) -> PartitionedStream<T>
where
    T: Elem,
    K: Hash,
{
    let n = upstream.partition_count().max(1);
    let dist_mod = distribution_mod(n);
    log::debug!("hash_repartition: {n} partitions, distribution_mod={dist_mod}");

    let matrix: Vec<Vec<Mutex<Vec<(OrderKey, T)>>>> = (0..n)
        .map(|_| (0..n).map(|_| Mutex::new(Vec::new())).collect())
        .collect();
    let matrix = Arc::new(matrix);
    let write_barrier = Arc::new(CountdownLatch::new(n as u64));
    let results: Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>> =
        Arc::new((0..n).map(|_| AtomicCell::new()).collect());

    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (p, mut enumerator) in upstream.partitions.into_iter().enumerate() {
        let matrix = Arc::clone(&matrix);
        let write_barrier = Arc::clone(&write_barrier);
        let results = Arc::clone(&results);
        let key_fn = Arc::clone(&key_fn);
        tasks.push(Box::new(move || {
            run_exchange_worker(p, n, dist_mod, enumerator.as_mut(), &matrix, &write_barrier, &results, &*key_fn);
        }));
    }

    scheduler.run_all(tasks);

    let partitions: Vec<BoxedEnumerator<T>> = (0..n)
        .map(|p| -> BoxedEnumerator<T> { Box::new(VecPartitionEnumerator::new(results[p].take().unwrap_or_default())) })
        .collect();

    PartitionedStream::new(partitions, crate::order_key::IndexState::Shuffled)
}

#[allow(clippy::too_many_arguments)]
fn run_exchange_worker<T: Send, K: Hash>(
    p: usize,
    n: usize,
    dist_mod: usize,
    enumerator: &mut dyn PartitionEnumerator<T>,
    matrix: &Arc<Vec<Vec<Mutex<Vec<(OrderKey, T)>>>>>,
    write_barrier: &Arc<CountdownLatch>,
    results: &Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>>,
    key_fn: &(dyn Fn(&T) -> K + Send + Sync),
) {
    let mut elem = None;
    let mut key = OrderKey::Position(0);
    while enumerator.move_next(&mut elem, &mut key) {
        let value = elem.take().expect("move_next returned true without an element");
        let target = bucket_of(&key_fn(&value), dist_mod, n);
        matrix[p][target].lock().push((key.clone(), value));
    }
    write_barrier.count_down();
    log::trace!("exchange worker {p} finished writing, waiting on barrier");
    write_barrier.wait();

    let mut out = Vec::new();
    for offset in 0..n {
        let row = (p + offset) % n;
        let mut cell = matrix[row][p].lock();
        out.append(&mut cell);
    }
    results[p].put(out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioners::contiguous_range_partition;
    use crate::settings::RayonScheduler;

    #[test]
    fn distribution_mod_is_a_power_of_two_covering_both_bounds() {
        assert!(distribution_mod(4).is_power_of_two());
        assert!(distribution_mod(4) >= 503);
        assert!(distribution_mod(1024) >= 1024);
    }

    #[test]
    fn same_key_always_lands_in_the_same_output_bucket() {
        let data: Vec<i32> = (0..200).collect();
        let stream = contiguous_range_partition(data, 4);
        let scheduler = RayonScheduler;
        let key_fn: Arc<dyn Fn(&i32) -> i32 + Send + Sync> = Arc::new(|v: &i32| v % 7);
        let result = hash_repartition(stream, key_fn, &scheduler);
        assert_eq!(result.partition_count(), 4);

        let mut bucket_of_key: std::collections::HashMap<i32, usize> = std::collections::HashMap::new();
        let mut total = 0usize;
        for (bucket_idx, mut part) in result.partitions.into_iter().enumerate() {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            while part.move_next(&mut elem, &mut key) {
                let residue = elem.take().unwrap() % 7;
                total += 1;
                match bucket_of_key.get(&residue) {
                    Some(&expected) => assert_eq!(expected, bucket_idx, "key {residue} split across buckets"),
                    None => {
                        bucket_of_key.insert(residue, bucket_idx);
                    }
                }
            }
        }
        assert_eq!(total, 200);
    }
}
