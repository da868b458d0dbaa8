//! Cooperative parallel mergesort (spec §4.5): sorts a partitioned stream
//! so that every partition is internally sorted *and* partition `i`'s
//! elements all compare less-than-or-equal to partition `i + 1`'s, so a
//! plain left-to-right concatenation of the partitions is the fully sorted
//! sequence. Backs `OrderBy`/`ThenBy`.
//!
//! Phase 1 (local sort) is a plain per-partition sort; phase 2 is
//! `log2(N)` barrier-synchronized pairwise-merge rounds, each round merging
//! partner `i` and `i ^ half` and splitting the merged run back in half so
//! the lower-indexed partner ends up with the smaller half. Grounded on
//! `examples/other_examples/bbe171c8_...sort-external.rs` (external/
//! k-way merge machinery) generalized from a single-threaded k-way merge
//! into the partner-pair cooperative shape Design Note 9 calls for; unlike
//! that file, this sorts `(OrderKey, T)` pairs directly rather than an
//! index array, trading the indirection for simplicity.

use crate::order_key::{IndexState, KeyComparer, OrderKey};
use crate::partition::{BoxedEnumerator, PartitionEnumerator, PartitionedStream, VecPartitionEnumerator};
use crate::primitives::{AtomicCell, ReusableBarrier};
use crate::query::Elem;
use crate::settings::TaskScheduler;
use std::sync::Arc;

fn merge_sorted<T>(
    mut a: Vec<(OrderKey, T)>,
    mut b: Vec<(OrderKey, T)>,
    cmp: &dyn KeyComparer,
) -> Vec<(OrderKey, T)> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.drain(..).peekable();
    let mut b = b.drain(..).peekable();
    loop {
        match (a.peek(), b.peek()) {
            (Some((ka, _)), Some((kb, _))) => {
                if cmp.compare(ka, kb) != std::cmp::Ordering::Greater {
                    out.push(a.next().unwrap());
                } else {
                    out.push(b.next().unwrap());
                }
            }
            (Some(_), None) => out.push(a.next().unwrap()),
            (None, Some(_)) => out.push(b.next().unwrap()),
            (None, None) => break,
        }
    }
    out
}

fn drain_partition<T: Send>(mut enumerator: BoxedEnumerator<T>) -> Vec<(OrderKey, T)> {
    let mut elem = None;
    let mut key = OrderKey::Position(0);
    let mut out = Vec::new();
    while enumerator.move_next(&mut elem, &mut key) {
        out.push((key.clone(), elem.take().unwrap()));
    }
    out
}

/// Sort `upstream` by `cmp`, returning a stream whose partitions are
/// individually sorted and collectively ordered end to end.
///
/// Internally pads the partition count up to a power of two so the
/// pairwise-merge rounds pair cleanly; the padding partitions are simply
/// empty and vanish once merged in.
pub fn cooperative_parallel_mergesort<T: Elem>(
    upstream: PartitionedStream<T>,
    cmp: Arc<dyn KeyComparer>,
    scheduler: &dyn TaskScheduler,
) -> PartitionedStream<T> {
    let input_partitions = upstream.partitions.len();
    let mut data: Vec<Vec<(OrderKey, T)>> = upstream.partitions.into_iter().map(drain_partition).collect();
    let n = data.len().max(1).next_power_of_two();
    while data.len() < n {
        data.push(Vec::new());
    }
    log::debug!("cooperative_parallel_mergesort: padded {input_partitions} input partitions to {n}");

    for part in &mut data {
        part.sort_by(|a, b| cmp.compare(&a.0, &b.0));
    }

    if n > 1 {
        let slots: Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
        for (i, part) in data.into_iter().enumerate() {
            slots[i].put(part);
        }

        let num_phases = n.trailing_zeros();
        for phase in 0..num_phases {
            log::trace!("cooperative_parallel_mergesort: entering phase {phase}/{num_phases}");
            let half = 1usize << phase;
            let barrier = Arc::new(ReusableBarrier::new(n));
            let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
            for i in 0..n {
                let partner = i ^ half;
                let slots = Arc::clone(&slots);
                let cmp = Arc::clone(&cmp);
                let barrier = Arc::clone(&barrier);
                if i < partner {
                    tasks.push(Box::new(move || {
                        let mine = slots[i].take().unwrap_or_default();
                        let theirs = slots[partner].take().unwrap_or_default();
                        let merged = merge_sorted(mine, theirs, cmp.as_ref());
                        let mid = merged.len() / 2;
                        let mut merged = merged;
                        let upper = merged.split_off(mid);
                        slots[i].put(merged);
                        slots[partner].put(upper);
                        barrier.wait();
                    }));
                } else {
                    tasks.push(Box::new(move || {
                        barrier.wait();
                    }));
                }
            }
            scheduler.run_all(tasks);
        }

        data = (0..n).map(|i| slots[i].take().unwrap_or_default()).collect();
    }

    let mut global_rank: u64 = 0;
    let partitions: Vec<BoxedEnumerator<T>> = data
        .into_iter()
        .map(|part| -> BoxedEnumerator<T> {
            let tagged: Vec<(OrderKey, T)> = part
                .into_iter()
                .map(|(key, value)| {
                    let rank = global_rank;
                    global_rank += 1;
                    (OrderKey::Sorted(Box::new(key), rank), value)
                })
                .collect();
            Box::new(VecPartitionEnumerator::new(tagged))
        })
        .collect();

    PartitionedStream::new(partitions, IndexState::Increasing)
}
