//! `OrderBy`/`ThenBy` (spec §4.5): full sort by a user comparator over the
//! element itself.
//!
//! [`crate::mergesort::cooperative_parallel_mergesort`] only compares
//! [`OrderKey`]s, which this crate keeps a closed, finite enum rather than a
//! generic `TKey` (Design Note 9) — it has no slot for an arbitrary user
//! projection. `OrderBy` needs exactly that, so this module runs its own
//! copy of the same partner-pair barrier-synchronized merge, comparing
//! `(OrderKey, T)` pairs by the user comparator first and the carried-over
//! `OrderKey`'s rank second (for a stable sort when the comparator reports
//! equal). The phase/barrier/split structure is identical to
//! `mergesort.rs`; only what gets compared differs.

use crate::error::EngineError;
use crate::order_key::{IndexState, OrderKey};
use crate::partition::{BoxedEnumerator, PartitionEnumerator, PartitionedStream, VecPartitionEnumerator};
use crate::primitives::{AtomicCell, ReusableBarrier};
use crate::query::{Elem, QueryOperator, QueryResults};
use crate::settings::{QuerySettings, TaskScheduler};
use std::cmp::Ordering;
use std::sync::Arc;

fn drain_partition<T: Send>(mut enumerator: BoxedEnumerator<T>) -> Vec<(OrderKey, T)> {
    let mut elem = None;
    let mut key = OrderKey::Position(0);
    let mut out = Vec::new();
    while enumerator.move_next(&mut elem, &mut key) {
        out.push((key.clone(), elem.take().unwrap()));
    }
    out
}

fn merge_sorted<T>(mut a: Vec<(OrderKey, T)>, mut b: Vec<(OrderKey, T)>, cmp: &dyn Fn(&T, &T) -> Ordering) -> Vec<(OrderKey, T)> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.drain(..).peekable();
    let mut b = b.drain(..).peekable();
    let order = |x: &(OrderKey, T), y: &(OrderKey, T)| cmp(&x.1, &y.1).then_with(|| x.0.rank().cmp(&y.0.rank()));
    loop {
        match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => {
                if order(x, y) != Ordering::Greater {
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

fn parallel_value_mergesort<T: Elem>(
    upstream: PartitionedStream<T>,
    comparator: Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>,
    scheduler: &dyn TaskScheduler,
) -> PartitionedStream<T> {
    let mut data: Vec<Vec<(OrderKey, T)>> = upstream.partitions.into_iter().map(drain_partition).collect();
    let n = data.len().max(1).next_power_of_two();
    while data.len() < n {
        data.push(Vec::new());
    }

    for part in &mut data {
        let comparator = Arc::clone(&comparator);
        part.sort_by(|a, b| comparator(&a.1, &b.1).then_with(|| a.0.rank().cmp(&b.0.rank())));
    }

    if n > 1 {
        let slots: Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
        for (i, part) in data.into_iter().enumerate() {
            slots[i].put(part);
        }

        let num_phases = n.trailing_zeros();
        for phase in 0..num_phases {
            let half = 1usize << phase;
            let barrier = Arc::new(ReusableBarrier::new(n));
            let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
            for i in 0..n {
                let partner = i ^ half;
                let slots = Arc::clone(&slots);
                let comparator = Arc::clone(&comparator);
                let barrier = Arc::clone(&barrier);
                if i < partner {
                    tasks.push(Box::new(move || {
                        let mine = slots[i].take().unwrap_or_default();
                        let theirs = slots[partner].take().unwrap_or_default();
                        let merged = merge_sorted(mine, theirs, comparator.as_ref());
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

/// `OrderBy`: sorts the whole sequence by a comparator over the element.
/// `.then_by(...)` composes an additional tie-break comparator, the same
/// way LINQ's `OrderBy().ThenBy()` chain works.
pub struct OrderBy<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    comparator: Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>,
}

impl<T: Elem> OrderBy<T> {
    /// Build an `OrderBy` using `comparator` as the primary (and so far
    /// only) sort key.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, comparator: Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>) -> Self {
        Self { upstream, comparator }
    }

    /// Add a tie-break comparator, applied only when `self`'s comparator
    /// reports `Equal`.
    #[must_use]
    pub fn then_by(self, next: Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>) -> Self {
        let primary = self.comparator;
        let combined: Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync> = Arc::new(move |a, b| primary(a, b).then_with(|| next(a, b)));
        Self { upstream: self.upstream, comparator: combined }
    }
}

impl<T: Elem> QueryOperator<T> for OrderBy<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let dop = settings.resolved_dop();
        let stream = self.upstream.open(settings)?.into_partitioned(dop);
        let scheduler = settings.resolved_scheduler();
        let result = parallel_value_mergesort(stream, Arc::clone(&self.comparator), scheduler.as_ref());
        Ok(QueryResults::Partitioned(result))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let comparator = Arc::clone(&self.comparator);
        let mut items: Vec<T> = self.upstream.as_sequential(settings)?.collect();
        items.sort_by(|a, b| comparator(a, b));
        Ok(Box::new(items.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}
