//! Hash-partitioned set operators (spec §4.4): `Distinct`, `Union`,
//! `Intersect`, `Except`. Each routes through [`crate::exchange::hash_repartition`]
//! keyed by the element's own value, so that every occurrence of a given
//! value — from either side, for the binary operators — lands in the same
//! output partition; the actual set logic then runs locally with a plain
//! `HashSet`, the same two-phase "exchange, then build a local hash table"
//! shape `binary::Join` uses for its own local build phase.

use crate::error::EngineError;
use crate::order_key::OrderKey;
use crate::partition::{BoxedEnumerator, PartitionedStream, VecPartitionEnumerator};
use crate::primitives::AtomicCell;
use crate::query::{Elem, QueryOperator, QueryResults};
use crate::settings::QuerySettings;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

fn identity_key<T: Clone>(v: &T) -> T {
    v.clone()
}

fn repartition_by_value<T: Elem + Hash>(
    upstream: Arc<dyn QueryOperator<T>>,
    settings: &QuerySettings,
) -> Result<PartitionedStream<T>, EngineError> {
    let dop = settings.resolved_dop();
    let results = upstream.open(settings)?;
    let stream = results.into_partitioned(dop);
    let scheduler = settings.resolved_scheduler();
    let key_fn: Arc<dyn Fn(&T) -> T + Send + Sync> = Arc::new(identity_key);
    Ok(crate::exchange::hash_repartition(stream, key_fn, scheduler.as_ref()))
}

fn run_local<T: Elem, F>(stream: PartitionedStream<T>, scheduler: &dyn crate::settings::TaskScheduler, per_partition: F) -> PartitionedStream<T>
where
    F: Fn(Vec<T>) -> Vec<T> + Send + Sync + 'static,
{
    let n = stream.partition_count();
    let per_partition = Arc::new(per_partition);
    let results: Arc<Vec<AtomicCell<Vec<T>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let results = Arc::clone(&results);
        let per_partition = Arc::clone(&per_partition);
        tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut values = Vec::new();
            while enumerator.move_next(&mut elem, &mut key) {
                values.push(elem.take().unwrap());
            }
            results[i].put(per_partition(values));
        }));
    }
    scheduler.run_all(tasks);
    let partitions: Vec<BoxedEnumerator<T>> = (0..n)
        .map(|i| -> BoxedEnumerator<T> {
            let values = results[i].take().unwrap_or_default();
            let tagged: Vec<(OrderKey, T)> = values.into_iter().enumerate().map(|(j, v)| (OrderKey::Position(j as u64), v)).collect();
            Box::new(VecPartitionEnumerator::new(tagged))
        })
        .collect();
    PartitionedStream::new(partitions, crate::order_key::IndexState::Shuffled)
}

/// `Distinct`: removes duplicate values, keeping the first occurrence each
/// bucket sees.
pub struct Distinct<T: Elem + Eq + Hash> {
    upstream: Arc<dyn QueryOperator<T>>,
}

impl<T: Elem + Eq + Hash> Distinct<T> {
    /// Build a `Distinct` over `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>) -> Self {
        Self { upstream }
    }
}

impl<T: Elem + Eq + Hash> QueryOperator<T> for Distinct<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let stream = repartition_by_value(Arc::clone(&self.upstream), settings)?;
        let scheduler = settings.resolved_scheduler();
        let result = run_local(stream, scheduler.as_ref(), |values| {
            let mut seen = HashSet::new();
            values.into_iter().filter(|v| seen.insert(v.clone())).collect()
        });
        Ok(QueryResults::Partitioned(result))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let mut seen = HashSet::new();
        let items: Vec<T> = self.upstream.as_sequential(settings)?.filter(|v| seen.insert(v.clone())).collect();
        Ok(Box::new(items.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

/// `Union`: concatenates two sequences, then removes duplicates (LINQ
/// semantics: `a.Union(b) == a.Concat(b).Distinct()`).
pub struct Union<T: Elem + Eq + Hash> {
    left: Arc<dyn QueryOperator<T>>,
    right: Arc<dyn QueryOperator<T>>,
}

impl<T: Elem + Eq + Hash> Union<T> {
    /// Build a `Union` of `left` and `right`.
    #[must_use]
    pub fn new(left: Arc<dyn QueryOperator<T>>, right: Arc<dyn QueryOperator<T>>) -> Self {
        Self { left, right }
    }
}

impl<T: Elem + Eq + Hash> QueryOperator<T> for Union<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let dop = settings.resolved_dop();
        let left = self.left.open(settings)?.into_partitioned(dop);
        let right = self.right.open(settings)?.into_partitioned(dop);
        let scheduler = settings.resolved_scheduler();
        let key_fn: Arc<dyn Fn(&T) -> T + Send + Sync> = Arc::new(identity_key);
        let left = crate::exchange::hash_repartition(left, Arc::clone(&key_fn), scheduler.as_ref());
        let right = crate::exchange::hash_repartition(right, key_fn, scheduler.as_ref());

        let n = left.partition_count();
        let results: Arc<Vec<AtomicCell<Vec<T>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
        let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
        for (i, (mut l, mut r)) in left.partitions.into_iter().zip(right.partitions).enumerate() {
            let results = Arc::clone(&results);
            tasks.push(Box::new(move || {
                let mut elem = None;
                let mut key = OrderKey::Position(0);
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                while l.move_next(&mut elem, &mut key) {
                    let v = elem.take().unwrap();
                    if seen.insert(v.clone()) {
                        out.push(v);
                    }
                }
                while r.move_next(&mut elem, &mut key) {
                    let v = elem.take().unwrap();
                    if seen.insert(v.clone()) {
                        out.push(v);
                    }
                }
                results[i].put(out);
            }));
        }
        scheduler.run_all(tasks);
        let partitions: Vec<BoxedEnumerator<T>> = (0..n)
            .map(|i| -> BoxedEnumerator<T> {
                let values = results[i].take().unwrap_or_default();
                let tagged: Vec<(OrderKey, T)> = values.into_iter().enumerate().map(|(j, v)| (OrderKey::Position(j as u64), v)).collect();
                Box::new(VecPartitionEnumerator::new(tagged))
            })
            .collect();
        Ok(QueryResults::Partitioned(PartitionedStream::new(partitions, crate::order_key::IndexState::Shuffled)))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let mut seen = HashSet::new();
        let items: Vec<T> = self
            .left
            .as_sequential(settings)?
            .chain(self.right.as_sequential(settings)?)
            .filter(|v| seen.insert(v.clone()))
            .collect();
        Ok(Box::new(items.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.left.take_error().or_else(|| self.right.take_error())
    }
}

/// `Intersect`: keeps values present on both sides.
pub struct Intersect<T: Elem + Eq + Hash> {
    left: Arc<dyn QueryOperator<T>>,
    right: Arc<dyn QueryOperator<T>>,
}

impl<T: Elem + Eq + Hash> Intersect<T> {
    /// Build an `Intersect` of `left` and `right`.
    #[must_use]
    pub fn new(left: Arc<dyn QueryOperator<T>>, right: Arc<dyn QueryOperator<T>>) -> Self {
        Self { left, right }
    }
}

impl<T: Elem + Eq + Hash> QueryOperator<T> for Intersect<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        set_combine(&self.left, &self.right, settings, |left_set, right_vals| {
            let mut seen = HashSet::new();
            right_vals.into_iter().filter(|v| left_set.contains(v) && seen.insert(v.clone())).collect()
        })
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let left_set: HashSet<T> = self.left.as_sequential(settings)?.collect();
        let mut seen = HashSet::new();
        let items: Vec<T> = self
            .right
            .as_sequential(settings)?
            .filter(|v| left_set.contains(v) && seen.insert(v.clone()))
            .collect();
        Ok(Box::new(items.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.left.take_error().or_else(|| self.right.take_error())
    }
}

/// `Except`: keeps `left` values that do not appear anywhere in `right`.
pub struct Except<T: Elem + Eq + Hash> {
    left: Arc<dyn QueryOperator<T>>,
    right: Arc<dyn QueryOperator<T>>,
}

impl<T: Elem + Eq + Hash> Except<T> {
    /// Build an `Except` of `left` minus `right`.
    #[must_use]
    pub fn new(left: Arc<dyn QueryOperator<T>>, right: Arc<dyn QueryOperator<T>>) -> Self {
        Self { left, right }
    }
}

impl<T: Elem + Eq + Hash> QueryOperator<T> for Except<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        set_combine(&self.right, &self.left, settings, |right_set, left_vals| {
            let mut seen = HashSet::new();
            left_vals.into_iter().filter(|v| !right_set.contains(v) && seen.insert(v.clone())).collect()
        })
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let right_set: HashSet<T> = self.right.as_sequential(settings)?.collect();
        let mut seen = HashSet::new();
        let items: Vec<T> = self
            .left
            .as_sequential(settings)?
            .filter(|v| !right_set.contains(v) && seen.insert(v.clone()))
            .collect();
        Ok(Box::new(items.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.left.take_error().or_else(|| self.right.take_error())
    }
}

/// Shared backbone for `Intersect`/`Except`: hash-repartition both sides so
/// matching values land in the same bucket, build a `HashSet` from the `set`
/// side locally in each bucket, then filter the `probe` side against it.
fn set_combine<T: Elem + Eq + Hash>(
    set_side: &Arc<dyn QueryOperator<T>>,
    probe_side: &Arc<dyn QueryOperator<T>>,
    settings: &QuerySettings,
    combine: impl Fn(&HashSet<T>, Vec<T>) -> Vec<T> + Send + Sync + 'static,
) -> Result<QueryResults<T>, EngineError> {
    let dop = settings.resolved_dop();
    let set_stream = set_side.open(settings)?.into_partitioned(dop);
    let probe_stream = probe_side.open(settings)?.into_partitioned(dop);
    let scheduler = settings.resolved_scheduler();
    let key_fn: Arc<dyn Fn(&T) -> T + Send + Sync> = Arc::new(identity_key);
    let set_stream = crate::exchange::hash_repartition(set_stream, Arc::clone(&key_fn), scheduler.as_ref());
    let probe_stream = crate::exchange::hash_repartition(probe_stream, key_fn, scheduler.as_ref());

    let n = set_stream.partition_count();
    let combine = Arc::new(combine);
    let results: Arc<Vec<AtomicCell<Vec<T>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, (mut set_part, mut probe_part)) in set_stream.partitions.into_iter().zip(probe_stream.partitions).enumerate() {
        let results = Arc::clone(&results);
        let combine = Arc::clone(&combine);
        tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut set = HashSet::new();
            while set_part.move_next(&mut elem, &mut key) {
                set.insert(elem.take().unwrap());
            }
            let mut probe_values = Vec::new();
            while probe_part.move_next(&mut elem, &mut key) {
                probe_values.push(elem.take().unwrap());
            }
            results[i].put(combine(&set, probe_values));
        }));
    }
    scheduler.run_all(tasks);
    let partitions: Vec<BoxedEnumerator<T>> = (0..n)
        .map(|i| -> BoxedEnumerator<T> {
            let values = results[i].take().unwrap_or_default();
            let tagged: Vec<(OrderKey, T)> = values.into_iter().enumerate().map(|(j, v)| (OrderKey::Position(j as u64), v)).collect();
            Box::new(VecPartitionEnumerator::new(tagged))
        })
        .collect();
    Ok(QueryResults::Partitioned(PartitionedStream::new(partitions, crate::order_key::IndexState::Shuffled)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::source::Source;
    use std::collections::HashSet as StdHashSet;

    #[test]
    fn distinct_removes_duplicate_values() {
        let src = Source::new(vec![1, 2, 2, 3, 1, 4]);
        let op = Distinct::new(Arc::new(src));
        let settings = QuerySettings::default();
        let out: StdHashSet<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, [1, 2, 3, 4].into_iter().collect());
    }

    #[test]
    fn union_combines_and_dedups_both_sides() {
        let left = Arc::new(Source::new(vec![1, 2, 3]));
        let right = Arc::new(Source::new(vec![3, 4, 5]));
        let op = Union::new(left, right);
        let settings = QuerySettings::default();
        let out: StdHashSet<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, [1, 2, 3, 4, 5].into_iter().collect());
    }

    #[test]
    fn intersect_keeps_only_shared_values() {
        let left = Arc::new(Source::new(vec![1, 2, 3, 4]));
        let right = Arc::new(Source::new(vec![3, 4, 5, 6]));
        let op = Intersect::new(left, right);
        let settings = QuerySettings::default();
        let out: StdHashSet<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, [3, 4].into_iter().collect());
    }

    #[test]
    fn except_keeps_only_values_absent_from_the_right() {
        let left = Arc::new(Source::new(vec![1, 2, 3, 4]));
        let right = Arc::new(Source::new(vec![3, 4]));
        let op = Except::new(left, right);
        let settings = QuerySettings::default();
        let out: StdHashSet<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, [1, 2].into_iter().collect());
    }

    #[test]
    fn distinct_parallel_open_matches_sequential_result() {
        let data: Vec<i32> = (0..50).map(|v| v % 7).collect();
        let src = Source::new(data);
        let op = Distinct::new(Arc::new(src));
        let settings = QuerySettings::default();
        let QueryResults::Partitioned(stream) = op.open(&settings).unwrap() else {
            panic!("expected a partitioned result");
        };
        let mut out = StdHashSet::new();
        for mut part in stream.partitions {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            while part.move_next(&mut elem, &mut key) {
                out.insert(elem.take().unwrap());
            }
        }
        assert_eq!(out, (0..7).collect());
    }
}
