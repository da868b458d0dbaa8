//! Binary and key-grouping operators (spec §4.3/§4.4): `Concat`, `Zip`,
//! `Join`, `GroupJoin`, `GroupBy`, `SelectMany`.
//!
//! `Join`/`GroupJoin`/`GroupBy` are all grounded on the teacher's
//! `helpers::joins::join_inner` and `helpers::combine::group_by`: hash the
//! smaller/either side into a local `HashMap<K, Vec<V>>` per bucket, then
//! probe it — here the "which bucket" decision is made by
//! [`crate::exchange::hash_repartition`] up front rather than by shipping
//! whole partitions to a single join site, so the local build step only
//! ever sees the rows that hashed into its own bucket.

use crate::error::EngineError;
use crate::order_key::{OrderKey, Side};
use crate::partition::{BoxedEnumerator, PartitionedStream, VecPartitionEnumerator};
use crate::primitives::AtomicCell;
use crate::query::{Elem, QueryOperator, QueryResults};
use crate::settings::QuerySettings;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// `Concat`: all of `left`'s elements (each tagged [`Side::Left`]) before
/// all of `right`'s (tagged [`Side::Right`]), per the `OrderKey::Concat`
/// ordering rule.
pub struct Concat<T: Elem> {
    left: Arc<dyn QueryOperator<T>>,
    right: Arc<dyn QueryOperator<T>>,
}

impl<T: Elem> Concat<T> {
    /// Build a `Concat` of `left` then `right`.
    #[must_use]
    pub fn new(left: Arc<dyn QueryOperator<T>>, right: Arc<dyn QueryOperator<T>>) -> Self {
        Self { left, right }
    }
}

impl<T: Elem> QueryOperator<T> for Concat<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let dop = settings.resolved_dop();
        let left = self.left.open(settings)?.into_partitioned(dop);
        let right = self.right.open(settings)?.into_partitioned(dop);
        let index_state = left.index_state.worse(right.index_state);

        let mut partitions: Vec<BoxedEnumerator<T>> = Vec::new();
        for enumerator in left.partitions {
            partitions.push(Box::new(TaggingEnumerator { inner: enumerator, side: Side::Left }));
        }
        for enumerator in right.partitions {
            partitions.push(Box::new(TaggingEnumerator { inner: enumerator, side: Side::Right }));
        }
        Ok(QueryResults::Partitioned(PartitionedStream::new(partitions, index_state)))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        Ok(Box::new(self.left.as_sequential(settings)?.chain(self.right.as_sequential(settings)?)))
    }

    fn limits_parallelism(&self) -> bool {
        self.left.limits_parallelism() || self.right.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.left.take_error().or_else(|| self.right.take_error())
    }
}

struct TaggingEnumerator<T> {
    inner: BoxedEnumerator<T>,
    side: Side,
}

impl<T: Send> crate::partition::PartitionEnumerator<T> for TaggingEnumerator<T> {
    fn move_next(&mut self, element: &mut Option<T>, key: &mut OrderKey) -> bool {
        if self.inner.move_next(element, key) {
            *key = OrderKey::Concat(Box::new(key.clone()), self.side);
            true
        } else {
            false
        }
    }
}

/// `Zip`: pairs up elements by position, stopping at the shorter side. Stays
/// parallel (spec §4.2): when both sides open as `Indexible`, this is a
/// plain pairwise truncate-and-zip with no merge step at all. A side that
/// opens as a lazy [`crate::partition::PartitionedStream`] is materialized
/// into its natural order first via [`to_ordered_vec`] — the same
/// drain-every-partition-in-parallel-then-sort-by-rank shape
/// `materialize_keyed` in `unary.rs` uses for `Reverse` — so `Zip` itself
/// never calls `as_sequential` on an operator it has already `open`ed.
pub struct Zip<A: Elem, B: Elem> {
    left: Arc<dyn QueryOperator<A>>,
    right: Arc<dyn QueryOperator<B>>,
}

impl<A: Elem, B: Elem> Zip<A, B> {
    /// Build a `Zip` of `left` with `right`.
    #[must_use]
    pub fn new(left: Arc<dyn QueryOperator<A>>, right: Arc<dyn QueryOperator<B>>) -> Self {
        Self { left, right }
    }
}

impl<A: Elem, B: Elem> QueryOperator<(A, B)> for Zip<A, B> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<(A, B)>, EngineError> {
        let left_results = self.left.open(settings)?;
        let right_results = self.right.open(settings)?;
        let (mut left, mut right) = match (left_results, right_results) {
            (QueryResults::Indexible(l), QueryResults::Indexible(r)) => (l, r),
            (l, r) => (to_ordered_vec(l, settings), to_ordered_vec(r, settings)),
        };
        let n = left.len().min(right.len());
        left.truncate(n);
        right.truncate(n);
        let items: Vec<(A, B)> = left.into_iter().zip(right).collect();
        Ok(QueryResults::Indexible(items))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = (A, B)> + Send>, EngineError> {
        let left = self.left.as_sequential(settings)?;
        let right = self.right.as_sequential(settings)?;
        Ok(Box::new(left.zip(right)))
    }

    fn limits_parallelism(&self) -> bool {
        self.left.limits_parallelism() || self.right.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.left.take_error().or_else(|| self.right.take_error())
    }
}

/// Drain a [`QueryResults`] into a single `Vec` in ascending key order,
/// running every partition concurrently when it is not already `Indexible`.
/// Used by [`Zip`] to materialize whichever side did not open as a flat
/// buffer, without falling back to that side's `as_sequential` (an operator
/// can only be consumed once).
fn to_ordered_vec<T: Elem>(results: QueryResults<T>, settings: &QuerySettings) -> Vec<T> {
    let stream = match results {
        QueryResults::Indexible(data) => return data,
        QueryResults::Partitioned(stream) => stream,
    };
    let scheduler = settings.resolved_scheduler();
    let buffers: Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>> = Arc::new((0..stream.partition_count()).map(|_| AtomicCell::new()).collect());
    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let buffers = Arc::clone(&buffers);
        tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut out = Vec::new();
            while enumerator.move_next(&mut elem, &mut key) {
                out.push((key.clone(), elem.take().unwrap()));
            }
            buffers[i].put(out);
        }));
    }
    scheduler.run_all(tasks);
    let mut all: Vec<(OrderKey, T)> = (0..buffers.len()).flat_map(|i| buffers[i].take().unwrap_or_default()).collect();
    all.sort_by(|a, b| a.0.rank().cmp(&b.0.rank()));
    all.into_iter().map(|(_, v)| v).collect()
}

fn hash_both<K: Elem + Eq + Hash, L: Elem, R: Elem>(
    left: Arc<dyn QueryOperator<L>>,
    right: Arc<dyn QueryOperator<R>>,
    left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
    right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
    settings: &QuerySettings,
) -> Result<(PartitionedStream<L>, PartitionedStream<R>), EngineError> {
    let dop = settings.resolved_dop();
    let left_stream = left.open(settings)?.into_partitioned(dop);
    let right_stream = right.open(settings)?.into_partitioned(dop);
    let scheduler = settings.resolved_scheduler();
    let left_stream = crate::exchange::hash_repartition(left_stream, left_key, scheduler.as_ref());
    let right_stream = crate::exchange::hash_repartition(right_stream, right_key, scheduler.as_ref());
    Ok((left_stream, right_stream))
}

/// `Join`: inner join on a key extracted from each side, emitting one
/// `(left, right)` pair per matching combination.
pub struct Join<K: Elem + Eq + Hash, L: Elem, R: Elem> {
    left: Arc<dyn QueryOperator<L>>,
    right: Arc<dyn QueryOperator<R>>,
    left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
    right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
}

impl<K: Elem + Eq + Hash, L: Elem, R: Elem> Join<K, L, R> {
    /// Build a `Join` matching `left_key(l) == right_key(r)`.
    #[must_use]
    pub fn new(
        left: Arc<dyn QueryOperator<L>>,
        right: Arc<dyn QueryOperator<R>>,
        left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
        right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
    ) -> Self {
        Self { left, right, left_key, right_key }
    }
}

impl<K: Elem + Eq + Hash, L: Elem, R: Elem> QueryOperator<(L, R)> for Join<K, L, R> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<(L, R)>, EngineError> {
        let (left_stream, right_stream) =
            hash_both(Arc::clone(&self.left), Arc::clone(&self.right), Arc::clone(&self.left_key), Arc::clone(&self.right_key), settings)?;
        let n = left_stream.partition_count();
        let left_key = Arc::clone(&self.left_key);
        let scheduler = settings.resolved_scheduler();
        let results: Arc<Vec<AtomicCell<Vec<(L, R)>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
        let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
        let right_key = Arc::clone(&self.right_key);
        for (i, (mut l, mut r)) in left_stream.partitions.into_iter().zip(right_stream.partitions).enumerate() {
            let results = Arc::clone(&results);
            let left_key = Arc::clone(&left_key);
            let right_key = Arc::clone(&right_key);
            tasks.push(Box::new(move || {
                let mut elem = None;
                let mut key = OrderKey::Position(0);
                let mut left_map: HashMap<K, Vec<L>> = HashMap::new();
                while l.move_next(&mut elem, &mut key) {
                    let v = elem.take().unwrap();
                    left_map.entry(left_key(&v)).or_default().push(v);
                }
                let mut right_rows = Vec::new();
                while r.move_next(&mut elem, &mut key) {
                    right_rows.push(elem.take().unwrap());
                }
                let mut out = Vec::new();
                for right_value in right_rows {
                    let k = right_key(&right_value);
                    if let Some(lefts) = left_map.get(&k) {
                        for lv in lefts {
                            out.push((lv.clone(), right_value.clone()));
                        }
                    }
                }
                results[i].put(out);
            }));
        }
        scheduler.run_all(tasks);
        let partitions: Vec<BoxedEnumerator<(L, R)>> = (0..n)
            .map(|i| -> BoxedEnumerator<(L, R)> {
                let values = results[i].take().unwrap_or_default();
                let tagged: Vec<(OrderKey, (L, R))> = values.into_iter().enumerate().map(|(j, v)| (OrderKey::Position(j as u64), v)).collect();
                Box::new(VecPartitionEnumerator::new(tagged))
            })
            .collect();
        Ok(QueryResults::Partitioned(PartitionedStream::new(partitions, crate::order_key::IndexState::Shuffled)))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = (L, R)> + Send>, EngineError> {
        let left_key = Arc::clone(&self.left_key);
        let right_key = Arc::clone(&self.right_key);
        let mut left_map: HashMap<K, Vec<L>> = HashMap::new();
        for v in self.left.as_sequential(settings)? {
            left_map.entry(left_key(&v)).or_default().push(v);
        }
        let mut out = Vec::new();
        for rv in self.right.as_sequential(settings)? {
            let k = right_key(&rv);
            if let Some(lefts) = left_map.get(&k) {
                for lv in lefts {
                    out.push((lv.clone(), rv.clone()));
                }
            }
        }
        Ok(Box::new(out.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.left.take_error().or_else(|| self.right.take_error())
    }
}

/// `GroupJoin`: like [`Join`], but pairs each left element with the full
/// `Vec` of matching right elements (including an empty `Vec` for no
/// match), rather than one row per combination.
pub struct GroupJoin<K: Elem + Eq + Hash, L: Elem, R: Elem> {
    left: Arc<dyn QueryOperator<L>>,
    right: Arc<dyn QueryOperator<R>>,
    left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
    right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
}

impl<K: Elem + Eq + Hash, L: Elem, R: Elem> GroupJoin<K, L, R> {
    /// Build a `GroupJoin` matching `left_key(l) == right_key(r)`.
    #[must_use]
    pub fn new(
        left: Arc<dyn QueryOperator<L>>,
        right: Arc<dyn QueryOperator<R>>,
        left_key: Arc<dyn Fn(&L) -> K + Send + Sync>,
        right_key: Arc<dyn Fn(&R) -> K + Send + Sync>,
    ) -> Self {
        Self { left, right, left_key, right_key }
    }
}

impl<K: Elem + Eq + Hash, L: Elem, R: Elem> QueryOperator<(L, Vec<R>)> for GroupJoin<K, L, R> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<(L, Vec<R>)>, EngineError> {
        let (left_stream, right_stream) =
            hash_both(Arc::clone(&self.left), Arc::clone(&self.right), Arc::clone(&self.left_key), Arc::clone(&self.right_key), settings)?;
        let n = left_stream.partition_count();
        let right_key = Arc::clone(&self.right_key);
        let left_key = Arc::clone(&self.left_key);
        let scheduler = settings.resolved_scheduler();
        let results: Arc<Vec<AtomicCell<Vec<(L, Vec<R>)>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
        let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
        for (i, (mut l, mut r)) in left_stream.partitions.into_iter().zip(right_stream.partitions).enumerate() {
            let results = Arc::clone(&results);
            let right_key = Arc::clone(&right_key);
            let left_key = Arc::clone(&left_key);
            tasks.push(Box::new(move || {
                let mut elem = None;
                let mut key = OrderKey::Position(0);
                let mut right_map: HashMap<K, Vec<R>> = HashMap::new();
                while r.move_next(&mut elem, &mut key) {
                    let v = elem.take().unwrap();
                    right_map.entry(right_key(&v)).or_default().push(v);
                }
                let mut left_rows = Vec::new();
                while l.move_next(&mut elem, &mut key) {
                    left_rows.push(elem.take().unwrap());
                }
                let out: Vec<(L, Vec<R>)> = left_rows
                    .into_iter()
                    .map(|lv| {
                        let matches = right_map.get(&left_key(&lv)).cloned().unwrap_or_default();
                        (lv, matches)
                    })
                    .collect();
                results[i].put(out);
            }));
        }
        scheduler.run_all(tasks);
        let partitions: Vec<BoxedEnumerator<(L, Vec<R>)>> = (0..n)
            .map(|i| -> BoxedEnumerator<(L, Vec<R>)> {
                let values = results[i].take().unwrap_or_default();
                let tagged: Vec<(OrderKey, (L, Vec<R>))> = values.into_iter().enumerate().map(|(j, v)| (OrderKey::Position(j as u64), v)).collect();
                Box::new(VecPartitionEnumerator::new(tagged))
            })
            .collect();
        Ok(QueryResults::Partitioned(PartitionedStream::new(partitions, crate::order_key::IndexState::Shuffled)))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = (L, Vec<R>)> + Send>, EngineError> {
        let left_key = Arc::clone(&self.left_key);
        let right_key = Arc::clone(&self.right_key);
        let mut right_map: HashMap<K, Vec<R>> = HashMap::new();
        for v in self.right.as_sequential(settings)? {
            right_map.entry(right_key(&v)).or_default().push(v);
        }
        let out: Vec<(L, Vec<R>)> = self
            .left
            .as_sequential(settings)?
            .map(|lv| {
                let matches = right_map.get(&left_key(&lv)).cloned().unwrap_or_default();
                (lv, matches)
            })
            .collect();
        Ok(Box::new(out.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.left.take_error().or_else(|| self.right.take_error())
    }
}

/// `GroupBy`: groups elements by a key into `(key, Vec<value>)` pairs, one
/// per distinct key.
pub struct GroupBy<K: Elem + Eq + Hash, T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>,
}

impl<K: Elem + Eq + Hash, T: Elem> GroupBy<K, T> {
    /// Build a `GroupBy` keyed by `key_fn`.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, key_fn: Arc<dyn Fn(&T) -> K + Send + Sync>) -> Self {
        Self { upstream, key_fn }
    }
}

impl<K: Elem + Eq + Hash, T: Elem> QueryOperator<(K, Vec<T>)> for GroupBy<K, T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<(K, Vec<T>)>, EngineError> {
        let dop = settings.resolved_dop();
        let stream = self.upstream.open(settings)?.into_partitioned(dop);
        let scheduler = settings.resolved_scheduler();
        let key_fn = Arc::clone(&self.key_fn);
        let stream = crate::exchange::hash_repartition(stream, Arc::clone(&key_fn), scheduler.as_ref());

        let n = stream.partition_count();
        let results: Arc<Vec<AtomicCell<Vec<(K, Vec<T>)>>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
        let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
        for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
            let results = Arc::clone(&results);
            let key_fn = Arc::clone(&key_fn);
            tasks.push(Box::new(move || {
                let mut elem = None;
                let mut key = OrderKey::Position(0);
                let mut groups: HashMap<K, Vec<T>> = HashMap::new();
                while enumerator.move_next(&mut elem, &mut key) {
                    let v = elem.take().unwrap();
                    groups.entry(key_fn(&v)).or_default().push(v);
                }
                results[i].put(groups.into_iter().collect());
            }));
        }
        scheduler.run_all(tasks);
        let partitions: Vec<BoxedEnumerator<(K, Vec<T>)>> = (0..n)
            .map(|i| -> BoxedEnumerator<(K, Vec<T>)> {
                let values = results[i].take().unwrap_or_default();
                let tagged: Vec<(OrderKey, (K, Vec<T>))> = values.into_iter().enumerate().map(|(j, v)| (OrderKey::Position(j as u64), v)).collect();
                Box::new(VecPartitionEnumerator::new(tagged))
            })
            .collect();
        Ok(QueryResults::Partitioned(PartitionedStream::new(partitions, crate::order_key::IndexState::Shuffled)))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = (K, Vec<T>)> + Send>, EngineError> {
        let key_fn = Arc::clone(&self.key_fn);
        let mut groups: HashMap<K, Vec<T>> = HashMap::new();
        for v in self.upstream.as_sequential(settings)? {
            groups.entry(key_fn(&v)).or_default().push(v);
        }
        Ok(Box::new(groups.into_iter()))
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

/// `SelectMany`: flattens a selector that maps each element to an inner
/// sequence, tagging each inner element's key as `Pair(outer_key,
/// inner_position)` (spec §4.2).
pub struct SelectMany<T: Elem, U: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    selector: Arc<dyn Fn(T) -> Vec<U> + Send + Sync>,
}

impl<T: Elem, U: Elem> SelectMany<T, U> {
    /// Build a `SelectMany` over `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, selector: Arc<dyn Fn(T) -> Vec<U> + Send + Sync>) -> Self {
        Self { upstream, selector }
    }
}

impl<T: Elem, U: Elem> QueryOperator<U> for SelectMany<T, U> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<U>, EngineError> {
        let dop = settings.resolved_dop();
        let stream = self.upstream.open(settings)?.into_partitioned(dop);
        let selector = Arc::clone(&self.selector);
        let partitions: Vec<BoxedEnumerator<U>> = stream
            .partitions
            .into_iter()
            .map(|inner| -> BoxedEnumerator<U> { Box::new(FlattenEnumerator { inner, selector: Arc::clone(&selector), current: None }) })
            .collect();
        Ok(QueryResults::Partitioned(PartitionedStream::new(partitions, stream.index_state.worse(crate::order_key::IndexState::Shuffled))))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = U> + Send>, EngineError> {
        let selector = Arc::clone(&self.selector);
        let items: Vec<U> = self.upstream.as_sequential(settings)?.flat_map(move |v| selector(v)).collect();
        Ok(Box::new(items.into_iter()))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

struct FlattenEnumerator<T, U> {
    inner: BoxedEnumerator<T>,
    selector: Arc<dyn Fn(T) -> Vec<U> + Send + Sync>,
    current: Option<(OrderKey, std::vec::IntoIter<U>, u64)>,
}

impl<T: Send, U: Send> crate::partition::PartitionEnumerator<U> for FlattenEnumerator<T, U> {
    fn move_next(&mut self, element: &mut Option<U>, key: &mut OrderKey) -> bool {
        loop {
            if let Some((outer_key, iter, pos)) = &mut self.current {
                if let Some(v) = iter.next() {
                    *key = OrderKey::Pair(Box::new(outer_key.clone()), Box::new(OrderKey::Position(*pos)));
                    *pos += 1;
                    *element = Some(v);
                    return true;
                }
                self.current = None;
            }
            let mut inner_elem = None;
            let mut inner_key = OrderKey::Position(0);
            if !self.inner.move_next(&mut inner_elem, &mut inner_key) {
                return false;
            }
            let value = inner_elem.take().unwrap();
            let inner_values = (self.selector)(value);
            self.current = Some((inner_key, inner_values.into_iter(), 0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::source::Source;

    #[test]
    fn concat_puts_left_before_right() {
        let left = Arc::new(Source::new(vec![1, 2]));
        let right = Arc::new(Source::new(vec![3, 4]));
        let op = Concat::new(left, right);
        let settings = QuerySettings::default();
        let out: Vec<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn zip_stops_at_the_shorter_side() {
        let left = Arc::new(Source::new(vec![1, 2, 3]));
        let right: Arc<dyn QueryOperator<&str>> = Arc::new(Source::new(vec!["a", "b"]));
        let op = Zip::new(left, right);
        let settings = QuerySettings::default();
        let out: Vec<(i32, &str)> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, vec![(1, "a"), (2, "b")]);
    }

    #[test]
    fn zip_via_open_returns_indexible_pairs_when_both_sides_are_indexible() {
        let left = Arc::new(Source::new(vec![1, 2, 3]));
        let right: Arc<dyn QueryOperator<&str>> = Arc::new(Source::new(vec!["a", "b", "c"]));
        let op = Zip::new(left, right);
        let settings = QuerySettings::default();
        assert!(!op.limits_parallelism());
        match op.open(&settings).unwrap() {
            QueryResults::Indexible(data) => assert_eq!(data, vec![(1, "a"), (2, "b"), (3, "c")]),
            QueryResults::Partitioned(_) => panic!("zip should resolve to indexible"),
        }
    }

    #[test]
    fn zip_falls_back_to_sequential_materialization_when_a_side_is_partitioned() {
        let left = Arc::new(Source::from_partitions(vec![vec![1, 2], vec![3, 4, 5]]));
        let right: Arc<dyn QueryOperator<&str>> = Arc::new(Source::new(vec!["a", "b", "c", "d"]));
        let op = Zip::new(left, right);
        let settings = QuerySettings::default();
        match op.open(&settings).unwrap() {
            QueryResults::Indexible(data) => assert_eq!(data.len(), 4),
            QueryResults::Partitioned(_) => panic!("zip should resolve to indexible"),
        }
    }

    #[test]
    fn group_by_groups_values_by_key() {
        let src = Arc::new(Source::new(vec![1, 2, 3, 4, 5, 6]));
        let op = GroupBy::new(src, Arc::new(|v: &i32| v % 2));
        let settings = QuerySettings::default();
        let mut groups: Vec<(i32, Vec<i32>)> = op.as_sequential(&settings).unwrap().collect();
        groups.sort_by_key(|(k, _)| *k);
        assert_eq!(groups.len(), 2);
        let mut evens = groups[0].1.clone();
        evens.sort_unstable();
        assert_eq!(evens, vec![2, 4, 6]);
    }

    #[test]
    fn select_many_flattens_and_tags_inner_positions() {
        let src = Arc::new(Source::new(vec![1, 2]));
        let op = SelectMany::new(src, Arc::new(|v: i32| vec![v, v * 10]));
        let settings = QuerySettings::default();
        let out: Vec<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, vec![1, 10, 2, 20]);
    }
}
