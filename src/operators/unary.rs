//! Stateless/lightly-stateful unary operators (spec §4.2): `Select`,
//! `Where`, their indexed variants, `Take`/`Skip`, `TakeWhile`/`SkipWhile`,
//! `Reverse`, and `DefaultIfEmpty`.
//!
//! `Select`/`Where` wrap the upstream enumerator lazily, one element at a
//! time, the same "stateless op wraps the previous op's buffer" shape as
//! the teacher's `MapOp`/`FilterOp` in `collection.rs`. `Reverse` and
//! `DefaultIfEmpty` need every partition's keys compared against each other
//! before they can decide what survives, so they perform the "premature
//! merge" spec §4.7 describes: gather, decide, re-tag as
//! [`IndexState::Indexible`]. `Take`/`Skip` and `TakeWhile`/`SkipWhile` stay
//! parallel instead: each worker races the others to fill a shared bounded
//! structure (a capacity-`n` max-heap for `Take`/`Skip`, a "lowest
//! known-false key" cell for `TakeWhile`/`SkipWhile`) and can stop pulling
//! from its own partition the moment it knows nothing it still holds could
//! matter, rather than draining every partition to the end first.

use crate::error::EngineError;
use crate::order_key::{IndexState, KeyComparer, NaturalKeyComparer, OrderKey};
use crate::partition::{BoxedEnumerator, PartitionEnumerator, PartitionedStream};
use crate::primitives::{AtomicCell, BoundedMaxHeap, CountdownLatch, HeapEntry};
use crate::query::{Elem, QueryOperator, QueryResults};
use crate::settings::QuerySettings;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::sync::Arc;

/// `Select`: maps every element through a fallible selector. A selector
/// error is recorded in a shared cell and stops that partition's
/// enumeration early, rather than unwinding a panic across worker threads.
pub struct Select<T: Elem, U: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    selector: Arc<dyn Fn(T, u64) -> Result<U, EngineError> + Send + Sync>,
    error: Arc<AtomicCell<EngineError>>,
}

impl<T: Elem, U: Elem> Select<T, U> {
    /// Build a `Select` over `upstream` using a plain `(element) -> U`
    /// selector.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, selector: Arc<dyn Fn(T) -> Result<U, EngineError> + Send + Sync>) -> Self {
        Self::new_indexed(upstream, Arc::new(move |v, _i| selector(v)))
    }

    /// Build a `Select` whose selector also receives the element's order
    /// rank (the indexed variant, spec §4.2).
    #[must_use]
    pub fn new_indexed(upstream: Arc<dyn QueryOperator<T>>, selector: Arc<dyn Fn(T, u64) -> Result<U, EngineError> + Send + Sync>) -> Self {
        Self { upstream, selector, error: Arc::new(AtomicCell::new()) }
    }
}

impl<T: Elem, U: Elem> QueryOperator<U> for Select<T, U> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<U>, EngineError> {
        let upstream = self.upstream.open(settings)?;
        let index_state = upstream.index_state();
        let stream = upstream.into_partitioned(settings.resolved_dop());
        let selector = Arc::clone(&self.selector);
        let error = Arc::clone(&self.error);
        let partitions: Vec<BoxedEnumerator<U>> = stream
            .partitions
            .into_iter()
            .map(|inner| -> BoxedEnumerator<U> {
                Box::new(MapEnumerator { inner, selector: Arc::clone(&selector), error: Arc::clone(&error) })
            })
            .collect();
        Ok(QueryResults::Partitioned(crate::partition::PartitionedStream::new(partitions, index_state)))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = U> + Send>, EngineError> {
        let selector = Arc::clone(&self.selector);
        let mut rank = 0u64;
        let mut err = None;
        let items: Vec<U> = self
            .upstream
            .as_sequential(settings)?
            .filter_map(|v| {
                let r = rank;
                rank += 1;
                match selector(v, r) {
                    Ok(u) => Some(u),
                    Err(e) => {
                        err = Some(e);
                        None
                    }
                }
            })
            .collect();
        if let Some(e) = err {
            return Err(e);
        }
        Ok(Box::new(items.into_iter()))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.error.take().or_else(|| self.upstream.take_error())
    }
}

struct MapEnumerator<T, U> {
    inner: BoxedEnumerator<T>,
    selector: Arc<dyn Fn(T, u64) -> Result<U, EngineError> + Send + Sync>,
    error: Arc<AtomicCell<EngineError>>,
}

impl<T: Send, U: Send> PartitionEnumerator<U> for MapEnumerator<T, U> {
    fn move_next(&mut self, element: &mut Option<U>, key: &mut OrderKey) -> bool {
        let mut inner_elem = None;
        if !self.inner.move_next(&mut inner_elem, key) {
            return false;
        }
        let value = inner_elem.take().expect("move_next returned true without an element");
        match (self.selector)(value, key.rank()) {
            Ok(u) => {
                *element = Some(u);
                true
            }
            Err(e) => {
                self.error.put(e);
                false
            }
        }
    }
}

/// `Where`: keeps only elements for which a fallible predicate returns
/// `true`. Same error-recording discipline as [`Select`].
pub struct Where<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    predicate: Arc<dyn Fn(&T, u64) -> Result<bool, EngineError> + Send + Sync>,
    error: Arc<AtomicCell<EngineError>>,
}

impl<T: Elem> Where<T> {
    /// Build a `Where` over `upstream` using a plain `(&element) -> bool`
    /// predicate.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, predicate: Arc<dyn Fn(&T) -> Result<bool, EngineError> + Send + Sync>) -> Self {
        Self::new_indexed(upstream, Arc::new(move |v, _i| predicate(v)))
    }

    /// Build a `Where` whose predicate also receives the element's order
    /// rank (the indexed variant, spec §4.2).
    #[must_use]
    pub fn new_indexed(
        upstream: Arc<dyn QueryOperator<T>>,
        predicate: Arc<dyn Fn(&T, u64) -> Result<bool, EngineError> + Send + Sync>,
    ) -> Self {
        Self { upstream, predicate, error: Arc::new(AtomicCell::new()) }
    }
}

impl<T: Elem> QueryOperator<T> for Where<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let upstream = self.upstream.open(settings)?;
        let index_state = upstream.index_state();
        let stream = upstream.into_partitioned(settings.resolved_dop());
        let predicate = Arc::clone(&self.predicate);
        let error = Arc::clone(&self.error);
        let partitions: Vec<BoxedEnumerator<T>> = stream
            .partitions
            .into_iter()
            .map(|inner| -> BoxedEnumerator<T> {
                Box::new(FilterEnumerator { inner, predicate: Arc::clone(&predicate), error: Arc::clone(&error) })
            })
            .collect();
        Ok(QueryResults::Partitioned(crate::partition::PartitionedStream::new(partitions, index_state)))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let predicate = Arc::clone(&self.predicate);
        let mut rank = 0u64;
        let mut err = None;
        let items: Vec<T> = self
            .upstream
            .as_sequential(settings)?
            .filter_map(|v| {
                let r = rank;
                rank += 1;
                match predicate(&v, r) {
                    Ok(true) => Some(v),
                    Ok(false) => None,
                    Err(e) => {
                        err = Some(e);
                        None
                    }
                }
            })
            .collect();
        if let Some(e) = err {
            return Err(e);
        }
        Ok(Box::new(items.into_iter()))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.error.take().or_else(|| self.upstream.take_error())
    }
}

struct FilterEnumerator<T> {
    inner: BoxedEnumerator<T>,
    predicate: Arc<dyn Fn(&T, u64) -> Result<bool, EngineError> + Send + Sync>,
    error: Arc<AtomicCell<EngineError>>,
}

impl<T: Send> PartitionEnumerator<T> for FilterEnumerator<T> {
    fn move_next(&mut self, element: &mut Option<T>, key: &mut OrderKey) -> bool {
        loop {
            let mut inner_elem = None;
            if !self.inner.move_next(&mut inner_elem, key) {
                return false;
            }
            let value = inner_elem.take().expect("move_next returned true without an element");
            match (self.predicate)(&value, key.rank()) {
                Ok(true) => {
                    *element = Some(value);
                    return true;
                }
                Ok(false) => continue,
                Err(e) => {
                    self.error.put(e);
                    return false;
                }
            }
        }
    }
}

fn materialize_keyed<T: Elem>(stream: PartitionedStream<T>, settings: &QuerySettings) -> Vec<(OrderKey, T)> {
    let scheduler = settings.resolved_scheduler();
    let results: Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>> = Arc::new((0..stream.partition_count()).map(|_| AtomicCell::new()).collect());
    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let results = Arc::clone(&results);
        tasks.push(Box::new(move || {
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut out = Vec::new();
            while enumerator.move_next(&mut elem, &mut key) {
                out.push((key.clone(), elem.take().unwrap()));
            }
            results[i].put(out);
        }));
    }
    scheduler.run_all(tasks);
    (0..results.len()).flat_map(|i| results[i].take().unwrap_or_default()).collect()
}

/// `Take(n)`: keeps the `n` smallest-keyed elements. On an already-indexible
/// upstream this is a plain truncate; otherwise `Take`/`Skip` share
/// [`bounded_take_skip`]'s heap-and-barrier algorithm (spec §4.2): every
/// worker fills a shared capacity-`n` max-heap as it pulls, and can stop
/// pulling once it already holds `n` candidates and the heap rejects its
/// latest one — safe exactly when each partition's own keys are increasing,
/// which is why the early stop is skipped for a `Shuffled` upstream.
pub struct Take<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    count: u64,
}

impl<T: Elem> Take<T> {
    /// Build a `Take` keeping at most `count` elements.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, count: u64) -> Self {
        Self { upstream, count }
    }
}

impl<T: Elem> QueryOperator<T> for Take<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        if self.count == 0 {
            return Ok(QueryResults::Indexible(Vec::new()));
        }
        let results = self.upstream.open(settings)?;
        match results {
            QueryResults::Indexible(mut data) => {
                data.truncate(self.count as usize);
                Ok(QueryResults::Indexible(data))
            }
            QueryResults::Partitioned(stream) => {
                let (take_out, _skip_out) = bounded_take_skip(stream, self.count as usize, settings);
                Ok(QueryResults::Indexible(take_out))
            }
        }
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let n = self.count as usize;
        Ok(Box::new(self.upstream.as_sequential(settings)?.take(n)))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

/// `Skip(n)`: drops the `n` smallest-keyed elements. `Skip(0)` on an
/// already-indexible source is a literal no-op, per this engine's resolved
/// Open Question on the matter (no defensive clone of an unchanged buffer).
/// Otherwise shares [`bounded_take_skip`] with [`Take`].
pub struct Skip<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    count: u64,
}

impl<T: Elem> Skip<T> {
    /// Build a `Skip` dropping the first `count` elements by key order.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, count: u64) -> Self {
        Self { upstream, count }
    }
}

impl<T: Elem> QueryOperator<T> for Skip<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let results = self.upstream.open(settings)?;
        if self.count == 0 && matches!(results, QueryResults::Indexible(_)) {
            return Ok(results);
        }
        match results {
            QueryResults::Indexible(mut data) => {
                let skip = (self.count as usize).min(data.len());
                Ok(QueryResults::Indexible(data.split_off(skip)))
            }
            QueryResults::Partitioned(stream) => {
                let (_take_out, skip_out) = bounded_take_skip(stream, self.count as usize, settings);
                Ok(QueryResults::Indexible(skip_out))
            }
        }
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let n = self.count as usize;
        Ok(Box::new(self.upstream.as_sequential(settings)?.skip(n)))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

/// Shared implementation behind `Take`/`Skip`'s partitioned path (spec
/// §4.2): every worker pulls from its own partition, pushing each element
/// into both its own local buffer and a shared capacity-`n` max-heap keyed
/// by [`NaturalKeyComparer`] (so the heap's root is always the worst of the
/// best `n` keys seen so far, the same heap shape [`crate::merge`] uses for
/// its order-preserving producer). A worker that already holds at least `n`
/// elements and whose latest push was rejected by a full heap stops pulling
/// — safe only because each partition's own keys increase monotonically at
/// `IndexState::Increasing` or better, so nothing later in that partition
/// could still make the cut. Every worker then counts down a barrier and
/// waits for the rest before reading the heap's root as the global cutoff
/// key; a worker that stopped early resumes pulling its own remainder
/// afterward so `Skip`'s "everything past the cutoff" half still sees every
/// element. Returns `(take_elements, skip_elements)`, both already in
/// ascending key order.
fn bounded_take_skip<T: Elem>(stream: PartitionedStream<T>, n: usize, settings: &QuerySettings) -> (Vec<T>, Vec<T>) {
    let allow_early_stop = stream.index_state.at_least(IndexState::Increasing);
    let partition_count = stream.partition_count();
    let scheduler = settings.resolved_scheduler();
    let heap: Arc<Mutex<BoundedMaxHeap<()>>> = Arc::new(Mutex::new(BoundedMaxHeap::new(n, Arc::new(NaturalKeyComparer))));
    let latch = Arc::new(CountdownLatch::new(partition_count as u64));
    let buffers: Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>> = Arc::new((0..partition_count).map(|_| AtomicCell::new()).collect());

    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let heap = Arc::clone(&heap);
        let latch = Arc::clone(&latch);
        let buffers = Arc::clone(&buffers);
        tasks.push(Box::new(move || {
            let mut local: Vec<(OrderKey, T)> = Vec::new();
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut exhausted = false;
            loop {
                if !enumerator.move_next(&mut elem, &mut key) {
                    exhausted = true;
                    break;
                }
                let value = elem.take().unwrap();
                let this_key = key.clone();
                let rejected = heap
                    .lock()
                    .push_or_reject(HeapEntry { value: (), key: this_key.clone() })
                    .is_some();
                local.push((this_key, value));
                if allow_early_stop && rejected && local.len() >= n.max(1) && heap.lock().is_full() {
                    break;
                }
            }
            latch.count_down();
            latch.wait();

            if !exhausted {
                while enumerator.move_next(&mut elem, &mut key) {
                    local.push((key.clone(), elem.take().unwrap()));
                }
            }
            buffers[i].put(local);
        }));
    }
    scheduler.run_all(tasks);

    let cutoff = heap.lock().peek_max().map(|e| e.key.clone());
    let cmp = NaturalKeyComparer;
    let mut all: Vec<(OrderKey, T)> = (0..partition_count).flat_map(|i| buffers[i].take().unwrap_or_default()).collect();
    all.sort_by(|a, b| cmp.compare(&a.0, &b.0));

    let split_at = match &cutoff {
        Some(cutoff_key) => all.partition_point(|(k, _)| cmp.compare(k, cutoff_key) != Ordering::Greater),
        None => 0,
    };
    let skip_part = all.split_off(split_at);
    let mut take_out: Vec<T> = all.into_iter().map(|(_, v)| v).collect();
    take_out.truncate(n);
    let skip_out: Vec<T> = skip_part.into_iter().map(|(_, v)| v).collect();
    (take_out, skip_out)
}

/// `TakeWhile`/`SkipWhile`: stay parallel via [`bounded_while`]'s
/// lowest-false-key cell (spec §4.2) whenever the upstream does; only fall
/// back to sequential execution when the upstream itself already does.
pub struct TakeWhile<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Elem> TakeWhile<T> {
    /// Build a `TakeWhile` over `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>) -> Self {
        Self { upstream, predicate }
    }
}

impl<T: Elem> QueryOperator<T> for TakeWhile<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let dop = settings.resolved_dop();
        let stream = self.upstream.open(settings)?.into_partitioned(dop);
        let (take_out, _skip_out) = bounded_while(stream, Arc::clone(&self.predicate), settings);
        Ok(QueryResults::Indexible(take_out))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let predicate = Arc::clone(&self.predicate);
        Ok(Box::new(self.upstream.as_sequential(settings)?.take_while(move |v| predicate(v))))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

/// See [`TakeWhile`].
pub struct SkipWhile<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: Elem> SkipWhile<T> {
    /// Build a `SkipWhile` over `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>) -> Self {
        Self { upstream, predicate }
    }
}

impl<T: Elem> QueryOperator<T> for SkipWhile<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let dop = settings.resolved_dop();
        let stream = self.upstream.open(settings)?.into_partitioned(dop);
        let (_take_out, skip_out) = bounded_while(stream, Arc::clone(&self.predicate), settings);
        Ok(QueryResults::Indexible(skip_out))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let predicate = Arc::clone(&self.predicate);
        Ok(Box::new(self.upstream.as_sequential(settings)?.skip_while(move |v| predicate(v))))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

/// Shared implementation behind `TakeWhile`/`SkipWhile` (spec §4.2): every
/// worker scans its own partition looking for the first element where
/// `predicate` returns `false`, racing to lower a shared "lowest known-false
/// key" cell as soon as it finds one. A worker whose partition keys increase
/// monotonically (`IndexState::Increasing` or better) can stop scanning the
/// moment it records its own first false — any later element in that same
/// partition necessarily has a larger key, so it cannot lower the global
/// minimum any further. Workers then barrier together before reading the
/// cell: its final value is the key of the first false element anywhere in
/// the stream, because each partition's own first false is its smallest
/// false key, and the minimum over every partition's smallest is the global
/// smallest. A worker that stopped early resumes pulling its remainder
/// afterward so `SkipWhile`'s "the cutoff element and everything after it"
/// half still sees every element, regardless of that element's own
/// predicate result. Returns `(take_while_elements, skip_while_elements)`,
/// both in ascending key order.
fn bounded_while<T: Elem>(
    stream: PartitionedStream<T>,
    predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    settings: &QuerySettings,
) -> (Vec<T>, Vec<T>) {
    let allow_early_stop = stream.index_state.at_least(IndexState::Increasing);
    let partition_count = stream.partition_count();
    let scheduler = settings.resolved_scheduler();
    let lowest_false_key: Arc<Mutex<Option<OrderKey>>> = Arc::new(Mutex::new(None));
    let latch = Arc::new(CountdownLatch::new(partition_count as u64));
    let buffers: Arc<Vec<AtomicCell<Vec<(OrderKey, T)>>>> = Arc::new((0..partition_count).map(|_| AtomicCell::new()).collect());
    let cmp = NaturalKeyComparer;

    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let lowest_false_key = Arc::clone(&lowest_false_key);
        let latch = Arc::clone(&latch);
        let buffers = Arc::clone(&buffers);
        let predicate = Arc::clone(&predicate);
        tasks.push(Box::new(move || {
            let mut local: Vec<(OrderKey, T)> = Vec::new();
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            let mut exhausted = false;
            let mut found_own_false = false;
            loop {
                if !enumerator.move_next(&mut elem, &mut key) {
                    exhausted = true;
                    break;
                }
                let value = elem.take().unwrap();
                let this_key = key.clone();
                let passed = predicate(&value);
                local.push((this_key.clone(), value));
                if !passed {
                    let mut lowest = lowest_false_key.lock();
                    let better = match lowest.as_ref() {
                        None => true,
                        Some(current) => NaturalKeyComparer.compare(&this_key, current) == Ordering::Less,
                    };
                    if better {
                        *lowest = Some(this_key);
                    }
                    drop(lowest);
                    found_own_false = true;
                    if allow_early_stop {
                        break;
                    }
                }
            }
            let _ = found_own_false;
            latch.count_down();
            latch.wait();

            if !exhausted {
                while enumerator.move_next(&mut elem, &mut key) {
                    local.push((key.clone(), elem.take().unwrap()));
                }
            }
            buffers[i].put(local);
        }));
    }
    scheduler.run_all(tasks);

    let cutoff = lowest_false_key.lock().clone();
    let mut all: Vec<(OrderKey, T)> = (0..partition_count).flat_map(|i| buffers[i].take().unwrap_or_default()).collect();
    all.sort_by(|a, b| cmp.compare(&a.0, &b.0));

    let split_at = match &cutoff {
        Some(cutoff_key) => all.partition_point(|(k, _)| cmp.compare(k, cutoff_key) == Ordering::Less),
        None => all.len(),
    };
    let skip_part = all.split_off(split_at);
    let take_out: Vec<T> = all.into_iter().map(|(_, v)| v).collect();
    let skip_out: Vec<T> = skip_part.into_iter().map(|(_, v)| v).collect();
    (take_out, skip_out)
}

/// `Reverse`: reverses the entire sequence. Always a premature merge —
/// there is no way to know an element's distance from the end without first
/// knowing the total count.
pub struct Reverse<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
}

impl<T: Elem> Reverse<T> {
    /// Build a `Reverse` over `upstream`.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>) -> Self {
        Self { upstream }
    }
}

impl<T: Elem> QueryOperator<T> for Reverse<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let results = self.upstream.open(settings)?;
        let mut data = match results {
            QueryResults::Indexible(data) => data,
            QueryResults::Partitioned(stream) => {
                let mut entries = materialize_keyed(stream, settings);
                entries.sort_by(|a, b| a.0.rank().cmp(&b.0.rank()));
                entries.into_iter().map(|(_, v)| v).collect()
            }
        };
        data.reverse();
        Ok(QueryResults::Indexible(data))
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let mut items: Vec<T> = self.upstream.as_sequential(settings)?.collect();
        items.reverse();
        Ok(Box::new(items.into_iter()))
    }

    fn limits_parallelism(&self) -> bool {
        self.upstream.limits_parallelism()
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

/// `DefaultIfEmpty`: substitutes a single default value if the upstream
/// produces nothing at all.
pub struct DefaultIfEmpty<T: Elem> {
    upstream: Arc<dyn QueryOperator<T>>,
    default: T,
}

impl<T: Elem> DefaultIfEmpty<T> {
    /// Build a `DefaultIfEmpty` over `upstream`, substituting `default` when
    /// empty.
    #[must_use]
    pub fn new(upstream: Arc<dyn QueryOperator<T>>, default: T) -> Self {
        Self { upstream, default }
    }
}

impl<T: Elem> QueryOperator<T> for DefaultIfEmpty<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        let results = self.upstream.open(settings)?;
        let data = match results {
            QueryResults::Indexible(data) => data,
            QueryResults::Partitioned(stream) => {
                let mut entries = materialize_keyed(stream, settings);
                entries.sort_by(|a, b| a.0.rank().cmp(&b.0.rank()));
                entries.into_iter().map(|(_, v)| v).collect()
            }
        };
        if data.is_empty() {
            Ok(QueryResults::Indexible(vec![self.default.clone()]))
        } else {
            Ok(QueryResults::Indexible(data))
        }
    }

    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        let items: Vec<T> = self.upstream.as_sequential(settings)?.collect();
        if items.is_empty() {
            Ok(Box::new(std::iter::once(self.default.clone())))
        } else {
            Ok(Box::new(items.into_iter()))
        }
    }

    fn take_error(&self) -> Option<EngineError> {
        self.upstream.take_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::source::Source;
    use crate::partitioners::striped_partition;

    /// A test-only operator that forces a [`QueryResults::Partitioned`]
    /// result (`Source::new` always yields `Indexible`), so `Take`/`Skip`/
    /// `TakeWhile`/`SkipWhile`'s heap/CAS-cell paths get exercised directly
    /// rather than only through the indexible fast path.
    struct PartitionedSource<T> {
        data: Mutex<Option<Vec<T>>>,
        dop: usize,
    }

    impl<T> PartitionedSource<T> {
        fn new(data: Vec<T>, dop: usize) -> Self {
            Self { data: Mutex::new(Some(data)), dop }
        }
    }

    impl<T: Elem> QueryOperator<T> for PartitionedSource<T> {
        fn open(&self, _settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
            let data = self.data.lock().take().unwrap();
            Ok(QueryResults::Partitioned(striped_partition(data, self.dop)))
        }

        fn as_sequential(&self, _settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
            let data = self.data.lock().take().unwrap();
            Ok(Box::new(data.into_iter()))
        }
    }

    #[test]
    fn select_maps_every_element() {
        let src = Arc::new(Source::new(vec![1, 2, 3]));
        let op = Select::new(src, Arc::new(|v: i32| Ok(v * 2)));
        let settings = QuerySettings::default();
        let out: Vec<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[test]
    fn where_keeps_only_matching_elements() {
        let src = Arc::new(Source::new(vec![1, 2, 3, 4, 5]));
        let op = Where::new(src, Arc::new(|v: &i32| Ok(v % 2 == 0)));
        let settings = QuerySettings::default();
        let out: Vec<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, vec![2, 4]);
    }

    #[test]
    fn take_keeps_the_first_n_by_order() {
        let src = Arc::new(Source::new((0..100).collect::<Vec<i32>>()));
        let op = Take::new(src, 5);
        let settings = QuerySettings::default();
        match op.open(&settings).unwrap() {
            QueryResults::Indexible(data) => assert_eq!(data, vec![0, 1, 2, 3, 4]),
            QueryResults::Partitioned(_) => panic!("take should resolve to indexible"),
        }
    }

    #[test]
    fn skip_drops_the_first_n_by_order() {
        let src = Arc::new(Source::new((0..10).collect::<Vec<i32>>()));
        let op = Skip::new(src, 7);
        let settings = QuerySettings::default();
        match op.open(&settings).unwrap() {
            QueryResults::Indexible(data) => assert_eq!(data, vec![7, 8, 9]),
            QueryResults::Partitioned(_) => panic!("skip should resolve to indexible"),
        }
    }

    #[test]
    fn take_over_a_partitioned_stream_uses_the_bounded_heap_and_stays_correct() {
        let src = Arc::new(PartitionedSource::new((0..200).collect::<Vec<i32>>(), 4));
        let op = Take::new(src, 10);
        let settings = QuerySettings::default();
        match op.open(&settings).unwrap() {
            QueryResults::Indexible(data) => assert_eq!(data, (0..10).collect::<Vec<i32>>()),
            QueryResults::Partitioned(_) => panic!("take should resolve to indexible"),
        }
    }

    #[test]
    fn skip_over_a_partitioned_stream_uses_the_bounded_heap_and_stays_correct() {
        let src = Arc::new(PartitionedSource::new((0..50).collect::<Vec<i32>>(), 4));
        let op = Skip::new(src, 45);
        let settings = QuerySettings::default();
        match op.open(&settings).unwrap() {
            QueryResults::Indexible(mut data) => {
                data.sort_unstable();
                assert_eq!(data, (45..50).collect::<Vec<i32>>());
            }
            QueryResults::Partitioned(_) => panic!("skip should resolve to indexible"),
        }
    }

    #[test]
    fn take_while_over_a_partitioned_stream_stops_at_the_first_failure() {
        let src = Arc::new(PartitionedSource::new((0..100).collect::<Vec<i32>>(), 4));
        let op = TakeWhile::new(src, Arc::new(|v: &i32| *v < 30));
        let settings = QuerySettings::default();
        let mut out = match op.open(&settings).unwrap() {
            QueryResults::Indexible(data) => data,
            QueryResults::Partitioned(_) => panic!("take_while should resolve to indexible"),
        };
        out.sort_unstable();
        assert_eq!(out, (0..30).collect::<Vec<i32>>());
    }

    #[test]
    fn skip_while_over_a_partitioned_stream_keeps_the_cutoff_and_everything_after() {
        let src = Arc::new(PartitionedSource::new((0..40).collect::<Vec<i32>>(), 4));
        let op = SkipWhile::new(src, Arc::new(|v: &i32| *v < 30));
        let settings = QuerySettings::default();
        let mut out = match op.open(&settings).unwrap() {
            QueryResults::Indexible(data) => data,
            QueryResults::Partitioned(_) => panic!("skip_while should resolve to indexible"),
        };
        out.sort_unstable();
        assert_eq!(out, (30..40).collect::<Vec<i32>>());
    }

    #[test]
    fn take_while_is_indexible_or_better_no_longer_forces_sequential_fallback() {
        let src: Arc<dyn QueryOperator<i32>> = Arc::new(Source::new(vec![1, 2, 3]));
        let op = TakeWhile::new(src, Arc::new(|v: &i32| *v < 2));
        assert!(!op.limits_parallelism());
    }

    #[test]
    fn reverse_reverses_the_whole_sequence() {
        let src = Arc::new(Source::new(vec![1, 2, 3]));
        let op = Reverse::new(src);
        let settings = QuerySettings::default();
        let out: Vec<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, vec![3, 2, 1]);
    }

    #[test]
    fn default_if_empty_substitutes_on_empty_input() {
        let src: Arc<dyn QueryOperator<i32>> = Arc::new(Source::new(Vec::new()));
        let op = DefaultIfEmpty::new(src, -1);
        let settings = QuerySettings::default();
        let out: Vec<i32> = op.as_sequential(&settings).unwrap().collect();
        assert_eq!(out, vec![-1]);
    }
}
