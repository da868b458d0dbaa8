//! Scalar aggregation terminals (spec §4.4): `Count`, `Sum`, `Min`, `Max`,
//! `Average`.
//!
//! Each partition folds its own elements first (mirroring the teacher's
//! `combine_globally`: local `create`/`add_input` before any cross-partition
//! `merge`), then the per-partition partials are folded again on the
//! driver thread. No decimal/checked-arithmetic crate is pulled in for
//! this — `Sum`/`Average` use plain `Add`/`Into<f64>` the way the teacher's
//! own `Sum<T>`/`AverageF64` combiners do, and `Count` reports overflow via
//! `checked_add` rather than silently wrapping.

use crate::error::EngineError;
use crate::order_key::OrderKey;
use crate::primitives::AtomicCell;
use crate::query::{Elem, QueryOperator};
use crate::settings::QuerySettings;
use ordered_float::OrderedFloat;
use std::ops::Add;
use std::sync::Arc;

fn fold_partitions<T: Elem, A: Send + 'static>(
    op: &dyn QueryOperator<T>,
    settings: &QuerySettings,
    create: impl Fn() -> A + Send + Sync + 'static,
    add: impl Fn(&mut A, T) + Send + Sync + 'static,
) -> Result<Vec<A>, EngineError> {
    let dop = settings.resolved_dop();
    let stream = op.open(settings)?.into_partitioned(dop);
    let n = stream.partition_count();
    let scheduler = settings.resolved_scheduler();
    let create = Arc::new(create);
    let add = Arc::new(add);
    let results: Arc<Vec<AtomicCell<A>>> = Arc::new((0..n).map(|_| AtomicCell::new()).collect());
    let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
    for (i, mut enumerator) in stream.partitions.into_iter().enumerate() {
        let results = Arc::clone(&results);
        let create = Arc::clone(&create);
        let add = Arc::clone(&add);
        tasks.push(Box::new(move || {
            let mut acc = create();
            let mut elem = None;
            let mut key = OrderKey::Position(0);
            while enumerator.move_next(&mut elem, &mut key) {
                add(&mut acc, elem.take().unwrap());
            }
            results[i].put(acc);
        }));
    }
    scheduler.run_all(tasks);
    Ok((0..n).filter_map(|i| results[i].take()).collect())
}

/// Count the elements in the sequence.
///
/// # Errors
/// Returns [`EngineError::Overflow`] if the count exceeds `u64::MAX`
/// (practically unreachable, but checked rather than wrapped); otherwise
/// propagates errors from `op`.
pub fn count<T: Elem>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<u64, EngineError> {
    let partials = fold_partitions(op, settings, || 0u64, |acc, _| *acc += 1)?;
    let mut total = 0u64;
    for partial in partials {
        total = total.checked_add(partial).ok_or_else(|| EngineError::Overflow {
            operator: "Count",
            message: "element count overflowed u64".to_string(),
        })?;
    }
    Ok(total)
}

/// Sum the elements in the sequence using `T`'s own `Add`, starting from
/// `T::default()` (`0` for every numeric type the engine is exercised
/// against).
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn sum<T: Elem + Add<Output = T> + Default>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<T, EngineError> {
    let partials = fold_partitions(op, settings, T::default, |acc, v| *acc = std::mem::take(acc) + v)?;
    Ok(partials.into_iter().fold(T::default(), |a, b| a + b))
}

/// The smallest element, or `None` if the sequence is empty.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn min<T: Elem + Ord>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<Option<T>, EngineError> {
    let partials = fold_partitions(op, settings, || None::<T>, |acc, v| {
        *acc = Some(match acc.take() {
            Some(current) if current <= v => current,
            _ => v,
        });
    })?;
    Ok(partials.into_iter().flatten().min())
}

/// The largest element, or `None` if the sequence is empty.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn max<T: Elem + Ord>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<Option<T>, EngineError> {
    let partials = fold_partitions(op, settings, || None::<T>, |acc, v| {
        *acc = Some(match acc.take() {
            Some(current) if current >= v => current,
            _ => v,
        });
    })?;
    Ok(partials.into_iter().flatten().max())
}

/// Pairwise float minimum treating NaN as smaller than every other value
/// (spec §4.4), the opposite of `OrderedFloat`'s own `Ord` (which sorts NaN
/// as the *greatest* value) — so NaN is special-cased first and
/// `OrderedFloat` only ever compares two known-real values.
fn float_min(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        a
    } else if b.is_nan() {
        b
    } else if OrderedFloat(a) <= OrderedFloat(b) {
        a
    } else {
        b
    }
}

/// Pairwise float maximum treating NaN as smaller than every other value:
/// a NaN next to a real value loses. See [`float_min`].
fn float_max(a: f64, b: f64) -> f64 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else if OrderedFloat(a) >= OrderedFloat(b) {
        a
    } else {
        b
    }
}

fn float_min_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        a
    } else if b.is_nan() {
        b
    } else if OrderedFloat(a) <= OrderedFloat(b) {
        a
    } else {
        b
    }
}

fn float_max_f32(a: f32, b: f32) -> f32 {
    if a.is_nan() {
        b
    } else if b.is_nan() {
        a
    } else if OrderedFloat(a) >= OrderedFloat(b) {
        a
    } else {
        b
    }
}

/// The smallest `f64`, treating NaN as smaller than every other value (spec
/// §4.4's float ordering rule), or `None` if the sequence is empty. The
/// generic [`min`] cannot be instantiated over `f64`/`f32` at all (neither
/// implements `Ord`), which is why floats get their own entry point rather
/// than a blanket impl.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn min_f64(op: &dyn QueryOperator<f64>, settings: &QuerySettings) -> Result<Option<f64>, EngineError> {
    let partials = fold_partitions(op, settings, || None::<f64>, |acc, v| {
        *acc = Some(match acc.take() {
            Some(current) => float_min(current, v),
            None => v,
        });
    })?;
    Ok(partials.into_iter().flatten().reduce(float_min))
}

/// The largest `f64`, treating NaN as smaller than every other value, or
/// `None` if the sequence is empty. See [`min_f64`].
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn max_f64(op: &dyn QueryOperator<f64>, settings: &QuerySettings) -> Result<Option<f64>, EngineError> {
    let partials = fold_partitions(op, settings, || None::<f64>, |acc, v| {
        *acc = Some(match acc.take() {
            Some(current) => float_max(current, v),
            None => v,
        });
    })?;
    Ok(partials.into_iter().flatten().reduce(float_max))
}

/// `f32` counterpart of [`min_f64`].
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn min_f32(op: &dyn QueryOperator<f32>, settings: &QuerySettings) -> Result<Option<f32>, EngineError> {
    let partials = fold_partitions(op, settings, || None::<f32>, |acc, v| {
        *acc = Some(match acc.take() {
            Some(current) => float_min_f32(current, v),
            None => v,
        });
    })?;
    Ok(partials.into_iter().flatten().reduce(float_min_f32))
}

/// `f32` counterpart of [`max_f64`].
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn max_f32(op: &dyn QueryOperator<f32>, settings: &QuerySettings) -> Result<Option<f32>, EngineError> {
    let partials = fold_partitions(op, settings, || None::<f32>, |acc, v| {
        *acc = Some(match acc.take() {
            Some(current) => float_max_f32(current, v),
            None => v,
        });
    })?;
    Ok(partials.into_iter().flatten().reduce(float_max_f32))
}

/// The arithmetic mean of the sequence, or `None` if it is empty.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn average<T>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<Option<f64>, EngineError>
where
    T: Elem + Into<f64>,
{
    let partials = fold_partitions(op, settings, || (0f64, 0u64), |acc, v| {
        acc.0 += v.into();
        acc.1 += 1;
    })?;
    let (sum, count) = partials.into_iter().fold((0f64, 0u64), |a, b| (a.0 + b.0, a.1 + b.1));
    if count == 0 {
        Ok(None)
    } else {
        Ok(Some(sum / count as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::source::Source;

    #[test]
    fn count_counts_every_element() {
        let src = Source::new(vec![1, 2, 3, 4, 5]);
        let settings = QuerySettings::default();
        assert_eq!(count(&src, &settings).unwrap(), 5);
    }

    #[test]
    fn sum_adds_every_element() {
        let src = Source::new(vec![1, 2, 3, 4, 5]);
        let settings = QuerySettings::default();
        assert_eq!(sum(&src, &settings).unwrap(), 15);
    }

    #[test]
    fn min_and_max_find_the_extremes() {
        let src = Source::new(vec![5, 1, 9, 3, 7]);
        let settings = QuerySettings::default();
        assert_eq!(min(&src, &settings).unwrap(), Some(1));
        let src = Source::new(vec![5, 1, 9, 3, 7]);
        assert_eq!(max(&src, &settings).unwrap(), Some(9));
    }

    #[test]
    fn min_and_max_on_empty_sequence_are_none() {
        let empty: Source<i32> = Source::new(Vec::new());
        let settings = QuerySettings::default();
        assert_eq!(min(&empty, &settings).unwrap(), None);
        let empty: Source<i32> = Source::new(Vec::new());
        assert_eq!(max(&empty, &settings).unwrap(), None);
    }

    #[test]
    fn min_f64_treats_nan_as_smaller_than_everything() {
        let src = Source::new(vec![5.0, f64::NAN, 1.0, 3.0]);
        let settings = QuerySettings::default();
        assert!(min_f64(&src, &settings).unwrap().unwrap().is_nan());
    }

    #[test]
    fn max_f64_ignores_nan_when_a_larger_real_value_exists() {
        let src = Source::new(vec![5.0, f64::NAN, 1.0, 9.0]);
        let settings = QuerySettings::default();
        assert_eq!(max_f64(&src, &settings).unwrap(), Some(9.0));
    }

    #[test]
    fn min_max_f32_handle_nan_consistently_with_f64() {
        let src = Source::new(vec![2.0f32, f32::NAN, -4.0]);
        let settings = QuerySettings::default();
        assert!(min_f32(&src, &settings).unwrap().unwrap().is_nan());
        let src = Source::new(vec![2.0f32, f32::NAN, -4.0]);
        assert_eq!(max_f32(&src, &settings).unwrap(), Some(2.0));
    }

    #[test]
    fn min_f64_on_empty_sequence_is_none() {
        let empty: Source<f64> = Source::new(Vec::new());
        let settings = QuerySettings::default();
        assert_eq!(min_f64(&empty, &settings).unwrap(), None);
    }

    #[test]
    fn average_computes_the_arithmetic_mean() {
        let src = Source::new(vec![1i32, 2, 3, 4]);
        let settings = QuerySettings::default();
        assert_eq!(average(&src, &settings).unwrap(), Some(2.5));
    }

    #[test]
    fn average_on_empty_sequence_is_none() {
        let empty: Source<i32> = Source::new(Vec::new());
        let settings = QuerySettings::default();
        assert_eq!(average(&empty, &settings).unwrap(), None);
    }
}
