//! Scalar search terminals (spec §4.4): `First`, `Last`, `Single`,
//! `ElementAt`, `Contains`, `Any`, `All`.
//!
//! Unlike `unary`/`binary`/`setops`, these never produce another
//! [`QueryOperator`] to chain further from — each is a terminal that
//! consumes the tree and returns one scalar, the same shape as the
//! teacher's `collection.rs` reduction entry points (`count`, `reduce`,
//! ...). `Any`/`Contains` can stop early the moment a match is found,
//! which on a partitioned stream means racing every partition and taking
//! whichever finds a hit first; the rest need the partitions merged back
//! into one order first, since "first"/"last"/"nth" are meaningless without
//! a total order.

use crate::error::EngineError;
use crate::query::{Elem, QueryOperator};
use crate::settings::QuerySettings;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Return the first element, if any.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn first<T: Elem>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<Option<T>, EngineError> {
    Ok(op.as_sequential(settings)?.next())
}

/// Return the last element, if any.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn last<T: Elem>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<Option<T>, EngineError> {
    Ok(op.as_sequential(settings)?.last())
}

/// Return the single element, erroring if the sequence has zero or more than
/// one element.
///
/// # Errors
/// Returns [`EngineError::InvalidOperation`] if the sequence is empty or has
/// more than one element; otherwise propagates errors from `op`.
pub fn single<T: Elem>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<T, EngineError> {
    let mut iter = op.as_sequential(settings)?;
    let first = iter.next().ok_or_else(|| EngineError::InvalidOperation {
        operator: "Single",
        message: "sequence contains no elements".to_string(),
    })?;
    if iter.next().is_some() {
        return Err(EngineError::InvalidOperation {
            operator: "Single",
            message: "sequence contains more than one element".to_string(),
        });
    }
    Ok(first)
}

/// Return the element at `index`, if the sequence is long enough.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn element_at<T: Elem>(op: &dyn QueryOperator<T>, index: u64, settings: &QuerySettings) -> Result<Option<T>, EngineError> {
    Ok(op.as_sequential(settings)?.nth(index as usize))
}

/// True if any element satisfies `predicate` (or, with no predicate, if the
/// sequence is non-empty). Races every partition, returning as soon as one
/// finds a match.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`, or a
/// [`EngineError::UserCallback`] if `predicate` panics via `catch_unwind`
/// upstream (callers pass an already-fallible-free closure here; `Where`
/// is the fallible entry point for predicate errors).
pub fn any<T: Elem>(
    op: &dyn QueryOperator<T>,
    predicate: Option<Arc<dyn Fn(&T) -> bool + Send + Sync>>,
    settings: &QuerySettings,
) -> Result<bool, EngineError> {
    let results = op.open(settings)?;
    match (results, predicate) {
        (crate::query::QueryResults::Indexible(data), None) => Ok(!data.is_empty()),
        (crate::query::QueryResults::Indexible(data), Some(p)) => Ok(data.iter().any(|v| p(v))),
        (crate::query::QueryResults::Partitioned(stream), predicate) => {
            let found = Arc::new(AtomicBool::new(false));
            let scheduler = settings.resolved_scheduler();
            let mut tasks: Vec<Box<dyn FnOnce() + Send + '_>> = Vec::new();
            for mut enumerator in stream.partitions.into_iter() {
                let found = Arc::clone(&found);
                let predicate = predicate.clone();
                tasks.push(Box::new(move || {
                    let mut elem = None;
                    let mut key = crate::order_key::OrderKey::Position(0);
                    while !found.load(AtomicOrdering::Relaxed) && enumerator.move_next(&mut elem, &mut key) {
                        let value = elem.take().unwrap();
                        let matches = predicate.as_ref().map_or(true, |p| p(&value));
                        if matches {
                            found.store(true, AtomicOrdering::Relaxed);
                            return;
                        }
                    }
                }));
            }
            scheduler.run_all(tasks);
            Ok(found.load(AtomicOrdering::Relaxed))
        }
    }
}

/// True if every element satisfies `predicate`, short-circuiting across
/// partitions on the first counterexample.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn all<T: Elem>(op: &dyn QueryOperator<T>, predicate: Arc<dyn Fn(&T) -> bool + Send + Sync>, settings: &QuerySettings) -> Result<bool, EngineError> {
    let negated: Arc<dyn Fn(&T) -> bool + Send + Sync> = Arc::new(move |v| !predicate(v));
    Ok(!any(op, Some(negated), settings)?)
}

/// True if `target` appears anywhere in the sequence.
///
/// # Errors
/// Propagates any [`EngineError`] raised opening or running `op`.
pub fn contains<T: Elem + PartialEq>(op: &dyn QueryOperator<T>, target: T, settings: &QuerySettings) -> Result<bool, EngineError> {
    let predicate: Arc<dyn Fn(&T) -> bool + Send + Sync> = Arc::new(move |v| *v == target);
    any(op, Some(predicate), settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::source::Source;

    #[test]
    fn first_and_last_read_the_ends_of_the_sequence() {
        let settings = QuerySettings::default();
        let src = Source::new(vec![1, 2, 3]);
        assert_eq!(first(&src, &settings).unwrap(), Some(1));
        let src = Source::new(vec![1, 2, 3]);
        assert_eq!(last(&src, &settings).unwrap(), Some(3));
    }

    #[test]
    fn single_errors_on_empty_or_multiple_elements() {
        let settings = QuerySettings::default();
        let empty: Source<i32> = Source::new(Vec::new());
        assert!(single(&empty, &settings).is_err());
        let multi = Source::new(vec![1, 2]);
        assert!(single(&multi, &settings).is_err());
        let one = Source::new(vec![42]);
        assert_eq!(single(&one, &settings).unwrap(), 42);
    }

    #[test]
    fn element_at_returns_none_past_the_end() {
        let settings = QuerySettings::default();
        let src = Source::new(vec![1, 2, 3]);
        assert_eq!(element_at(&src, 1, &settings).unwrap(), Some(2));
        let src = Source::new(vec![1, 2, 3]);
        assert_eq!(element_at(&src, 10, &settings).unwrap(), None);
    }

    #[test]
    fn any_and_all_evaluate_the_predicate() {
        let settings = QuerySettings::default();
        let src = Source::new(vec![1, 2, 3, 4]);
        assert!(any(&src, Some(Arc::new(|v: &i32| *v == 3)), &settings).unwrap());
        let src = Source::new(vec![2, 4, 6]);
        assert!(all(&src, Arc::new(|v: &i32| v % 2 == 0), &settings).unwrap());
        let src = Source::new(vec![2, 3, 6]);
        assert!(!all(&src, Arc::new(|v: &i32| v % 2 == 0), &settings).unwrap());
    }

    #[test]
    fn contains_finds_a_matching_element() {
        let settings = QuerySettings::default();
        let src = Source::new(vec![1, 2, 3]);
        assert!(contains(&src, 2, &settings).unwrap());
        let src = Source::new(vec![1, 2, 3]);
        assert!(!contains(&src, 99, &settings).unwrap());
    }
}
