//! The engine's entry points (spec §5): `open_query` resolves settings and
//! decides parallel vs. sequential execution; `execute_to_array` and
//! `for_all` are the two terminal shapes everything else (aggregate,
//! search, ToVec) is built from.
//!
//! No teacher analog exists for any of this (Beam-batch has no settings
//! merge, no cancellation, no parallel/sequential fallback decision); the
//! "caller settings merged with tree settings, cancellation polled, worker
//! errors aggregated at the join" shape is this crate's own, following
//! spec §5/§7 directly.

use crate::cancellation::{Cancelled, CancellationState};
use crate::error::EngineError;
use crate::order_key::{IndexState, KeyComparer, NaturalKeyComparer};
use crate::query::{Elem, QueryOperator, QueryResults};
use crate::settings::QuerySettings;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Resolve the settings this execution will actually run with: assign a
/// fresh `query_id`, and fail fast if the caller's settings collide with
/// whatever the operator tree itself requested.
///
/// # Errors
/// Returns [`EngineError::InvalidOperation`] if `caller_settings` sets a
/// field the tree's own settings already set.
pub fn resolve_settings(tree_settings: QuerySettings, caller_settings: QuerySettings) -> Result<QuerySettings, EngineError> {
    let mut merged = tree_settings.merge(caller_settings)?;
    merged.query_id = Some(merged.query_id.unwrap_or_else(|| NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed)));
    Ok(merged)
}

/// Open `op` against `settings`, honoring the parallel/sequential fallback
/// decision (spec §5): if the tree reports
/// [`QueryOperator::limits_parallelism`] and the caller hasn't forced
/// parallelism, run single-threaded via `as_sequential` instead of
/// `open`/merge.
///
/// # Errors
/// Propagates any [`EngineError`] raised while opening or merging `op`, or
/// an [`EngineError::Cancelled`] if a merged cancellation token had already
/// fired before execution started.
pub fn open_query<T: Elem>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
    let cancellation = CancellationState::new(settings.cancellation_token.clone());
    if let Some(kind) = cancellation.poll() {
        return Err(EngineError::Cancelled { external: kind == Cancelled::External });
    }

    let force_parallel = settings.resolved_execution_mode() == crate::settings::ExecutionMode::ForceParallelism;
    if op.limits_parallelism() && !force_parallel {
        log::debug!("query {:?}: falling back to sequential execution", settings.query_id);
        return op.as_sequential(settings);
    }
    log::debug!("query {:?}: opening in parallel, dop={}", settings.query_id, settings.resolved_dop());

    let results = op.open(settings)?;
    if let Some(err) = op.take_error() {
        return Err(err);
    }
    match results {
        QueryResults::Indexible(data) => Ok(Box::new(data.into_iter())),
        QueryResults::Partitioned(stream) => {
            let cmp: Option<Arc<dyn KeyComparer>> = if stream.index_state == IndexState::Shuffled {
                None
            } else {
                Some(Arc::new(NaturalKeyComparer))
            };
            let scheduler = settings.resolved_scheduler();
            Ok(crate::merge::merge(stream, settings, cmp, scheduler))
        }
    }
}

/// Run `op` to completion and collect the result into a `Vec<T>` (the
/// engine's `ToArray`/`ToList` entry point).
///
/// # Errors
/// Propagates any [`EngineError`] raised opening, merging, or cancelling
/// `op`.
pub fn execute_to_array<T: Elem>(op: &dyn QueryOperator<T>, settings: &QuerySettings) -> Result<Vec<T>, EngineError> {
    let items: Vec<T> = open_query(op, settings)?.collect();
    if let Some(err) = op.take_error() {
        return Err(err);
    }
    Ok(items)
}

/// Apply `action` to every element of `op` for effect only, in parallel,
/// with worker errors aggregated at the join (spec §4.4's `ForAll`).
///
/// # Errors
/// Returns the classified aggregate of whatever errors `action` raised
/// across partitions, or propagates a pre-existing cancellation/critical
/// error untouched.
pub fn for_all<T: Elem>(op: &dyn QueryOperator<T>, action: Arc<dyn Fn(T) -> Result<(), EngineError> + Send + Sync>, settings: &QuerySettings) -> Result<(), EngineError> {
    let cancellation = CancellationState::new(settings.cancellation_token.clone());
    if let Some(kind) = cancellation.poll() {
        return Err(EngineError::Cancelled { external: kind == Cancelled::External });
    }

    let force_parallel = settings.resolved_execution_mode() == crate::settings::ExecutionMode::ForceParallelism;
    if op.limits_parallelism() && !force_parallel {
        for value in op.as_sequential(settings)? {
            action(value)?;
        }
        return Ok(());
    }

    let dop = settings.resolved_dop();
    let stream = op.open(settings)?.into_partitioned(dop);
    let scheduler = settings.resolved_scheduler();
    crate::merge::for_effect_merge(stream, action, scheduler.as_ref())?;
    if let Some(err) = op.take_error() {
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::source::Source;
    use crate::operators::unary::Where;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn execute_to_array_collects_every_element() {
        let src = Source::new(vec![1, 2, 3, 4, 5]);
        let settings = resolve_settings(QuerySettings::default(), QuerySettings::default()).unwrap();
        let mut out = execute_to_array(&src, &settings).unwrap();
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn open_query_surfaces_a_pending_external_cancellation() {
        let token = crate::cancellation::CancellationToken::new();
        token.cancel();
        let src = Source::new(vec![1, 2, 3]);
        let settings = QuerySettings { cancellation_token: Some(token), ..Default::default() };
        let err = open_query(&src, &settings).unwrap_err();
        assert!(err.is_external_cancellation());
    }

    #[test]
    fn for_all_visits_every_surviving_element() {
        let src = Arc::new(Source::new(vec![1, 2, 3, 4, 5, 6]));
        let op = Where::new(src, Arc::new(|v: &i32| Ok(v % 2 == 0)));
        let settings = QuerySettings::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_action = Arc::clone(&seen);
        let action: Arc<dyn Fn(i32) -> Result<(), EngineError> + Send + Sync> = Arc::new(move |_| {
            seen_in_action.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        for_all(&op, action, &settings).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn resolve_settings_rejects_a_field_set_on_both_sides() {
        let tree = QuerySettings { degree_of_parallelism: Some(2), ..Default::default() };
        let caller = QuerySettings { degree_of_parallelism: Some(4), ..Default::default() };
        assert!(resolve_settings(tree, caller).is_err());
    }
}
