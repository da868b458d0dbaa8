//! The driver's entry points, settings merge, and cancellation wiring.

mod common;

use ironquery::driver;
use ironquery::error::EngineError;
use ironquery::operators::source::Source;
use ironquery::operators::unary::Where;
use ironquery::settings::{ExecutionMode, QuerySettings};
use ironquery::{CancellationToken, QueryOperator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn execute_to_array_runs_a_whole_tree_end_to_end() {
    common::init_logging();
    let src = Arc::new(Source::new((0..1000).collect::<Vec<i32>>()));
    let op = Where::new(src, Arc::new(|v: &i32| Ok(v % 7 == 0)));
    let settings = QuerySettings::default();
    let mut out = driver::execute_to_array(&op, &settings).unwrap();
    out.sort_unstable();
    let expected: Vec<i32> = (0..1000).filter(|v| v % 7 == 0).collect();
    assert_eq!(out, expected);
}

#[test]
fn resolve_settings_merges_disjoint_caller_and_tree_settings() {
    common::init_logging();
    let tree = QuerySettings { degree_of_parallelism: Some(2), ..Default::default() };
    let caller = QuerySettings { execution_mode: Some(ExecutionMode::ForceParallelism), ..Default::default() };
    let merged = driver::resolve_settings(tree, caller).unwrap();
    assert_eq!(merged.resolved_dop(), 2);
    assert_eq!(merged.resolved_execution_mode(), ExecutionMode::ForceParallelism);
    assert!(merged.query_id.is_some());
}

#[test]
fn resolve_settings_rejects_the_same_field_set_on_both_sides() {
    common::init_logging();
    let tree = QuerySettings { degree_of_parallelism: Some(2), ..Default::default() };
    let caller = QuerySettings { degree_of_parallelism: Some(4), ..Default::default() };
    let err = driver::resolve_settings(tree, caller).unwrap_err();
    assert!(matches!(err, EngineError::InvalidOperation { .. }));
}

#[test]
fn a_fired_external_cancellation_token_is_surfaced_before_the_query_opens() {
    common::init_logging();
    let token = CancellationToken::new();
    token.cancel();
    let src = Source::new((0..10).collect::<Vec<i32>>());
    let settings = QuerySettings { cancellation_token: Some(token), ..Default::default() };
    let err = driver::open_query(&src, &settings).unwrap_err();
    assert!(err.is_external_cancellation());
}

#[test]
fn an_unfired_cancellation_token_does_not_block_execution() {
    common::init_logging();
    let token = CancellationToken::new();
    let src = Source::new(vec![1, 2, 3]);
    let settings = QuerySettings { cancellation_token: Some(token), ..Default::default() };
    let out = driver::execute_to_array(&src, &settings).unwrap();
    assert_eq!(out, vec![1, 2, 3]);
}

#[test]
fn for_all_aggregates_across_every_partition() {
    common::init_logging();
    let src = Source::new((0..500).collect::<Vec<i32>>());
    let visits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&visits);
    let action: Arc<dyn Fn(i32) -> Result<(), EngineError> + Send + Sync> = Arc::new(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    });
    let settings = QuerySettings { execution_mode: Some(ExecutionMode::ForceParallelism), ..Default::default() };
    driver::for_all(&src, action, &settings).unwrap();
    assert_eq!(visits.load(Ordering::Relaxed), 500);
}

#[test]
fn force_parallelism_still_runs_an_operator_that_otherwise_limits_parallelism() {
    common::init_logging();
    use ironquery::operators::unary::TakeWhile;
    let src = Arc::new(Source::new(vec![1, 2, 3, 4]));
    let op = TakeWhile::new(src, Arc::new(|v: &i32| *v < 3));
    assert!(op.limits_parallelism());
    let settings = QuerySettings { execution_mode: Some(ExecutionMode::ForceParallelism), ..Default::default() };
    let out = driver::execute_to_array(&op, &settings).unwrap();
    assert_eq!(out, vec![1, 2]);
}
