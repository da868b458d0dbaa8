//! Property-based checks for the cross-cutting invariants the engine promises
//! regardless of how many partitions a query happens to run with: every
//! element the source produced comes out the other end exactly once, and
//! parallel execution agrees with sequential execution on the resulting
//! multiset.

mod common;

use ironquery::operators::aggregate;
use ironquery::operators::setops::Distinct;
use ironquery::operators::sort_op::OrderBy;
use ironquery::operators::source::Source;
use ironquery::operators::unary::{Select, Skip, Take, Where};
use ironquery::query::QueryOperator;
use ironquery::settings::QuerySettings;
use ironquery::{driver, EngineError};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn multiset(values: &[i32]) -> HashMap<i32, usize> {
    let mut counts = HashMap::new();
    for &v in values {
        *counts.entry(v).or_insert(0usize) += 1;
    }
    counts
}

fn settings_with_dop(dop: usize) -> QuerySettings {
    common::init_logging();
    QuerySettings { degree_of_parallelism: Some(dop), ..Default::default() }
}

proptest! {
    #[test]
    fn where_preserves_the_multiset_of_matching_elements_at_any_dop(
        data in proptest::collection::vec(-50i32..50, 0..200),
        dop in 1usize..16,
    ) {
        let settings = settings_with_dop(dop);
        let op = Where::new(Arc::new(Source::new(data.clone())), Arc::new(|v: &i32| Ok(v % 2 == 0)));
        let out = driver::execute_to_array(&op, &settings).unwrap();
        let expected: Vec<i32> = data.into_iter().filter(|v| v % 2 == 0).collect();
        prop_assert_eq!(multiset(&out), multiset(&expected));
    }

    #[test]
    fn select_then_where_agrees_across_every_degree_of_parallelism(
        data in proptest::collection::vec(0i32..1000, 0..300),
        dop_a in 1usize..16,
        dop_b in 1usize..16,
    ) {
        let op_a = Where::new(Arc::new(Select::new(Arc::new(Source::new(data.clone())), Arc::new(|v: i32| Ok(v * 3)))), Arc::new(|v: &i32| Ok(v % 5 != 0)));
        let out_a = driver::execute_to_array(&op_a, &settings_with_dop(dop_a)).unwrap();

        let op_b = Where::new(Arc::new(Select::new(Arc::new(Source::new(data)), Arc::new(|v: i32| Ok(v * 3)))), Arc::new(|v: &i32| Ok(v % 5 != 0)));
        let out_b = driver::execute_to_array(&op_b, &settings_with_dop(dop_b)).unwrap();

        prop_assert_eq!(multiset(&out_a), multiset(&out_b));
    }

    #[test]
    fn order_by_is_idempotent_once_already_sorted(
        data in proptest::collection::vec(-200i32..200, 0..200),
    ) {
        let settings = QuerySettings::default();
        let op = OrderBy::new(Arc::new(Source::new(data.clone())), Arc::new(|a: &i32, b: &i32| a.cmp(b)));
        let once = driver::execute_to_array(&op, &settings).unwrap();

        let op_twice = OrderBy::new(Arc::new(Source::new(once.clone())), Arc::new(|a: &i32, b: &i32| a.cmp(b)));
        let twice = driver::execute_to_array(&op_twice, &settings).unwrap();

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn take_and_skip_partition_an_ordered_sequence_without_overlap_or_gap(
        data in proptest::collection::vec(0i32..500, 1..200),
        cut in 0usize..200,
    ) {
        let cut = cut.min(data.len());
        let ordered = OrderBy::new(Arc::new(Source::new(data.clone())), Arc::new(|a: &i32, b: &i32| a.cmp(b)));
        let expected: Vec<i32> = { let mut d = data.clone(); d.sort_unstable(); d };

        let take = Take::new(Arc::new(OrderBy::new(Arc::new(Source::new(data.clone())), Arc::new(|a: &i32, b: &i32| a.cmp(b)))), cut as u64);
        let skip = Skip::new(Arc::new(ordered), cut as u64);

        let settings = QuerySettings::default();
        let head = driver::execute_to_array(&take, &settings).unwrap();
        let tail = driver::execute_to_array(&skip, &settings).unwrap();

        prop_assert_eq!(head, &expected[..cut]);
        prop_assert_eq!(tail, &expected[cut..]);
    }

    #[test]
    fn distinct_never_exceeds_the_source_count_and_drops_no_value(
        data in proptest::collection::vec(0i32..20, 0..200),
        dop in 1usize..16,
    ) {
        let settings = settings_with_dop(dop);
        let op = Distinct::new(Arc::new(Source::new(data.clone())));
        let out = driver::execute_to_array(&op, &settings).unwrap();

        prop_assert!(out.len() <= data.len());
        let unique: std::collections::HashSet<i32> = data.iter().copied().collect();
        let out_set: std::collections::HashSet<i32> = out.into_iter().collect();
        prop_assert_eq!(unique, out_set);
    }

    #[test]
    fn count_and_sum_agree_with_plain_iterator_math_at_any_dop(
        data in proptest::collection::vec(-1000i32..1000, 0..500),
        dop in 1usize..16,
    ) {
        let settings = settings_with_dop(dop);
        let src = Source::new(data.clone());
        let count = aggregate::count(&src, &settings).unwrap();
        prop_assert_eq!(count, data.len() as u64);

        let src = Source::new(data.clone());
        let sum: i32 = aggregate::sum(&src, &settings).unwrap();
        let expected: i32 = data.iter().sum();
        prop_assert_eq!(sum, expected);
    }

    #[test]
    fn for_all_visits_exactly_the_elements_open_query_would_collect(
        data in proptest::collection::vec(0i32..100, 0..200),
        dop in 1usize..16,
    ) {
        let settings = settings_with_dop(dop);
        let src = Source::new(data.clone());
        let collected = driver::execute_to_array(&src, &settings).unwrap();

        let visited: Arc<std::sync::Mutex<Vec<i32>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let visited_in_action = Arc::clone(&visited);
        let action: Arc<dyn Fn(i32) -> Result<(), EngineError> + Send + Sync> = Arc::new(move |v: i32| {
            visited_in_action.lock().unwrap().push(v);
            Ok(())
        });
        let src = Source::new(data);
        driver::for_all(&src, action, &settings).unwrap();

        prop_assert_eq!(multiset(&collected), multiset(&visited.lock().unwrap()));
    }
}
