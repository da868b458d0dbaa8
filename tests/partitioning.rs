//! Source partitioners, exercised through the public API only.

mod common;

use ironquery::order_key::{IndexState, OrderKey};
use ironquery::partition::PartitionEnumerator;
use ironquery::partitioners::{contiguous_range_partition, custom_partition, opaque_sequence_partition, striped_partition};

fn drain<T>(mut e: Box<dyn PartitionEnumerator<T>>) -> Vec<T> {
    let mut elem = None;
    let mut key = OrderKey::Position(0);
    let mut out = Vec::new();
    while e.move_next(&mut elem, &mut key) {
        out.push(elem.take().unwrap());
    }
    out
}

#[test]
fn contiguous_range_preserves_every_element_and_order_per_partition() {
    common::init_logging();
    let data = common::shuffled_range(37);
    let stream = contiguous_range_partition(data.clone(), 5);
    assert_eq!(stream.index_state, IndexState::Indexible);
    let mut collected = Vec::new();
    for part in stream.partitions {
        collected.extend(drain(part));
    }
    assert_eq!(collected, data, "contiguous partitioning must preserve input order once concatenated");
}

#[test]
fn striped_partition_distributes_round_robin() {
    common::init_logging();
    let data: Vec<i32> = (0..20).collect();
    let stream = striped_partition(data, 4);
    assert_eq!(stream.index_state, IndexState::Increasing);
    assert_eq!(stream.partition_count(), 4);
    let mut all: Vec<i32> = stream.partitions.into_iter().flat_map(drain).collect();
    all.sort_unstable();
    assert_eq!(all, (0..20).collect::<Vec<_>>());
}

#[test]
fn opaque_sequence_partition_covers_an_unbounded_iterator_exactly_once() {
    common::init_logging();
    let stream = opaque_sequence_partition(0..500i32, 6);
    assert_eq!(stream.index_state, IndexState::Correct);
    let mut all: Vec<i32> = stream.partitions.into_iter().flat_map(drain).collect();
    all.sort_unstable();
    assert_eq!(all, (0..500).collect::<Vec<_>>());
}

#[test]
fn custom_partition_wraps_caller_supplied_groups_as_shuffled() {
    common::init_logging();
    let stream = custom_partition(vec![vec!["a", "b"], vec!["c"], vec![]]);
    assert_eq!(stream.index_state, IndexState::Shuffled);
    assert_eq!(stream.partition_count(), 3);
    let all: Vec<&str> = stream.partitions.into_iter().flat_map(drain).collect();
    assert_eq!(all, vec!["a", "b", "c"]);
}

#[test]
fn degree_of_parallelism_of_one_still_covers_everything() {
    common::init_logging();
    let data: Vec<i32> = (0..10).collect();
    let stream = contiguous_range_partition(data.clone(), 1);
    assert_eq!(stream.partition_count(), 1);
    let all: Vec<i32> = stream.partitions.into_iter().flat_map(drain).collect();
    assert_eq!(all, data);
}
