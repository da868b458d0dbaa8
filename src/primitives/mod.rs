//! Shared low-level concurrency primitives used by the exchange, mergesort,
//! and merge stages (spec §5, Design Note 9).
//!
//! None of these have a teacher analog (Beam-batch leans entirely on
//! `rayon`'s fork-join, never hand-rolls a latch or a barrier); they are
//! grounded on the pack's `other_examples` pool/latch implementations, kept
//! in the teacher's terse, invariant-first comment register.

mod atomic_cell;
mod chunk_list;
mod countdown_latch;
mod max_heap;
mod reusable_barrier;

pub use atomic_cell::AtomicCell;
pub use chunk_list::ChunkList;
pub use countdown_latch::CountdownLatch;
pub use max_heap::{BoundedMaxHeap, HeapEntry};
pub use reusable_barrier::ReusableBarrier;
