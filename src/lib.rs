//! # ironquery
//!
//! A **parallel, order-preserving query execution engine** for in-memory
//! sequences, in the shape of .NET's PLINQ / `System.Linq.Parallel`: a tree
//! of lazy operators is opened into per-worker partitions, pushed through a
//! hash-repartitioning exchange or a cooperative parallel mergesort when an
//! operator needs to destroy or impose order, and finally merged back into
//! one output sequence by whichever of five merge strategies the query's
//! ordering requirements call for.
//!
//! ## Key Features
//!
//! - **Operator tree, not eager evaluation** - building a query composes
//!   [`QueryOperator`] nodes; nothing runs until a terminal (`ToArray`,
//!   `ForAll`, `Count`, ...) opens the tree.
//! - **Index-state tracking** - every operator carries an [`order_key::IndexState`]
//!   tag (`Indexible < Correct < Increasing < Shuffled`) so the driver only
//!   pays for order-preservation when something downstream still needs it.
//! - **Hash-repartition exchange** - operators that need every matching key
//!   on one worker (`Distinct`, `Join`, `GroupBy`, set operations) redistribute
//!   partitions through [`exchange::hash_repartition`] rather than a global lock.
//! - **Cooperative parallel mergesort** - `OrderBy` and internal re-ordering
//!   use a barrier-synchronized pairwise merge
//!   ([`mergesort::cooperative_parallel_mergesort`], [`operators::sort_op`])
//!   instead of a single-threaded sort.
//! - **Five merge strategies** - pipelined, stop-and-go, fully-buffered,
//!   order-preserving pipelined, and for-effect, selected by
//!   [`merge::merge`]/[`merge::for_effect_merge`] from the query's settings
//!   and index state.
//! - **Cooperative cancellation** - an external [`cancellation::CancellationToken`]
//!   merges with an internal one; workers poll every 64 pulls rather than on
//!   every element.
//! - **Sequential fallback** - operators that cannot be parallelized
//!   correctly (`Zip`, `TakeWhile`, `SkipWhile`, ...) report
//!   [`QueryOperator::limits_parallelism`] and the driver falls back to
//!   `as_sequential` automatically.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ironquery::operators::source::Source;
//! use ironquery::operators::unary::Where;
//! use ironquery::settings::QuerySettings;
//! use ironquery::driver;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), ironquery::error::EngineError> {
//! let source = Arc::new(Source::new((0..100).collect::<Vec<i32>>()));
//! let evens = Where::new(source, Arc::new(|v: &i32| Ok(v % 2 == 0)));
//!
//! let settings = QuerySettings::default();
//! let results = driver::execute_to_array(&evens, &settings)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`error`] - the [`error::EngineError`] taxonomy and [`error::AggregatedError`]
//!   classification used when multiple workers fail concurrently.
//! - [`settings`] - [`settings::QuerySettings`], the six-field configuration
//!   record, and the [`settings::TaskScheduler`] collaborator trait.
//! - [`cancellation`] - cooperative cancellation tokens and poll gating.
//! - [`order_key`] - [`order_key::OrderKey`], [`order_key::IndexState`], and
//!   the [`order_key::KeyComparer`] trait used to compare them.
//! - [`primitives`] - hand-rolled concurrency building blocks (atomic cell,
//!   chunk list, countdown latch, bounded max-heap, reusable barrier) with
//!   no teacher analog, grounded on the wider example pack.
//! - [`partition`] - the [`partition::PartitionEnumerator`] contract and
//!   [`partition::PartitionedStream`], the unit every stage operates on.
//! - [`partitioners`] - turning one source sequence into `N` per-worker
//!   enumerators.
//! - [`query`] - [`query::Elem`], [`query::QueryResults`], and the
//!   [`query::QueryOperator`] trait every operator implements.
//! - [`exchange`] - hash-repartitioning partitions by key.
//! - [`mergesort`] - the key-only cooperative parallel mergesort used
//!   internally by the exchange/merge stages.
//! - [`channel`] - the bounded chunk channel and unbounded FIFO the merge
//!   strategies hand elements through.
//! - [`merge`] - the five merge strategies and their dispatcher.
//! - [`operators`] - concrete operator nodes (`Select`, `Where`, `Take`,
//!   `OrderBy`, `Join`, `GroupBy`, `Distinct`, aggregates, search terminals,
//!   ...).
//! - [`driver`] - `open_query`/`execute_to_array`/`for_all`, the engine's
//!   entry points.

pub mod cancellation;
pub mod channel;
pub mod driver;
pub mod error;
pub mod exchange;
pub mod merge;
pub mod mergesort;
pub mod operators;
pub mod order_key;
pub mod partition;
pub mod partitioners;
pub mod primitives;
pub mod query;
pub mod settings;

pub use cancellation::{CancellationState, CancellationToken, Cancelled};
pub use driver::{execute_to_array, for_all, open_query, resolve_settings};
pub use error::{AggregatedError, EngineError};
pub use order_key::{IndexState, KeyComparer, OrderKey};
pub use partition::{PartitionEnumerator, PartitionedStream};
pub use query::{Elem, QueryOperator, QueryResults};
pub use settings::{ExecutionMode, MergeOptions, QuerySettings, RayonScheduler, TaskScheduler};
