//! The operator-tree contract: every node in a query is a [`QueryOperator`],
//! `open`ed once at execution time into either a plain indexible buffer or a
//! partitioned stream (spec §3/§4.7).
//!
//! The trait/enum pairing mirrors the teacher's own `DynOp` trait (the thing
//! that knows how to be applied) alongside its `Node` enum (the thing that
//! knows how to be scheduled) — a small closed trait for per-element work
//! plus a separate type for "what shape did opening it produce", even though
//! none of the concrete methods survive from the teacher unchanged.

use crate::error::EngineError;
use crate::order_key::IndexState;
use crate::partition::PartitionedStream;
use crate::partitioners::contiguous_range_partition;
use crate::settings::QuerySettings;

/// The bound every element type flowing through the engine must satisfy,
/// mirroring the teacher's own `RFBound` (`'static + Send + Sync + Clone`):
/// `Clone` because partitioning, buffering, and the hash exchange all need
/// to duplicate elements across bucket/partition boundaries.
pub trait Elem: 'static + Send + Sync + Clone {}
impl<T: 'static + Send + Sync + Clone> Elem for T {}

/// What `open`ing a [`QueryOperator`] produces: either a plain,
/// randomly-indexible buffer (the strongest [`IndexState::Indexible`] tag,
/// e.g. straight off a `Vec` source with no operators applied yet) or an
/// already-partitioned stream.
pub enum QueryResults<T> {
    /// A flat buffer with O(1) indexing and a known length.
    Indexible(Vec<T>),
    /// An already-partitioned, possibly-lazy stream.
    Partitioned(PartitionedStream<T>),
}

impl<T: Elem> QueryResults<T> {
    /// Force this into a [`PartitionedStream`], splitting an `Indexible`
    /// buffer into `dop` contiguous ranges if needed.
    #[must_use]
    pub fn into_partitioned(self, dop: usize) -> PartitionedStream<T> {
        match self {
            QueryResults::Partitioned(stream) => stream,
            QueryResults::Indexible(data) => contiguous_range_partition(data, dop),
        }
    }

    /// The [`IndexState`] this result currently satisfies.
    #[must_use]
    pub fn index_state(&self) -> IndexState {
        match self {
            QueryResults::Indexible(_) => IndexState::Indexible,
            QueryResults::Partitioned(stream) => stream.index_state,
        }
    }
}

/// One node in the query's operator tree.
///
/// `open` is called exactly once per execution, by the driver, with the
/// settings already merged and the degree of parallelism already resolved.
/// `as_sequential` is the single-threaded fallback used when
/// [`limits_parallelism`](Self::limits_parallelism) returns true and the
/// caller hasn't requested [`crate::settings::ExecutionMode::ForceParallelism`].
pub trait QueryOperator<T: Elem>: Send + Sync {
    /// Open this operator (and transitively, its upstream) against the
    /// resolved settings, producing either an indexible buffer or a
    /// partitioned stream.
    ///
    /// # Errors
    /// Propagates any [`EngineError`] raised while opening this operator or
    /// any upstream operator.
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError>;

    /// Run this operator (and its upstream) single-threaded, without ever
    /// partitioning. Always available, even when `open` would refuse.
    ///
    /// # Errors
    /// Propagates any [`EngineError`] raised while running sequentially.
    fn as_sequential(&self, settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError>;

    /// True if this operator (or any upstream operator) cannot be safely
    /// parallelized — e.g. it depends on global, order-sensitive state.
    /// Default: inherits nothing, so leaf operators default to `false`.
    fn limits_parallelism(&self) -> bool {
        false
    }

    /// Retrieve (and clear) the first user-callback error any partition
    /// recorded while this operator's enumerators ran, if this operator
    /// invokes user code at all. Operators without a user callback inherit
    /// the default `None`; operators that do (`Select`, `Where`, ...) store
    /// one in a shared cell and stop that partition's enumeration early
    /// rather than letting a panic unwind across worker threads.
    fn take_error(&self) -> Option<EngineError> {
        None
    }
}
