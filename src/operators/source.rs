//! The leaf operator: a materialized `Vec<T>`, an opaque caller `Iterator`,
//! or caller-pre-partitioned data handed to the engine.
//!
//! Grounded on the teacher's `Node::Source { payload, vec_ops, elem_tag }`
//! (a type-erased buffer plus the vtable needed to split it); here the
//! buffer is owned outright rather than type-erased, since every operator
//! in this engine is generic over its own concrete `T` instead of routing
//! through `Box<dyn Any>`. The three-variant shape mirrors spec §4.1's three
//! non-contiguous-range partitioner flavors ("striped" is a constructor on
//! the already-materialized `Vec` path, wired through
//! [`crate::partitioners::striped_partition`] the same way
//! `contiguous_range_partition` already was).

use crate::error::EngineError;
use crate::partitioners::{custom_partition, opaque_sequence_partition};
use crate::query::{Elem, QueryOperator, QueryResults};
use crate::settings::QuerySettings;
use parking_lot::Mutex;

enum SourceKind<T> {
    /// An owned, already-materialized buffer (spec §4.1, contiguous-range /
    /// striped: both partitioners start from random-accessible data).
    Vec(Vec<T>),
    /// A caller `Iterator` with no known length (spec §4.1, opaque-sequence).
    Opaque(Box<dyn Iterator<Item = T> + Send>),
    /// Caller-pre-partitioned data (spec §4.1, custom).
    Partitioned(Vec<Vec<T>>),
}

/// A source operator wrapping in-memory data: an owned `Vec<T>`, an opaque
/// `Iterator`, or data the caller has already split into partitions.
/// `open`/`as_sequential` each consume the underlying data exactly once; a
/// second call is a programmer error (reusing a query after execution),
/// reported as [`EngineError::InvalidOperation`].
pub struct Source<T> {
    data: Mutex<Option<SourceKind<T>>>,
}

impl<T> Source<T> {
    /// Wrap an owned, already-materialized buffer as a query source.
    #[must_use]
    pub fn new(data: Vec<T>) -> Self {
        Self { data: Mutex::new(Some(SourceKind::Vec(data))) }
    }

    /// Wrap an opaque `Iterator` of unknown length as a query source (spec
    /// §4.1, "opaque-sequence"). Partitions race each other for growing
    /// chunks pulled from `iter` under a shared lock; order keys are still
    /// dense and correctly assigned, so the resulting stream is tagged
    /// [`crate::order_key::IndexState::Correct`] rather than `Indexible`.
    #[must_use]
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        Self {
            data: Mutex::new(Some(SourceKind::Opaque(Box::new(iter)))),
        }
    }

    /// Wrap data the caller has already split into partitions as a query
    /// source (spec §4.1, "custom"). Each sub-`Vec`'s order is preserved
    /// within itself, but the partitioner has no way to relate sub-vectors
    /// to each other, so the resulting stream is tagged
    /// [`crate::order_key::IndexState::Shuffled`].
    #[must_use]
    pub fn from_partitions(parts: Vec<Vec<T>>) -> Self {
        Self {
            data: Mutex::new(Some(SourceKind::Partitioned(parts))),
        }
    }

    fn take(&self) -> Result<SourceKind<T>, EngineError> {
        self.data.lock().take().ok_or(EngineError::InvalidOperation {
            operator: "Source",
            message: "query already executed; a query cannot be opened twice".to_string(),
        })
    }
}

impl<T: Elem> QueryOperator<T> for Source<T> {
    fn open(&self, settings: &QuerySettings) -> Result<QueryResults<T>, EngineError> {
        match self.take()? {
            SourceKind::Vec(data) => Ok(QueryResults::Indexible(data)),
            SourceKind::Opaque(iter) => {
                let dop = settings.resolved_dop();
                Ok(QueryResults::Partitioned(opaque_sequence_partition(iter, dop)))
            }
            SourceKind::Partitioned(parts) => Ok(QueryResults::Partitioned(custom_partition(parts))),
        }
    }

    fn as_sequential(&self, _settings: &QuerySettings) -> Result<Box<dyn Iterator<Item = T> + Send>, EngineError> {
        match self.take()? {
            SourceKind::Vec(data) => Ok(Box::new(data.into_iter())),
            SourceKind::Opaque(iter) => Ok(iter),
            SourceKind::Partitioned(parts) => Ok(Box::new(parts.into_iter().flatten())),
        }
    }
}
