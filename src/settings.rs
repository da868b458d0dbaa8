//! Query settings: the engine's entire configuration surface.
//!
//! Mirrors the teacher's `runner::{ExecMode, Runner}` in spirit (a plain enum
//! plus a plain struct, `num_cpus`-derived default), generalized to the six
//! fields `spec.md` §3/§6 specify. Settings are collected at each operator
//! constructor (a caller may pin a scheduler, a DOP, ...) and merged at
//! `open_query`/`execute_to_array` time; merging the same field twice is a
//! hard error (spec §3: "Merging two settings records fails if any single
//! field is set on both sides.").

use crate::cancellation::CancellationToken;
use crate::error::EngineError;
use std::sync::Arc;

/// Upper bound on the degree of parallelism, per spec §3/§6.
pub const MAX_DOP: usize = 63;

/// Whether the driver should try to run in parallel at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Fall back to sequential execution when the tree reports
    /// `limits_parallelism()`.
    #[default]
    Default,
    /// Always execute in parallel, even if the tree advises against it.
    ForceParallelism,
}

/// Which merge strategy family is preferred for ordered output (spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MergeOptions {
    /// Minimal buffering; hand off one element at a time.
    NotBuffered,
    /// Batch hand-offs (16 elements) for better throughput.
    #[default]
    AutoBuffered,
    /// Run every producer to completion before the consumer starts.
    FullyBuffered,
}

/// An opaque work-submission sink. The engine submits exactly one task per
/// worker partition per `open`; the default implementation uses
/// `rayon::scope`, which is the "host task scheduler" spec.md §5 treats as an
/// external collaborator.
pub trait TaskScheduler: Send + Sync {
    /// Run `tasks` to completion, each task corresponding to one partition.
    /// Implementations decide how (and on how many OS threads) to do so.
    fn run_all(&self, tasks: Vec<Box<dyn FnOnce() + Send + '_>>);
}

/// Default scheduler: `rayon::scope`, letting tasks borrow stack data.
#[derive(Clone, Copy, Debug, Default)]
pub struct RayonScheduler;

impl TaskScheduler for RayonScheduler {
    fn run_all(&self, tasks: Vec<Box<dyn FnOnce() + Send + '_>>) {
        rayon::scope(|s| {
            for task in tasks {
                s.spawn(move |_| task());
            }
        });
    }
}

/// The six-field settings record from spec §3, all optional at construction.
#[derive(Clone)]
pub struct QuerySettings {
    /// Work-submission sink; `None` means "use the process default"
    /// (`RayonScheduler`).
    pub task_scheduler: Option<Arc<dyn TaskScheduler>>,
    /// Number of worker partitions, `1..=63`.
    pub degree_of_parallelism: Option<usize>,
    /// Caller-supplied cancellation token, merged with an internal one by
    /// [`crate::cancellation::CancellationState`].
    pub cancellation_token: Option<CancellationToken>,
    /// `Default` or `ForceParallelism`.
    pub execution_mode: Option<ExecutionMode>,
    /// `NotBuffered` / `AutoBuffered` / `FullyBuffered`.
    pub merge_options: Option<MergeOptions>,
    /// Assigned at execution start; `None` until then.
    pub query_id: Option<u64>,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            task_scheduler: None,
            degree_of_parallelism: None,
            cancellation_token: None,
            execution_mode: None,
            merge_options: None,
            query_id: None,
        }
    }
}

impl QuerySettings {
    /// Merge `self` (operator-tree-supplied settings) with `other` (the
    /// caller's settings passed to `open_query`), returning an error if the
    /// same field is set (non-`None`) on both sides.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidOperation`] naming the first field found
    /// set on both sides.
    pub fn merge(self, other: QuerySettings) -> Result<QuerySettings, EngineError> {
        macro_rules! merge_field {
            ($field:ident, $name:literal) => {
                match (self.$field.clone(), other.$field.clone()) {
                    (Some(_), Some(_)) => {
                        return Err(EngineError::InvalidOperation {
                            operator: "QuerySettings::merge",
                            message: format!("field `{}` set on both sides", $name),
                        });
                    }
                    (Some(v), None) => Some(v),
                    (None, Some(v)) => Some(v),
                    (None, None) => None,
                }
            };
        }

        Ok(QuerySettings {
            task_scheduler: merge_field!(task_scheduler, "task_scheduler"),
            degree_of_parallelism: merge_field!(degree_of_parallelism, "degree_of_parallelism"),
            cancellation_token: merge_field!(cancellation_token, "cancellation_token"),
            execution_mode: merge_field!(execution_mode, "execution_mode"),
            merge_options: merge_field!(merge_options, "merge_options"),
            query_id: merge_field!(query_id, "query_id"),
        })
    }

    /// Resolve the effective degree of parallelism, applying the
    /// `min(num_cpus, 63)` default from spec §3/§6.
    #[must_use]
    pub fn resolved_dop(&self) -> usize {
        self.degree_of_parallelism
            .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_DOP))
            .clamp(1, MAX_DOP)
    }

    /// Resolve the effective execution mode, defaulting to `Default`.
    #[must_use]
    pub fn resolved_execution_mode(&self) -> ExecutionMode {
        self.execution_mode.unwrap_or_default()
    }

    /// Resolve the effective merge options, defaulting to `AutoBuffered`.
    #[must_use]
    pub fn resolved_merge_options(&self) -> MergeOptions {
        self.merge_options.unwrap_or_default()
    }

    /// Resolve the effective scheduler, defaulting to [`RayonScheduler`].
    #[must_use]
    pub fn resolved_scheduler(&self) -> Arc<dyn TaskScheduler> {
        self.task_scheduler
            .clone()
            .unwrap_or_else(|| Arc::new(RayonScheduler))
    }
}
