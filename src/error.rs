//! Typed error taxonomy for the engine.
//!
//! Internal code and the public driver surface in [`crate::driver`] both
//! raise and return [`EngineError`] directly, so callers match on the
//! taxonomy below without any `downcast_ref` indirection. `anyhow::Error`
//! only appears nested inside [`EngineError::UserCallback`], carrying
//! whatever error a caller-supplied selector or predicate raised.

use std::fmt;

/// The six error kinds the engine distinguishes.
///
/// Critical errors (`Critical`) are never constructed by this crate's own
/// logic; they exist so [`is_critical`] has something to say no to for every
/// other variant, and so a future FFI/panic boundary has a place to put a
/// caught `Box<dyn Any>` payload if it ever needs to.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Misuse detected at operator construction time (null selector, negative
    /// count, degree of parallelism out of range, ...). Fails immediately.
    #[error("argument error in `{operator}`: {message}")]
    Argument {
        /// The operator/site that rejected the argument.
        operator: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// An operation is invalid given the current data (empty source for a
    /// non-nullable aggregation, `Single`/`First` without a default, more than
    /// one match for `Single`, a duplicate field in a settings merge, ...).
    #[error("invalid operation in `{operator}`: {message}")]
    InvalidOperation {
        /// The operator/site that detected the problem.
        operator: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// Integer overflow while summing/counting.
    #[error("overflow in `{operator}`: {message}")]
    Overflow {
        /// The operator/site where overflow was detected.
        operator: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// A user-supplied selector/predicate/action raised.
    #[error("user callback in `{operator}` failed: {source}")]
    UserCallback {
        /// The operator/site that invoked the failing callback.
        operator: &'static str,
        /// The underlying error the callback raised.
        #[source]
        source: anyhow::Error,
    },

    /// The query was cancelled. `external` distinguishes a cancellation that
    /// bears the caller-supplied external token (must be surfaced as-is) from
    /// one that only bears the engine's internal token (folded into "other").
    #[error("query cancelled ({})", if *.external { "external token" } else { "internal/dispose" })]
    Cancelled {
        /// True if the *external* cancellation token fired.
        external: bool,
    },

    /// A condition that must never be swallowed: out-of-memory, stack
    /// overflow, null-deref, or thread-abort-equivalent. The engine's
    /// catch-all sites check [`is_critical`] and always re-raise these.
    #[error("critical failure: {0}")]
    Critical(String),
}

impl EngineError {
    /// Mirrors Design Note 9's "critical error predicate": everything except
    /// this must be caught and aggregated; this must always propagate intact.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        matches!(self, EngineError::Critical(_))
    }

    /// True if this is a cancellation bearing the *external* token — the only
    /// cancellation flavor the driver re-surfaces to the caller as-is.
    #[must_use]
    pub fn is_external_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled { external: true })
    }
}

/// Aggregates multiple worker-visible errors into one, following the spec's
/// "root task collects all workers' errors into one aggregated error at join"
/// rule: if every error is a non-external cancellation, collapse to a single
/// `Cancelled{external: false}`; if any is an external cancellation, surface
/// that one; otherwise wrap everything in `InvalidOperation`-shaped text
/// (the aggregate itself is not one of the six taxonomy members, it is a
/// carrier for however many of them actually fired).
#[derive(Debug)]
pub struct AggregatedError {
    errors: Vec<EngineError>,
}

impl AggregatedError {
    /// Build an aggregate from a (possibly empty) batch of worker errors.
    #[must_use]
    pub fn new(errors: Vec<EngineError>) -> Self {
        Self { errors }
    }

    /// Classify the aggregate per spec §7/§4.7 step 4: external cancellation
    /// wins outright, then any critical error wins, then all-cancellation
    /// collapses, then everything else is a genuine aggregated failure.
    #[must_use]
    pub fn classify(self) -> EngineError {
        if self.errors.is_empty() {
            return EngineError::Cancelled { external: false };
        }
        if let Some(crit) = self.errors.iter().find(|e| e.is_critical()) {
            return EngineError::Critical(crit.to_string());
        }
        if let Some(ext) = self.errors.iter().find(|e| e.is_external_cancellation()) {
            let _ = ext;
            return EngineError::Cancelled { external: true };
        }
        if self.errors.iter().all(|e| matches!(e, EngineError::Cancelled { .. })) {
            return EngineError::Cancelled { external: false };
        }
        EngineError::InvalidOperation {
            operator: "aggregate",
            message: self
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

impl fmt::Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} worker error(s)", self.errors.len())
    }
}

impl std::error::Error for AggregatedError {}
