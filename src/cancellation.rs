//! Cancellation state: merges an external cancel signal with an internal one.
//!
//! Spec §3: "Holds the external cancel token, an internal cancel source
//! linked to it, the merged token derived from both, and a shared
//! 'top-level disposed' flag. Any operation that sees the merged token fire
//! must surface a distinguishable 'cancelled' outcome, not a generic error."
//!
//! No teacher analog exists (Beam-batch has no cancellation token); the
//! atomic-flag-plus-poll-interval shape is modeled on the pack's
//! `other_examples/18d3bf69_shadow-shadow__...pools-bounded.rs` bounded-pool
//! cancellation flag.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Number of pulls between cancellation polls, per spec §4.1/§5:
/// "Cancellation is checked every 64 pulls (`POLL_INTERVAL = 63`)."
pub const POLL_INTERVAL: u64 = 63;

/// A caller-supplied cancellation signal, external to the engine.
///
/// This is intentionally a thin `Arc<AtomicBool>` wrapper rather than a rich
/// trait: the spec treats the token as an opaque external collaborator (spec
/// §6: "`cancellation_token` | opaque"), so the engine only ever needs to
/// read-or-flip one bit.
#[derive(Clone)]
pub struct CancellationToken {
    flag: Arc<CachePadded<AtomicBool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(CachePadded::new(AtomicBool::new(false))),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Merges an external token, an internal (dispose-triggered) token, and a
/// shared "top-level disposed" flag into one state every worker can poll.
#[derive(Clone)]
pub struct CancellationState {
    external: Option<CancellationToken>,
    internal: CancellationToken,
    disposed: Arc<CachePadded<AtomicBool>>,
}

/// The distinguishable outcome a worker must surface when the merged token
/// has fired, rather than a generic error (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cancelled {
    /// The *external* token fired — must be surfaced to the caller as-is.
    External,
    /// Only the internal (dispose) token fired — swallowed by the driver.
    Internal,
}

impl CancellationState {
    /// Build a cancellation state from an optional external token.
    #[must_use]
    pub fn new(external: Option<CancellationToken>) -> Self {
        Self {
            external,
            internal: CancellationToken::new(),
            disposed: Arc::new(CachePadded::new(AtomicBool::new(false))),
        }
    }

    /// Cancel the internal token. Called by the driver's dispose path.
    pub fn cancel_internal(&self) {
        self.internal.cancel();
    }

    /// Mark the query disposed. Subsequent `is_disposed()` calls return true.
    pub fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    /// True once [`mark_disposed`](Self::mark_disposed) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Poll the merged token. Returns `None` while running, or `Some(kind)`
    /// distinguishing which side fired.
    #[must_use]
    pub fn poll(&self) -> Option<Cancelled> {
        if let Some(ext) = &self.external {
            if ext.is_cancelled() {
                log::warn!("cancellation observed: external token fired");
                return Some(Cancelled::External);
            }
        }
        if self.internal.is_cancelled() {
            log::debug!("cancellation observed: internal token fired");
            return Some(Cancelled::Internal);
        }
        None
    }

    /// Convenience: true if either side of the merged token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.poll().is_some()
    }
}

/// A per-worker pull counter that checks cancellation every
/// [`POLL_INTERVAL`] pulls, matching spec §4.1: "Cancellation is checked
/// every 64 pulls inside every partitioner and operator enumerator."
pub struct PollGate {
    count: u64,
}

impl Default for PollGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PollGate {
    /// Construct a fresh gate.
    #[must_use]
    pub fn new() -> Self {
        Self { count: 0 }
    }

    /// Call once per pulled element. Returns the cancellation outcome only
    /// on the pulls where a check is actually due; `None` otherwise *and*
    /// while not cancelled.
    pub fn tick(&mut self, state: &CancellationState) -> Option<Cancelled> {
        self.count += 1;
        if self.count % (POLL_INTERVAL + 1) == 0 {
            state.poll()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_cancellation_is_distinguished_from_internal() {
        let ext = CancellationToken::new();
        let state = CancellationState::new(Some(ext.clone()));
        assert_eq!(state.poll(), None);
        ext.cancel();
        assert_eq!(state.poll(), Some(Cancelled::External));
    }

    #[test]
    fn internal_cancellation_alone_is_internal() {
        let state = CancellationState::new(None);
        assert_eq!(state.poll(), None);
        state.cancel_internal();
        assert_eq!(state.poll(), Some(Cancelled::Internal));
    }

    #[test]
    fn poll_gate_fires_every_64_pulls() {
        let state = CancellationState::new(None);
        state.cancel_internal();
        let mut gate = PollGate::new();
        let mut first_hit = None;
        for i in 1..=200u64 {
            if gate.tick(&state).is_some() {
                first_hit = Some(i);
                break;
            }
        }
        assert_eq!(first_hit, Some(POLL_INTERVAL + 1));
    }
}
