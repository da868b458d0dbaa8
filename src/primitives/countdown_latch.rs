//! A one-shot countdown latch: N parties count down, everyone waits until
//! the count reaches zero.
//!
//! Grounded on the pack's
//! `other_examples/18d3bf69_shadow-shadow__...pools-bounded.rs`
//! `count_down_latch` usage (a worker pool's "main thread waits for all
//! threads to finish a round" pattern), reimplemented here with
//! `parking_lot` since that is already this crate's lock of choice
//! ([`crate::channel`]).

use parking_lot::{Condvar, Mutex};

/// A countdown latch usable from any number of parties. Every `count_down`
/// call decrements the counter; `wait` blocks until it reaches zero.
///
/// Per Design Note 9's "monitor-pulse semantics" guidance, the wait loop
/// rechecks the predicate after every wake rather than assuming a single
/// `notify_all` reaches exactly the waiters it should.
pub struct CountdownLatch {
    state: Mutex<u64>,
    condvar: Condvar,
}

impl CountdownLatch {
    /// Build a latch that requires `count` calls to [`count_down`](Self::count_down).
    #[must_use]
    pub fn new(count: u64) -> Self {
        Self {
            state: Mutex::new(count),
            condvar: Condvar::new(),
        }
    }

    /// Decrement the counter by one. Wakes all waiters once it reaches zero.
    pub fn count_down(&self) {
        let mut count = self.state.lock();
        if *count == 0 {
            return;
        }
        *count -= 1;
        if *count == 0 {
            self.condvar.notify_all();
        }
    }

    /// Block until the counter reaches zero.
    pub fn wait(&self) {
        let mut count = self.state.lock();
        while *count != 0 {
            self.condvar.wait(&mut count);
        }
    }

    /// The current remaining count, for diagnostics/tests.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_only_after_every_party_counts_down() {
        let latch = Arc::new(CountdownLatch::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.count_down())
            })
            .collect();
        latch.wait();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(latch.remaining(), 0);
    }

    #[test]
    fn count_down_past_zero_is_a_no_op() {
        let latch = CountdownLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.remaining(), 0);
    }
}
