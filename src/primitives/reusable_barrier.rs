//! A reusable N-party barrier, used by the cooperative parallel mergesort's
//! `log2(N)` pairwise-merge phases (spec §4.5) and the hash-exchange's
//! "every worker has filled its buckets" synchronization point (spec §4.4).
//!
//! A plain [`CountdownLatch`](super::CountdownLatch) is one-shot; the
//! mergesort needs the same barrier object reused across multiple phases, so
//! this tracks a generation counter the way a textbook "sense-reversing
//! barrier" does, grounded on the same
//! `other_examples/18d3bf69_shadow-shadow__...pools-bounded.rs` latch idiom
//! generalized to repeat.

use parking_lot::{Condvar, Mutex};

struct State {
    arrived: usize,
    generation: u64,
}

/// A barrier that `parties` threads can arrive at repeatedly; each call to
/// [`wait`](Self::wait) blocks until all parties have arrived for the
/// current generation, then releases everyone and advances to the next.
pub struct ReusableBarrier {
    parties: usize,
    state: Mutex<State>,
    condvar: Condvar,
}

impl ReusableBarrier {
    /// Build a barrier for exactly `parties` threads.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(State {
                arrived: 0,
                generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Arrive at the barrier and block until every party has arrived.
    /// Returns `true` to exactly one caller per generation (the "leader" for
    /// that phase), mirroring `std::sync::Barrier::wait`'s
    /// `BarrierWaitResult::is_leader`.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        let my_generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.condvar.notify_all();
            true
        } else {
            while state.generation == my_generation {
                self.condvar.wait(&mut state);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn all_parties_release_together_across_multiple_phases() {
        let barrier = Arc::new(ReusableBarrier::new(4));
        let phase_counter = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let phase_counter = Arc::clone(&phase_counter);
                thread::spawn(move || {
                    for _ in 0..3 {
                        barrier.wait();
                        phase_counter.fetch_add(1, Ordering::SeqCst);
                        barrier.wait();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(phase_counter.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn exactly_one_leader_per_generation() {
        let barrier = Arc::new(ReusableBarrier::new(3));
        let leaders = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    if barrier.wait() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 1);
    }
}
