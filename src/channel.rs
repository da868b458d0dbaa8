//! Producer/consumer channels used by the merge stage (spec §4.6).
//!
//! The default pipelined merges move *chunks* (small batches), not single
//! elements, between exactly one producer and one consumer, so a hand-rolled
//! SPSC channel with its own capacity and close semantics is worth the
//! bookkeeping `crossbeam-channel`'s general MPMC channel would otherwise
//! spend on multi-producer support it doesn't need here. Stop-and-go mode
//! (spec §4.6, "fully buffer every partition's output, then drain") has no
//! backpressure to manage at all, so it goes straight through
//! `crossbeam-channel`'s unbounded MPMC channel instead — the teacher's own
//! `src/runner.rs` has no channel of its own, so both shapes are grounded on
//! the pack's other examples: the bounded chunk channel's wait-loop
//! discipline on
//! `examples/other_examples/18d3bf69_shadow-shadow__...pools-bounded.rs`'s
//! latch/unparker pairing, and the unbounded FIFO directly on
//! `crossbeam-channel`, already a teacher dependency via `rayon`'s workspace.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

struct ChunkChannelState<T> {
    queue: VecDeque<Vec<T>>,
    closed: bool,
}

struct ChunkChannelShared<T> {
    state: Mutex<ChunkChannelState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

/// The producer half of a bounded chunk channel.
pub struct ChunkSender<T> {
    shared: Arc<ChunkChannelShared<T>>,
}

/// The consumer half of a bounded chunk channel.
pub struct ChunkReceiver<T> {
    shared: Arc<ChunkChannelShared<T>>,
}

/// Build a bounded SPSC channel that moves whole chunks (`Vec<T>`) at a
/// time. `capacity` bounds the number of chunks buffered, not the number of
/// elements.
#[must_use]
pub fn bounded_chunk_channel<T>(capacity: usize) -> (ChunkSender<T>, ChunkReceiver<T>) {
    let shared = Arc::new(ChunkChannelShared {
        state: Mutex::new(ChunkChannelState {
            queue: VecDeque::new(),
            closed: false,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        capacity: capacity.max(1),
    });
    (
        ChunkSender { shared: Arc::clone(&shared) },
        ChunkReceiver { shared },
    )
}

impl<T> ChunkSender<T> {
    /// Send one chunk, blocking while the channel is full. Returns `false`
    /// (instead of sending) if the receiver has already closed its side.
    ///
    /// Every wait loop here rechecks its own predicate after waking rather
    /// than trusting that a `notify_one` reached exactly one thread — Rust's
    /// `Condvar`, like `parking_lot`'s, offers no guaranteed single-wake
    /// pulse, unlike an OS-level monitor.
    pub fn send_chunk(&self, chunk: Vec<T>) -> bool {
        let mut state = self.shared.state.lock();
        while state.queue.len() >= self.shared.capacity && !state.closed {
            self.shared.not_full.wait(&mut state);
        }
        if state.closed {
            return false;
        }
        let was_empty = state.queue.is_empty();
        state.queue.push_back(chunk);
        drop(state);
        if was_empty {
            self.shared.not_empty.notify_one();
        }
        true
    }

    /// Signal that no more chunks will be sent. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        drop(state);
        self.shared.not_empty.notify_all();
    }
}

impl<T> Drop for ChunkSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> ChunkReceiver<T> {
    /// Receive one chunk, blocking while the channel is empty. Returns
    /// `None` once the sender has closed and drained.
    pub fn recv_chunk(&self) -> Option<Vec<T>> {
        let mut state = self.shared.state.lock();
        while state.queue.is_empty() && !state.closed {
            self.shared.not_empty.wait(&mut state);
        }
        let chunk = state.queue.pop_front();
        drop(state);
        if chunk.is_some() {
            self.shared.not_full.notify_one();
        }
        chunk
    }
}

/// The sync FIFO used by stop-and-go / `FullyBuffered` merges: every
/// producer finishes entirely before any consumer runs, so there is no
/// backpressure to implement — just a plain unbounded MPMC queue.
pub type SyncFifoSender<T> = crossbeam_channel::Sender<T>;
/// See [`SyncFifoSender`].
pub type SyncFifoReceiver<T> = crossbeam_channel::Receiver<T>;

/// Build an unbounded FIFO channel for stop-and-go merges.
#[must_use]
pub fn sync_fifo_channel<T>() -> (SyncFifoSender<T>, SyncFifoReceiver<T>) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn receiver_sees_every_chunk_in_order() {
        let (tx, rx) = bounded_chunk_channel::<i32>(2);
        let handle = thread::spawn(move || {
            for i in 0..10 {
                assert!(tx.send_chunk(vec![i]));
            }
        });
        let mut received = Vec::new();
        while let Some(chunk) = rx.recv_chunk() {
            received.extend(chunk);
            if received.len() == 10 {
                break;
            }
        }
        handle.join().unwrap();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn closing_unblocks_a_waiting_receiver() {
        let (tx, rx): (ChunkSender<i32>, ChunkReceiver<i32>) = bounded_chunk_channel(1);
        let handle = thread::spawn(move || {
            drop(tx);
        });
        assert_eq!(rx.recv_chunk(), None);
        handle.join().unwrap();
    }

    #[test]
    fn sync_fifo_delivers_everything_sent() {
        let (tx, rx) = sync_fifo_channel::<i32>();
        for i in 0..5 {
            tx.send(i).unwrap();
        }
        drop(tx);
        let received: Vec<i32> = rx.iter().collect();
        assert_eq!(received, (0..5).collect::<Vec<_>>());
    }
}
