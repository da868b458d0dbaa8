//! A single-slot cell for handing one value between exactly two parties.
//!
//! Used by the hash exchange (spec §4.4) to publish "my bucket for peer P is
//! ready" without allocating a channel per (producer, bucket) pair, and by
//! the cooperative mergesort's pairwise-merge phases (spec §4.5) to hand the
//! lower-indexed partner its half of a merged run.

use parking_lot::Mutex;

/// A `Mutex<Option<T>>` with take/put framed as a single-value mailbox.
pub struct AtomicCell<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AtomicCell<T> {
    /// An empty cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store `value`, returning whatever was previously there.
    pub fn put(&self, value: T) -> Option<T> {
        self.slot.lock().replace(value)
    }

    /// Remove and return the current value, if any.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// True if a value is currently present.
    #[must_use]
    pub fn is_some(&self) -> bool {
        self.slot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_take_round_trips() {
        let cell: AtomicCell<i32> = AtomicCell::new();
        assert!(cell.take().is_none());
        assert!(cell.put(7).is_none());
        assert!(cell.is_some());
        assert_eq!(cell.take(), Some(7));
        assert!(cell.take().is_none());
    }

    #[test]
    fn put_replaces_and_returns_previous() {
        let cell = AtomicCell::new();
        cell.put(1);
        assert_eq!(cell.put(2), Some(1));
        assert_eq!(cell.take(), Some(2));
    }
}
