//! Order keys and the index-state lattice (spec §3, Design Note 9).
//!
//! `OrderKey` is the single collapsed enum Design Note 9 recommends in place
//! of the source's per-operator generic `TKey` parameters: a concatenation's
//! key is `Concat(inner, side)`, a `SelectMany`'s compound key is
//! `Pair(outer, inner)`, a sort's key is `Sorted(original_position, rank)`.
//! Trading monomorphization for code size is an explicit, accepted tradeoff
//! (Design Note 9: "trading some monomorphization perf for code size").

use std::cmp::Ordering;

/// Which side of a binary operator (`Concat`, co-group probes, ...) an
/// element came from. Used by [`OrderKey::Concat`]'s comparator to order all
/// lefts before all rights, per spec §4.2 ("Concat").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    /// The left-hand / primary side.
    Left,
    /// The right-hand / secondary side.
    Right,
}

/// The collapsed order-key enum (spec §3, Design Note 9).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OrderKey {
    /// A dense or sparse integer position (sources, `Select`/`Where`, ...).
    Position(u64),
    /// A tagged-union key for binary concatenation: all `Side::Left` keys
    /// order before all `Side::Right` keys, ties broken by the inner key.
    Concat(Box<OrderKey>, Side),
    /// A compound key, e.g. `SelectMany`'s `(outer_key, position_within_right)`.
    Pair(Box<OrderKey>, Box<OrderKey>),
    /// A post-sort key: tie-broken by original position for stability.
    Sorted(Box<OrderKey>, u64),
}

impl OrderKey {
    /// Construct a plain positional key.
    #[must_use]
    pub fn pos(p: u64) -> Self {
        OrderKey::Position(p)
    }

    /// The raw numeric rank this key carries, used when two keys are
    /// otherwise structurally identical (e.g. two `Position` keys). Only
    /// meaningful in combination with a [`KeyComparer`]; exposed for
    /// heaps/buffers that need a total order cheaply.
    #[must_use]
    pub fn rank(&self) -> u64 {
        match self {
            OrderKey::Position(p) => *p,
            OrderKey::Concat(inner, _) => inner.rank(),
            OrderKey::Pair(outer, inner) => outer.rank().wrapping_mul(0x9E37_79B1).wrapping_add(inner.rank()),
            OrderKey::Sorted(_, rank) => *rank,
        }
    }
}

/// A comparator over [`OrderKey`] values. The default comparator implements
/// the natural ordering spec.md implies for each key shape; operators that
/// need a custom key comparator (e.g. a user `order_by` selector, or
/// `Reverse`'s negated comparator) supply their own.
pub trait KeyComparer: Send + Sync {
    /// Compare two keys. Must be a strict total order.
    fn compare(&self, a: &OrderKey, b: &OrderKey) -> Ordering;
}

/// The natural [`KeyComparer`]: `Position` by value, `Concat` lefts-before-
/// rights then by inner key, `Pair` lexicographic, `Sorted` by rank.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaturalKeyComparer;

impl KeyComparer for NaturalKeyComparer {
    fn compare(&self, a: &OrderKey, b: &OrderKey) -> Ordering {
        match (a, b) {
            (OrderKey::Position(x), OrderKey::Position(y)) => x.cmp(y),
            (OrderKey::Concat(ka, sa), OrderKey::Concat(kb, sb)) => {
                sa.cmp(sb).then_with(|| self.compare(ka, kb))
            }
            (OrderKey::Pair(oa, ia), OrderKey::Pair(ob, ib)) => {
                self.compare(oa, ob).then_with(|| self.compare(ia, ib))
            }
            (OrderKey::Sorted(_, ra), OrderKey::Sorted(_, rb)) => ra.cmp(rb),
            // Mixed shapes only arise across distinct operator subtrees that
            // should never be compared directly; fall back to rank.
            _ => a.rank().cmp(&b.rank()),
        }
    }
}

/// A comparator that reverses another, used by `Reverse` (spec §4.2) and
/// descending sorts.
pub struct ReverseComparer<C: KeyComparer>(pub C);

impl<C: KeyComparer> KeyComparer for ReverseComparer<C> {
    fn compare(&self, a: &OrderKey, b: &OrderKey) -> Ordering {
        self.0.compare(a, b).reverse()
    }
}

/// The semantic quality of a partitioned stream's order keys (spec §3).
///
/// `Indexible < Correct < Increasing < Shuffled` is a partial order in the
/// abstract sense the spec describes (each operator only ever moves "down"
/// this chain or stays put); implemented here as a plain total order since
/// every concrete transition the spec names is comparable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexState {
    /// O(1) random access by ordinal index; keys are integer positions.
    Indexible,
    /// Keys are dense and match the original positions.
    Correct,
    /// Within each partition, keys are strictly increasing (not necessarily
    /// dense).
    Increasing,
    /// No useful ordering of keys remains.
    Shuffled,
}

impl IndexState {
    /// The max of two tags under `Indexible < Correct < Increasing <
    /// Shuffled`, i.e. "the worse of the two" (spec §3: "`Worse(a,b)` returns
    /// the max").
    #[must_use]
    pub fn worse(self, other: IndexState) -> IndexState {
        self.max(other)
    }

    /// True if this tag is strong enough to support the given minimum
    /// requirement (used to decide whether a premature merge is needed).
    #[must_use]
    pub fn at_least(self, minimum: IndexState) -> bool {
        self <= minimum
    }
}
