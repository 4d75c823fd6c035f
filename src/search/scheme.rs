//! The fixed vocabulary a branching scheme exposes to the beam search.

use crate::instance::Instance;
use crate::solution::Solution;

use smallvec::SmallVec;

use std::cmp::Ordering;

/// Priority key of a node in the beam queue: a lexicographic triple of guide
/// values followed by the node id, so ordering is total and deterministic.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuideKey {
    /// Primary guide value (minimized).
    pub k0: f64,
    /// Secondary guide value (minimized).
    pub k1: f64,
    /// Tertiary guide value (minimized).
    pub k2: f64,
    /// Node id, breaking every remaining tie.
    pub id: u64,
}

impl GuideKey {
    /// Key with a single guide value.
    pub fn single(k0: f64, id: u64) -> GuideKey {
        GuideKey {
            k0,
            k1: 0.0,
            k2: 0.0,
            id,
        }
    }
}

impl Eq for GuideKey {}

impl PartialOrd for GuideKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GuideKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.k0
            .total_cmp(&other.k0)
            .then_with(|| self.k1.total_cmp(&other.k1))
            .then_with(|| self.k2.total_cmp(&other.k2))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Equivalence-bucket key for dominance: only nodes that consumed the same
/// items are compared. Inline up to a typical stack count.
pub type BucketKey = SmallVec<[i64; 16]>;

/// A branching scheme enumerates a search tree of partial patterns.
///
/// All methods are total: `children` returns an empty vector on leaves or
/// dead ends, and `to_solution` succeeds for any node the scheme produced.
pub trait BranchingScheme {
    /// Immutable search node, cheaply cloneable (reference-counted).
    type Node: Clone;

    /// The instance being solved.
    fn instance(&self) -> &Instance;

    /// Root node with nothing placed.
    fn root(&self) -> Self::Node;

    /// All feasible children of `parent`.
    fn children(&self, parent: &Self::Node) -> Vec<Self::Node>;

    /// Returns whether every item is consumed.
    fn leaf(&self, node: &Self::Node) -> bool;

    /// Returns whether `node` is a strictly better candidate than `best`.
    fn better(&self, node: &Self::Node, best: &Self::Node) -> bool;

    /// Returns whether no descendant of `node` can beat `best`.
    fn bound(&self, node: &Self::Node, best: &Self::Node) -> bool;

    /// Priority-queue key of `node` under the configured guide.
    fn guide(&self, node: &Self::Node) -> GuideKey;

    /// Returns whether `node` takes part in dominance checks.
    fn comparable(&self, node: &Self::Node) -> bool {
        let _ = node;
        true
    }

    /// Returns whether `node` renders `other` redundant. Only called for
    /// nodes with equal bucket keys.
    fn dominates(&self, node: &Self::Node, other: &Self::Node) -> bool;

    /// Dominance bucket key (remaining-copies vector).
    fn bucket_key(&self, node: &Self::Node) -> BucketKey;

    /// Returns whether `best` is provably optimal, allowing the driver to
    /// stop early (bin-packing certificate).
    fn proves_optimal(&self, best: &Self::Node) -> bool {
        let _ = best;
        false
    }

    /// Materializes the pattern of `node`.
    fn to_solution(&self, node: &Self::Node) -> Solution;
}
