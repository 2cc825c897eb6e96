use core::any::Any;
use core::fmt::Debug;
use std::sync::Arc;

use crate::lattice::JoinLattice;

/// A client-supplied value transformer. Implementations must be pure and
/// total over the value domain.
///
/// `same_op` is semantic equality, used by the solver to detect that a
/// jump-function cell has stopped changing. It must be accurate for the
/// operations a client actually produces; an equality that is too weak makes
/// the fixed point unreachable.
pub trait EdgeOp<V>: Debug + Send + Sync + 'static {
    fn apply(&self, lattice: &dyn JoinLattice<Value = V>, source: &V) -> V;

    /// The inverse transformer, used when retracting bindings along deleted
    /// control-flow edges.
    fn invert(&self) -> Arc<dyn EdgeOp<V>>;

    fn same_op(&self, other: &dyn EdgeOp<V>) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// A distributive transformer over the value lattice, attached to an edge of
/// the exploded supergraph.
///
/// The three sentinels cover almost every function the solver manipulates;
/// everything else is a client [`EdgeOp`]. Keeping the sentinels as enum
/// variants lets composition and join be decided by a small table instead of
/// pairwise type tests.
pub enum EdgeFunction<V> {
    /// Neutral element of composition; maps every value to itself.
    Identity,
    /// The "not yet computed" placeholder. Neutral for join; a missing
    /// jump-function cell is equivalent to this.
    AllTop,
    /// Constant function returning lattice bottom; the conservative
    /// "anything may have happened" binding.
    AllBottom,
    /// Client-supplied transformer.
    Op(Arc<dyn EdgeOp<V>>),
}

impl<V> Clone for EdgeFunction<V> {
    fn clone(&self) -> Self {
        match self {
            EdgeFunction::Identity => EdgeFunction::Identity,
            EdgeFunction::AllTop => EdgeFunction::AllTop,
            EdgeFunction::AllBottom => EdgeFunction::AllBottom,
            EdgeFunction::Op(op) => EdgeFunction::Op(op.clone()),
        }
    }
}

impl<V> Debug for EdgeFunction<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EdgeFunction::Identity => write!(f, "id"),
            EdgeFunction::AllTop => write!(f, "alltop"),
            EdgeFunction::AllBottom => write!(f, "allbottom"),
            EdgeFunction::Op(op) => write!(f, "{op:?}"),
        }
    }
}

impl<V: Clone + Eq + Debug + Send + Sync + 'static> EdgeFunction<V> {
    /// Applies the function to a single lattice value.
    pub fn apply(&self, lattice: &dyn JoinLattice<Value = V>, source: &V) -> V {
        match self {
            EdgeFunction::Identity => source.clone(),
            EdgeFunction::AllTop => lattice.top(),
            EdgeFunction::AllBottom => lattice.bottom(),
            EdgeFunction::Op(op) => op.apply(lattice, source),
        }
    }

    /// Sequential composition: the returned function applies `self` first
    /// and `second` afterwards. This is the order in which a call edge, a
    /// callee summary and a return edge are chained into a caller-side
    /// summary.
    ///
    /// Associative; [`EdgeFunction::Identity`] is the unit on both sides.
    pub fn compose_with(&self, second: &EdgeFunction<V>) -> EdgeFunction<V> {
        use EdgeFunction::*;
        match (self, second) {
            (Identity, g) => g.clone(),
            (f, Identity) => f.clone(),
            // A binding that was never computed stays uncomputed, no
            // matter what follows.
            (AllTop, _) => AllTop,
            // Otherwise a constant second stage determines the result on
            // its own.
            (_, AllTop) => AllTop,
            (_, AllBottom) => AllBottom,
            (f, g) => Composed::new(f.clone(), g.clone()),
        }
    }

    /// Pointwise join: the returned function joins the results of both
    /// operands. Commutative, associative and idempotent;
    /// [`EdgeFunction::AllTop`] is the unit, [`EdgeFunction::AllBottom`]
    /// absorbs.
    ///
    /// Join results are kept as a flat, deduplicated operand set, so
    /// joining a function that is already absorbed returns `self`
    /// unchanged. The fixed-point check relies on that: a cell must stop
    /// changing once it has seen every incoming function.
    pub fn join_with(&self, other: &EdgeFunction<V>) -> EdgeFunction<V> {
        use EdgeFunction::*;
        match (self, other) {
            (AllTop, g) => g.clone(),
            (f, AllTop) => f.clone(),
            (AllBottom, _) | (_, AllBottom) => AllBottom,
            _ => {
                let mut operands: Vec<&EdgeFunction<V>> = Vec::new();
                flatten_join(self, &mut operands);
                let own = operands.len();
                let mut incoming: Vec<&EdgeFunction<V>> = Vec::new();
                flatten_join(other, &mut incoming);
                for g in incoming {
                    if !operands.iter().any(|f| f.equal_to(g)) {
                        operands.push(g);
                    }
                }
                if operands.len() == own {
                    return self.clone();
                }
                let mut joined = operands[0].clone();
                for f in &operands[1..] {
                    joined = Joined::new(joined, (*f).clone());
                }
                joined
            }
        }
    }

    /// The inverse function, used to walk retracted bindings backwards
    /// through deleted edges. Involution: `f.invert().invert()` equals `f`.
    /// The constant sentinels carry no value dependence and are their own
    /// inverses.
    pub fn invert(&self) -> EdgeFunction<V> {
        match self {
            EdgeFunction::Identity => EdgeFunction::Identity,
            EdgeFunction::AllTop => EdgeFunction::AllTop,
            EdgeFunction::AllBottom => EdgeFunction::AllBottom,
            EdgeFunction::Op(op) => EdgeFunction::Op(op.invert()),
        }
    }

    /// Semantic equality, as opposed to pointer identity of the inner ops.
    pub fn equal_to(&self, other: &EdgeFunction<V>) -> bool {
        use EdgeFunction::*;
        match (self, other) {
            (Identity, Identity) | (AllTop, AllTop) | (AllBottom, AllBottom) => true,
            (Op(a), Op(b)) => Arc::ptr_eq(a, b) || a.same_op(b.as_ref()),
            _ => false,
        }
    }
}

impl<V> EdgeFunction<V> {
    /// True for the "not yet computed" placeholder.
    pub fn is_all_top(&self) -> bool {
        matches!(self, EdgeFunction::AllTop)
    }
}

/// Collects the operand set of a join tree, leaving non-join functions as
/// single operands.
fn flatten_join<'a, V: Clone + Eq + Debug + Send + Sync + 'static>(
    function: &'a EdgeFunction<V>,
    out: &mut Vec<&'a EdgeFunction<V>>,
) {
    if let EdgeFunction::Op(op) = function {
        if let Some(joined) = op.as_any().downcast_ref::<Joined<V>>() {
            flatten_join(&joined.left, out);
            flatten_join(&joined.right, out);
            return;
        }
    }
    out.push(function);
}

/// Composition of two functions that could not be collapsed by the sentinel
/// table.
struct Composed<V> {
    first: EdgeFunction<V>,
    second: EdgeFunction<V>,
}

impl<V: Clone + Eq + Debug + Send + Sync + 'static> Composed<V> {
    fn new(first: EdgeFunction<V>, second: EdgeFunction<V>) -> EdgeFunction<V> {
        EdgeFunction::Op(Arc::new(Self { first, second }))
    }
}

impl<V> Debug for Composed<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({:?} ; {:?})", self.first, self.second)
    }
}

impl<V: Clone + Eq + Debug + Send + Sync + 'static> EdgeOp<V> for Composed<V> {
    fn apply(&self, lattice: &dyn JoinLattice<Value = V>, source: &V) -> V {
        let mid = self.first.apply(lattice, source);
        self.second.apply(lattice, &mid)
    }

    fn invert(&self) -> Arc<dyn EdgeOp<V>> {
        Arc::new(Self {
            first: self.second.invert(),
            second: self.first.invert(),
        })
    }

    fn same_op(&self, other: &dyn EdgeOp<V>) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|o| {
            self.first.equal_to(&o.first) && self.second.equal_to(&o.second)
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pointwise join of two functions that could not be collapsed by the
/// sentinel table.
struct Joined<V> {
    left: EdgeFunction<V>,
    right: EdgeFunction<V>,
}

impl<V: Clone + Eq + Debug + Send + Sync + 'static> Joined<V> {
    fn new(left: EdgeFunction<V>, right: EdgeFunction<V>) -> EdgeFunction<V> {
        EdgeFunction::Op(Arc::new(Self { left, right }))
    }
}

impl<V> Debug for Joined<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({:?} \u{2293} {:?})", self.left, self.right)
    }
}

impl<V: Clone + Eq + Debug + Send + Sync + 'static> EdgeOp<V> for Joined<V> {
    fn apply(&self, lattice: &dyn JoinLattice<Value = V>, source: &V) -> V {
        let left = self.left.apply(lattice, source);
        let right = self.right.apply(lattice, source);
        lattice.join(&left, &right)
    }

    fn invert(&self) -> Arc<dyn EdgeOp<V>> {
        Arc::new(Self {
            left: self.left.invert(),
            right: self.right.invert(),
        })
    }

    fn same_op(&self, other: &dyn EdgeOp<V>) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|o| {
            (self.left.equal_to(&o.left) && self.right.equal_to(&o.right))
                || (self.left.equal_to(&o.right) && self.right.equal_to(&o.left))
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
