use core::fmt::Debug;

/// The value domain of an environment problem, a join semi-lattice.
///
/// Note the orientation: `top` stands for "nothing is known" and is the
/// neutral element of `join`, while `bottom` is the strongest statement the
/// analysis can make. Computed values only ever move from `top` towards
/// `bottom`, and the value table stores nothing for a binding that is still
/// at `top`.
///
/// Requirements:
/// * Commutative: join(a, b) == join(b, a)
/// * Associative: join(a, join(b, c)) == join(join(a, b), c)
/// * Idempotent: join(a, a) == a
/// * Top is the unit: join(top, a) == a
/// * Bottom absorbs: join(bottom, a) == bottom
pub trait JoinLattice: Send + Sync {
    type Value: Clone + Eq + Debug + Send + Sync + 'static;

    fn top(&self) -> Self::Value;

    fn bottom(&self) -> Self::Value;

    fn join(&self, left: &Self::Value, right: &Self::Value) -> Self::Value;
}

/// Extends [`JoinLattice`] with a meet operation for clients whose domain is
/// a full lattice.
///
/// Requirements:
/// * Commutative, associative, idempotent
/// * Bottom is the unit: meet(bottom, a) == a
/// * Top absorbs: meet(top, a) == top
pub trait Lattice: JoinLattice {
    fn meet(&self, left: &Self::Value, right: &Self::Value) -> Self::Value;
}

/// Two-point value domain used to run plain set-reachability problems on the
/// environment solver: a fact is an element of the result set exactly when
/// its value has been driven down to [`BinaryValue::Reachable`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinaryValue {
    /// Lattice bottom; the fact holds along some realizable path.
    Reachable,
    /// Lattice top; nothing is known about the fact.
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinaryLattice;

impl JoinLattice for BinaryLattice {
    type Value = BinaryValue;

    fn top(&self) -> BinaryValue {
        BinaryValue::Unknown
    }

    fn bottom(&self) -> BinaryValue {
        BinaryValue::Reachable
    }

    fn join(&self, left: &BinaryValue, right: &BinaryValue) -> BinaryValue {
        if *left == BinaryValue::Reachable || *right == BinaryValue::Reachable {
            BinaryValue::Reachable
        } else {
            BinaryValue::Unknown
        }
    }
}

impl Lattice for BinaryLattice {
    fn meet(&self, left: &BinaryValue, right: &BinaryValue) -> BinaryValue {
        if *left == BinaryValue::Unknown || *right == BinaryValue::Unknown {
            BinaryValue::Unknown
        } else {
            BinaryValue::Reachable
        }
    }
}
