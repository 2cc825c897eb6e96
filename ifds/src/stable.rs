use core::fmt::Debug;
use core::hash::Hash;
use core::marker::PhantomData;

use rustc_hash::FxHashMap;

/// A stable reference to a program entity. Handle identity must survive
/// structural replacement of the underlying representation: when a program
/// is edited and re-built, the node standing for an unchanged statement has
/// to compare and hash the same as before the edit, otherwise every table
/// keyed by it silently goes stale.
///
/// The `index` is required to be dense (allocated from zero upwards) so that
/// node sets can be stored as bit sets and tables can be keyed by plain
/// integers.
pub trait StableRef: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Dense index of this reference, unique among all references produced
    /// by the same allocator.
    fn index(&self) -> usize;
}

/// A permanent, representation-independent reference into an [`Arena`].
///
/// Equality and hashing are based purely on the index, never on the value
/// the handle currently resolves to.
pub struct Handle<T> {
    idx: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(idx: u32) -> Self {
        Self {
            idx,
            phantom: PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
    }
}

impl<T> Debug for Handle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.idx)
    }
}

impl<T: 'static> StableRef for Handle<T> {
    fn index(&self) -> usize {
        self.idx as usize
    }
}

/// Allocator for [`Handle`]s. Interning the same value twice yields the same
/// handle; a structural edit rebinds a handle to its replacement value
/// without changing the handle itself. All solver tables key on handles, so
/// rebinding is invisible to them; there is no notification protocol.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    items: Vec<T>,
    index: FxHashMap<T, u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

impl<T: Clone + Eq + Hash> Arena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stable handle for `value`, allocating one if the value
    /// has not been seen before.
    pub fn wrap(&mut self, value: T) -> Handle<T> {
        if let Some(&idx) = self.index.get(&value) {
            return Handle::new(idx);
        }
        let idx = u32::try_from(self.items.len()).expect("arena index overflow");
        self.items.push(value.clone());
        self.index.insert(value, idx);
        Handle::new(idx)
    }

    /// Returns the handle already allocated for `value`, if any.
    pub fn lookup(&self, value: &T) -> Option<Handle<T>> {
        self.index.get(value).map(|&idx| Handle::new(idx))
    }

    /// The value a handle currently resolves to.
    pub fn get(&self, handle: Handle<T>) -> &T {
        &self.items[handle.idx as usize]
    }

    /// Re-points `handle` at `replacement`. The previous value no longer
    /// resolves to a handle; interning `replacement` afterwards yields the
    /// same `handle`. The replacement must not already be bound to a
    /// different handle.
    pub fn rebind(&mut self, handle: Handle<T>, replacement: T) {
        debug_assert!(
            !self
                .index
                .get(&replacement)
                .is_some_and(|&idx| idx != handle.idx),
            "replacement value is already bound to another handle"
        );
        let old = core::mem::replace(&mut self.items[handle.idx as usize], replacement.clone());
        self.index.remove(&old);
        self.index.insert(replacement, handle.idx);
    }

    /// Number of handles allocated so far. Handles index the range
    /// `0..len()`, which makes this the exclusive bound for bit sets over
    /// them.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle<T>> + '_ {
        (0..self.items.len()).map(|idx| Handle::new(idx as u32))
    }
}
