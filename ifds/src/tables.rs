use core::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::edgefunc::EdgeFunction;
use crate::stable::StableRef;

/// The jump functions tabulated in phase 1. Conceptually one mapping
/// `(source fact, target node, target fact) -> edge function`, stored as
/// three indices kept in sync, one per access direction the algorithm
/// needs. Cells holding the default function (all-top) are not stored at
/// all; a missing cell and all-top are indistinguishable.
///
/// The struct itself is not synchronized; the solver serializes access.
#[derive(Debug)]
pub struct JumpFunctions<N, D, V> {
    /// source fact -> target node -> target fact -> function
    forward: FxHashMap<D, FxHashMap<N, FxHashMap<D, EdgeFunction<V>>>>,
    /// target node -> target fact -> source fact -> function
    reverse: FxHashMap<N, FxHashMap<D, FxHashMap<D, EdgeFunction<V>>>>,
    /// target node -> (source fact, target fact) -> function
    by_target: FxHashMap<N, FxHashMap<(D, D), EdgeFunction<V>>>,
}

impl<N, D, V> Default for JumpFunctions<N, D, V> {
    fn default() -> Self {
        Self {
            forward: FxHashMap::default(),
            reverse: FxHashMap::default(),
            by_target: FxHashMap::default(),
        }
    }
}

impl<N, D, V> JumpFunctions<N, D, V>
where
    N: StableRef,
    D: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a jump function; the source node is implicitly the entry of
    /// the target's procedure. All-top is not recorded.
    pub fn add(&mut self, source_fact: D, target: N, target_fact: D, function: EdgeFunction<V>) {
        if function.is_all_top() {
            return;
        }
        self.forward
            .entry(source_fact.clone())
            .or_default()
            .entry(target)
            .or_default()
            .insert(target_fact.clone(), function.clone());
        self.reverse
            .entry(target)
            .or_default()
            .entry(target_fact.clone())
            .or_default()
            .insert(source_fact.clone(), function.clone());
        self.by_target
            .entry(target)
            .or_default()
            .insert((source_fact, target_fact), function);
    }

    /// Removes a single cell. Returns false if the cell was not present.
    pub fn remove(&mut self, source_fact: &D, target: N, target_fact: &D) -> bool {
        let mut removed = false;
        if let Some(per_node) = self.forward.get_mut(source_fact) {
            if let Some(row) = per_node.get_mut(&target) {
                removed = row.remove(target_fact).is_some();
                if row.is_empty() {
                    per_node.remove(&target);
                }
            }
            if per_node.is_empty() {
                self.forward.remove(source_fact);
            }
        }
        if let Some(per_fact) = self.reverse.get_mut(&target) {
            if let Some(row) = per_fact.get_mut(target_fact) {
                row.remove(source_fact);
                if row.is_empty() {
                    per_fact.remove(target_fact);
                }
            }
            if per_fact.is_empty() {
                self.reverse.remove(&target);
            }
        }
        if let Some(cells) = self.by_target.get_mut(&target) {
            cells.remove(&(source_fact.clone(), target_fact.clone()));
            if cells.is_empty() {
                self.by_target.remove(&target);
            }
        }
        removed
    }

    /// Removes every jump function ending at the given node.
    pub fn remove_by_target(&mut self, target: N) {
        let Some(cells) = self.by_target.remove(&target) else {
            return;
        };
        for (source_fact, target_fact) in cells.into_keys() {
            if let Some(per_node) = self.forward.get_mut(&source_fact) {
                if let Some(row) = per_node.get_mut(&target) {
                    row.remove(&target_fact);
                    if row.is_empty() {
                        per_node.remove(&target);
                    }
                }
                if per_node.is_empty() {
                    self.forward.remove(&source_fact);
                }
            }
        }
        self.reverse.remove(&target);
    }

    /// The function recorded for a single cell, if any.
    pub fn cell(&self, source_fact: &D, target: N, target_fact: &D) -> Option<&EdgeFunction<V>> {
        self.forward.get(source_fact)?.get(&target)?.get(target_fact)
    }

    /// All target facts reachable at `target` from `source_fact`, with
    /// their functions.
    pub fn forward_row(&self, source_fact: &D, target: N) -> Option<&FxHashMap<D, EdgeFunction<V>>> {
        self.forward.get(source_fact)?.get(&target)
    }

    /// All source facts that reach `(target, target_fact)`, with their
    /// functions.
    pub fn reverse_row(&self, target: N, target_fact: &D) -> Option<&FxHashMap<D, EdgeFunction<V>>> {
        self.reverse.get(&target)?.get(target_fact)
    }

    /// All `(source fact, target fact)` cells recorded at a node.
    pub fn rows_at(&self, target: N) -> Option<&FxHashMap<(D, D), EdgeFunction<V>>> {
        self.by_target.get(&target)
    }

    /// Snapshots and removes every cell of `(source_fact, target)`,
    /// returning the removed target-fact row. Used by the update engine to
    /// save a row before rebuilding it from a blank slate.
    pub fn take_forward_row(&mut self, source_fact: &D, target: N) -> FxHashMap<D, EdgeFunction<V>> {
        let row = self
            .forward_row(source_fact, target)
            .cloned()
            .unwrap_or_default();
        for target_fact in row.keys() {
            self.remove(source_fact, target, target_fact);
        }
        row
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
        self.by_target.clear();
    }
}

/// Per-call-site summaries of complete procedure invocations:
/// `(call site, call fact) -> (return site, return fact) -> edge function`.
/// Monotonically refined while the callee is still being tabulated.
#[derive(Debug)]
pub struct SummaryFunctions<N, D, V> {
    table: FxHashMap<N, FxHashMap<D, FxHashMap<N, FxHashMap<D, EdgeFunction<V>>>>>,
}

impl<N, D, V> Default for SummaryFunctions<N, D, V> {
    fn default() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }
}

impl<N, D, V> SummaryFunctions<N, D, V>
where
    N: StableRef,
    D: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        call_site: N,
        call_fact: D,
        return_site: N,
        return_fact: D,
        function: EdgeFunction<V>,
    ) {
        self.table
            .entry(call_site)
            .or_default()
            .entry(call_fact)
            .or_default()
            .entry(return_site)
            .or_default()
            .insert(return_fact, function);
    }

    /// The summary recorded for one exact cell, if any. A missing cell is
    /// equivalent to all-top.
    pub fn get(
        &self,
        call_site: N,
        call_fact: &D,
        return_site: N,
        return_fact: &D,
    ) -> Option<&EdgeFunction<V>> {
        self.table
            .get(&call_site)?
            .get(call_fact)?
            .get(&return_site)?
            .get(return_fact)
    }

    /// All summaries from `(call_site, call_fact)` into a return site, as a
    /// mapping from return fact to function.
    pub fn for_site(
        &self,
        call_site: N,
        call_fact: &D,
        return_site: N,
    ) -> Option<&FxHashMap<D, EdgeFunction<V>>> {
        self.table.get(&call_site)?.get(call_fact)?.get(&return_site)
    }

    /// Drops every summary mentioning the node, as call site or return
    /// site.
    pub fn purge_node(&mut self, node: N) {
        self.table.remove(&node);
        for per_fact in self.table.values_mut() {
            for per_site in per_fact.values_mut() {
                per_site.remove(&node);
            }
        }
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

/// Summaries a procedure has produced so far, keyed by its entry:
/// `(start point, entry fact) -> (exit node, exit fact) -> edge function`.
/// Looked up by late-arriving callers so that recursion needs no
/// precomputed call order.
#[derive(Debug)]
pub struct EndSummaries<N, D, V> {
    table: FxHashMap<N, FxHashMap<D, FxHashMap<N, FxHashMap<D, EdgeFunction<V>>>>>,
}

impl<N, D, V> Default for EndSummaries<N, D, V> {
    fn default() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }
}

impl<N, D, V> EndSummaries<N, D, V>
where
    N: StableRef,
    D: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, start: N, entry_fact: D, exit: N, exit_fact: D, function: EdgeFunction<V>) {
        self.table
            .entry(start)
            .or_default()
            .entry(entry_fact)
            .or_default()
            .entry(exit)
            .or_default()
            .insert(exit_fact, function);
    }

    /// Everything known to leave the procedure entered at
    /// `(start, entry_fact)`: exit node -> exit fact -> function.
    pub fn get(
        &self,
        start: N,
        entry_fact: &D,
    ) -> Option<&FxHashMap<N, FxHashMap<D, EdgeFunction<V>>>> {
        self.table.get(&start)?.get(entry_fact)
    }

    /// Forgets every summary through the given exit node of the procedure
    /// entered at `start`. Used when an update invalidates the exit.
    pub fn remove_exit_for_start(&mut self, start: N, exit: N) {
        if let Some(per_fact) = self.table.get_mut(&start) {
            for per_exit in per_fact.values_mut() {
                per_exit.remove(&exit);
            }
        }
    }

    /// Drops every entry mentioning the node, as start point or exit.
    pub fn purge_node(&mut self, node: N) {
        self.table.remove(&node);
        for per_fact in self.table.values_mut() {
            for per_exit in per_fact.values_mut() {
                per_exit.remove(&node);
            }
        }
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}

/// Callers waiting on a callee entry:
/// `(start point, entry fact) -> call site -> set of call facts`. Together
/// with [`EndSummaries`] this wires freshly discovered exit summaries back
/// to every caller that already passed through the call, which is what makes
/// arbitrary (including mutual) recursion safe in a single worklist pass.
#[derive(Debug)]
pub struct Incoming<N, D> {
    table: FxHashMap<N, FxHashMap<D, FxHashMap<N, FxHashSet<D>>>>,
}

impl<N, D> Default for Incoming<N, D> {
    fn default() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }
}

impl<N, D> Incoming<N, D>
where
    N: StableRef,
    D: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, start: N, entry_fact: D, call_site: N, call_fact: D) {
        self.table
            .entry(start)
            .or_default()
            .entry(entry_fact)
            .or_default()
            .entry(call_site)
            .or_default()
            .insert(call_fact);
    }

    /// The call sites (with their call facts) waiting on
    /// `(start, entry_fact)`.
    pub fn get(&self, start: N, entry_fact: &D) -> Option<&FxHashMap<N, FxHashSet<D>>> {
        self.table.get(&start)?.get(entry_fact)
    }

    /// Drops every entry mentioning the node, as start point or call site.
    pub fn purge_node(&mut self, node: N) {
        self.table.remove(&node);
        for per_fact in self.table.values_mut() {
            for per_call in per_fact.values_mut() {
                per_call.remove(&node);
            }
        }
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}
