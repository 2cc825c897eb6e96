//! A small hand-built interprocedural control-flow graph for the solver
//! tests. Statements are interned in a [`SharedArenas`] allocator that
//! every version of a test program shares, so editing a program and
//! rebuilding the graph keeps the handles of unchanged statements stable,
//! exactly as the incremental update engine requires.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::icfg::{Changeset, InterproceduralCfg};
use crate::stable::{Arena, Handle};

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum StmtKind {
    Entry,
    Assign { var: String, val: i64 },
    Copy { to: String, from: String },
    Branch { id: u32 },
    Call { callee: String, arg: String, result: String },
    Ret { var: String },
    Exit,
    Nop { id: u32 },
}

pub(crate) type TestNode = Handle<(String, StmtKind)>;
pub(crate) type TestProc = Handle<String>;

/// Handle allocator shared between all versions of one test program.
#[derive(Clone, Default)]
pub(crate) struct SharedArenas {
    inner: Arc<Mutex<ArenasInner>>,
}

#[derive(Default)]
struct ArenasInner {
    stmts: Arena<(String, StmtKind)>,
    procs: Arena<String>,
}

impl SharedArenas {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Builds [`TestGraph`]s. Cloning a builder and editing the clone is the
/// intended way to produce the "after" version of a program.
#[derive(Clone)]
pub(crate) struct GraphBuilder {
    arenas: SharedArenas,
    nodes: FxHashSet<TestNode>,
    kind: FxHashMap<TestNode, StmtKind>,
    proc_of: FxHashMap<TestNode, TestProc>,
    proc_names: FxHashMap<TestProc, String>,
    succs: FxHashMap<TestNode, Vec<TestNode>>,
    preds: FxHashMap<TestNode, Vec<TestNode>>,
    starts: FxHashMap<TestProc, Vec<TestNode>>,
    callees: FxHashMap<TestNode, Vec<TestProc>>,
    return_sites: FxHashMap<TestNode, Vec<TestNode>>,
    calls_returning_to: FxHashMap<TestNode, Vec<TestNode>>,
    loop_headers: FxHashMap<TestNode, TestNode>,
}

impl GraphBuilder {
    pub(crate) fn new(arenas: &SharedArenas) -> Self {
        Self {
            arenas: arenas.clone(),
            nodes: FxHashSet::default(),
            kind: FxHashMap::default(),
            proc_of: FxHashMap::default(),
            proc_names: FxHashMap::default(),
            succs: FxHashMap::default(),
            preds: FxHashMap::default(),
            starts: FxHashMap::default(),
            callees: FxHashMap::default(),
            return_sites: FxHashMap::default(),
            calls_returning_to: FxHashMap::default(),
            loop_headers: FxHashMap::default(),
        }
    }

    fn add(&mut self, proc: &str, kind: StmtKind) -> TestNode {
        let (node, proc_handle) = {
            let mut arenas = self.arenas.inner.lock();
            let proc_handle = arenas.procs.wrap(proc.to_owned());
            let node = arenas.stmts.wrap((proc.to_owned(), kind.clone()));
            (node, proc_handle)
        };
        self.nodes.insert(node);
        self.kind.insert(node, kind.clone());
        self.proc_of.insert(node, proc_handle);
        self.proc_names.insert(proc_handle, proc.to_owned());
        if matches!(kind, StmtKind::Entry) {
            let starts = self.starts.entry(proc_handle).or_default();
            if !starts.contains(&node) {
                starts.push(node);
            }
        }
        node
    }

    pub(crate) fn entry(&mut self, proc: &str) -> TestNode {
        self.add(proc, StmtKind::Entry)
    }

    pub(crate) fn assign(&mut self, proc: &str, var: &str, val: i64) -> TestNode {
        self.add(
            proc,
            StmtKind::Assign {
                var: var.to_owned(),
                val,
            },
        )
    }

    pub(crate) fn copy(&mut self, proc: &str, to: &str, from: &str) -> TestNode {
        self.add(
            proc,
            StmtKind::Copy {
                to: to.to_owned(),
                from: from.to_owned(),
            },
        )
    }

    pub(crate) fn branch(&mut self, proc: &str, id: u32) -> TestNode {
        self.add(proc, StmtKind::Branch { id })
    }

    pub(crate) fn nop(&mut self, proc: &str, id: u32) -> TestNode {
        self.add(proc, StmtKind::Nop { id })
    }

    pub(crate) fn call(&mut self, proc: &str, callee: &str, arg: &str, result: &str) -> TestNode {
        let node = self.add(
            proc,
            StmtKind::Call {
                callee: callee.to_owned(),
                arg: arg.to_owned(),
                result: result.to_owned(),
            },
        );
        let callee_handle = self.arenas.inner.lock().procs.wrap(callee.to_owned());
        self.proc_names.insert(callee_handle, callee.to_owned());
        let callees = self.callees.entry(node).or_default();
        if !callees.contains(&callee_handle) {
            callees.push(callee_handle);
        }
        node
    }

    pub(crate) fn ret(&mut self, proc: &str, var: &str) -> TestNode {
        self.add(proc, StmtKind::Ret { var: var.to_owned() })
    }

    pub(crate) fn exit(&mut self, proc: &str) -> TestNode {
        self.add(proc, StmtKind::Exit)
    }

    pub(crate) fn edge(&mut self, from: TestNode, to: TestNode) {
        let succs = self.succs.entry(from).or_default();
        if !succs.contains(&to) {
            succs.push(to);
        }
        let preds = self.preds.entry(to).or_default();
        if !preds.contains(&from) {
            preds.push(from);
        }
    }

    /// Registers `ret_site` as a return site of `call` and adds the
    /// fall-through edge.
    pub(crate) fn link_return(&mut self, call: TestNode, ret_site: TestNode) {
        let sites = self.return_sites.entry(call).or_default();
        if !sites.contains(&ret_site) {
            sites.push(ret_site);
        }
        let calls = self.calls_returning_to.entry(ret_site).or_default();
        if !calls.contains(&call) {
            calls.push(call);
        }
        self.edge(call, ret_site);
    }

    pub(crate) fn set_loop_header(&mut self, node: TestNode, header: TestNode) {
        self.loop_headers.insert(node, header);
    }

    pub(crate) fn remove_edge(&mut self, from: TestNode, to: TestNode) {
        if let Some(succs) = self.succs.get_mut(&from) {
            succs.retain(|&n| n != to);
        }
        if let Some(preds) = self.preds.get_mut(&to) {
            preds.retain(|&n| n != from);
        }
    }

    pub(crate) fn remove_node(&mut self, node: TestNode) {
        self.nodes.remove(&node);
        self.kind.remove(&node);
        if let Some(proc) = self.proc_of.remove(&node) {
            if let Some(starts) = self.starts.get_mut(&proc) {
                starts.retain(|&n| n != node);
            }
        }
        self.succs.remove(&node);
        self.preds.remove(&node);
        for list in self.succs.values_mut() {
            list.retain(|&n| n != node);
        }
        for list in self.preds.values_mut() {
            list.retain(|&n| n != node);
        }
        self.callees.remove(&node);
        self.return_sites.remove(&node);
        for list in self.return_sites.values_mut() {
            list.retain(|&n| n != node);
        }
        self.calls_returning_to.remove(&node);
        for list in self.calls_returning_to.values_mut() {
            list.retain(|&n| n != node);
        }
        self.loop_headers.remove(&node);
        self.loop_headers.retain(|_, header| *header != node);
    }

    pub(crate) fn build(&self) -> Arc<TestGraph> {
        let mut exits_of: FxHashMap<TestProc, Vec<TestNode>> = FxHashMap::default();
        for &node in &self.nodes {
            if matches!(self.kind[&node], StmtKind::Ret { .. } | StmtKind::Exit) {
                exits_of.entry(self.proc_of[&node]).or_default().push(node);
            }
        }
        let node_bound = self.arenas.inner.lock().stmts.len();
        Arc::new(TestGraph {
            nodes: self.nodes.clone(),
            kind: self.kind.clone(),
            proc_of: self.proc_of.clone(),
            proc_names: self.proc_names.clone(),
            succs: self.succs.clone(),
            preds: self.preds.clone(),
            starts: self.starts.clone(),
            callees: self.callees.clone(),
            return_sites: self.return_sites.clone(),
            calls_returning_to: self.calls_returning_to.clone(),
            loop_headers: self.loop_headers.clone(),
            exits_of,
            node_bound,
        })
    }
}

pub(crate) struct TestGraph {
    nodes: FxHashSet<TestNode>,
    kind: FxHashMap<TestNode, StmtKind>,
    proc_of: FxHashMap<TestNode, TestProc>,
    proc_names: FxHashMap<TestProc, String>,
    succs: FxHashMap<TestNode, Vec<TestNode>>,
    preds: FxHashMap<TestNode, Vec<TestNode>>,
    starts: FxHashMap<TestProc, Vec<TestNode>>,
    callees: FxHashMap<TestNode, Vec<TestProc>>,
    return_sites: FxHashMap<TestNode, Vec<TestNode>>,
    calls_returning_to: FxHashMap<TestNode, Vec<TestNode>>,
    loop_headers: FxHashMap<TestNode, TestNode>,
    exits_of: FxHashMap<TestProc, Vec<TestNode>>,
    node_bound: usize,
}

impl TestGraph {
    pub(crate) fn kind_of(&self, n: TestNode) -> &StmtKind {
        &self.kind[&n]
    }

    pub(crate) fn proc_name(&self, p: TestProc) -> &str {
        &self.proc_names[&p]
    }

    fn edge_set(&self) -> FxHashSet<(TestNode, TestNode)> {
        self.succs
            .iter()
            .flat_map(|(&from, succs)| succs.iter().map(move |&to| (from, to)))
            .collect()
    }
}

impl InterproceduralCfg for TestGraph {
    type Node = TestNode;
    type Proc = TestProc;

    fn proc_of(&self, n: TestNode) -> TestProc {
        self.proc_of[&n]
    }

    fn succs_of(&self, n: TestNode) -> Vec<TestNode> {
        self.succs.get(&n).cloned().unwrap_or_default()
    }

    fn preds_of(&self, n: TestNode) -> Vec<TestNode> {
        self.preds.get(&n).cloned().unwrap_or_default()
    }

    fn callees_of_call_at(&self, n: TestNode) -> Vec<TestProc> {
        self.callees.get(&n).cloned().unwrap_or_default()
    }

    fn callers_of(&self, p: TestProc) -> Vec<TestNode> {
        self.callees
            .iter()
            .filter(|(_, callees)| callees.contains(&p))
            .map(|(&call, _)| call)
            .collect()
    }

    fn calls_from_within(&self, p: TestProc) -> Vec<TestNode> {
        self.callees
            .keys()
            .copied()
            .filter(|&call| self.proc_of[&call] == p)
            .collect()
    }

    fn start_points_of(&self, p: TestProc) -> Vec<TestNode> {
        self.starts.get(&p).cloned().unwrap_or_default()
    }

    fn return_sites_of_call_at(&self, n: TestNode) -> Vec<TestNode> {
        self.return_sites.get(&n).cloned().unwrap_or_default()
    }

    fn is_call(&self, n: TestNode) -> bool {
        self.callees.contains_key(&n)
    }

    fn is_exit(&self, n: TestNode) -> bool {
        matches!(self.kind[&n], StmtKind::Ret { .. } | StmtKind::Exit)
    }

    fn is_start_point(&self, n: TestNode) -> bool {
        matches!(self.kind[&n], StmtKind::Entry)
    }

    fn all_non_call_start_nodes(&self) -> Vec<TestNode> {
        self.nodes
            .iter()
            .copied()
            .filter(|&n| !self.is_call(n) && !self.is_start_point(n))
            .collect()
    }

    fn contains_node(&self, n: TestNode) -> bool {
        self.nodes.contains(&n)
    }

    fn all_nodes(&self) -> Vec<TestNode> {
        self.nodes.iter().copied().collect()
    }

    fn node_bound(&self) -> usize {
        self.node_bound
    }

    fn loop_start_point_for(&self, n: TestNode) -> Option<TestNode> {
        self.loop_headers.get(&n).copied()
    }

    fn exit_nodes_for_return_site(&self, n: TestNode) -> Vec<TestNode> {
        let mut exits: Vec<TestNode> = Vec::new();
        for call in self.calls_returning_to.get(&n).into_iter().flatten() {
            for callee in self.callees.get(call).into_iter().flatten() {
                for &exit in self.exits_of.get(callee).into_iter().flatten() {
                    if !exits.contains(&exit) {
                        exits.push(exit);
                    }
                }
            }
        }
        exits
    }

    fn compute_changeset(&self, new_version: &Self) -> Changeset<TestNode> {
        let old_edges = self.edge_set();
        let new_edges = new_version.edge_set();
        Changeset {
            expired_edges: old_edges.difference(&new_edges).copied().collect(),
            new_edges: new_edges.difference(&old_edges).copied().collect(),
            new_nodes: new_version.nodes.difference(&self.nodes).copied().collect(),
            expired_nodes: self.nodes.difference(&new_version.nodes).copied().collect(),
        }
    }
}
