use rustc_hash::FxHashSet;

use crate::stable::StableRef;

/// The difference between two versions of an interprocedural control-flow
/// graph, expressed over stable node handles. Produced by
/// [`InterproceduralCfg::compute_changeset`]; consumed by the incremental
/// update engine.
///
/// A node that is present in both versions must be re-identified, i.e. the
/// same handle must resolve into both graphs, so that the facts recorded for
/// it carry forward.
#[derive(Clone, Debug, Default)]
pub struct Changeset<N> {
    /// Edges of the old graph that are gone in the new one.
    pub expired_edges: Vec<(N, N)>,
    /// Edges of the new graph that the old one did not have.
    pub new_edges: Vec<(N, N)>,
    /// Nodes only present in the new graph.
    pub new_nodes: FxHashSet<N>,
    /// Nodes only present in the old graph.
    pub expired_nodes: FxHashSet<N>,
}

impl<N> Changeset<N> {
    /// True when no edge changed. Node-only churn cannot influence any
    /// recorded fact, so an update with such a changeset is a no-op.
    pub fn no_edge_changes(&self) -> bool {
        self.expired_edges.is_empty() && self.new_edges.is_empty()
    }
}

/// An interprocedural control-flow graph.
///
/// Nodes and procedures are stable handles (see [`crate::stable`]): their
/// identity must survive a structural edit of the underlying program, with
/// the implementation rebinding handles to the replacement representation.
/// How a concrete graph is built, and how statements of two program versions
/// are matched up for [`compute_changeset`](Self::compute_changeset), is
/// entirely up to the implementation.
pub trait InterproceduralCfg: Send + Sync {
    type Node: StableRef;
    type Proc: StableRef;

    /// The procedure containing a node.
    fn proc_of(&self, n: Self::Node) -> Self::Proc;

    fn succs_of(&self, n: Self::Node) -> Vec<Self::Node>;

    fn preds_of(&self, n: Self::Node) -> Vec<Self::Node>;

    /// All procedures a call node may dispatch to.
    fn callees_of_call_at(&self, n: Self::Node) -> Vec<Self::Proc>;

    /// All call nodes that may dispatch to a procedure.
    fn callers_of(&self, p: Self::Proc) -> Vec<Self::Node>;

    /// All call nodes within a procedure.
    fn calls_from_within(&self, p: Self::Proc) -> Vec<Self::Node>;

    /// Entry nodes of a procedure. More than one is possible, e.g. for
    /// backward analyses.
    fn start_points_of(&self, p: Self::Proc) -> Vec<Self::Node>;

    /// The nodes control may return to after a call. There can be several,
    /// e.g. in the presence of exceptional flow.
    fn return_sites_of_call_at(&self, n: Self::Node) -> Vec<Self::Node>;

    fn is_call(&self, n: Self::Node) -> bool;

    /// Whether a node may leave its procedure. A node can be an exit and
    /// still have intraprocedural successors, like a throw that is caught
    /// locally on one path and escapes on another.
    fn is_exit(&self, n: Self::Node) -> bool;

    fn is_start_point(&self, n: Self::Node) -> bool;

    /// All nodes that are neither call nodes nor procedure entries; the
    /// domain of the final value-computation sweep.
    fn all_non_call_start_nodes(&self) -> Vec<Self::Node>;

    /// Whether the node is part of this graph version. Handles outlive
    /// graph versions, so a handle may well refer to a node this version no
    /// longer has.
    fn contains_node(&self, n: Self::Node) -> bool;

    fn all_nodes(&self) -> Vec<Self::Node>;

    /// Exclusive upper bound on [`StableRef::index`] over all handles this
    /// graph can hand out; sizes bit sets over nodes.
    fn node_bound(&self) -> usize;

    /// The header of the outermost intraprocedural loop containing the
    /// node, if any.
    fn loop_start_point_for(&self, n: Self::Node) -> Option<Self::Node>;

    /// All exit nodes that can transfer control to the given return site.
    fn exit_nodes_for_return_site(&self, n: Self::Node) -> Vec<Self::Node>;

    /// Diffs this graph against a newer version of the same program. The
    /// result must be deterministic and total over the reachable program;
    /// every retained statement must be re-identified under its old handle.
    fn compute_changeset(&self, new_version: &Self) -> Changeset<Self::Node>;
}
