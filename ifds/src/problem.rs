use core::fmt::Debug;
use core::hash::Hash;
use core::marker::PhantomData;
use std::sync::Arc;

use crate::edgefunc::EdgeFunction;
use crate::flowfunc::FlowFunction;
use crate::icfg::InterproceduralCfg;
use crate::lattice::{BinaryLattice, BinaryValue, JoinLattice};
use crate::stable::StableRef;

/// Factory for the fact transformers of the four statement kinds the
/// tabulation distinguishes. Returned functions are cached per key by the
/// solver, so factories are free to build closures on every call.
pub trait FlowFunctions: Send + Sync {
    type Node: StableRef;
    type Proc: StableRef;
    type Fact: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Transformer for the intraprocedural edge `curr -> succ`.
    fn normal_flow(&self, curr: Self::Node, succ: Self::Node) -> Arc<dyn FlowFunction<Self::Fact>>;

    /// Transformer from a call node into a callee entry; typically maps
    /// actuals to formals and kills everything else.
    fn call_flow(&self, call_site: Self::Node, callee: Self::Proc)
    -> Arc<dyn FlowFunction<Self::Fact>>;

    /// Transformer from a callee exit back to a return site of the call.
    fn return_flow(
        &self,
        call_site: Self::Node,
        callee: Self::Proc,
        exit: Self::Node,
        return_site: Self::Node,
    ) -> Arc<dyn FlowFunction<Self::Fact>>;

    /// Transformer for the intraprocedural part of a call, modelling
    /// whatever the call statement does locally while the callee effect is
    /// handled separately.
    fn call_to_return_flow(
        &self,
        call_site: Self::Node,
        return_site: Self::Node,
    ) -> Arc<dyn FlowFunction<Self::Fact>>;
}

/// Factory for the value transformers attached to the exploded-supergraph
/// edges, mirroring the shape of [`FlowFunctions`] fact by fact.
pub trait EdgeFunctions: Send + Sync {
    type Node: StableRef;
    type Proc: StableRef;
    type Fact: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Eq + Debug + Send + Sync + 'static;

    fn normal_edge(
        &self,
        curr: Self::Node,
        curr_fact: &Self::Fact,
        succ: Self::Node,
        succ_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value>;

    fn call_edge(
        &self,
        call_site: Self::Node,
        call_fact: &Self::Fact,
        callee: Self::Proc,
        entry_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value>;

    fn return_edge(
        &self,
        call_site: Self::Node,
        callee: Self::Proc,
        exit: Self::Node,
        exit_fact: &Self::Fact,
        return_site: Self::Node,
        return_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value>;

    fn call_to_return_edge(
        &self,
        call_site: Self::Node,
        call_fact: &Self::Fact,
        return_site: Self::Node,
        return_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value>;
}

/// A complete environment problem: the graph, the transformers and the
/// value domain. Everything the solver consumes is obtained through this
/// trait once, at construction or when an update swaps the graph.
pub trait TabulationProblem: Send + Sync {
    type Node: StableRef;
    type Proc: StableRef;
    type Fact: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Eq + Debug + Send + Sync + 'static;
    type Graph: InterproceduralCfg<Node = Self::Node, Proc = Self::Proc>;
    type Lattice: JoinLattice<Value = Self::Value>;
    type Flows: FlowFunctions<Node = Self::Node, Proc = Self::Proc, Fact = Self::Fact>;
    type Edges: EdgeFunctions<
            Node = Self::Node,
            Proc = Self::Proc,
            Fact = Self::Fact,
            Value = Self::Value,
        >;

    fn icfg(&self) -> Arc<Self::Graph>;

    /// Called by the update engine after diffing, so that the problem (and
    /// any graph-derived state it owns) follows the solver onto the new
    /// graph version.
    fn update_icfg(&mut self, new_graph: Arc<Self::Graph>);

    fn flow_functions(&self) -> Self::Flows;

    fn edge_functions(&self) -> Self::Edges;

    /// The tautological fact. It holds everywhere unconditionally and is
    /// what generative flow functions trigger on.
    fn zero_fact(&self) -> Self::Fact;

    /// The nodes analysis starts from, each implicitly seeded with the zero
    /// fact.
    fn initial_seeds(&self) -> Vec<Self::Node>;

    fn lattice(&self) -> Self::Lattice;
}

/// Wraps a [`FlowFunctions`] factory so that the zero fact survives every
/// edge. Clients never have to mention the zero fact in kill sets; the
/// solver installs this wrapper around whatever the problem supplies.
pub struct ZeroedFlowFunctions<FF: FlowFunctions> {
    delegate: FF,
    zero: FF::Fact,
}

impl<FF: FlowFunctions> ZeroedFlowFunctions<FF> {
    pub fn new(delegate: FF, zero: FF::Fact) -> Self {
        Self { delegate, zero }
    }

    fn zeroed(&self, inner: Arc<dyn FlowFunction<FF::Fact>>) -> Arc<dyn FlowFunction<FF::Fact>> {
        Arc::new(ZeroedFlowFunction {
            inner,
            zero: self.zero.clone(),
        })
    }
}

impl<FF: FlowFunctions> FlowFunctions for ZeroedFlowFunctions<FF> {
    type Node = FF::Node;
    type Proc = FF::Proc;
    type Fact = FF::Fact;

    fn normal_flow(&self, curr: Self::Node, succ: Self::Node) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.zeroed(self.delegate.normal_flow(curr, succ))
    }

    fn call_flow(
        &self,
        call_site: Self::Node,
        callee: Self::Proc,
    ) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.zeroed(self.delegate.call_flow(call_site, callee))
    }

    fn return_flow(
        &self,
        call_site: Self::Node,
        callee: Self::Proc,
        exit: Self::Node,
        return_site: Self::Node,
    ) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.zeroed(self.delegate.return_flow(call_site, callee, exit, return_site))
    }

    fn call_to_return_flow(
        &self,
        call_site: Self::Node,
        return_site: Self::Node,
    ) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.zeroed(self.delegate.call_to_return_flow(call_site, return_site))
    }
}

struct ZeroedFlowFunction<D> {
    inner: Arc<dyn FlowFunction<D>>,
    zero: D,
}

impl<D: Clone + Eq + Send + Sync> FlowFunction<D> for ZeroedFlowFunction<D> {
    fn targets(&self, source: &D) -> Vec<D> {
        let mut result = self.inner.targets(source);
        if *source == self.zero && !result.contains(&self.zero) {
            result.push(self.zero.clone());
        }
        result
    }
}

/// A plain reachability problem: flow functions only, no value domain.
/// Lifted onto the full solver by [`IfdsAsIde`].
pub trait IfdsProblem: Send + Sync {
    type Node: StableRef;
    type Proc: StableRef;
    type Fact: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Graph: InterproceduralCfg<Node = Self::Node, Proc = Self::Proc>;
    type Flows: FlowFunctions<Node = Self::Node, Proc = Self::Proc, Fact = Self::Fact>;

    fn icfg(&self) -> Arc<Self::Graph>;

    fn update_icfg(&mut self, new_graph: Arc<Self::Graph>);

    fn flow_functions(&self) -> Self::Flows;

    fn zero_fact(&self) -> Self::Fact;

    fn initial_seeds(&self) -> Vec<Self::Node>;
}

/// Runs a reachability problem on the environment solver by pairing it with
/// the two-point lattice and identity edge functions. A fact is reachable
/// at a node exactly when it shows up in the solver's results for that
/// node; the value is always [`BinaryValue::Reachable`] there.
pub struct IfdsAsIde<P>(pub P);

impl<P: IfdsProblem> TabulationProblem for IfdsAsIde<P> {
    type Node = P::Node;
    type Proc = P::Proc;
    type Fact = P::Fact;
    type Value = BinaryValue;
    type Graph = P::Graph;
    type Lattice = BinaryLattice;
    type Flows = P::Flows;
    type Edges = IdentityEdges<P::Node, P::Proc, P::Fact>;

    fn icfg(&self) -> Arc<Self::Graph> {
        self.0.icfg()
    }

    fn update_icfg(&mut self, new_graph: Arc<Self::Graph>) {
        self.0.update_icfg(new_graph);
    }

    fn flow_functions(&self) -> Self::Flows {
        self.0.flow_functions()
    }

    fn edge_functions(&self) -> Self::Edges {
        IdentityEdges::default()
    }

    fn zero_fact(&self) -> Self::Fact {
        self.0.zero_fact()
    }

    fn initial_seeds(&self) -> Vec<Self::Node> {
        self.0.initial_seeds()
    }

    fn lattice(&self) -> BinaryLattice {
        BinaryLattice
    }
}

/// Edge functions of a pure reachability problem: identity everywhere, so
/// that the seed value spreads unchanged along every tabulated path.
pub struct IdentityEdges<N, P, D> {
    phantom: PhantomData<fn() -> (N, P, D)>,
}

impl<N, P, D> Default for IdentityEdges<N, P, D> {
    fn default() -> Self {
        Self {
            phantom: PhantomData,
        }
    }
}

impl<N, P, D> EdgeFunctions for IdentityEdges<N, P, D>
where
    N: StableRef,
    P: StableRef,
    D: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
    type Node = N;
    type Proc = P;
    type Fact = D;
    type Value = BinaryValue;

    fn normal_edge(
        &self,
        _curr: N,
        _curr_fact: &D,
        _succ: N,
        _succ_fact: &D,
    ) -> EdgeFunction<BinaryValue> {
        EdgeFunction::Identity
    }

    fn call_edge(
        &self,
        _call_site: N,
        _call_fact: &D,
        _callee: P,
        _entry_fact: &D,
    ) -> EdgeFunction<BinaryValue> {
        EdgeFunction::Identity
    }

    fn return_edge(
        &self,
        _call_site: N,
        _callee: P,
        _exit: N,
        _exit_fact: &D,
        _return_site: N,
        _return_fact: &D,
    ) -> EdgeFunction<BinaryValue> {
        EdgeFunction::Identity
    }

    fn call_to_return_edge(
        &self,
        _call_site: N,
        _call_fact: &D,
        _return_site: N,
        _return_fact: &D,
    ) -> EdgeFunction<BinaryValue> {
        EdgeFunction::Identity
    }
}
