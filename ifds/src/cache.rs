use std::sync::Arc;

use dashmap::DashMap;

use crate::edgefunc::EdgeFunction;
use crate::flowfunc::FlowFunction;
use crate::problem::{EdgeFunctions, FlowFunctions};

/// Memoizes the flow functions of a factory per edge key, so that worklist
/// reprocessing of the same edge does not rebuild the same closure over and
/// over. Cached entries are keyed by node identity and therefore stale
/// after any structural update; the solver invalidates the cache wholesale
/// at that point.
pub struct FlowFunctionCache<FF: FlowFunctions> {
    delegate: FF,
    normal: DashMap<(FF::Node, FF::Node), Arc<dyn FlowFunction<FF::Fact>>>,
    call: DashMap<(FF::Node, FF::Proc), Arc<dyn FlowFunction<FF::Fact>>>,
    ret: DashMap<(FF::Node, FF::Proc, FF::Node, FF::Node), Arc<dyn FlowFunction<FF::Fact>>>,
    call_to_return: DashMap<(FF::Node, FF::Node), Arc<dyn FlowFunction<FF::Fact>>>,
}

impl<FF: FlowFunctions> FlowFunctionCache<FF> {
    pub fn new(delegate: FF) -> Self {
        Self {
            delegate,
            normal: DashMap::new(),
            call: DashMap::new(),
            ret: DashMap::new(),
            call_to_return: DashMap::new(),
        }
    }

    pub fn invalidate_all(&self) {
        self.normal.clear();
        self.call.clear();
        self.ret.clear();
        self.call_to_return.clear();
    }
}

impl<FF: FlowFunctions> FlowFunctions for FlowFunctionCache<FF> {
    type Node = FF::Node;
    type Proc = FF::Proc;
    type Fact = FF::Fact;

    fn normal_flow(&self, curr: Self::Node, succ: Self::Node) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.normal
            .entry((curr, succ))
            .or_insert_with(|| self.delegate.normal_flow(curr, succ))
            .clone()
    }

    fn call_flow(
        &self,
        call_site: Self::Node,
        callee: Self::Proc,
    ) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.call
            .entry((call_site, callee))
            .or_insert_with(|| self.delegate.call_flow(call_site, callee))
            .clone()
    }

    fn return_flow(
        &self,
        call_site: Self::Node,
        callee: Self::Proc,
        exit: Self::Node,
        return_site: Self::Node,
    ) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.ret
            .entry((call_site, callee, exit, return_site))
            .or_insert_with(|| {
                self.delegate
                    .return_flow(call_site, callee, exit, return_site)
            })
            .clone()
    }

    fn call_to_return_flow(
        &self,
        call_site: Self::Node,
        return_site: Self::Node,
    ) -> Arc<dyn FlowFunction<Self::Fact>> {
        self.call_to_return
            .entry((call_site, return_site))
            .or_insert_with(|| self.delegate.call_to_return_flow(call_site, return_site))
            .clone()
    }
}

/// Memoizes edge functions per exploded-supergraph edge, i.e. the key
/// includes the facts on both ends. Same staleness rules as
/// [`FlowFunctionCache`].
pub struct EdgeFunctionCache<EF: EdgeFunctions> {
    delegate: EF,
    normal: DashMap<(EF::Node, EF::Fact, EF::Node, EF::Fact), EdgeFunction<EF::Value>>,
    call: DashMap<(EF::Node, EF::Fact, EF::Proc, EF::Fact), EdgeFunction<EF::Value>>,
    ret: DashMap<(EF::Node, EF::Proc, EF::Node, EF::Fact, EF::Node, EF::Fact), EdgeFunction<EF::Value>>,
    call_to_return: DashMap<(EF::Node, EF::Fact, EF::Node, EF::Fact), EdgeFunction<EF::Value>>,
}

impl<EF: EdgeFunctions> EdgeFunctionCache<EF> {
    pub fn new(delegate: EF) -> Self {
        Self {
            delegate,
            normal: DashMap::new(),
            call: DashMap::new(),
            ret: DashMap::new(),
            call_to_return: DashMap::new(),
        }
    }

    pub fn invalidate_all(&self) {
        self.normal.clear();
        self.call.clear();
        self.ret.clear();
        self.call_to_return.clear();
    }
}

impl<EF: EdgeFunctions> EdgeFunctions for EdgeFunctionCache<EF> {
    type Node = EF::Node;
    type Proc = EF::Proc;
    type Fact = EF::Fact;
    type Value = EF::Value;

    fn normal_edge(
        &self,
        curr: Self::Node,
        curr_fact: &Self::Fact,
        succ: Self::Node,
        succ_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value> {
        self.normal
            .entry((curr, curr_fact.clone(), succ, succ_fact.clone()))
            .or_insert_with(|| self.delegate.normal_edge(curr, curr_fact, succ, succ_fact))
            .clone()
    }

    fn call_edge(
        &self,
        call_site: Self::Node,
        call_fact: &Self::Fact,
        callee: Self::Proc,
        entry_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value> {
        self.call
            .entry((call_site, call_fact.clone(), callee, entry_fact.clone()))
            .or_insert_with(|| {
                self.delegate
                    .call_edge(call_site, call_fact, callee, entry_fact)
            })
            .clone()
    }

    fn return_edge(
        &self,
        call_site: Self::Node,
        callee: Self::Proc,
        exit: Self::Node,
        exit_fact: &Self::Fact,
        return_site: Self::Node,
        return_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value> {
        self.ret
            .entry((
                call_site,
                callee,
                exit,
                exit_fact.clone(),
                return_site,
                return_fact.clone(),
            ))
            .or_insert_with(|| {
                self.delegate
                    .return_edge(call_site, callee, exit, exit_fact, return_site, return_fact)
            })
            .clone()
    }

    fn call_to_return_edge(
        &self,
        call_site: Self::Node,
        call_fact: &Self::Fact,
        return_site: Self::Node,
        return_fact: &Self::Fact,
    ) -> EdgeFunction<Self::Value> {
        self.call_to_return
            .entry((call_site, call_fact.clone(), return_site, return_fact.clone()))
            .or_insert_with(|| {
                self.delegate
                    .call_to_return_edge(call_site, call_fact, return_site, return_fact)
            })
            .clone()
    }
}
