use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use fixedbitset::FixedBitSet;
use log::{debug, info, trace};
use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::cache::{EdgeFunctionCache, FlowFunctionCache};
use crate::edgefunc::EdgeFunction;
use crate::icfg::InterproceduralCfg;
use crate::lattice::JoinLattice;
use crate::problem::{EdgeFunctions, FlowFunctions, TabulationProblem, ZeroedFlowFunctions};
use crate::stable::StableRef;
use crate::tables::{EndSummaries, Incoming, JumpFunctions, SummaryFunctions};
use crate::worklist::Worklist;

/// Knobs for a single [`IdeSolver::solve_with`] or
/// [`IdeSolver::update_with`] run.
#[derive(Clone, Copy, Debug)]
pub struct SolverConfig {
    /// Worker threads for both phases. Values below 2 run the solver on
    /// the calling thread.
    pub threads: usize,
    /// Whether to run the value-computation phase. Plain reachability
    /// clients can turn this off and read the tabulated jump functions
    /// instead.
    pub compute_values: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            compute_values: true,
        }
    }
}

/// A fatal solver failure. Any worker hitting one of these aborts the whole
/// run; the solver never returns a silently partial fixed point.
#[derive(Debug, Error)]
pub enum SolverError {
    /// A propagated statement is not part of the control-flow graph. This
    /// is a contract violation of the client graph (or of its changeset
    /// computation), not a recoverable condition.
    #[error("statement {0} is not part of the control-flow graph; the client graph is inconsistent")]
    StaleStatement(String),
}

/// Worklist item of phase 1: fact `target_fact` holds at `target` along a
/// same-level realizable path that entered the enclosing procedure with
/// `source_fact`. A missing target fact is the retraction signal used
/// during incremental updates: recompute the successors as if the binding
/// no longer existed.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct PathEdge<N, D> {
    pub source_fact: D,
    pub target: N,
    pub target_fact: Option<D>,
}

impl<N, D> PathEdge<N, D> {
    pub fn new(source_fact: D, target: N, target_fact: Option<D>) -> Self {
        Self {
            source_fact,
            target,
            target_fact,
        }
    }
}

/// Counters exposed through [`IdeSolver::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SolverStats {
    /// Path edges taken off the worklist.
    pub propagated_edges: u64,
    /// Flow-function factory requests (cache hits included).
    pub flow_function_constructions: u64,
    /// Flow-function evaluations.
    pub flow_function_applications: u64,
    /// Edge-function factory requests (cache hits included).
    pub edge_function_constructions: u64,
    /// Edge-function evaluations during value computation.
    pub edge_function_applications: u64,
    /// Time spent tabulating jump functions.
    pub phase1_duration: Duration,
    /// Time spent computing values.
    pub phase2_duration: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    propagated: AtomicU64,
    flow_constructions: AtomicU64,
    flow_applications: AtomicU64,
    edge_constructions: AtomicU64,
    edge_applications: AtomicU64,
    phase1_nanos: AtomicU64,
    phase2_nanos: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        self.propagated.store(0, Ordering::Relaxed);
        self.flow_constructions.store(0, Ordering::Relaxed);
        self.flow_applications.store(0, Ordering::Relaxed);
        self.edge_constructions.store(0, Ordering::Relaxed);
        self.edge_applications.store(0, Ordering::Relaxed);
        self.phase1_nanos.store(0, Ordering::Relaxed);
        self.phase2_nanos.store(0, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SolverStats {
        SolverStats {
            propagated_edges: self.propagated.load(Ordering::Relaxed),
            flow_function_constructions: self.flow_constructions.load(Ordering::Relaxed),
            flow_function_applications: self.flow_applications.load(Ordering::Relaxed),
            edge_function_constructions: self.edge_constructions.load(Ordering::Relaxed),
            edge_function_applications: self.edge_applications.load(Ordering::Relaxed),
            phase1_duration: Duration::from_nanos(self.phase1_nanos.load(Ordering::Relaxed)),
            phase2_duration: Duration::from_nanos(self.phase2_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// State that only exists while an incremental update is being processed.
/// Its presence is what switches the propagation routines from plain
/// monotone joining to snapshot-and-clear rebuilding.
struct UpdateState<N, P, D, V> {
    /// Rows of the jump-function table as they were before this update
    /// round first touched them. A row is snapshotted and cleared on first
    /// touch; whatever is not re-derived afterwards is a genuine
    /// regression.
    jump_save: Mutex<FxHashMap<(N, D), FxHashMap<D, EdgeFunction<V>>>>,
    /// Nodes whose jump functions were touched by this round.
    changed_nodes: Mutex<FxHashSet<N>>,
    /// Per procedure, the frontier nodes reprocessing starts from.
    change_set: FxHashMap<P, FxHashSet<N>>,
}

struct PendingSummaries<N, D, V> {
    end_summaries: EndSummaries<N, D, V>,
    incoming: Incoming<N, D>,
}

type Update<P> = UpdateState<
    <P as TabulationProblem>::Node,
    <P as TabulationProblem>::Proc,
    <P as TabulationProblem>::Fact,
    <P as TabulationProblem>::Value,
>;

/// Solves an environment problem by tabulating same-level realizable paths
/// (phase 1) and propagating lattice values along them (phase 2), and keeps
/// the solution current across structural edits of the analyzed program via
/// [`update`](Self::update).
///
/// All shared tables are guarded per table; since every cross-thread write
/// is a monotone join applied atomically per cell, concurrent workers
/// cannot corrupt the fixed point, only race towards it.
pub struct IdeSolver<P: TabulationProblem> {
    problem: P,
    icfg: Arc<P::Graph>,
    lattice: P::Lattice,
    zero: P::Fact,
    flows: FlowFunctionCache<ZeroedFlowFunctions<P::Flows>>,
    edges: EdgeFunctionCache<P::Edges>,
    jump_fn: Mutex<JumpFunctions<P::Node, P::Fact, P::Value>>,
    summaries: Mutex<SummaryFunctions<P::Node, P::Fact, P::Value>>,
    pending: Mutex<PendingSummaries<P::Node, P::Fact, P::Value>>,
    val: DashMap<P::Node, FxHashMap<P::Fact, P::Value>>,
    path_worklist: Worklist<PathEdge<P::Node, P::Fact>>,
    value_worklist: Worklist<(P::Node, P::Fact)>,
    counters: Counters,
    failure: Mutex<Option<SolverError>>,
}

impl<P: TabulationProblem> IdeSolver<P> {
    pub fn new(problem: P) -> Self {
        let icfg = problem.icfg();
        let zero = problem.zero_fact();
        let lattice = problem.lattice();
        let flows = FlowFunctionCache::new(ZeroedFlowFunctions::new(
            problem.flow_functions(),
            zero.clone(),
        ));
        let edges = EdgeFunctionCache::new(problem.edge_functions());
        Self {
            problem,
            icfg,
            lattice,
            zero,
            flows,
            edges,
            jump_fn: Mutex::new(JumpFunctions::new()),
            summaries: Mutex::new(SummaryFunctions::new()),
            pending: Mutex::new(PendingSummaries {
                end_summaries: EndSummaries::new(),
                incoming: Incoming::new(),
            }),
            val: DashMap::new(),
            path_worklist: Worklist::new(),
            value_worklist: Worklist::new(),
            counters: Counters::default(),
            failure: Mutex::new(None),
        }
    }

    /// Solves the problem from scratch with the default configuration.
    pub fn solve(&mut self) -> Result<(), SolverError> {
        self.solve_with(SolverConfig::default())
    }

    /// Solves the problem from scratch. Any state from previous runs is
    /// discarded first, so calling this repeatedly is idempotent.
    pub fn solve_with(&mut self, config: SolverConfig) -> Result<(), SolverError> {
        info!(
            "tabulation solver started with {} threads",
            config.threads.max(1)
        );
        self.jump_fn.lock().clear();
        self.summaries.lock().clear();
        {
            let mut pending = self.pending.lock();
            pending.end_summaries.clear();
            pending.incoming.clear();
        }
        self.val.clear();
        self.flows.invalidate_all();
        self.edges.invalidate_all();
        self.counters.reset();
        self.path_worklist.clear();
        self.value_worklist.clear();
        *self.failure.lock() = None;

        for seed in self.problem.initial_seeds() {
            self.ensure_contains(seed)?;
            self.jump_fn.lock().add(
                self.zero.clone(),
                seed,
                self.zero.clone(),
                EdgeFunction::Identity,
            );
            self.path_worklist
                .push(PathEdge::new(self.zero.clone(), seed, Some(self.zero.clone())));
        }

        self.run_phases(config, true, config.compute_values, None)?;
        info!(
            "tabulation solver done, {} edges propagated",
            self.counters.propagated.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Patches the converged solution after the analyzed program changed,
    /// with the default configuration.
    pub fn update(&mut self, new_graph: Arc<P::Graph>) -> Result<(), SolverError> {
        self.update_with(SolverConfig::default(), new_graph)
    }

    /// Patches the converged solution after the analyzed program changed.
    /// Diffs the old graph against `new_graph`, drops everything recorded
    /// for expired nodes, re-tabulates the affected regions and recomputes
    /// the values. The outcome is observably the same as a fresh
    /// [`solve_with`](Self::solve_with) on the new graph, provided the
    /// graph's changeset computation is correct.
    pub fn update_with(
        &mut self,
        config: SolverConfig,
        new_graph: Arc<P::Graph>,
    ) -> Result<(), SolverError> {
        info!("updating tabulation results for a changed graph");
        let old_graph = core::mem::replace(&mut self.icfg, new_graph.clone());
        self.problem.update_icfg(new_graph);
        let changeset = old_graph.compute_changeset(&self.icfg);
        for (from, to) in &changeset.expired_edges {
            debug!("expired edge: {from:?} -> {to:?}");
        }
        for (from, to) in &changeset.new_edges {
            debug!("new edge: {from:?} -> {to:?}");
        }
        debug!(
            "{} new nodes, {} expired nodes",
            changeset.new_nodes.len(),
            changeset.expired_nodes.len()
        );

        if changeset.no_edge_changes() {
            info!("control-flow graph is unchanged, skipping update");
            return Ok(());
        }

        // The function factories and their caches are keyed by node
        // identity and stale wholesale after a structural edit; both are
        // rebuilt against the updated problem.
        self.flows = FlowFunctionCache::new(ZeroedFlowFunctions::new(
            self.problem.flow_functions(),
            self.zero.clone(),
        ));
        self.edges = EdgeFunctionCache::new(self.problem.edge_functions());
        self.counters.reset();
        self.path_worklist.clear();
        self.value_worklist.clear();
        *self.failure.lock() = None;

        {
            let mut jump_fn = self.jump_fn.lock();
            let mut summaries = self.summaries.lock();
            let mut pending = self.pending.lock();
            for &n in &changeset.expired_nodes {
                jump_fn.remove_by_target(n);
                summaries.purge_node(n);
                pending.end_summaries.purge_node(n);
                pending.incoming.purge_node(n);
            }
        }

        // Reprocessing starts at the sources of changed edges, widened to
        // the enclosing loop: a change inside a loop body can affect every
        // iteration, so the whole loop is redone from the header's
        // predecessors.
        let mut change_set: FxHashMap<P::Proc, FxHashSet<P::Node>> = FxHashMap::default();
        self.collect_frontier(&changeset.new_edges, &changeset.new_nodes, &mut change_set);
        self.collect_frontier(
            &changeset.expired_edges,
            &changeset.expired_nodes,
            &mut change_set,
        );

        let update = UpdateState {
            jump_save: Mutex::new(FxHashMap::default()),
            changed_nodes: Mutex::new(FxHashSet::default()),
            change_set,
        };

        let mut repropagated: FxHashSet<P::Node> = FxHashSet::default();
        for frontier in update.change_set.values() {
            for &node in frontier {
                // A frontier node downstream of another frontier node of
                // the same procedure is rebuilt by that node's round
                // anyway, as is anything an earlier round already visited.
                if self.predecessor_repropagated(frontier, node) {
                    continue;
                }
                if repropagated.contains(&node) {
                    continue;
                }
                let cells: Vec<(P::Fact, P::Fact)> = self
                    .jump_fn
                    .lock()
                    .rows_at(node)
                    .map(|cells| cells.keys().cloned().collect())
                    .unwrap_or_default();
                for (d1, d2) in cells {
                    trace!("reprocessing <{d1:?}> -> <{node:?}, {d2:?}>");
                    self.path_worklist.push(PathEdge::new(d1, node, Some(d2)));
                }
                update.jump_save.lock().clear();
                self.run_phases(config, true, false, Some(&update))?;
                repropagated.extend(update.changed_nodes.lock().iter().copied());
            }
        }

        self.run_phases(config, false, true, None)?;
        info!(
            "update done, {} edges propagated",
            self.counters.propagated.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// The value computed for a fact at a node. `None` means the binding
    /// is still at lattice top; top values are never stored.
    pub fn result_at(&self, node: P::Node, fact: &P::Fact) -> Option<P::Value> {
        self.val.get(&node).and_then(|row| row.get(fact).cloned())
    }

    /// All non-top bindings at a node, with the zero fact stripped.
    pub fn results_at(&self, node: P::Node) -> FxHashMap<P::Fact, P::Value> {
        self.val
            .get(&node)
            .map(|row| {
                row.iter()
                    .filter(|(fact, _)| **fact != self.zero)
                    .map(|(fact, value)| (fact.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The facts with a recorded jump function at a node, zero fact
    /// stripped. For plain reachability problems this is the result set,
    /// and it is available even when the value phase was skipped via
    /// [`SolverConfig::compute_values`].
    pub fn tabulated_facts_at(&self, node: P::Node) -> FxHashSet<P::Fact> {
        self.jump_fn
            .lock()
            .rows_at(node)
            .map(|cells| {
                cells
                    .keys()
                    .map(|(_, target_fact)| target_fact.clone())
                    .filter(|fact| *fact != self.zero)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SolverStats {
        self.counters.snapshot()
    }

    pub fn icfg(&self) -> Arc<P::Graph> {
        self.icfg.clone()
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    #[cfg(test)]
    pub(crate) fn summarized_facts(
        &self,
        call_site: P::Node,
        call_fact: &P::Fact,
        return_site: P::Node,
    ) -> Vec<P::Fact> {
        self.summaries
            .lock()
            .for_site(call_site, call_fact, return_site)
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_contains(&self, node: P::Node) -> Result<(), SolverError> {
        if self.icfg.contains_node(node) {
            Ok(())
        } else {
            Err(SolverError::StaleStatement(format!("{node:?}")))
        }
    }

    fn record_failure(&self, error: SolverError) {
        let mut slot = self.failure.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.path_worklist.abort();
        self.value_worklist.abort();
    }

    fn take_failure(&self) -> Result<(), SolverError> {
        match self.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn run_phases(
        &self,
        config: SolverConfig,
        compute_edges: bool,
        compute_values: bool,
        update: Option<&Update<P>>,
    ) -> Result<(), SolverError> {
        let threads = config.threads.max(1);
        if compute_edges {
            let started = Instant::now();
            self.tabulate(threads, update)?;
            self.counters
                .phase1_nanos
                .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        }
        if compute_values {
            let started = Instant::now();
            self.compute_values(threads)?;
            self.counters
                .phase2_nanos
                .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Phase 1: forward-tabulates the same-level realizable paths and their
    /// jump functions. In update mode this runs twice: once in
    /// snapshot-and-clear mode, then a corrective round over all join
    /// points among the changed nodes, because a join can change even when
    /// only one of its incoming paths was reprocessed.
    fn tabulate(&self, threads: usize, update: Option<&Update<P>>) -> Result<(), SolverError> {
        if let Some(update) = update {
            update.changed_nodes.lock().clear();
        }
        self.drive_path_worklist(threads, update)?;
        let Some(update) = update else {
            return Ok(());
        };

        let changed: Vec<P::Node> = update.changed_nodes.lock().iter().copied().collect();
        for n in changed {
            // A changed exit invalidates the summaries through it.
            if self.icfg.is_exit(n) {
                let mut pending = self.pending.lock();
                for sp in self.icfg.start_points_of(self.icfg.proc_of(n)) {
                    pending.end_summaries.remove_exit_for_start(sp, n);
                }
            }

            // Predecessors are the direct ones plus every exit node that
            // returns to n.
            let mut preds: FxHashSet<P::Node> = self
                .icfg
                .exit_nodes_for_return_site(n)
                .into_iter()
                .collect();
            if self.icfg.contains_node(n) {
                preds.extend(self.icfg.preds_of(n));
            }
            preds.retain(|&p| self.icfg.contains_node(p));

            // With a single predecessor there is no second path to merge;
            // the facts at n have already been rebuilt.
            if preds.len() < 2 {
                continue;
            }
            for pred in preds {
                let cells: Vec<(P::Fact, P::Fact)> = self
                    .jump_fn
                    .lock()
                    .rows_at(pred)
                    .map(|cells| cells.keys().cloned().collect())
                    .unwrap_or_default();
                for (d1, d2) in cells {
                    self.path_worklist.push(PathEdge::new(d1, pred, Some(d2)));
                }
            }
        }
        self.summaries.lock().clear();
        self.drive_path_worklist(threads, None)
    }

    fn drive_path_worklist(
        &self,
        threads: usize,
        update: Option<&Update<P>>,
    ) -> Result<(), SolverError> {
        let work = || {
            while let Some(edge) = self.path_worklist.next() {
                self.counters.propagated.fetch_add(1, Ordering::Relaxed);
                let result = self.process_edge(&edge, update);
                self.path_worklist.task_done();
                if let Err(error) = result {
                    self.record_failure(error);
                }
            }
        };
        if threads <= 1 {
            work();
        } else {
            thread::scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(&work);
                }
            });
        }
        self.take_failure()
    }

    fn process_edge(
        &self,
        edge: &PathEdge<P::Node, P::Fact>,
        update: Option<&Update<P>>,
    ) -> Result<(), SolverError> {
        self.ensure_contains(edge.target)?;
        if self.icfg.is_call(edge.target) {
            self.process_call(edge, update)
        } else {
            // A node can be an exit and still fall through locally, like a
            // throw that one handler catches and another path escapes; both
            // roles have to be processed.
            if self.icfg.is_exit(edge.target) {
                self.process_exit(edge, update)?;
            }
            if !self.icfg.succs_of(edge.target).is_empty() {
                self.process_normal_flow(edge, update)?;
            }
            Ok(())
        }
    }

    /// The jump function currently recorded for a path edge; all-top when
    /// nothing is recorded.
    fn jump_function(&self, edge: &PathEdge<P::Node, P::Fact>) -> EdgeFunction<P::Value> {
        let Some(target_fact) = &edge.target_fact else {
            return EdgeFunction::AllTop;
        };
        self.jump_fn
            .lock()
            .cell(&edge.source_fact, edge.target, target_fact)
            .cloned()
            .unwrap_or(EdgeFunction::AllTop)
    }

    fn process_normal_flow(
        &self,
        edge: &PathEdge<P::Node, P::Fact>,
        update: Option<&Update<P>>,
    ) -> Result<(), SolverError> {
        let d1 = &edge.source_fact;
        let n = edge.target;
        let Some(d2) = &edge.target_fact else {
            let update = update.expect("retraction edges only exist in update mode");
            for m in self.icfg.succs_of(n) {
                self.clear_target(update, d1, m)?;
            }
            return Ok(());
        };

        let f = self.jump_function(edge);
        for m in self.icfg.succs_of(n) {
            let flow = self.flows.normal_flow(n, m);
            self.counters.flow_constructions.fetch_add(1, Ordering::Relaxed);
            let targets = flow.targets(d2);
            self.counters.flow_applications.fetch_add(1, Ordering::Relaxed);
            for d3 in &targets {
                let edge_fn = self.edges.normal_edge(n, d2, m, d3);
                self.counters.edge_constructions.fetch_add(1, Ordering::Relaxed);
                self.propagate(update, d1, m, d3, f.compose_with(&edge_fn))?;
            }
            if let Some(update) = update {
                if targets.is_empty() {
                    self.clear_target(update, d1, m)?;
                }
            }
        }
        Ok(())
    }

    /// Processes a call node: seeds the callees, records the caller as
    /// waiting, replays summaries already known for the callee entry, and
    /// runs the local call-to-return flow.
    fn process_call(
        &self,
        edge: &PathEdge<P::Node, P::Fact>,
        update: Option<&Update<P>>,
    ) -> Result<(), SolverError> {
        let d1 = &edge.source_fact;
        let n = edge.target;
        let return_sites = self.icfg.return_sites_of_call_at(n);
        let Some(d2) = &edge.target_fact else {
            let update = update.expect("retraction edges only exist in update mode");
            for &ret in &return_sites {
                self.clear_target(update, d1, ret)?;
            }
            return Ok(());
        };

        for callee in self.icfg.callees_of_call_at(n) {
            let call_flow = self.flows.call_flow(n, callee);
            self.counters.flow_constructions.fetch_add(1, Ordering::Relaxed);
            let entry_facts = call_flow.targets(d2);
            self.counters.flow_applications.fetch_add(1, Ordering::Relaxed);
            for sp in self.icfg.start_points_of(callee) {
                for d3 in &entry_facts {
                    // A fresh same-level path through the callee.
                    self.propagate(None, d3, sp, d3, EdgeFunction::Identity)?;

                    // Register the caller as waiting on this entry binding
                    // and snapshot whatever the callee has produced for it
                    // so far.
                    let known: Vec<(P::Node, P::Fact, EdgeFunction<P::Value>)> = {
                        let mut pending = self.pending.lock();
                        pending.incoming.add(sp, d3.clone(), n, d2.clone());
                        pending
                            .end_summaries
                            .get(sp, d3)
                            .map(|per_exit| {
                                per_exit
                                    .iter()
                                    .flat_map(|(&exit, row)| {
                                        row.iter()
                                            .map(move |(d4, f)| (exit, d4.clone(), f.clone()))
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                    };

                    for (exit, d4, f_summary) in known {
                        for &ret in &return_sites {
                            let ret_flow = self.flows.return_flow(n, callee, exit, ret);
                            self.counters.flow_constructions.fetch_add(1, Ordering::Relaxed);
                            let ret_facts = ret_flow.targets(&d4);
                            self.counters.flow_applications.fetch_add(1, Ordering::Relaxed);
                            for d5 in &ret_facts {
                                let f4 = self.edges.call_edge(n, d2, callee, d3);
                                let f5 = self.edges.return_edge(n, callee, exit, &d4, ret, d5);
                                self.counters.edge_constructions.fetch_add(2, Ordering::Relaxed);
                                let mut summaries = self.summaries.lock();
                                let existing = summaries
                                    .get(n, d2, ret, d5)
                                    .cloned()
                                    .unwrap_or(EdgeFunction::AllTop);
                                let improved = f4
                                    .compose_with(&f_summary)
                                    .compose_with(&f5)
                                    .join_with(&existing);
                                if !improved.equal_to(&existing) {
                                    summaries.insert(n, d2.clone(), ret, d5.clone(), improved);
                                }
                            }
                        }
                    }
                }
            }
        }

        // The call-to-return flow models what the call statement does
        // locally; recorded summaries replay the callee effect for this
        // caller path.
        let f = self.jump_function(edge);
        for &ret in &return_sites {
            self.ensure_contains(ret)?;
            let ctr_flow = self.flows.call_to_return_flow(n, ret);
            self.counters.flow_constructions.fetch_add(1, Ordering::Relaxed);
            let targets = ctr_flow.targets(d2);
            self.counters.flow_applications.fetch_add(1, Ordering::Relaxed);
            for d3 in &targets {
                let edge_fn = self.edges.call_to_return_edge(n, d2, ret, d3);
                self.counters.edge_constructions.fetch_add(1, Ordering::Relaxed);
                self.propagate(update, d1, ret, d3, f.compose_with(&edge_fn))?;
            }
            if let Some(update) = update {
                if targets.is_empty() {
                    self.clear_target(update, d1, ret)?;
                }
            }

            let recorded: Vec<(P::Fact, EdgeFunction<P::Value>)> = self
                .summaries
                .lock()
                .for_site(n, d2, ret)
                .map(|row| row.iter().map(|(d3, f3)| (d3.clone(), f3.clone())).collect())
                .unwrap_or_default();
            for (d3, f3) in recorded {
                self.propagate(update, d1, ret, &d3, f.compose_with(&f3))?;
            }
        }
        Ok(())
    }

    /// Processes an exit node: records the end summary and wires it back
    /// into every caller that is already waiting on this procedure entry.
    fn process_exit(
        &self,
        edge: &PathEdge<P::Node, P::Fact>,
        update: Option<&Update<P>>,
    ) -> Result<(), SolverError> {
        let n = edge.target;
        let d1 = &edge.source_fact;
        let d2 = edge.target_fact.as_ref();
        let callee = self.icfg.proc_of(n);
        let f = self.jump_function(edge);

        for sp in self.icfg.start_points_of(callee) {
            self.ensure_contains(sp)?;
            let waiting: Vec<(P::Node, FxHashSet<P::Fact>)> = {
                let mut pending = self.pending.lock();
                if let Some(d2) = d2 {
                    pending
                        .end_summaries
                        .add(sp, d1.clone(), n, d2.clone(), f.clone());
                }
                pending
                    .incoming
                    .get(sp, d1)
                    .map(|per_call| {
                        per_call
                            .iter()
                            .map(|(&call, facts)| (call, facts.clone()))
                            .collect()
                    })
                    .unwrap_or_default()
            };

            for (call_site, call_facts) in waiting {
                self.ensure_contains(call_site)?;
                for ret in self.icfg.return_sites_of_call_at(call_site) {
                    self.ensure_contains(ret)?;
                    // Do not return into a region that a later reprocessing
                    // round of this update rebuilds anyway.
                    let mut do_propagate = true;
                    if let Some(update) = update {
                        if let Some(frontier) = update.change_set.get(&self.icfg.proc_of(ret)) {
                            if self.predecessor_repropagated(frontier, ret) {
                                do_propagate = false;
                            }
                        }
                    }

                    let Some(d2) = d2 else {
                        let update = update.expect("retraction edges only exist in update mode");
                        self.clear_target(update, d1, ret)?;
                        continue;
                    };

                    let ret_flow = self.flows.return_flow(call_site, callee, n, ret);
                    self.counters.flow_constructions.fetch_add(1, Ordering::Relaxed);
                    let ret_facts = ret_flow.targets(d2);
                    self.counters.flow_applications.fetch_add(1, Ordering::Relaxed);

                    for d4 in &call_facts {
                        for d5 in &ret_facts {
                            let f4 = self.edges.call_edge(call_site, d4, callee, d1);
                            let f5 = self.edges.return_edge(call_site, callee, n, d2, ret, d5);
                            self.counters.edge_constructions.fetch_add(2, Ordering::Relaxed);
                            let improved = {
                                let mut summaries = self.summaries.lock();
                                let existing = summaries
                                    .get(call_site, d4, ret, d5)
                                    .cloned()
                                    .unwrap_or(EdgeFunction::AllTop);
                                let improved = f4
                                    .compose_with(&f)
                                    .compose_with(&f5)
                                    .join_with(&existing);
                                if !improved.equal_to(&existing) {
                                    summaries.insert(
                                        call_site,
                                        d4.clone(),
                                        ret,
                                        d5.clone(),
                                        improved.clone(),
                                    );
                                }
                                improved
                            };

                            if do_propagate {
                                // Every caller path that already reached the
                                // call site receives the new summary.
                                let recorded: Vec<(P::Fact, EdgeFunction<P::Value>)> = self
                                    .jump_fn
                                    .lock()
                                    .reverse_row(call_site, d4)
                                    .map(|row| {
                                        row.iter()
                                            .map(|(d3, f3)| (d3.clone(), f3.clone()))
                                            .collect()
                                    })
                                    .unwrap_or_default();
                                for (d3, f3) in recorded {
                                    if !f3.is_all_top() {
                                        trace!(
                                            "leaving {callee:?} for return site {ret:?} on {d3:?}, called by {call_site:?}"
                                        );
                                        self.propagate(
                                            update,
                                            &d3,
                                            ret,
                                            d5,
                                            f3.compose_with(&improved),
                                        )?;
                                    }
                                }
                            }
                        }
                        if let Some(update) = update {
                            if ret_facts.is_empty() && do_propagate {
                                let recorded: Vec<P::Fact> = self
                                    .jump_fn
                                    .lock()
                                    .reverse_row(call_site, d4)
                                    .map(|row| row.keys().cloned().collect())
                                    .unwrap_or_default();
                                for d3 in recorded {
                                    self.clear_target(update, &d3, ret)?;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Joins `f` into the jump-function cell and schedules the target for
    /// reprocessing when the cell actually improved. In update mode the
    /// affected row is snapshotted and cleared on first touch.
    fn propagate(
        &self,
        update: Option<&Update<P>>,
        source_fact: &P::Fact,
        target: P::Node,
        target_fact: &P::Fact,
        f: EdgeFunction<P::Value>,
    ) -> Result<(), SolverError> {
        self.ensure_contains(target)?;
        let added = {
            let mut jump_fn = self.jump_fn.lock();
            if let Some(update) = update {
                let mut save = update.jump_save.lock();
                if !save.contains_key(&(target, source_fact.clone())) {
                    let row = jump_fn.take_forward_row(source_fact, target);
                    save.insert((target, source_fact.clone()), row);
                    update.changed_nodes.lock().insert(target);
                }
            }
            let prior = jump_fn
                .cell(source_fact, target, target_fact)
                .cloned()
                .unwrap_or(EdgeFunction::AllTop);
            let joined = prior.join_with(&f);
            if joined.equal_to(&prior) {
                false
            } else {
                trace!(
                    "edge: <{source_fact:?}> -> <{target:?}, {target_fact:?}> - {joined:?}"
                );
                jump_fn.add(source_fact.clone(), target, target_fact.clone(), joined);
                true
            }
        };
        if added {
            self.path_worklist.push(PathEdge::new(
                source_fact.clone(),
                target,
                Some(target_fact.clone()),
            ));
        }
        Ok(())
    }

    /// Update-mode retraction: snapshots and clears the row of
    /// `(target, source_fact)` on first touch and schedules a retraction
    /// edge, so the successors get recomputed as if the bindings never
    /// existed.
    fn clear_target(
        &self,
        update: &Update<P>,
        source_fact: &P::Fact,
        target: P::Node,
    ) -> Result<(), SolverError> {
        self.ensure_contains(target)?;
        let retract = {
            let mut jump_fn = self.jump_fn.lock();
            let mut save = update.jump_save.lock();
            if save.contains_key(&(target, source_fact.clone())) {
                false
            } else {
                let row = jump_fn.take_forward_row(source_fact, target);
                save.insert((target, source_fact.clone()), row);
                update.changed_nodes.lock().insert(target);
                true
            }
        };
        if retract {
            self.path_worklist
                .push(PathEdge::new(source_fact.clone(), target, None));
        }
        Ok(())
    }

    /// Whether any node of `sources` reaches `node` through predecessor
    /// edges, i.e. a reprocessing round started there will rebuild `node`
    /// on its own.
    fn predecessor_repropagated(&self, sources: &FxHashSet<P::Node>, node: P::Node) -> bool {
        let mut visited = FixedBitSet::with_capacity(self.icfg.node_bound());
        let mut queue: Vec<P::Node> = self.icfg.preds_of(node);
        while let Some(n) = queue.pop() {
            if visited.put(n.index()) {
                continue;
            }
            if sources.contains(&n) && n != node {
                return true;
            }
            queue.extend(self.icfg.preds_of(n));
        }
        false
    }

    /// Phase 2: computes the concrete values along the tabulated jump
    /// functions. Stage one follows the jump functions breadth-first from
    /// the seeds through call and start nodes; stage two folds the
    /// stabilized functions over every remaining node in parallel.
    fn compute_values(&self, threads: usize) -> Result<(), SolverError> {
        self.val.clear();
        self.value_worklist.clear();
        for seed in self.problem.initial_seeds() {
            self.ensure_contains(seed)?;
            self.join_value(seed, self.zero.clone(), self.lattice.bottom());
            self.value_worklist.push((seed, self.zero.clone()));
        }

        let work = || {
            while let Some((n, d)) = self.value_worklist.next() {
                let result = self.propagate_values_from(n, &d);
                self.value_worklist.task_done();
                if let Err(error) = result {
                    self.record_failure(error);
                }
            }
        };
        if threads <= 1 {
            work();
        } else {
            thread::scope(|scope| {
                for _ in 0..threads {
                    scope.spawn(&work);
                }
            });
        }
        self.take_failure()?;

        self.icfg
            .all_non_call_start_nodes()
            .par_iter()
            .try_for_each(|&n| self.compute_value_at(n))
    }

    fn propagate_values_from(&self, n: P::Node, d: &P::Fact) -> Result<(), SolverError> {
        self.ensure_contains(n)?;
        if self.icfg.is_start_point(n) {
            self.propagate_value_at_start(n, d)?;
        }
        if self.icfg.is_call(n) {
            self.propagate_value_at_call(n, d)?;
        }
        Ok(())
    }

    /// Pushes the value at a procedure entry forward to every call site of
    /// the procedure, through the jump functions recorded for them.
    fn propagate_value_at_start(&self, sp: P::Node, d: &P::Fact) -> Result<(), SolverError> {
        let proc = self.icfg.proc_of(sp);
        let entry_value = self.value_of(sp, d);
        for call_site in self.icfg.calls_from_within(proc) {
            self.ensure_contains(call_site)?;
            let row: Vec<(P::Fact, EdgeFunction<P::Value>)> = self
                .jump_fn
                .lock()
                .forward_row(d, call_site)
                .map(|row| row.iter().map(|(dp, fp)| (dp.clone(), fp.clone())).collect())
                .unwrap_or_default();
            for (d_prime, f_prime) in row {
                let value = f_prime.apply(&self.lattice, &entry_value);
                self.counters.edge_applications.fetch_add(1, Ordering::Relaxed);
                self.propagate_value(call_site, d_prime, value);
            }
        }
        Ok(())
    }

    /// Pushes the value at a call site into every callee entry.
    fn propagate_value_at_call(&self, n: P::Node, d: &P::Fact) -> Result<(), SolverError> {
        let call_value = self.value_of(n, d);
        for callee in self.icfg.callees_of_call_at(n) {
            let call_flow = self.flows.call_flow(n, callee);
            self.counters.flow_constructions.fetch_add(1, Ordering::Relaxed);
            let entry_facts = call_flow.targets(d);
            self.counters.flow_applications.fetch_add(1, Ordering::Relaxed);
            for d_prime in entry_facts {
                let edge_fn = self.edges.call_edge(n, d, callee, &d_prime);
                self.counters.edge_constructions.fetch_add(1, Ordering::Relaxed);
                for sp in self.icfg.start_points_of(callee) {
                    self.ensure_contains(sp)?;
                    let value = edge_fn.apply(&self.lattice, &call_value);
                    self.counters.edge_applications.fetch_add(1, Ordering::Relaxed);
                    self.propagate_value(sp, d_prime.clone(), value);
                }
            }
        }
        Ok(())
    }

    /// Stage two of phase 2 for a single node: combine the entry values of
    /// the procedure with the recorded jump functions into the node.
    fn compute_value_at(&self, n: P::Node) -> Result<(), SolverError> {
        self.ensure_contains(n)?;
        let top = self.lattice.top();
        for sp in self.icfg.start_points_of(self.icfg.proc_of(n)) {
            let cells: Vec<(P::Fact, P::Fact, EdgeFunction<P::Value>)> = self
                .jump_fn
                .lock()
                .rows_at(n)
                .map(|cells| {
                    cells
                        .iter()
                        .map(|((d1, d2), f)| (d1.clone(), d2.clone(), f.clone()))
                        .collect()
                })
                .unwrap_or_default();
            for (d_prime, d, f_prime) in cells {
                let entry_value = self.value_of(sp, &d_prime);
                if entry_value == top {
                    continue;
                }
                let value = f_prime.apply(&self.lattice, &entry_value);
                self.counters.edge_applications.fetch_add(1, Ordering::Relaxed);
                if value == top {
                    continue;
                }
                self.join_value(n, d, value);
            }
        }
        Ok(())
    }

    fn propagate_value(&self, n: P::Node, d: P::Fact, v: P::Value) {
        if self.join_value(n, d.clone(), v) {
            self.value_worklist.push((n, d));
        }
    }

    /// Joins `v` into `val(n, d)`; returns whether the entry changed. Top
    /// is never stored, so absence and top stay interchangeable.
    fn join_value(&self, n: P::Node, d: P::Fact, v: P::Value) -> bool {
        if v == self.lattice.top() {
            return false;
        }
        let mut row = self.val.entry(n).or_default();
        let joined = match row.get(&d) {
            Some(current) => {
                let joined = self.lattice.join(current, &v);
                if joined == *current {
                    return false;
                }
                joined
            }
            // An absent entry is top, and top is the unit of join.
            None => v,
        };
        row.insert(d, joined);
        true
    }

    fn value_of(&self, n: P::Node, d: &P::Fact) -> P::Value {
        self.val
            .get(&n)
            .and_then(|row| row.get(d).cloned())
            .unwrap_or_else(|| self.lattice.top())
    }

    fn collect_frontier(
        &self,
        edges: &[(P::Node, P::Node)],
        gone: &FxHashSet<P::Node>,
        out: &mut FxHashMap<P::Proc, FxHashSet<P::Node>>,
    ) {
        let mut sources: FxHashSet<P::Node> = FxHashSet::default();
        for &(source, _) in edges {
            if !sources.insert(source) {
                continue;
            }
            if gone.contains(&source) {
                continue;
            }
            let loop_header = self.icfg.loop_start_point_for(source);
            if let Some(header) = loop_header {
                if gone.contains(&header) {
                    continue;
                }
            }
            let frontier = match loop_header {
                None => vec![source],
                Some(header) => self.icfg.preds_of(header),
            };
            for node in frontier {
                out.entry(self.icfg.proc_of(node)).or_default().insert(node);
            }
        }
    }
}
