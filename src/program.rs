//! The program: owner of the typegraph and of the solver built over it.
//!
//! All construction and mutation flows through [`Program`], which is what
//! lets it enforce the one contract the solver depends on: any mutation
//! that changes what a query could observe drops the solver together with
//! its caches, and the next query lazily rebuilds it.

use std::collections::BTreeSet;
use std::hash::Hash;

use crate::graph::Graph;
use crate::metrics::{Metrics, NodeMetrics, SolverMetrics, VariableMetrics};
use crate::node::{CfgNode, NodeId};
use crate::solver::{self, Solver};
use crate::variable::{Binding, BindingId, SourceSet, Variable, VariableId};

/// Top-level arena tying the CFG and the dataflow graph together.
///
/// A program owns every node, variable and binding it creates and issues
/// their ids. Entities are created monotonically and never destroyed
/// before the program itself. `D` is the host's opaque abstract-value
/// type; the engine only compares values for equality and stores them.
///
/// Thread-compatible but not thread-safe: clients serialize all access.
#[derive(Debug)]
pub struct Program<D> {
    graph: Graph<D>,
    solver: Option<Solver>,
    retired_solver_metrics: Vec<SolverMetrics>,
}

impl<D: Clone + Eq + Hash> Default for Program<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone + Eq + Hash> Program<D> {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            solver: None,
            retired_solver_metrics: Vec::new(),
        }
    }

    // --- CFG construction ---------------------------------------------------

    /// Creates a CFG node. The node's id equals its insertion index.
    pub fn new_cfg_node(&mut self, name: impl Into<String>) -> NodeId {
        self.invalidate_solver();
        self.graph.new_node(name.into(), None)
    }

    /// Creates a CFG node guarded by `condition`: any path through the node
    /// implicitly requires the condition binding to hold.
    pub fn new_cfg_node_with_condition(
        &mut self,
        name: impl Into<String>,
        condition: BindingId,
    ) -> NodeId {
        self.invalidate_solver();
        self.graph.new_node(name.into(), Some(condition))
    }

    /// Connects `a -> b`. Idempotent: an existing edge leaves the graph and
    /// the solver untouched.
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        if self.graph.connect(a, b) {
            self.invalidate_solver();
        }
    }

    /// Creates a new node and connects it after `from`.
    pub fn connect_new(&mut self, from: NodeId, name: impl Into<String>) -> NodeId {
        let node = self.new_cfg_node(name);
        self.connect(from, node);
        node
    }

    pub fn connect_new_with_condition(
        &mut self,
        from: NodeId,
        name: impl Into<String>,
        condition: BindingId,
    ) -> NodeId {
        let node = self.new_cfg_node_with_condition(name, condition);
        self.connect(from, node);
        node
    }

    /// Replaces the node's condition binding. Does not invalidate the
    /// solver on its own; callers changing conditions after querying pair
    /// this with [`invalidate_solver`](Self::invalidate_solver).
    pub fn set_condition(&mut self, node: NodeId, condition: Option<BindingId>) {
        self.graph.node_mut(node).condition = condition;
    }

    /// Creates a variable. A fresh variable has no bindings and therefore
    /// changes nothing a query could observe, so the solver stays valid.
    pub fn new_variable(&mut self) -> VariableId {
        self.graph.new_variable()
    }

    // --- Binding construction -----------------------------------------------

    /// Adds `data` as a possible value of `variable`, deduplicating against
    /// the values it already holds. Does not overwrite the variable at any
    /// CFG node; it only widens the union of candidates.
    pub fn add_binding(&mut self, variable: VariableId, data: D) -> BindingId {
        let (binding, created) = self.graph.find_or_add_binding(variable, data);
        if created {
            self.invalidate_solver();
        }
        binding
    }

    /// [`add_binding`](Self::add_binding) plus an origin at `at` justified
    /// by `sources`.
    pub fn add_binding_at(
        &mut self,
        variable: VariableId,
        data: D,
        at: NodeId,
        sources: &[BindingId],
    ) -> BindingId {
        let binding = self.add_binding(variable, data);
        self.add_origin_with_sources(binding, at, sources);
        binding
    }

    /// Records where `binding` was formed. Every binding should gain at
    /// least one origin unless it is a constant. Note that an origin only
    /// fires through its source sets; pair this with
    /// [`add_origin_with_sources`](Self::add_origin_with_sources) (an empty
    /// source set is an unconditional assignment).
    pub fn add_origin(&mut self, binding: BindingId, at: NodeId) {
        self.invalidate_solver();
        self.graph.find_or_add_origin(binding, at);
    }

    pub fn add_origin_with_sources(
        &mut self,
        binding: BindingId,
        at: NodeId,
        sources: &[BindingId],
    ) {
        self.invalidate_solver();
        self.graph
            .add_origin_source_set(binding, at, sources.iter().copied().collect());
    }

    /// Copies origins from `from` onto `to`.
    ///
    /// With a target node, the history is linked: `to` gets one origin at
    /// `at` whose source set is `{from} ∪ additional_sources`. Without one,
    /// the history is flattened: each of `from`'s origins is copied
    /// verbatim with `additional_sources` unioned into every source set.
    pub fn copy_origins(
        &mut self,
        to: BindingId,
        from: BindingId,
        at: Option<NodeId>,
        additional_sources: &SourceSet,
    ) {
        match at {
            Some(at) => {
                let mut sources = additional_sources.clone();
                sources.insert(from);
                self.invalidate_solver();
                self.graph.add_origin_source_set(to, at, sources);
            }
            None => {
                let copied: Vec<(NodeId, Vec<SourceSet>)> = self
                    .graph
                    .binding(from)
                    .origins()
                    .iter()
                    .map(|origin| {
                        (
                            origin.at(),
                            origin.source_sets().iter().cloned().collect(),
                        )
                    })
                    .collect();
                for (origin_at, source_sets) in copied {
                    for source_set in source_sets {
                        let mut sources = additional_sources.clone();
                        sources.extend(source_set);
                        self.invalidate_solver();
                        self.graph.add_origin_source_set(to, origin_at, sources);
                    }
                }
            }
        }
    }

    /// Adds `binding` (typically taken from another variable) as a
    /// candidate of `variable`, carrying its history over.
    ///
    /// When every origin of the source binding already sits at `at`, the
    /// old source sets are copied instead of linked, so the solver has
    /// fewer levels to walk. Otherwise the new binding is justified by a
    /// single origin at `at` sourced on the old binding.
    pub fn paste_binding(
        &mut self,
        variable: VariableId,
        binding: BindingId,
        at: Option<NodeId>,
        additional_sources: &SourceSet,
    ) -> BindingId {
        let data = self.graph.binding(binding).data().clone();
        let pasted = self.add_binding(variable, data);
        let Some(at) = at else {
            self.copy_origins(pasted, binding, None, additional_sources);
            return pasted;
        };
        let all_at_target = self
            .graph
            .binding(binding)
            .origins()
            .iter()
            .all(|origin| origin.at() == at);
        if all_at_target {
            self.copy_origins(pasted, binding, None, additional_sources);
        } else {
            self.copy_origins(pasted, binding, Some(at), additional_sources);
        }
        pasted
    }

    /// [`paste_binding`](Self::paste_binding) over every binding of
    /// `other`.
    pub fn paste_variable(
        &mut self,
        variable: VariableId,
        other: VariableId,
        at: Option<NodeId>,
        additional_sources: &SourceSet,
    ) {
        let bindings: Vec<BindingId> = self.graph.variable(other).bindings().to_vec();
        for binding in bindings {
            self.paste_binding(variable, binding, at, additional_sources);
        }
    }

    // --- Queries ------------------------------------------------------------

    /// Whether a forward path `src -> ... -> dst` exists.
    pub fn is_reachable(&self, src: NodeId, dst: NodeId) -> bool {
        self.graph.is_reachable(src, dst)
    }

    /// Whether the combination of bindings is visible from `node`: some
    /// path through the program assigns all of them, none overwritten
    /// afterwards, with all their sources assigned before that.
    pub fn has_combination(&mut self, node: NodeId, goals: &[BindingId]) -> bool {
        self.solve(goals, node)
    }

    /// Cheap necessary condition for [`has_combination`](Self::has_combination):
    /// every goal needs at least one origin backward-reachable from `node`.
    /// Ignores assignment order, so it can return true for combinations the
    /// solver rejects.
    pub fn can_have_combination(&self, node: NodeId, goals: &[BindingId]) -> bool {
        self.graph.can_have_combination(node, goals)
    }

    /// Whether `binding` is visible from `viewpoint` (a full solver query
    /// for just this binding).
    pub fn is_visible(&mut self, binding: BindingId, viewpoint: NodeId) -> bool {
        self.solve(&[binding], viewpoint)
    }

    /// Whether `binding` depends on `source` through any chain of source
    /// sets; every binding counts among its own sources.
    pub fn has_source(&self, binding: BindingId, source: BindingId) -> bool {
        self.graph.has_source(binding, source)
    }

    /// Filters the variable's bindings down to those visible from
    /// `viewpoint`, honoring the CFG and the source sets. With `strict`
    /// unset, a faster position-independent approximation is used that may
    /// keep bindings the strict solver would reject, but never drops a
    /// visible one.
    pub fn filter(
        &mut self,
        variable: VariableId,
        viewpoint: NodeId,
        strict: bool,
    ) -> Vec<BindingId> {
        let bindings: Vec<BindingId> = self.graph.variable(variable).bindings().to_vec();
        bindings
            .into_iter()
            .filter(|&binding| {
                if strict {
                    self.solve(&[binding], viewpoint)
                } else {
                    solver::relaxed_visible(&self.graph, binding)
                }
            })
            .collect()
    }

    /// Like [`filter`](Self::filter), but returns the data of the surviving
    /// bindings.
    pub fn filtered_data(
        &mut self,
        variable: VariableId,
        viewpoint: NodeId,
        strict: bool,
    ) -> Vec<D> {
        self.filter(variable, viewpoint, strict)
            .into_iter()
            .map(|binding| self.graph.binding(binding).data().clone())
            .collect()
    }

    /// The bindings of `variable` whose assignment node is the nearest one
    /// backward from `viewpoint` on each incoming path. Honors only the
    /// CFG, never source sets, which makes it much faster than
    /// [`filter`](Self::filter) and at least as generous. A missing
    /// viewpoint returns every binding.
    pub fn prune(&self, variable: VariableId, viewpoint: Option<NodeId>) -> BTreeSet<BindingId> {
        self.graph.prune(variable, viewpoint)
    }

    /// Data projection of [`prune`](Self::prune).
    pub fn pruned_data(&self, variable: VariableId, viewpoint: Option<NodeId>) -> Vec<D> {
        self.prune(variable, viewpoint)
            .into_iter()
            .map(|binding| self.graph.binding(binding).data().clone())
            .collect()
    }

    /// The unfiltered data of all the variable's bindings.
    pub fn data(&self, variable: VariableId) -> Vec<D> {
        self.graph
            .variable(variable)
            .bindings()
            .iter()
            .map(|&binding| self.graph.binding(binding).data().clone())
            .collect()
    }

    /// Runs the solver on `goals` at `start`, lazily rebuilding it after
    /// any invalidation.
    pub fn solve(&mut self, goals: &[BindingId], start: NodeId) -> bool {
        let solver = self.solver.get_or_insert_with(Solver::new);
        solver.solve(&self.graph, goals, start)
    }

    // --- Solver lifecycle ---------------------------------------------------

    /// Drops the solver and both of its caches. The metrics the solver
    /// accumulated are archived and stay visible through
    /// [`calculate_metrics`](Self::calculate_metrics).
    pub fn invalidate_solver(&mut self) {
        if let Some(solver) = self.solver.take() {
            self.retired_solver_metrics.push(solver.into_metrics());
        }
    }

    /// The live solver, if the program has been queried since the last
    /// mutation. Exposed for observing the invalidation lifecycle; query
    /// through [`solve`](Self::solve) and friends instead.
    pub fn solver(&self) -> Option<&Solver> {
        self.solver.as_ref()
    }

    // --- Accessors ----------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &CfgNode {
        self.graph.node(id)
    }

    pub fn variable(&self, id: VariableId) -> &Variable<D> {
        self.graph.variable(id)
    }

    pub fn binding(&self, id: BindingId) -> &Binding<D> {
        self.graph.binding(id)
    }

    pub fn cfg_nodes(&self) -> &[CfgNode] {
        &self.graph.nodes
    }

    pub fn count_cfg_nodes(&self) -> usize {
        self.graph.nodes.len()
    }

    pub fn next_variable_id(&self) -> usize {
        self.graph.variables.len()
    }

    pub fn next_binding_id(&self) -> usize {
        self.graph.bindings.len()
    }

    pub fn entrypoint(&self) -> Option<NodeId> {
        self.graph.entrypoint
    }

    pub fn set_entrypoint(&mut self, node: Option<NodeId>) {
        self.graph.entrypoint = node;
    }

    pub fn default_data(&self) -> Option<&D> {
        self.graph.default_data.as_ref()
    }

    /// Sets the placeholder value that overflowing variables collapse onto
    /// once they hold [`MAX_VAR_SIZE`](crate::MAX_VAR_SIZE) bindings.
    pub fn set_default_data(&mut self, data: D) {
        self.graph.default_data = Some(data);
    }

    // --- Metrics ------------------------------------------------------------

    /// A full snapshot of the program's metrics. Pure: recomputing after
    /// any query reproduces the same values.
    pub fn calculate_metrics(&self) -> Metrics {
        let cfg_node_metrics = self
            .graph
            .nodes
            .iter()
            .map(|node| NodeMetrics {
                incoming_edge_count: node.incoming().len(),
                outgoing_edge_count: node.outgoing().len(),
                has_condition: node.condition().is_some(),
            })
            .collect();
        let variable_metrics = self
            .graph
            .variables
            .iter()
            .map(|variable| VariableMetrics {
                binding_count: variable.size(),
                node_ids: variable.nodes(),
            })
            .collect();
        let mut solver_metrics = self.retired_solver_metrics.clone();
        if let Some(solver) = &self.solver {
            solver_metrics.push(solver.calculate_metrics());
        }
        Metrics {
            binding_count: self.graph.bindings.len(),
            cfg_node_metrics,
            variable_metrics,
            solver_metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_lifecycle() {
        let mut program: Program<&str> = Program::new();
        // Adding a variable or a CFG node doesn't create a solver.
        program.new_variable();
        let n1 = program.new_cfg_node("n1");
        assert!(program.solver().is_none());
        program.has_combination(n1, &[]);
        assert!(program.solver().is_some());
        // A new CFG node invalidates the current solver.
        let n2 = program.new_cfg_node("n2");
        assert!(program.solver().is_none());
        program.has_combination(n2, &[]);
        assert!(program.solver().is_some());
        // A new variable by itself doesn't change the CFG.
        let x = program.new_variable();
        assert!(program.solver().is_some());
        // Adding a binding with an origin invalidates.
        let ax = program.add_binding(x, "a");
        program.add_origin(ax, n1);
        assert!(program.solver().is_none());
        program.has_combination(n2, &[ax]);
        assert!(program.solver().is_some());
    }

    #[test]
    fn test_duplicate_edge_keeps_solver() {
        let mut program: Program<&str> = Program::new();
        let n0 = program.new_cfg_node("n0");
        let n1 = program.connect_new(n0, "n1");
        program.has_combination(n1, &[]);
        assert!(program.solver().is_some());
        program.connect(n0, n1);
        assert!(program.solver().is_some());
        assert_eq!(program.node(n0).outgoing(), [n1]);
    }

    #[test]
    fn test_invalidation_archives_solver_metrics() {
        let mut program: Program<&str> = Program::new();
        let n0 = program.new_cfg_node("n0");
        let x = program.new_variable();
        let xa = program.add_binding_at(x, "a", n0, &[]);
        assert!(program.is_visible(xa, n0));
        assert_eq!(program.calculate_metrics().solver_metrics.len(), 1);

        program.new_cfg_node("n1");
        let metrics = program.calculate_metrics();
        assert_eq!(metrics.solver_metrics.len(), 1);
        assert_eq!(metrics.solver_metrics[0].query_metrics.len(), 1);

        assert!(program.is_visible(xa, n0));
        let metrics = program.calculate_metrics();
        assert_eq!(metrics.solver_metrics.len(), 2);
    }

    #[test]
    fn test_paste_binding_links_remote_history() {
        let mut program: Program<&str> = Program::new();
        let n0 = program.new_cfg_node("n0");
        let n1 = program.connect_new(n0, "n1");
        let x = program.new_variable();
        let y = program.new_variable();
        let xa = program.add_binding_at(x, "a", n0, &[]);

        let pasted = program.paste_binding(y, xa, Some(n1), &SourceSet::new());
        let origins = program.binding(pasted).origins();
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0].at(), n1);
        assert_eq!(
            origins[0].source_sets().iter().next().unwrap(),
            &SourceSet::from([xa])
        );
        assert!(program.is_visible(pasted, n1));
    }

    #[test]
    fn test_paste_binding_flattens_local_history() {
        let mut program: Program<&str> = Program::new();
        let n0 = program.new_cfg_node("n0");
        let n1 = program.connect_new(n0, "n1");
        let x = program.new_variable();
        let y = program.new_variable();
        let z = program.new_variable();
        let src = program.add_binding_at(z, "s", n0, &[]);
        let xa = program.add_binding_at(x, "a", n1, &[src]);

        // Every origin of xa sits at n1 already: the source set is copied
        // instead of linked.
        let pasted = program.paste_binding(y, xa, Some(n1), &SourceSet::new());
        let origins = program.binding(pasted).origins();
        assert_eq!(origins.len(), 1);
        assert_eq!(origins[0].at(), n1);
        assert_eq!(
            origins[0].source_sets().iter().next().unwrap(),
            &SourceSet::from([src])
        );
    }

    #[test]
    fn test_paste_variable_carries_all_bindings() {
        let mut program: Program<&str> = Program::new();
        let n0 = program.new_cfg_node("n0");
        let n1 = program.connect_new(n0, "n1");
        let x = program.new_variable();
        let y = program.new_variable();
        program.add_binding_at(x, "a", n0, &[]);
        program.add_binding_at(x, "b", n0, &[]);

        program.paste_variable(y, x, Some(n1), &SourceSet::new());
        assert_eq!(program.variable(y).size(), 2);
        let mut data = program.data(y);
        data.sort_unstable();
        assert_eq!(data, ["a", "b"]);
    }

    #[test]
    fn test_entrypoint_and_default_data() {
        let mut program: Program<&str> = Program::new();
        let n0 = program.new_cfg_node("n0");
        assert_eq!(program.entrypoint(), None);
        program.set_entrypoint(Some(n0));
        assert_eq!(program.entrypoint(), Some(n0));
        assert!(program.default_data().is_none());
        program.set_default_data("unsolvable");
        assert_eq!(program.default_data(), Some(&"unsolvable"));
    }

    #[test]
    fn test_condition_on_node_blocks_other_bindings() {
        let mut program: Program<&str> = Program::new();
        let n1 = program.new_cfg_node("n1");
        let x = program.new_variable();
        let xa = program.add_binding_at(x, "a", n1, &[]);
        let xb = program.add_binding_at(x, "b", n1, &[]);
        assert!(program.has_combination(n1, &[xa]));
        program.set_condition(n1, Some(xb));
        program.invalidate_solver();
        assert!(!program.has_combination(n1, &[xa]));
    }
}
