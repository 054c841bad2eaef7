//! Owning arenas for the typegraph entities plus the structural operations
//! over them.
//!
//! Everything here is pure data manipulation; the solver-invalidation
//! contract is layered on top by [`Program`](crate::Program), which is the
//! only caller of the mutating operations.

use std::collections::BTreeSet;
use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::node::{CfgNode, NodeId};
use crate::reachable::ReachabilityMatrix;
use crate::variable::{
    Binding, BindingId, MAX_VAR_SIZE, Origin, SourceSet, Variable, VariableId,
};

#[derive(Debug)]
pub(crate) struct Graph<D> {
    pub(crate) nodes: Vec<CfgNode>,
    pub(crate) variables: Vec<Variable<D>>,
    pub(crate) bindings: Vec<Binding<D>>,
    pub(crate) backward_reachability: ReachabilityMatrix,
    pub(crate) entrypoint: Option<NodeId>,
    pub(crate) default_data: Option<D>,
}

impl<D> Graph<D> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            variables: Vec::new(),
            bindings: Vec::new(),
            backward_reachability: ReachabilityMatrix::new(),
            entrypoint: None,
            default_data: None,
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn variable(&self, id: VariableId) -> &Variable<D> {
        &self.variables[id.index()]
    }

    pub(crate) fn binding(&self, id: BindingId) -> &Binding<D> {
        &self.bindings[id.index()]
    }

    pub(crate) fn new_node(&mut self, name: String, condition: Option<BindingId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let row = self.backward_reachability.add_node();
        assert_eq!(
            row,
            id.index(),
            "reachability matrix out of sync with node ids"
        );
        self.nodes.push(CfgNode {
            id,
            name,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            bindings: Vec::new(),
            condition,
        });
        id
    }

    pub(crate) fn new_variable(&mut self) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(Variable::new(id));
        id
    }

    /// Inserts the edge `a -> b` and updates the reachability cache.
    /// Returns false without changing anything when the edge already
    /// exists; edges behave as a set with first-insertion iteration order.
    pub(crate) fn connect(&mut self, a: NodeId, b: NodeId) -> bool {
        if self.nodes[a.index()].outgoing.contains(&b) {
            return false;
        }
        self.nodes[a.index()].outgoing.push(b);
        self.nodes[b.index()].incoming.push(a);
        // Reversed on purpose: the matrix stores backward reachability
        // ("which nodes can I see walking predecessors").
        self.backward_reachability
            .add_connection(b.index(), a.index());
        true
    }

    /// Whether a forward path `src -> ... -> dst` exists.
    pub(crate) fn is_reachable(&self, src: NodeId, dst: NodeId) -> bool {
        self.backward_reachability
            .is_reachable(dst.index(), src.index())
    }

    /// Quick feasibility check for a combination of goals: every goal must
    /// have at least one origin that is backward-reachable from `node`.
    /// Ignores assignment order and source sets entirely.
    pub(crate) fn can_have_combination(&self, node: NodeId, goals: &[BindingId]) -> bool {
        goals.iter().all(|&goal| {
            self.bindings[goal.index()].origins.iter().any(|origin| {
                self.backward_reachability
                    .is_reachable(node.index(), origin.at.index())
            })
        })
    }

    /// Whether `binding` depends on `source`, itself included, through any
    /// chain of source sets.
    pub(crate) fn has_source(&self, binding: BindingId, source: BindingId) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![binding];
        while let Some(current) = stack.pop() {
            if current == source {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            for origin in &self.bindings[current.index()].origins {
                for source_set in &origin.source_sets {
                    stack.extend(source_set.iter().copied());
                }
            }
        }
        false
    }

    /// Collects the bindings of `variable` whose assignment node is the
    /// nearest one backward from `viewpoint` on each incoming path. Honors
    /// only the CFG, never source sets. A missing viewpoint returns every
    /// binding.
    pub(crate) fn prune(
        &self,
        variable: VariableId,
        viewpoint: Option<NodeId>,
    ) -> BTreeSet<BindingId> {
        let var = &self.variables[variable.index()];
        let Some(viewpoint) = viewpoint else {
            return var.bindings.iter().copied().collect();
        };
        let mut result = BTreeSet::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![viewpoint];
        seen.insert(viewpoint);
        while let Some(node) = stack.pop() {
            if let Some(bound_here) = var.bindings_at(node) {
                // Older assignments are overwritten here; don't expand past.
                result.extend(bound_here.iter().copied());
                continue;
            }
            for &pred in &self.nodes[node.index()].incoming {
                if seen.insert(pred) {
                    stack.push(pred);
                }
            }
        }
        result
    }
}

impl<D: Clone + Eq + Hash> Graph<D> {
    /// Deduplicating binding lookup. Returns the binding id and whether a
    /// fresh binding was created.
    ///
    /// Once the variable sits at the cap, unknown data is replaced by the
    /// program's default placeholder before the lookup, so all overflowing
    /// values share one binding. Known data always dedups to its existing
    /// binding, cap or not.
    pub(crate) fn find_or_add_binding(
        &mut self,
        variable: VariableId,
        data: D,
    ) -> (BindingId, bool) {
        let var = &mut self.variables[variable.index()];
        let mut data = data;
        if var.bindings.len() >= MAX_VAR_SIZE - 1 && !var.data_to_binding.contains_key(&data) {
            if let Some(default) = &self.default_data {
                data = default.clone();
            }
        }
        if let Some(&existing) = var.data_to_binding.get(&data) {
            return (existing, false);
        }
        let id = BindingId(self.bindings.len() as u32);
        var.bindings.push(id);
        var.data_to_binding.insert(data.clone(), id);
        self.bindings.push(Binding {
            id,
            variable,
            data,
            origins: Vec::new(),
            node_to_origin: FxHashMap::default(),
        });
        (id, true)
    }

    /// Find-or-create the origin of `binding` at `at`. First creation
    /// registers the binding on the CFG node and in its variable's
    /// per-node index.
    pub(crate) fn find_or_add_origin(&mut self, binding: BindingId, at: NodeId) -> usize {
        if let Some(&index) = self.bindings[binding.index()].node_to_origin.get(&at) {
            return index;
        }
        let b = &mut self.bindings[binding.index()];
        let index = b.origins.len();
        let variable = b.variable;
        b.origins.push(Origin::new(at));
        b.node_to_origin.insert(at, index);
        self.variables[variable.index()]
            .node_to_bindings
            .entry(at)
            .or_default()
            .insert(binding);
        self.nodes[at.index()].bindings.push(binding);
        index
    }

    pub(crate) fn add_origin_source_set(
        &mut self,
        binding: BindingId,
        at: NodeId,
        source_set: SourceSet,
    ) {
        let index = self.find_or_add_origin(binding, at);
        self.bindings[binding.index()].origins[index].add_source_set(source_set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (Graph<&'static str>, [NodeId; 4]) {
        let mut graph = Graph::new();
        let n0 = graph.new_node("n0".into(), None);
        let n1 = graph.new_node("n1".into(), None);
        let n2 = graph.new_node("n2".into(), None);
        let n3 = graph.new_node("n3".into(), None);
        graph.connect(n0, n1);
        graph.connect(n0, n2);
        graph.connect(n1, n3);
        graph.connect(n2, n3);
        (graph, [n0, n1, n2, n3])
    }

    #[test]
    fn test_dense_node_ids() {
        let mut graph: Graph<&str> = Graph::new();
        for i in 0..5 {
            let id = graph.new_node(format!("n{i}"), None);
            assert_eq!(id.index(), i);
        }
        assert_eq!(graph.nodes.len(), 5);
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (mut graph, [n0, n1, n2, _n3]) = diamond();
        assert!(!graph.connect(n0, n1));
        assert_eq!(graph.node(n0).outgoing(), [n1, n2]);
        assert_eq!(graph.node(n1).incoming(), [n0]);
    }

    #[test]
    fn test_forward_reachability_orientation() {
        let (graph, [n0, n1, n2, n3]) = diamond();
        assert!(graph.is_reachable(n0, n3));
        assert!(graph.is_reachable(n0, n1));
        assert!(graph.is_reachable(n1, n3));
        assert!(!graph.is_reachable(n3, n0));
        assert!(!graph.is_reachable(n1, n2));
        assert!(!graph.is_reachable(n2, n1));
    }

    #[test]
    fn test_binding_dedup_by_data() {
        let (mut graph, _) = diamond();
        let x = graph.new_variable();
        let (first, created_first) = graph.find_or_add_binding(x, "1");
        let (second, created_second) = graph.find_or_add_binding(x, "1");
        assert!(created_first);
        assert!(!created_second);
        assert_eq!(first, second);
        assert_eq!(graph.variable(x).size(), 1);
    }

    #[test]
    fn test_origin_registration() {
        let (mut graph, [n0, ..]) = diamond();
        let x = graph.new_variable();
        let (binding, _) = graph.find_or_add_binding(x, "1");
        graph.add_origin_source_set(binding, n0, SourceSet::new());
        graph.add_origin_source_set(binding, n0, SourceSet::new());
        assert_eq!(graph.binding(binding).origins().len(), 1);
        assert_eq!(graph.node(n0).bindings(), [binding]);
        assert_eq!(graph.variable(x).nodes(), [n0]);
        assert!(graph.binding(binding).origin_at(n0).is_some());
    }

    #[test]
    fn test_prune_stops_at_assignments() {
        let (mut graph, [n0, n1, _n2, n3]) = diamond();
        let x = graph.new_variable();
        let (at_root, _) = graph.find_or_add_binding(x, "root");
        graph.add_origin_source_set(at_root, n0, SourceSet::new());
        let (at_left, _) = graph.find_or_add_binding(x, "left");
        graph.add_origin_source_set(at_left, n1, SourceSet::new());

        // Left path shadows the root assignment; right path still sees it.
        let pruned = graph.prune(x, Some(n3));
        assert_eq!(pruned, BTreeSet::from([at_root, at_left]));
        assert_eq!(graph.prune(x, Some(n1)), BTreeSet::from([at_left]));
        assert_eq!(graph.prune(x, Some(n0)), BTreeSet::from([at_root]));
        assert_eq!(graph.prune(x, None), BTreeSet::from([at_root, at_left]));
    }

    #[test]
    fn test_prune_empty_variable() {
        let (mut graph, [n0, ..]) = diamond();
        let x = graph.new_variable();
        assert!(graph.prune(x, Some(n0)).is_empty());
        assert!(graph.prune(x, None).is_empty());
    }

    #[test]
    fn test_can_have_combination_uses_backward_matrix() {
        let (mut graph, [n0, n1, n2, n3]) = diamond();
        let x = graph.new_variable();
        let (left, _) = graph.find_or_add_binding(x, "left");
        graph.add_origin_source_set(left, n1, SourceSet::new());
        assert!(graph.can_have_combination(n3, &[left]));
        assert!(graph.can_have_combination(n1, &[left]));
        assert!(!graph.can_have_combination(n2, &[left]));
        assert!(!graph.can_have_combination(n0, &[left]));
    }

    #[test]
    fn test_has_source_transitive_and_cyclic() {
        let (mut graph, [n0, n1, ..]) = diamond();
        let x = graph.new_variable();
        let y = graph.new_variable();
        let z = graph.new_variable();
        let (ax, _) = graph.find_or_add_binding(x, "a");
        graph.add_origin_source_set(ax, n0, SourceSet::new());
        let (ay, _) = graph.find_or_add_binding(y, "a");
        graph.add_origin_source_set(ay, n1, SourceSet::from([ax]));
        let (az, _) = graph.find_or_add_binding(z, "a");
        graph.add_origin_source_set(az, n1, SourceSet::from([ay]));

        assert!(graph.has_source(az, az));
        assert!(graph.has_source(az, ay));
        assert!(graph.has_source(az, ax));
        assert!(!graph.has_source(ax, az));

        // Mutually recursive sources must not loop.
        graph.add_origin_source_set(ax, n1, SourceSet::from([az]));
        assert!(graph.has_source(ax, az));
        assert!(graph.has_source(ax, ay));
    }

    #[test]
    fn test_max_var_size_collapses_onto_default() {
        let mut graph: Graph<usize> = Graph::new();
        graph.default_data = Some(9999);
        let x = graph.new_variable();
        for value in 0..MAX_VAR_SIZE {
            graph.find_or_add_binding(x, value);
        }
        assert_eq!(graph.variable(x).size(), MAX_VAR_SIZE);
        // Known data still dedups onto its own binding.
        let (known, created) = graph.find_or_add_binding(x, 1);
        assert!(!created);
        assert_eq!(known, graph.variable(x).bindings()[1]);
        // Unknown data lands on the default binding.
        let (collapsed, created) = graph.find_or_add_binding(x, 123456);
        assert!(!created);
        assert_eq!(collapsed, *graph.variable(x).bindings().last().unwrap());
        assert_eq!(graph.binding(collapsed).data(), &9999);
        assert_eq!(graph.variable(x).size(), MAX_VAR_SIZE);
    }
}
