//! Backward path queries over the CFG.
//!
//! Every search here walks `incoming` edges. The entry point used by the
//! solver, [`PathFinder::find_node_backwards`], memoizes its answers per
//! `(start, finish, blocked)` key; the cache lives and dies with the
//! solver that owns the finder.

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::Graph;
use crate::node::NodeId;

/// Cache key for a backward path query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct QueryKey {
    start: NodeId,
    finish: NodeId,
    blocked: BTreeSet<NodeId>,
}

/// Result of [`PathFinder::find_node_backwards`]. On success `path` holds
/// the condition-carrying articulation nodes of the route, not the full
/// node sequence.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryResult {
    pub(crate) path_exists: bool,
    pub(crate) path: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub(crate) struct PathFinder {
    solved_queries: FxHashMap<QueryKey, QueryResult>,
}

impl PathFinder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether `finish` can be reached at all, walking backwards from
    /// `start` around the blocked nodes. Start and finish themselves may
    /// appear in `blocked` without affecting the answer.
    #[allow(dead_code)] // cheaper than the shortest-path variant when only existence matters
    pub(crate) fn find_any_path<D>(
        &self,
        graph: &Graph<D>,
        start: NodeId,
        finish: NodeId,
        blocked: &BTreeSet<NodeId>,
    ) -> bool {
        let mut stack = vec![start];
        let mut seen = FxHashSet::default();
        while let Some(node) = stack.pop() {
            if node == finish {
                return true;
            }
            if !seen.insert(node) || blocked.contains(&node) {
                continue;
            }
            stack.extend_from_slice(&graph.node(node).incoming);
        }
        false
    }

    /// Finds a shortest backward path `[start, ..., finish]`, or an empty
    /// sequence when none exists.
    pub(crate) fn find_shortest_path<D>(
        &self,
        graph: &Graph<D>,
        start: NodeId,
        finish: NodeId,
        blocked: &BTreeSet<NodeId>,
    ) -> Vec<NodeId> {
        let mut queue = VecDeque::from([start]);
        let mut previous: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut seen = FxHashSet::default();
        let mut found = false;
        while let Some(node) = queue.pop_front() {
            if node == finish {
                found = true;
                break;
            }
            if !seen.insert(node) || blocked.contains(&node) {
                continue;
            }
            for &pred in &graph.node(node).incoming {
                // First writer wins; BFS order keeps the path shortest.
                previous.entry(pred).or_insert(node);
            }
            queue.extend(graph.node(node).incoming.iter().copied());
        }
        if !found {
            return Vec::new();
        }
        let mut path = vec![finish];
        let mut node = finish;
        while node != start {
            node = previous[&node];
            path.push(node);
        }
        path.reverse();
        path
    }

    /// The reachable node carrying the greatest weight, exploring backwards
    /// from the predecessors of `start` and never looping back to `start`.
    /// Nodes in `seen` still count as candidates; they are just not
    /// expanded.
    pub(crate) fn find_highest_reachable_weight<D>(
        &self,
        graph: &Graph<D>,
        start: NodeId,
        mut seen: FxHashSet<NodeId>,
        weights: &FxHashMap<NodeId, usize>,
    ) -> Option<NodeId> {
        let mut stack = graph.node(start).incoming.clone();
        let mut best: Option<(usize, NodeId)> = None;
        while let Some(node) = stack.pop() {
            if node == start {
                continue;
            }
            if let Some(&weight) = weights.get(&node) {
                if best.is_none_or(|(best_weight, _)| weight > best_weight) {
                    best = Some((weight, node));
                }
            }
            if !seen.insert(node) {
                continue;
            }
            stack.extend_from_slice(&graph.node(node).incoming);
        }
        best.map(|(_, node)| node)
    }

    /// Memoized backward route query used by the solver.
    ///
    /// On success the returned path contains exactly the condition-carrying
    /// nodes every alternative route from `start` back to `finish` must
    /// traverse (start and finish included when they qualify): those are
    /// the conditions any solution has to absorb.
    pub(crate) fn find_node_backwards<D>(
        &mut self,
        graph: &Graph<D>,
        start: NodeId,
        finish: NodeId,
        blocked: &BTreeSet<NodeId>,
    ) -> QueryResult {
        let key = QueryKey {
            start,
            finish,
            blocked: blocked.clone(),
        };
        if let Some(result) = self.solved_queries.get(&key) {
            return result.clone();
        }
        let shortest_path = self.find_shortest_path(graph, start, finish, blocked);
        if shortest_path.is_empty() {
            let result = QueryResult::default();
            self.solved_queries.insert(key, result.clone());
            return result;
        }
        // Articulation points all lie on the shortest path, since they lie
        // on every possible path. Block that path, then repeatedly jump to
        // the furthest path node still reachable around it; each landing is
        // the next articulation point.
        let mut barrier: FxHashSet<NodeId> = blocked.iter().copied().collect();
        barrier.extend(shortest_path.iter().copied());
        let weights: FxHashMap<NodeId, usize> = shortest_path
            .iter()
            .enumerate()
            .map(|(weight, &node)| (node, weight))
            .collect();
        let mut path = Vec::new();
        let mut node = start;
        loop {
            if graph.node(node).condition.is_some() {
                path.push(node);
            }
            if node == finish {
                break;
            }
            // A weighted ancestor always exists until finish is hit: the
            // next node of the shortest path is a direct predecessor.
            let Some(next) =
                self.find_highest_reachable_weight(graph, node, barrier.clone(), &weights)
            else {
                break;
            };
            node = next;
        }
        let result = QueryResult {
            path_exists: true,
            path,
        };
        self.solved_queries.insert(key, result.clone());
        result
    }
}
