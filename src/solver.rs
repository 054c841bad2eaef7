//! Memoized backtracking search over the dataflow graph.
//!
//! The solver looks for use-def chains that explain one or more
//! variable/value assignments at a given point in the program: it walks the
//! CFG backwards, discharging goals at the nodes that produced them and
//! picking up their source sets as new goals. States are memoized, and a
//! quick per-goal pre-check rules out combinations whose bindings have
//! fallen out of scope.
//!
//! Even with memoization, pathological programs can force exponential
//! search; the underlying problem is NP complete (3-SAT reduces to it).

use std::collections::{BTreeSet, VecDeque};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::graph::Graph;
use crate::metrics::{CacheMetrics, QueryMetrics, QueryStep, SolverMetrics};
use crate::node::NodeId;
use crate::path::PathFinder;
use crate::variable::{BindingId, VariableId};

type GoalSet = BTreeSet<BindingId>;

/// A position in the program together with the set of goals (bindings)
/// that still have to be justified there. A state is "solved" when some
/// path through the program ends at the position with all goals assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct State {
    pos: NodeId,
    goals: GoalSet,
}

/// One way of discharging goals at a position: the goals whose origins
/// fired there, and the goals left open (sources picked up along the way
/// included).
#[derive(Debug)]
struct Partition {
    removed: GoalSet,
    remaining: GoalSet,
}

#[derive(Debug, Clone)]
struct Branch {
    to_remove: GoalSet,
    seen: GoalSet,
    removed: GoalSet,
    remaining: GoalSet,
}

/// Enumerates the ways goals can be discharged at `pos`.
///
/// Starting from the goals bound at `pos`, each branch replaces such a goal
/// with one of its origin's source sets, forking once per source set, until
/// nothing removable is left. Goals are processed at most once per branch,
/// which keeps cyclic source references finite. Producing complete
/// partitions here lets `find_solution` process its state in one sweep
/// instead of threading partial removals through recursive calls.
fn resolve_finished_goals<D>(graph: &Graph<D>, pos: NodeId, goals: &GoalSet) -> Vec<Partition> {
    let mut to_remove = GoalSet::new();
    for &bound in &graph.node(pos).bindings {
        if goals.contains(&bound) {
            to_remove.insert(bound);
        }
    }
    let remaining: GoalSet = goals.difference(&to_remove).copied().collect();
    let mut work = VecDeque::from([Branch {
        to_remove,
        seen: GoalSet::new(),
        removed: GoalSet::new(),
        remaining,
    }]);
    let mut results = Vec::new();
    while let Some(mut branch) = work.pop_front() {
        let Some(&goal) = branch.to_remove.iter().next() else {
            results.push(Partition {
                removed: branch.removed,
                remaining: branch.remaining,
            });
            continue;
        };
        branch.to_remove.remove(&goal);
        if !branch.seen.insert(goal) {
            work.push_back(branch);
            continue;
        }
        let Some(origin) = graph.binding(goal).origin_at(pos) else {
            branch.remaining.insert(goal);
            work.push_back(branch);
            continue;
        };
        branch.removed.insert(goal);
        for source_set in &origin.source_sets {
            let mut fork = branch.clone();
            fork.to_remove.extend(source_set.iter().copied());
            work.push_back(fork);
        }
    }
    results
}

/// Whether the removed goals assign two different bindings to one
/// variable. Such a partition cannot describe a real program state.
fn goals_conflict<D>(graph: &Graph<D>, goals: &GoalSet) -> bool {
    let mut variables: FxHashMap<VariableId, BindingId> = FxHashMap::default();
    for &goal in goals {
        let variable = graph.binding(goal).variable;
        if let Some(&existing) = variables.get(&variable) {
            assert_ne!(existing, goal, "duplicate goal");
            // Distinct bindings of one variable carry distinct data by
            // construction of the dedup map.
            return true;
        }
        variables.insert(variable, goal);
    }
    false
}

/// Position-independent approximation of visibility, used by non-strict
/// filtering: a binding counts as producible when some origin carries a
/// source set whose members are all recursively producible. Cycles resolve
/// optimistically; a binding without origins is never producible. The
/// answer over-approximates the strict solver (it never hides a visible
/// binding).
pub(crate) fn relaxed_visible<D>(graph: &Graph<D>, binding: BindingId) -> bool {
    fn producible<D>(
        graph: &Graph<D>,
        binding: BindingId,
        active: &mut FxHashSet<BindingId>,
        memo: &mut FxHashMap<BindingId, bool>,
    ) -> bool {
        if let Some(&known) = memo.get(&binding) {
            return known;
        }
        if !active.insert(binding) {
            return true;
        }
        let result = graph.binding(binding).origins.iter().any(|origin| {
            origin.source_sets.iter().any(|sources| {
                sources
                    .iter()
                    .all(|&source| producible(graph, source, active, memo))
            })
        });
        active.remove(&binding);
        memo.insert(binding, result);
        result
    }
    producible(
        graph,
        binding,
        &mut FxHashSet::default(),
        &mut FxHashMap::default(),
    )
}

/// The solver instantiated for one revision of a program.
///
/// It caches solved states and path queries; any graph mutation drops the
/// whole solver (see [`Program::invalidate_solver`](crate::Program::invalidate_solver)),
/// so the caches can never serve stale answers.
#[derive(Debug, Default)]
pub struct Solver {
    solved_states: FxHashMap<State, bool>,
    state_cache_hits: usize,
    state_cache_misses: usize,
    query_metrics: Vec<QueryMetrics>,
    path_finder: PathFinder,
}

impl Solver {
    pub(crate) fn new() -> Self {
        Self {
            solved_states: FxHashMap::default(),
            state_cache_hits: 0,
            state_cache_misses: 0,
            query_metrics: Vec::new(),
            path_finder: PathFinder::new(),
        }
    }

    /// Whether some path through the program gives every goal binding its
    /// value at `start`, walking backwards from there.
    pub(crate) fn solve<D>(
        &mut self,
        graph: &Graph<D>,
        goals: &[BindingId],
        start: NodeId,
    ) -> bool {
        let mut query = QueryMetrics::new(start, goals.len());
        let result = self.solve_inner(graph, goals, start, &mut query);
        self.query_metrics.push(query);
        result
    }

    /// A snapshot of this solver's query and cache counters.
    pub fn calculate_metrics(&self) -> SolverMetrics {
        SolverMetrics {
            query_metrics: self.query_metrics.clone(),
            cache_metrics: CacheMetrics {
                total_size: self.solved_states.len(),
                hits: self.state_cache_hits,
                misses: self.state_cache_misses,
            },
        }
    }

    pub(crate) fn into_metrics(self) -> SolverMetrics {
        SolverMetrics {
            cache_metrics: CacheMetrics {
                total_size: self.solved_states.len(),
                hits: self.state_cache_hits,
                misses: self.state_cache_misses,
            },
            query_metrics: self.query_metrics,
        }
    }

    fn solve_inner<D>(
        &mut self,
        graph: &Graph<D>,
        goals: &[BindingId],
        start: NodeId,
        query: &mut QueryMetrics,
    ) -> bool {
        query.total_binding_count += goals.len();
        if goals.len() > 1 && !self.can_have_solution(graph, goals, start, query) {
            query.shortcircuited = true;
            return false;
        }
        let state = State {
            pos: start,
            goals: goals.iter().copied().collect(),
        };
        self.recall_or_find_solution(graph, state, 0, query)
    }

    /// Checks each goal on its own before attempting the combination. A
    /// goal that cannot be solved alone dooms the whole query.
    fn can_have_solution<D>(
        &mut self,
        graph: &Graph<D>,
        goals: &[BindingId],
        start: NodeId,
        query: &mut QueryMetrics,
    ) -> bool {
        for &goal in goals {
            if !self.solve_inner(graph, &[goal], start, query) {
                return false;
            }
        }
        true
    }

    fn recall_or_find_solution<D>(
        &mut self,
        graph: &Graph<D>,
        state: State,
        depth: usize,
        query: &mut QueryMetrics,
    ) -> bool {
        if let Some(&known) = self.solved_states.get(&state) {
            trace!(pos = state.pos.index(), known, "recalled state");
            self.state_cache_hits += 1;
            query.from_cache = true;
            return known;
        }
        self.state_cache_misses += 1;
        query.nodes_visited += 1;
        query.end_node = state.pos;
        query.steps.push(QueryStep {
            cfg_node: state.pos,
            bindings: state.goals.iter().copied().collect(),
            depth,
        });
        // Cache the state as solvable before recursing so that cycles
        // terminate: a state that depends on itself being true is solvable
        // by a finite trace elsewhere. The final write below always holds
        // the real answer.
        self.solved_states.insert(state.clone(), true);
        let result = self.find_solution(graph, &state, depth, query);
        self.solved_states.insert(state, result);
        result
    }

    fn find_solution<D>(
        &mut self,
        graph: &Graph<D>,
        state: &State,
        depth: usize,
        query: &mut QueryMetrics,
    ) -> bool {
        trace!(
            pos = state.pos.index(),
            goals = state.goals.len(),
            depth,
            "solving state"
        );
        let mut goals = state.goals.clone();
        if let Some(condition) = graph.node(state.pos).condition {
            // The node's branch condition is an implicit goal.
            trace!(binding = condition.index(), "absorbed condition");
            goals.insert(condition);
        }
        for partition in resolve_finished_goals(graph, state.pos, &goals) {
            if goals_conflict(graph, &partition.removed) {
                trace!(pos = state.pos.index(), "removed goals conflict");
                continue;
            }
            if partition.remaining.is_empty() {
                return true;
            }
            // Nodes that reassign any remaining goal's variable cannot lie
            // on a solution path: the newer assignment would shadow the
            // goal.
            let mut blocked: BTreeSet<NodeId> = BTreeSet::new();
            for &goal in &partition.remaining {
                let variable = graph.binding(goal).variable;
                blocked.extend(graph.variable(variable).node_to_bindings.keys().copied());
            }
            let mut new_positions = BTreeSet::new();
            for &goal in &partition.remaining {
                for origin_index in 0..graph.binding(goal).origins.len() {
                    let origin_at = graph.binding(goal).origins[origin_index].at;
                    let route =
                        self.path_finder
                            .find_node_backwards(graph, state.pos, origin_at, &blocked);
                    if !route.path_exists {
                        continue;
                    }
                    // Step to the earliest condition-carrying node on the
                    // route, or straight to the origin if there is none.
                    let mut target = origin_at;
                    for &node in &route.path {
                        if node != state.pos {
                            target = node;
                            break;
                        }
                    }
                    new_positions.insert(target);
                }
            }
            for &new_pos in &new_positions {
                trace!(pos = new_pos.index(), depth = depth + 1, "advancing");
                let next = State {
                    pos: new_pos,
                    goals: partition.remaining.clone(),
                };
                if self.recall_or_find_solution(graph, next, depth + 1, query) {
                    return true;
                }
            }
        }
        false
    }
}
