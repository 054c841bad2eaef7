//! Snapshot structs for typegraph metrics.
//!
//! None of these capture live graph objects: they are plain serializable
//! data, so hosts can take snapshots, diff them across runs, or ship them
//! to whatever reporting pipeline they use.

use serde::{Deserialize, Serialize};

use crate::node::NodeId;
use crate::variable::BindingId;

/// Shape of a single CFG node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub incoming_edge_count: usize,
    pub outgoing_edge_count: usize,
    pub has_condition: bool,
}

/// Shape of a single variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMetrics {
    pub binding_count: usize,
    /// Nodes at which the variable has origins, in id order.
    pub node_ids: Vec<NodeId>,
}

/// One solver state actually evaluated during a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStep {
    pub cfg_node: NodeId,
    pub bindings: Vec<BindingId>,
    pub depth: usize,
}

/// Metrics for a single solver query.
///
/// A query is one call into the solver. Multi-goal queries are broken into
/// per-goal sub-queries first; when one of those fails the whole query
/// fails without further evaluation, which is recorded as
/// `shortcircuited`. `total_binding_count` sums the goal counts of every
/// (sub-)query evaluated; deduplicating them would cost more than it tells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetrics {
    pub nodes_visited: usize,
    pub start_node: NodeId,
    /// Position of the last state evaluated; cache hits do not move it.
    pub end_node: NodeId,
    pub initial_binding_count: usize,
    pub total_binding_count: usize,
    pub shortcircuited: bool,
    /// Whether any lookup during the query was answered by the state cache.
    pub from_cache: bool,
    pub steps: Vec<QueryStep>,
}

impl QueryMetrics {
    pub(crate) fn new(start: NodeId, initial_binding_count: usize) -> Self {
        Self {
            nodes_visited: 0,
            start_node: start,
            end_node: start,
            initial_binding_count,
            total_binding_count: 0,
            shortcircuited: false,
            from_cache: false,
            steps: Vec::new(),
        }
    }
}

/// Occupancy and hit rate of a memoization cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub total_size: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Everything one solver instance did during its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverMetrics {
    pub query_metrics: Vec<QueryMetrics>,
    pub cache_metrics: CacheMetrics,
}

/// Full snapshot of a program's metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Total bindings across all variables.
    pub binding_count: usize,
    pub cfg_node_metrics: Vec<NodeMetrics>,
    pub variable_metrics: Vec<VariableMetrics>,
    /// Metrics of every solver the program has had: invalidated solvers
    /// first, in invalidation order, then the live one if any.
    pub solver_metrics: Vec<SolverMetrics>,
}
