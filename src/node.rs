use serde::{Deserialize, Serialize};

use crate::variable::BindingId;

/// Unique identifier of a CFG node.
///
/// Ids are dense: a node's id equals its insertion index in the owning
/// [`Program`](crate::Program), and the reachability matrix is indexed by
/// them directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A vertex in the control-flow graph.
///
/// Assignments within one CFG node are unordered: if `x = x + 1` sits in a
/// single node, both bindings for `x` are visible from inside that node.
#[derive(Debug)]
pub struct CfgNode {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) incoming: Vec<NodeId>,
    pub(crate) outgoing: Vec<NodeId>,
    pub(crate) bindings: Vec<BindingId>,
    pub(crate) condition: Option<BindingId>,
}

impl CfgNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Node name, e.g. filename plus line number, for generating backtraces.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program paths that converge at this point.
    pub fn incoming(&self) -> &[NodeId] {
        &self.incoming
    }

    /// Program branches that start here.
    pub fn outgoing(&self) -> &[NodeId] {
        &self.outgoing
    }

    /// Bindings assigned at this node. They point back at it through their
    /// origin records.
    pub fn bindings(&self) -> &[BindingId] {
        &self.bindings
    }

    /// The binding whose truth any path through this node requires.
    pub fn condition(&self) -> Option<BindingId> {
        self.condition
    }
}
