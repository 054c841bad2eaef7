use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::node::NodeId;

/// Maximum number of bindings allowed on a variable.
///
/// Variables that grow past this are almost always degenerate (huge unions
/// produced by pathological input), and solving against them dominates
/// query time. Once a variable holds `MAX_VAR_SIZE - 1` bindings, further
/// distinct values collapse onto the program's default placeholder value.
pub const MAX_VAR_SIZE: usize = 64;

/// Unique identifier of a variable, monotonically issued by its program.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VariableId(pub(crate) u32);

impl VariableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unique identifier of a binding. Ids are dense across the whole program,
/// in creation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BindingId(pub(crate) u32);

impl BindingId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A combination of bindings that was used to form another binding.
///
/// For a statement like `z = a.x + y`, the bindings of `a`, `a.x` and `y`
/// form the source set of the binding created for `z`. All members of a
/// source set must hold together.
pub type SourceSet = BTreeSet<BindingId>;

/// One explanation of how a binding came to hold at a CFG node.
///
/// The source sets form a disjunction of conjunctions: any single source
/// set producing the binding suffices, but every member of that set must
/// hold at once. An origin carrying an empty source set is an unconditional
/// assignment.
#[derive(Debug, Clone)]
pub struct Origin {
    pub(crate) at: NodeId,
    pub(crate) source_sets: BTreeSet<SourceSet>,
}

impl Origin {
    pub(crate) fn new(at: NodeId) -> Self {
        Self {
            at,
            source_sets: BTreeSet::new(),
        }
    }

    /// The CFG node this origin was produced at.
    pub fn at(&self) -> NodeId {
        self.at
    }

    pub fn source_sets(&self) -> &BTreeSet<SourceSet> {
        &self.source_sets
    }

    pub(crate) fn add_source_set(&mut self, source_set: SourceSet) {
        self.source_sets.insert(source_set);
    }
}

/// An assignment of one abstract value to one variable, together with the
/// history of how it was formed.
///
/// Bindings are immutable after creation except for appending origins. The
/// origin list is a disjunction: any one origin explains the binding, but
/// all sources within one of its source sets must appear together.
#[derive(Debug)]
pub struct Binding<D> {
    pub(crate) id: BindingId,
    pub(crate) variable: VariableId,
    pub(crate) data: D,
    pub(crate) origins: Vec<Origin>,
    pub(crate) node_to_origin: FxHashMap<NodeId, usize>,
}

impl<D> Binding<D> {
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// The variable this binding belongs to. A binding is only visible as
    /// long as no later assignment to the same variable has overwritten it.
    pub fn variable(&self) -> VariableId {
        self.variable
    }

    /// The opaque host value this binding assigns.
    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    /// The origin recorded at `node`, if any.
    pub fn origin_at(&self, node: NodeId) -> Option<&Origin> {
        self.node_to_origin.get(&node).map(|&i| &self.origins[i])
    }
}

/// A logical storage location that may take several abstract values during
/// program execution.
///
/// Stored as a union: every binding potentially assigned to the variable so
/// far, whether or not it is still visible anywhere.
#[derive(Debug)]
pub struct Variable<D> {
    pub(crate) id: VariableId,
    pub(crate) bindings: Vec<BindingId>,
    pub(crate) data_to_binding: FxHashMap<D, BindingId>,
    pub(crate) node_to_bindings: FxHashMap<NodeId, BTreeSet<BindingId>>,
}

impl<D> Variable<D> {
    pub(crate) fn new(id: VariableId) -> Self {
        Self {
            id,
            bindings: Vec::new(),
            data_to_binding: FxHashMap::default(),
            node_to_bindings: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    /// All bindings of this variable, in creation order.
    pub fn bindings(&self) -> &[BindingId] {
        &self.bindings
    }

    /// Number of distinct bindings this variable holds.
    pub fn size(&self) -> usize {
        self.bindings.len()
    }

    /// The nodes at which this variable has an origin, in id order.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.node_to_bindings.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn bindings_at(&self, node: NodeId) -> Option<&BTreeSet<BindingId>> {
        self.node_to_bindings.get(&node)
    }
}
