//! Thin host boundary over the engine.
//!
//! Embedding layers (FFI, scripting hosts, RPC shims) tend to hold raw
//! integer handles rather than typed ids. [`Bridge`] accepts those, checks
//! every one of them, and rejects bad arguments with an error before they
//! can reach the core — the core itself indexes ids unconditionally and is
//! entitled to assume they are valid.

use std::hash::Hash;

use anyhow::{Result, anyhow, bail};

use crate::metrics::Metrics;
use crate::node::NodeId;
use crate::program::Program;
use crate::variable::{BindingId, SourceSet, VariableId};

/// A [`Program`] behind handle validation.
pub struct Bridge<D> {
    program: Program<D>,
}

impl<D: Clone + Eq + Hash> Default for Bridge<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Clone + Eq + Hash> Bridge<D> {
    pub fn new() -> Self {
        Self {
            program: Program::new(),
        }
    }

    /// The wrapped program, for callers that hold typed ids.
    pub fn program(&self) -> &Program<D> {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program<D> {
        &mut self.program
    }

    fn node(&self, handle: u32) -> Result<NodeId> {
        if (handle as usize) < self.program.count_cfg_nodes() {
            Ok(NodeId(handle))
        } else {
            Err(anyhow!("unknown CFG node handle: {handle}"))
        }
    }

    fn variable(&self, handle: u32) -> Result<VariableId> {
        if (handle as usize) < self.program.next_variable_id() {
            Ok(VariableId(handle))
        } else {
            Err(anyhow!("unknown variable handle: {handle}"))
        }
    }

    fn binding(&self, handle: u32) -> Result<BindingId> {
        if (handle as usize) < self.program.next_binding_id() {
            Ok(BindingId(handle))
        } else {
            Err(anyhow!("unknown binding handle: {handle}"))
        }
    }

    fn bindings(&self, handles: &[u32]) -> Result<Vec<BindingId>> {
        handles.iter().map(|&handle| self.binding(handle)).collect()
    }

    pub fn new_cfg_node(&mut self, name: &str, condition: Option<u32>) -> Result<u32> {
        let node = match condition {
            Some(handle) => {
                let condition = self.binding(handle)?;
                self.program.new_cfg_node_with_condition(name, condition)
            }
            None => self.program.new_cfg_node(name),
        };
        Ok(node.0)
    }

    pub fn new_variable(&mut self) -> u32 {
        self.program.new_variable().0
    }

    pub fn connect(&mut self, a: u32, b: u32) -> Result<()> {
        let a = self.node(a)?;
        let b = self.node(b)?;
        self.program.connect(a, b);
        Ok(())
    }

    /// Adds a binding, optionally with an origin. `at` and `sources` must
    /// be given together: a source set is meaningless without the node it
    /// fires at.
    pub fn add_binding(
        &mut self,
        variable: u32,
        data: D,
        at: Option<u32>,
        sources: &[u32],
    ) -> Result<u32> {
        let variable = self.variable(variable)?;
        let binding = match at {
            Some(at) => {
                let at = self.node(at)?;
                let sources = self.bindings(sources)?;
                self.program.add_binding_at(variable, data, at, &sources)
            }
            None if sources.is_empty() => self.program.add_binding(variable, data),
            None => bail!("a source set requires the node it fires at"),
        };
        Ok(binding.0)
    }

    pub fn add_origin(&mut self, binding: u32, at: u32, sources: &[u32]) -> Result<()> {
        let binding = self.binding(binding)?;
        let at = self.node(at)?;
        let sources = self.bindings(sources)?;
        self.program.add_origin_with_sources(binding, at, &sources);
        Ok(())
    }

    pub fn paste_binding(
        &mut self,
        variable: u32,
        binding: u32,
        at: Option<u32>,
        additional_sources: &[u32],
    ) -> Result<u32> {
        let variable = self.variable(variable)?;
        let binding = self.binding(binding)?;
        let at = at.map(|handle| self.node(handle)).transpose()?;
        let sources: SourceSet = self.bindings(additional_sources)?.into_iter().collect();
        Ok(self.program.paste_binding(variable, binding, at, &sources).0)
    }

    pub fn paste_variable(
        &mut self,
        variable: u32,
        other: u32,
        at: Option<u32>,
        additional_sources: &[u32],
    ) -> Result<()> {
        let variable = self.variable(variable)?;
        let other = self.variable(other)?;
        let at = at.map(|handle| self.node(handle)).transpose()?;
        let sources: SourceSet = self.bindings(additional_sources)?.into_iter().collect();
        self.program.paste_variable(variable, other, at, &sources);
        Ok(())
    }

    pub fn is_reachable(&self, src: u32, dst: u32) -> Result<bool> {
        Ok(self.program.is_reachable(self.node(src)?, self.node(dst)?))
    }

    pub fn is_visible(&mut self, binding: u32, viewpoint: u32) -> Result<bool> {
        let binding = self.binding(binding)?;
        let viewpoint = self.node(viewpoint)?;
        Ok(self.program.is_visible(binding, viewpoint))
    }

    pub fn has_combination(&mut self, node: u32, goals: &[u32]) -> Result<bool> {
        let node = self.node(node)?;
        let goals = self.bindings(goals)?;
        Ok(self.program.has_combination(node, &goals))
    }

    pub fn can_have_combination(&self, node: u32, goals: &[u32]) -> Result<bool> {
        let node = self.node(node)?;
        let goals = self.bindings(goals)?;
        Ok(self.program.can_have_combination(node, &goals))
    }

    pub fn filtered_data(
        &mut self,
        variable: u32,
        viewpoint: u32,
        strict: bool,
    ) -> Result<Vec<D>> {
        let variable = self.variable(variable)?;
        let viewpoint = self.node(viewpoint)?;
        Ok(self.program.filtered_data(variable, viewpoint, strict))
    }

    pub fn pruned_data(&self, variable: u32, viewpoint: Option<u32>) -> Result<Vec<D>> {
        let variable = self.variable(variable)?;
        let viewpoint = viewpoint.map(|handle| self.node(handle)).transpose()?;
        Ok(self.program.pruned_data(variable, viewpoint))
    }

    pub fn set_entrypoint(&mut self, node: Option<u32>) -> Result<()> {
        let node = node.map(|handle| self.node(handle)).transpose()?;
        self.program.set_entrypoint(node);
        Ok(())
    }

    pub fn set_default_data(&mut self, data: D) {
        self.program.set_default_data(data);
    }

    pub fn calculate_metrics(&self) -> Metrics {
        self.program.calculate_metrics()
    }
}
