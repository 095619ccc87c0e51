//! Data-flow graph built by the escape analyzer.
//!
//! Nodes live in an arena indexed by [`NodeId`]; edges are stored once and
//! referenced from per-node adjacency lists, so cycles cost nothing. Lookups
//! with ids the graph does not know return `None` or an empty iterator.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::trace;

use crate::ast::{NodeIndex, Position, StrId};
use crate::escape::EscapeState;

pub mod ssa;

pub use ssa::{BasicBlock, BlockId, Definition, PhiNode, PhiSource, SsaForm};


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Allocation,
    Parameter,
    LocalVar,
    FieldLoad,
    FieldStore,
    ArrayLoad,
    ArrayStore,
    CallArg,
    CallResult,
    ReturnValue,
    Phi,
    GlobalVar,
    ClosureCapture,
    Constant,
}

impl NodeKind {
    /// State a node starts from before propagation.
    pub fn initial_state(self) -> EscapeState {
        match self {
            NodeKind::Allocation => EscapeState::NoEscape,
            NodeKind::Parameter => EscapeState::ArgEscape,
            NodeKind::ReturnValue | NodeKind::GlobalVar => EscapeState::GlobalEscape,
            _ => EscapeState::Unknown,
        }
    }

    pub fn is_field_access(self) -> bool {
        matches!(self, NodeKind::FieldLoad | NodeKind::FieldStore)
    }
}

/// Approximate runtime type of the value a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    Unknown,
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
    Closure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DfgNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub escape_state: EscapeState,
    pub value_type: ValueType,
    pub ast: Option<NodeIndex>,
    pub loc: Option<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DefUse,
    /// Variable → allocation it may alias.
    PointsTo,
    FieldOf,
    ElementOf,
    ControlDep,
    DataDep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DfgEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

#[derive(Debug, Default)]
pub struct DataFlowGraph {
    nodes: Vec<DfgNode>,
    edges: Vec<DfgEdge>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    edge_set: FxHashSet<DfgEdge>,
    bindings: FxHashMap<StrId, NodeId>,
    saved_bindings: Vec<FxHashMap<StrId, NodeId>>,
    ssa: SsaForm,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.add_node_at(kind, None, None, ValueType::Unknown)
    }

    pub fn add_node_at(
        &mut self,
        kind: NodeKind,
        ast: Option<NodeIndex>,
        loc: Option<Position>,
        value_type: ValueType,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(DfgNode {
            id,
            kind,
            escape_state: kind.initial_state(),
            value_type,
            ast,
            loc,
        });
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Add `from -> to`. Duplicate edges and edges with unknown endpoints are dropped.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) -> bool {
        if from.index() >= self.nodes.len() || to.index() >= self.nodes.len() {
            trace!(%from, %to, ?kind, "dropping edge with unknown endpoint");
            return false;
        }
        let edge = DfgEdge { from, to, kind };
        if !self.edge_set.insert(edge) {
            return false;
        }
        let idx = self.edges.len();
        self.edges.push(edge);
        self.outgoing[from.index()].push(idx);
        self.incoming[to.index()].push(idx);
        true
    }

    pub fn node(&self, id: NodeId) -> Option<&DfgNode> {
        self.nodes.get(id.index())
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.node(id).map(|n| n.kind)
    }

    pub fn nodes(&self) -> &[DfgNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[DfgEdge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn escape_state(&self, id: NodeId) -> Option<EscapeState> {
        self.node(id).map(|n| n.escape_state)
    }

    /// Overwrite a node's state; `false` for unknown ids.
    pub fn set_escape_state(&mut self, id: NodeId, state: EscapeState) -> bool {
        match self.nodes.get_mut(id.index()) {
            Some(node) => {
                node.escape_state = state;
                true
            }
            None => false,
        }
    }

    pub fn outgoing_edges(&self, id: NodeId) -> impl Iterator<Item = &DfgEdge> + '_ {
        self.outgoing
            .get(id.index())
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    pub fn incoming_edges(&self, id: NodeId) -> impl Iterator<Item = &DfgEdge> + '_ {
        self.incoming
            .get(id.index())
            .into_iter()
            .flatten()
            .map(|&idx| &self.edges[idx])
    }

    /// Allocations a variable-like node may alias, via its `points_to` edges.
    pub fn points_to(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing_edges(id)
            .filter(|e| e.kind == EdgeKind::PointsTo)
            .map(|e| e.to)
    }

    pub fn bind_variable(&mut self, name: StrId, id: NodeId) {
        self.bindings.insert(name, id);
    }

    pub fn lookup_variable(&self, name: StrId) -> Option<NodeId> {
        self.bindings.get(&name).copied()
    }

    /// Start a fresh binding scope (function or closure body).
    pub fn push_scope(&mut self) {
        let outer = std::mem::take(&mut self.bindings);
        self.saved_bindings.push(outer);
    }

    pub fn pop_scope(&mut self) {
        if let Some(outer) = self.saved_bindings.pop() {
            self.bindings = outer;
        }
    }

    pub fn ssa(&self) -> &SsaForm {
        &self.ssa
    }

    pub fn ssa_mut(&mut self) -> &mut SsaForm {
        &mut self.ssa
    }

    /// Dominators, dominance frontiers, phi placement and renaming.
    ///
    /// Every placed phi gets a `phi` node, and each phi source's defining
    /// node gets a `def_use` edge into it.
    pub fn convert_to_ssa(&mut self) {
        self.ssa.compute_dominators();
        self.ssa.compute_dominance_frontiers();
        for (block, var) in self.ssa.place_phis() {
            let node = self.add_node(NodeKind::Phi);
            self.ssa.attach_phi(block, var, node);
        }
        for (def, phi) in self.ssa.rename() {
            self.add_edge(def, phi, EdgeKind::DefUse);
        }
    }
}
