//! Syntax-tree walk that builds the data-flow graph and escape records.
//!
//! The walk is flow-insensitive for aliasing: every variable of a function
//! scope collects all allocations ever assigned to it (transitively through
//! copies and closure captures), and escape sinks are resolved against those
//! sets once the whole tree has been seen. Loops and branches therefore
//! cannot hide an alias from a later `return` or store.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::{Ast, Literal, NodeData, NodeIndex, Position, StrId};
use crate::config::OptimizerConfig;
use crate::dfg::{BlockId, DataFlowGraph, EdgeKind, NodeId, NodeKind, SsaForm, ValueType};

use super::propagate::{classify_scalar_replacement, propagate};
use super::{EscapeInfo, EscapeReason, EscapeState, ObjectType};

/// Deepest syntax-tree nesting the walk follows. Deeper subtrees are skipped
/// and their function scope is treated as leaking everything it can reach.
const MAX_DEPTH: usize = 512;

/// Function scope id + variable name.
type VarKey = (u32, StrId);

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisStats {
    pub allocations: usize,
    pub functions: usize,
    /// Syntax-tree nodes that produced nothing (unknown tags, dangling indices,
    /// subtrees below the depth cutoff).
    pub skipped_nodes: usize,
    pub phis: usize,
    pub fixpoint_iterations: usize,
    pub state_increases: usize,
    pub elapsed: Duration,
}

/// A value flowing into something that makes it escape.
#[derive(Debug)]
struct Sink {
    value: NodeId,
    sink: NodeId,
    edge: EdgeKind,
    reason: EscapeReason,
    loc: Option<Position>,
}

/// A field or element access through `base`.
#[derive(Debug)]
struct Access {
    base: NodeId,
    access: NodeId,
    field: Option<String>,
    ty: ValueType,
}

#[derive(Debug, Default)]
struct WalkState {
    block: BlockId,
    scope: u32,
    next_scope: u32,
    depth: usize,
    var_keys: FxHashMap<NodeId, VarKey>,
    /// `key ⊇ aliases(node)` constraints.
    key_sources: Vec<(VarKey, NodeId)>,
    sinks: Vec<Sink>,
    accesses: Vec<Access>,
    alloc_scopes: Vec<(NodeId, u32)>,
    /// Scopes with a subtree cut off at `MAX_DEPTH`.
    truncated: BTreeSet<u32>,
}

/// Escape analyzer for one compilation unit.
///
/// Owns the data-flow graph and one [`EscapeInfo`] per allocation site.
/// Create one per analysis; nothing here is shared.
#[derive(Debug, Default)]
pub struct EscapeAnalyzer {
    config: OptimizerConfig,
    dfg: DataFlowGraph,
    infos: BTreeMap<NodeId, EscapeInfo>,
    walk: WalkState,
    stats: AnalysisStats,
}

impl EscapeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &OptimizerConfig) -> Self {
        Self {
            config: config.clone(),
            ..Self::default()
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn dfg(&self) -> &DataFlowGraph {
        &self.dfg
    }

    pub fn ssa(&self) -> &SsaForm {
        self.dfg.ssa()
    }

    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    pub fn escape_info(&self, id: NodeId) -> Option<&EscapeInfo> {
        self.infos.get(&id)
    }

    /// Escape records in allocation-discovery order.
    pub fn escape_infos(&self) -> impl Iterator<Item = &EscapeInfo> + '_ {
        self.infos.values()
    }

    pub fn allocations(&self) -> Vec<NodeId> {
        self.infos.keys().copied().collect()
    }

    /// Analyze a whole program. Any previous results are discarded.
    pub fn analyze(&mut self, ast: &Ast) {
        let started = Instant::now();
        self.dfg = DataFlowGraph::new();
        self.infos.clear();
        self.stats = AnalysisStats::default();
        self.walk = WalkState::default();

        self.walk.block = self.dfg.ssa_mut().new_region();
        self.visit(ast, ast.root());

        self.resolve_aliases();
        self.apply_accesses();
        self.apply_sinks();
        self.escalate_truncated_scopes();
        self.walk = WalkState::default();

        self.dfg.convert_to_ssa();
        self.stats.phis = self.dfg.ssa().phis().len();

        let prop = propagate(&mut self.dfg, &mut self.infos, self.config.unknown_is_bottom);
        self.stats.fixpoint_iterations = prop.iterations;
        self.stats.state_increases = prop.state_increases;

        classify_scalar_replacement(&self.dfg, &mut self.infos, self.config.enable_scalar_replacement);

        self.stats.allocations = self.infos.len();
        self.stats.elapsed = started.elapsed();
        debug!(
            allocations = self.stats.allocations,
            nodes = self.dfg.node_count(),
            edges = self.dfg.edge_count(),
            phis = self.stats.phis,
            iterations = prop.iterations,
            "escape analysis finished"
        );
    }

    fn visit(&mut self, ast: &Ast, idx: NodeIndex) -> Option<NodeId> {
        let Some(node) = ast.get(idx) else {
            debug!(%idx, "dangling syntax-tree index skipped");
            self.stats.skipped_nodes += 1;
            return None;
        };
        if self.walk.depth >= MAX_DEPTH {
            debug!(%idx, scope = self.walk.scope, "syntax tree nested too deeply; subtree skipped");
            self.stats.skipped_nodes += 1;
            self.walk.truncated.insert(self.walk.scope);
            return None;
        }
        self.walk.depth += 1;
        let loc = node.span;
        let result = match &node.data {
            NodeData::Root { statements } | NodeData::Block { statements } => {
                for &stmt in statements {
                    self.visit(ast, stmt);
                }
                None
            }
            NodeData::FunctionDecl { params, body, .. } => {
                self.visit_function(ast, params, Vec::new(), *body, loc);
                None
            }
            NodeData::Assignment { target, value } => self.visit_assignment(ast, *target, *value, loc),
            NodeData::ObjectInstantiation { class_name, args } => {
                let args: Vec<Option<NodeId>> = args.iter().map(|&arg| self.visit(ast, arg)).collect();
                let size = sized_by_count(args.len());
                let alloc = self.new_allocation(idx, loc, ObjectType::Object, size);
                if let Some(info) = self.infos.get_mut(&alloc) {
                    info.class_name = Some(ast.name(*class_name).to_string());
                }
                for arg in args.into_iter().flatten() {
                    self.pass_to_unknown(arg, Some(idx), loc);
                }
                Some(alloc)
            }
            NodeData::ArrayInit { elements } => {
                let elements: Vec<Option<NodeId>> = elements.iter().map(|&el| self.visit(ast, el)).collect();
                let size = sized_by_count(elements.len());
                let alloc = self.new_allocation(idx, loc, ObjectType::Array, size);
                for element in elements.into_iter().flatten() {
                    self.add_sink(element, alloc, EdgeKind::ElementOf, EscapeReason::StoredToArray, loc);
                }
                Some(alloc)
            }
            NodeData::ReturnStmt { value } => {
                let value = value.and_then(|v| self.visit(ast, v));
                let ret = self.dfg.add_node_at(NodeKind::ReturnValue, Some(idx), loc, ValueType::Unknown);
                if let Some(value) = value {
                    self.add_sink(value, ret, EdgeKind::DefUse, EscapeReason::Returned, loc);
                }
                self.terminate_block();
                None
            }
            NodeData::FunctionCall { args, .. } => {
                for &arg in args {
                    if let Some(value) = self.visit(ast, arg) {
                        self.pass_to_unknown(value, Some(arg), loc);
                    }
                }
                Some(self.dfg.add_node_at(NodeKind::CallResult, Some(idx), loc, ValueType::Unknown))
            }
            NodeData::MethodCall { object, args, .. } => {
                if let Some(receiver) = self.visit(ast, *object) {
                    self.pass_to_unknown(receiver, Some(*object), loc);
                }
                for &arg in args {
                    if let Some(value) = self.visit(ast, arg) {
                        self.pass_to_unknown(value, Some(arg), loc);
                    }
                }
                Some(self.dfg.add_node_at(NodeKind::CallResult, Some(idx), loc, ValueType::Unknown))
            }
            NodeData::PropertyAccess { object, property } => {
                let base = self.visit(ast, *object);
                let load = self.dfg.add_node_at(NodeKind::FieldLoad, Some(idx), loc, ValueType::Unknown);
                if let Some(base) = base {
                    self.record_access(base, load, Some(ast.name(*property)), ValueType::Unknown);
                }
                Some(load)
            }
            NodeData::ArrayAccess { array, index } => {
                let base = self.visit(ast, *array);
                if let Some(index) = index {
                    self.visit(ast, *index);
                }
                let load = self.dfg.add_node_at(NodeKind::ArrayLoad, Some(idx), loc, ValueType::Unknown);
                if let Some(base) = base {
                    self.record_access(base, load, None, ValueType::Unknown);
                }
                Some(load)
            }
            NodeData::Closure { params, captures, body } => Some(self.visit_closure(ast, idx, params, captures, *body, loc)),
            NodeData::Variable { name } => Some(self.read_variable(*name, idx, loc)),
            NodeData::IfStmt {
                condition,
                then_branch,
                else_branch,
            } => {
                self.visit_if(ast, *condition, *then_branch, *else_branch);
                None
            }
            NodeData::WhileStmt { condition, body } => {
                self.visit_loop(ast, &[], Some(*condition), &[], *body);
                None
            }
            NodeData::ForStmt {
                init,
                condition,
                update,
                body,
            } => {
                self.visit_loop(ast, init, *condition, update, *body);
                None
            }
            NodeData::ForeachStmt {
                iterable,
                key,
                value,
                body,
            } => {
                self.visit_foreach(ast, idx, *iterable, *key, *value, *body, loc);
                None
            }
            NodeData::ThrowStmt { value } => {
                let thrown = self.visit(ast, *value);
                let exit = self.dfg.add_node_at(NodeKind::ReturnValue, Some(idx), loc, ValueType::Unknown);
                if let Some(thrown) = thrown {
                    self.add_sink(thrown, exit, EdgeKind::DefUse, EscapeReason::ThrownAsException, loc);
                }
                self.terminate_block();
                None
            }
            NodeData::Literal { value } => {
                let ty = match value {
                    Literal::Null => ValueType::Null,
                    Literal::Bool(_) => ValueType::Bool,
                    Literal::Int(_) => ValueType::Int,
                    Literal::Float(_) => ValueType::Float,
                    Literal::String(_) => ValueType::String,
                };
                Some(self.dfg.add_node_at(NodeKind::Constant, Some(idx), loc, ty))
            }
            NodeData::Global { names } => {
                for &name in names {
                    let global = self.dfg.add_node_at(NodeKind::GlobalVar, Some(idx), loc, ValueType::Unknown);
                    self.dfg.bind_variable(name, global);
                }
                None
            }
            NodeData::Other => {
                debug!(%idx, "syntax-tree tag without escape semantics skipped");
                self.stats.skipped_nodes += 1;
                None
            }
        };
        self.walk.depth -= 1;
        result
    }

    fn visit_assignment(&mut self, ast: &Ast, target: NodeIndex, value: NodeIndex, loc: Option<Position>) -> Option<NodeId> {
        let value = self.visit(ast, value);
        let value_ty = value
            .and_then(|v| self.dfg.node(v))
            .map(|n| n.value_type)
            .unwrap_or_default();

        match ast.data(target) {
            Some(NodeData::Variable { name }) => {
                if let Some(existing) = self.dfg.lookup_variable(*name)
                    && self.dfg.kind(existing) == Some(NodeKind::GlobalVar)
                {
                    if let Some(value) = value {
                        self.add_sink(value, existing, EdgeKind::DefUse, EscapeReason::AssignedToGlobal, loc);
                    }
                    return Some(existing);
                }
                let var = self.dfg.add_node_at(NodeKind::LocalVar, Some(target), loc, value_ty);
                let key = self.define_variable(*name, var);
                if let Some(value) = value {
                    self.walk.key_sources.push((key, value));
                    if self.dfg.kind(value) != Some(NodeKind::Allocation) {
                        self.dfg.add_edge(value, var, EdgeKind::DefUse);
                    }
                }
                Some(var)
            }
            Some(NodeData::PropertyAccess { object, property }) => {
                let base = self.visit(ast, *object);
                let store = self.dfg.add_node_at(NodeKind::FieldStore, Some(target), loc, value_ty);
                if let Some(base) = base {
                    self.record_access(base, store, Some(ast.name(*property)), value_ty);
                }
                if let Some(value) = value {
                    self.add_sink(value, store, EdgeKind::FieldOf, EscapeReason::StoredToHeap, loc);
                }
                Some(store)
            }
            Some(NodeData::ArrayAccess { array, index }) => {
                let base = self.visit(ast, *array);
                if let Some(index) = index {
                    self.visit(ast, *index);
                }
                let store = self.dfg.add_node_at(NodeKind::ArrayStore, Some(target), loc, value_ty);
                if let Some(base) = base {
                    self.record_access(base, store, None, value_ty);
                }
                if let Some(value) = value {
                    self.add_sink(value, store, EdgeKind::ElementOf, EscapeReason::StoredToArray, loc);
                }
                Some(store)
            }
            other => {
                // Unmodeled store target: whatever is stored goes to the heap.
                debug!(
                    %target,
                    tag = other.map(|d| d.tag()).unwrap_or("dangling"),
                    "unsupported assignment target"
                );
                if other.is_some() {
                    self.visit(ast, target);
                }
                let sink = self.dfg.add_node_at(NodeKind::GlobalVar, Some(target), loc, value_ty);
                if let Some(value) = value {
                    self.add_sink(value, sink, EdgeKind::DefUse, EscapeReason::StoredToHeap, loc);
                }
                None
            }
        }
    }

    fn visit_function(
        &mut self,
        ast: &Ast,
        params: &[StrId],
        captures: Vec<(StrId, NodeId, NodeId)>,
        body: NodeIndex,
        loc: Option<Position>,
    ) {
        let outer_block = self.walk.block;
        let outer_scope = self.walk.scope;
        self.walk.next_scope += 1;
        self.walk.scope = self.walk.next_scope;
        self.dfg.push_scope();
        self.walk.block = self.dfg.ssa_mut().new_region();

        for &param in params {
            let node = self.dfg.add_node_at(NodeKind::Parameter, None, loc, ValueType::Unknown);
            self.define_variable(param, node);
        }
        for (name, capture, outer) in captures {
            let key = self.define_variable(name, capture);
            self.walk.key_sources.push((key, outer));
        }

        self.visit(ast, body);

        self.dfg.pop_scope();
        self.walk.scope = outer_scope;
        self.walk.block = outer_block;
        self.stats.functions += 1;
    }

    fn visit_closure(
        &mut self,
        ast: &Ast,
        idx: NodeIndex,
        params: &[StrId],
        captures: &[StrId],
        body: NodeIndex,
        loc: Option<Position>,
    ) -> NodeId {
        let mut bound = Vec::with_capacity(captures.len());
        for &name in captures {
            let outer = self.read_variable(name, idx, loc);
            let capture = self.dfg.add_node_at(NodeKind::ClosureCapture, Some(idx), loc, ValueType::Unknown);
            self.add_sink(outer, capture, EdgeKind::DefUse, EscapeReason::CapturedByClosure, loc);
            bound.push((name, capture, outer));
        }

        let closure = self.new_allocation(idx, loc, ObjectType::Closure, sized_by_count(captures.len()));
        for &(_, capture, _) in &bound {
            self.dfg.add_edge(capture, closure, EdgeKind::DataDep);
        }

        self.visit_function(ast, params, bound, body, loc);
        closure
    }

    fn visit_if(&mut self, ast: &Ast, condition: NodeIndex, then_branch: NodeIndex, else_branch: Option<NodeIndex>) {
        self.visit(ast, condition);
        let pivot = self.walk.block;

        let then_block = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(pivot, then_block);
        self.walk.block = then_block;
        self.visit(ast, then_branch);
        let then_end = self.walk.block;

        let else_end = match else_branch {
            Some(else_branch) => {
                let else_block = self.dfg.ssa_mut().new_block();
                self.dfg.ssa_mut().add_cfg_edge(pivot, else_block);
                self.walk.block = else_block;
                self.visit(ast, else_branch);
                self.walk.block
            }
            None => pivot,
        };

        let merge = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(then_end, merge);
        self.dfg.ssa_mut().add_cfg_edge(else_end, merge);
        self.walk.block = merge;
    }

    /// `while` is a `for` without init and update.
    fn visit_loop(
        &mut self,
        ast: &Ast,
        init: &[NodeIndex],
        condition: Option<NodeIndex>,
        update: &[NodeIndex],
        body: NodeIndex,
    ) {
        for &stmt in init {
            self.visit(ast, stmt);
        }
        let header = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(self.walk.block, header);
        self.walk.block = header;
        if let Some(condition) = condition {
            self.visit(ast, condition);
        }
        let cond_end = self.walk.block;

        let body_block = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(cond_end, body_block);
        self.walk.block = body_block;
        self.visit(ast, body);
        for &stmt in update {
            self.visit(ast, stmt);
        }
        self.dfg.ssa_mut().add_cfg_edge(self.walk.block, header);

        let exit = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(cond_end, exit);
        self.walk.block = exit;
    }

    #[allow(clippy::too_many_arguments)]
    fn visit_foreach(
        &mut self,
        ast: &Ast,
        idx: NodeIndex,
        iterable: NodeIndex,
        key: Option<StrId>,
        value: StrId,
        body: NodeIndex,
        loc: Option<Position>,
    ) {
        let source = self.visit(ast, iterable);
        let header = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(self.walk.block, header);

        let body_block = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(header, body_block);
        self.walk.block = body_block;

        let element = self.dfg.add_node_at(NodeKind::ArrayLoad, Some(idx), loc, ValueType::Unknown);
        if let Some(source) = source {
            self.record_access(source, element, None, ValueType::Unknown);
        }
        if let Some(key) = key {
            let key_var = self.dfg.add_node_at(NodeKind::LocalVar, Some(idx), loc, ValueType::Unknown);
            self.define_variable(key, key_var);
        }
        let value_var = self.dfg.add_node_at(NodeKind::LocalVar, Some(idx), loc, ValueType::Unknown);
        self.dfg.add_edge(element, value_var, EdgeKind::DefUse);
        self.define_variable(value, value_var);

        self.visit(ast, body);
        self.dfg.ssa_mut().add_cfg_edge(self.walk.block, header);

        let exit = self.dfg.ssa_mut().new_block();
        self.dfg.ssa_mut().add_cfg_edge(header, exit);
        self.walk.block = exit;
    }

    /// Statements after `return`/`throw` land in a block with no predecessors.
    fn terminate_block(&mut self) {
        self.walk.block = self.dfg.ssa_mut().new_block();
    }

    fn new_allocation(&mut self, idx: NodeIndex, loc: Option<Position>, ty: ObjectType, size: Option<u32>) -> NodeId {
        let value_type = match ty {
            ObjectType::Object => ValueType::Object,
            ObjectType::Array => ValueType::Array,
            ObjectType::Closure => ValueType::Closure,
            ObjectType::String => ValueType::String,
            ObjectType::Unknown => ValueType::Unknown,
        };
        let node = self.dfg.add_node_at(NodeKind::Allocation, Some(idx), loc, value_type);
        let (size, explicit) = match size {
            Some(size) => (size, true),
            None => (self.config.default_sizes.for_type(ty).unwrap_or(0), false),
        };
        let mut info = EscapeInfo::new(node, ty, size, explicit);
        info.loc = loc;
        self.infos.insert(node, info);
        self.walk.alloc_scopes.push((node, self.walk.scope));
        node
    }

    fn var_key(&self, name: StrId) -> VarKey {
        (self.walk.scope, name)
    }

    /// Bind `name` to `node` and record a definition in the current block.
    fn define_variable(&mut self, name: StrId, node: NodeId) -> VarKey {
        let key = self.var_key(name);
        self.walk.var_keys.insert(node, key);
        self.dfg.bind_variable(name, node);
        let block = self.walk.block;
        self.dfg.ssa_mut().record_def(block, name, node);
        key
    }

    fn read_variable(&mut self, name: StrId, idx: NodeIndex, loc: Option<Position>) -> NodeId {
        if let Some(node) = self.dfg.lookup_variable(name) {
            return node;
        }
        // Read before any assignment in this scope; later assignments still reach it.
        let node = self.dfg.add_node_at(NodeKind::LocalVar, Some(idx), loc, ValueType::Unknown);
        let key = self.var_key(name);
        self.walk.var_keys.insert(node, key);
        self.dfg.bind_variable(name, node);
        node
    }

    fn pass_to_unknown(&mut self, value: NodeId, ast: Option<NodeIndex>, loc: Option<Position>) {
        let arg = self.dfg.add_node_at(NodeKind::CallArg, ast, loc, ValueType::Unknown);
        self.add_sink(value, arg, EdgeKind::DefUse, EscapeReason::PassedToUnknown, loc);
    }

    fn add_sink(&mut self, value: NodeId, sink: NodeId, edge: EdgeKind, reason: EscapeReason, loc: Option<Position>) {
        if self.dfg.kind(value) != Some(NodeKind::Allocation) {
            self.dfg.add_edge(value, sink, EdgeKind::DefUse);
        }
        self.walk.sinks.push(Sink {
            value,
            sink,
            edge,
            reason,
            loc,
        });
    }

    fn record_access(&mut self, base: NodeId, access: NodeId, field: Option<&str>, ty: ValueType) {
        if self.dfg.kind(base) != Some(NodeKind::Allocation) {
            self.dfg.add_edge(base, access, EdgeKind::DefUse);
        }
        self.walk.accesses.push(Access {
            base,
            access,
            field: field.map(str::to_string),
            ty,
        });
    }

    /// Solve the variable alias constraints and materialize them as
    /// `points_to` edges.
    fn resolve_aliases(&mut self) {
        let mut targets: FxHashMap<VarKey, BTreeSet<NodeId>> = FxHashMap::default();
        let mut changed = true;
        while changed {
            changed = false;
            for &(key, value) in &self.walk.key_sources {
                let found: Vec<NodeId> = self.direct_aliases(value, &targets);
                let set = targets.entry(key).or_default();
                for alloc in found {
                    changed |= set.insert(alloc);
                }
            }
        }

        let mut vars: Vec<(NodeId, VarKey)> = self.walk.var_keys.iter().map(|(&n, &k)| (n, k)).collect();
        vars.sort_unstable();
        for (var, key) in vars {
            if let Some(allocs) = targets.get(&key) {
                for &alloc in allocs {
                    self.dfg.add_edge(var, alloc, EdgeKind::PointsTo);
                }
            }
        }
    }

    fn direct_aliases(&self, value: NodeId, targets: &FxHashMap<VarKey, BTreeSet<NodeId>>) -> Vec<NodeId> {
        if self.dfg.kind(value) == Some(NodeKind::Allocation) {
            return vec![value];
        }
        self.walk
            .var_keys
            .get(&value)
            .and_then(|key| targets.get(key))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Allocations `value` may refer to, once aliases are resolved.
    fn aliased_allocations(&self, value: NodeId) -> Vec<NodeId> {
        match self.dfg.kind(value) {
            Some(NodeKind::Allocation) => vec![value],
            Some(_) => self.dfg.points_to(value).collect(),
            None => Vec::new(),
        }
    }

    fn apply_accesses(&mut self) {
        let accesses = std::mem::take(&mut self.walk.accesses);
        for access in accesses {
            for alloc in self.aliased_allocations(access.base) {
                self.dfg.add_edge(alloc, access.access, EdgeKind::DefUse);
                if let Some(field) = &access.field
                    && let Some(info) = self.infos.get_mut(&alloc)
                {
                    info.record_field(field, access.ty);
                }
            }
        }
    }

    fn apply_sinks(&mut self) {
        let sinks = std::mem::take(&mut self.walk.sinks);
        for sink in sinks {
            for alloc in self.aliased_allocations(sink.value) {
                self.dfg.add_edge(alloc, sink.sink, sink.edge);
                self.escalate(alloc, EscapeState::GlobalEscape, sink.reason, sink.loc);
            }
        }
    }

    /// A skipped subtree may hold any sink, so every allocation created in or
    /// aliased by a truncated scope counts as passed to unknown code.
    fn escalate_truncated_scopes(&mut self) {
        let truncated = std::mem::take(&mut self.walk.truncated);
        if truncated.is_empty() {
            return;
        }
        let mut reached: BTreeSet<NodeId> = self
            .walk
            .alloc_scopes
            .iter()
            .filter(|(_, scope)| truncated.contains(scope))
            .map(|&(alloc, _)| alloc)
            .collect();
        for (&var, &(scope, _)) in &self.walk.var_keys {
            if truncated.contains(&scope) {
                reached.extend(self.dfg.points_to(var));
            }
        }
        for alloc in reached {
            self.escalate(alloc, EscapeState::GlobalEscape, EscapeReason::PassedToUnknown, None);
        }
    }

    fn escalate(&mut self, alloc: NodeId, state: EscapeState, reason: EscapeReason, loc: Option<Position>) {
        let Some(info) = self.infos.get_mut(&alloc) else {
            return;
        };
        if info.escalate(state, reason, loc) {
            debug!(node = %alloc, state = %info.state, %reason, "allocation escapes");
            let state = info.state;
            self.dfg.set_escape_state(alloc, state);
        }
    }
}

/// `16 + 16·n` bytes for `n` known slots, or `None` to fall back to the type default.
fn sized_by_count(count: usize) -> Option<u32> {
    let count = u32::try_from(count).unwrap_or(u32::MAX);
    (count > 0).then(|| count.saturating_mul(16).saturating_add(16))
}
