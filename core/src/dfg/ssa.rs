//! Control-flow blocks and SSA construction for the data-flow graph.
//!
//! The analyzer records blocks, control-flow edges and variable definitions
//! while it walks the tree. [`SsaForm`] then computes immediate dominators
//! (iterative Cooper–Harvey–Kennedy over reverse post-order), dominance
//! frontiers, places phis on iterated frontiers and renames definitions
//! with per-variable version counters.
//!
//! A region is one CFG with its own entry block (the program body, or one
//! function/closure body). Blocks not reachable from their region's entry
//! take no part in SSA construction.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::ast::StrId;

use super::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(transparent)]
pub struct BlockId(u32);

impl BlockId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A definition of `var` inside a block; `version` is filled by renaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub var: StrId,
    pub node: NodeId,
    pub version: u32,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    pub defs: Vec<Definition>,
    /// Indices into [`SsaForm::phis`].
    pub phis: Vec<usize>,
    /// Versions live after this block's phis.
    pub entry_versions: BTreeMap<StrId, u32>,
    /// Versions live at the end of the block.
    pub exit_versions: BTreeMap<StrId, u32>,
    /// `None` for region entries and unreachable blocks.
    pub idom: Option<BlockId>,
    pub frontier: BTreeSet<BlockId>,
    pub reachable: bool,
}

/// One incoming value of a phi: the version of the variable live at the end
/// of predecessor `block`. Version 0 means no definition reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiSource {
    pub block: BlockId,
    pub version: u32,
    pub def: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiNode {
    pub block: BlockId,
    pub var: StrId,
    pub node: NodeId,
    pub result_version: u32,
    pub sources: Vec<PhiSource>,
}

#[derive(Debug, Default)]
pub struct SsaForm {
    blocks: Vec<BasicBlock>,
    entries: Vec<BlockId>,
    phis: Vec<PhiNode>,
    def_blocks: BTreeMap<StrId, BTreeSet<BlockId>>,
    counters: FxHashMap<StrId, u32>,
    dom_children: Vec<Vec<BlockId>>,
}

type VersionMap = FxHashMap<StrId, (u32, Option<NodeId>)>;
type UndoLog = Vec<(StrId, Option<(u32, Option<NodeId>)>)>;

impl SsaForm {
    /// Open a new region and return its entry block.
    pub fn new_region(&mut self) -> BlockId {
        let entry = self.new_block();
        self.entries.push(entry);
        entry
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            id,
            ..BasicBlock::default()
        });
        id
    }

    pub fn add_cfg_edge(&mut self, from: BlockId, to: BlockId) {
        if from.index() >= self.blocks.len() || to.index() >= self.blocks.len() {
            return;
        }
        if self.blocks[from.index()].succs.contains(&to) {
            return;
        }
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    pub fn record_def(&mut self, block: BlockId, var: StrId, node: NodeId) {
        let Some(b) = self.blocks.get_mut(block.index()) else {
            return;
        };
        b.defs.push(Definition { var, node, version: 0 });
        self.def_blocks.entry(var).or_default().insert(block);
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn entries(&self) -> &[BlockId] {
        &self.entries
    }

    pub fn phis(&self) -> &[PhiNode] {
        &self.phis
    }

    pub fn phis_in(&self, block: BlockId) -> impl Iterator<Item = &PhiNode> + '_ {
        self.blocks
            .get(block.index())
            .into_iter()
            .flat_map(|b| b.phis.iter())
            .map(|&idx| &self.phis[idx])
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.block(block).and_then(|b| b.idom)
    }

    pub fn frontier(&self, block: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.block(block).map(|b| &b.frontier)
    }

    /// Highest version handed out for `var` so far.
    pub fn version_count(&self, var: StrId) -> u32 {
        self.counters.get(&var).copied().unwrap_or(0)
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cursor = Some(b);
        while let Some(block) = cursor {
            if block == a {
                return true;
            }
            cursor = self.idom(block);
        }
        false
    }

    fn is_reachable(&self, block: BlockId) -> bool {
        self.block(block).is_some_and(|b| b.reachable)
    }

    fn postorder(&self, entry: BlockId) -> Vec<BlockId> {
        let mut post = Vec::new();
        let mut visited = FxHashSet::default();
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited.insert(entry);
        while let Some((block, next)) = stack.last_mut() {
            let block = *block;
            if let Some(&succ) = self.blocks[block.index()].succs.get(*next) {
                *next += 1;
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                post.push(block);
                stack.pop();
            }
        }
        post
    }

    pub fn compute_dominators(&mut self) {
        for block in &mut self.blocks {
            block.idom = None;
            block.reachable = false;
        }
        self.dom_children = vec![Vec::new(); self.blocks.len()];

        for entry in self.entries.clone() {
            let post = self.postorder(entry);
            let po_num: FxHashMap<BlockId, usize> = post.iter().enumerate().map(|(i, &b)| (b, i)).collect();
            let mut doms: FxHashMap<BlockId, BlockId> = FxHashMap::default();
            doms.insert(entry, entry);

            let mut changed = true;
            while changed {
                changed = false;
                for &block in post.iter().rev() {
                    if block == entry {
                        continue;
                    }
                    let mut new_idom: Option<BlockId> = None;
                    for &pred in &self.blocks[block.index()].preds {
                        if !doms.contains_key(&pred) {
                            continue;
                        }
                        new_idom = Some(match new_idom {
                            None => pred,
                            Some(current) => intersect(&doms, &po_num, pred, current),
                        });
                    }
                    if let Some(idom) = new_idom
                        && doms.get(&block) != Some(&idom)
                    {
                        doms.insert(block, idom);
                        changed = true;
                    }
                }
            }

            for &block in &post {
                let b = &mut self.blocks[block.index()];
                b.reachable = true;
                if block != entry {
                    b.idom = doms.get(&block).copied();
                }
            }
            for &block in post.iter().rev() {
                if let Some(idom) = self.blocks[block.index()].idom {
                    self.dom_children[idom.index()].push(block);
                }
            }
        }
    }

    /// Requires [`SsaForm::compute_dominators`].
    pub fn compute_dominance_frontiers(&mut self) {
        for block in &mut self.blocks {
            block.frontier.clear();
        }
        loop {
            let mut changed = false;
            for idx in 0..self.blocks.len() {
                let block = BlockId(idx as u32);
                if !self.blocks[idx].reachable {
                    continue;
                }
                let stop = self.blocks[idx].idom.unwrap_or(block);
                for pred in self.blocks[idx].preds.clone() {
                    if !self.is_reachable(pred) {
                        continue;
                    }
                    let mut runner = pred;
                    while runner != stop {
                        if self.blocks[runner.index()].frontier.insert(block) {
                            changed = true;
                        }
                        match self.blocks[runner.index()].idom {
                            Some(next) => runner = next,
                            None => break,
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Iterated dominance frontier of every variable's defining blocks.
    /// Returns the `(block, var)` pairs that need a new phi.
    pub fn place_phis(&mut self) -> Vec<(BlockId, StrId)> {
        let mut placed = Vec::new();
        for (&var, def_blocks) in &self.def_blocks {
            let mut has_phi: BTreeSet<BlockId> = self
                .phis
                .iter()
                .filter(|phi| phi.var == var)
                .map(|phi| phi.block)
                .collect();
            let mut seen: BTreeSet<BlockId> = def_blocks
                .iter()
                .copied()
                .filter(|&b| self.is_reachable(b))
                .collect();
            let mut work: Vec<BlockId> = seen.iter().copied().collect();
            while let Some(block) = work.pop() {
                for &frontier in &self.blocks[block.index()].frontier {
                    if has_phi.insert(frontier) {
                        placed.push((frontier, var));
                        if seen.insert(frontier) {
                            work.push(frontier);
                        }
                    }
                }
            }
        }
        placed
    }

    pub fn attach_phi(&mut self, block: BlockId, var: StrId, node: NodeId) {
        if block.index() >= self.blocks.len() {
            return;
        }
        let idx = self.phis.len();
        self.phis.push(PhiNode {
            block,
            var,
            node,
            result_version: 0,
            sources: Vec::new(),
        });
        self.blocks[block.index()].phis.push(idx);
    }

    /// Assign versions depth-first over the dominator tree and fill phi
    /// sources. Returns `(defining node, phi node)` pairs for def-use edges.
    ///
    /// Iterative: a run of sequential branches gives a dominator chain as
    /// deep as the program.
    pub fn rename(&mut self) -> Vec<(NodeId, NodeId)> {
        self.counters.clear();
        for phi in &mut self.phis {
            phi.sources.clear();
        }
        let mut links = Vec::new();
        for entry in self.entries.clone() {
            if !self.is_reachable(entry) {
                continue;
            }
            let mut current = VersionMap::default();
            let mut undo = UndoLog::new();
            let mut stack = vec![RenameStep::Enter(entry)];
            while let Some(step) = stack.pop() {
                match step {
                    RenameStep::Enter(block) => {
                        stack.push(RenameStep::Leave(undo.len()));
                        self.rename_block(block, &mut current, &mut undo, &mut links);
                        for &child in self.dom_children[block.index()].iter().rev() {
                            stack.push(RenameStep::Enter(child));
                        }
                    }
                    RenameStep::Leave(mark) => {
                        for (var, prev) in undo.drain(mark..).rev() {
                            match prev {
                                Some(prev) => current.insert(var, prev),
                                None => current.remove(&var),
                            };
                        }
                    }
                }
            }
        }
        links
    }

    fn next_version(&mut self, var: StrId) -> u32 {
        let counter = self.counters.entry(var).or_insert(0);
        *counter += 1;
        *counter
    }

    fn rename_block(
        &mut self,
        block: BlockId,
        current: &mut VersionMap,
        undo: &mut UndoLog,
        links: &mut Vec<(NodeId, NodeId)>,
    ) {
        let idx = block.index();

        for pi in self.blocks[idx].phis.clone() {
            let var = self.phis[pi].var;
            let version = self.next_version(var);
            self.phis[pi].result_version = version;
            undo.push((var, current.insert(var, (version, Some(self.phis[pi].node)))));
        }
        self.blocks[idx].entry_versions = snapshot(current);

        for di in 0..self.blocks[idx].defs.len() {
            let var = self.blocks[idx].defs[di].var;
            let version = self.next_version(var);
            let def = &mut self.blocks[idx].defs[di];
            def.version = version;
            undo.push((var, current.insert(var, (version, Some(def.node)))));
        }
        self.blocks[idx].exit_versions = snapshot(current);

        for succ in self.blocks[idx].succs.clone() {
            for pi in self.blocks[succ.index()].phis.clone() {
                let phi = &mut self.phis[pi];
                let (version, def) = current.get(&phi.var).copied().unwrap_or((0, None));
                phi.sources.push(PhiSource { block, version, def });
                if let Some(def) = def {
                    links.push((def, phi.node));
                }
            }
        }
    }
}

enum RenameStep {
    Enter(BlockId),
    /// Roll the version map back to this undo-log length.
    Leave(usize),
}

fn intersect(
    doms: &FxHashMap<BlockId, BlockId>,
    po_num: &FxHashMap<BlockId, usize>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while po_num[&a] < po_num[&b] {
            a = doms[&a];
        }
        while po_num[&b] < po_num[&a] {
            b = doms[&b];
        }
    }
    a
}

fn snapshot(current: &VersionMap) -> BTreeMap<StrId, u32> {
    current.iter().map(|(&var, &(version, _))| (var, version)).collect()
}
