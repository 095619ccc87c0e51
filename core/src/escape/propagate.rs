use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::dfg::{DataFlowGraph, EdgeKind, NodeId, NodeKind};

use super::{EscapeInfo, EscapePoint, EscapeReason, EscapeState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Worklist pops.
    pub iterations: usize,
    /// Strict state increases across all nodes.
    pub state_increases: usize,
}

/// Worklist fixpoint over the graph.
///
/// Every node is seeded from its kind (allocations also from the state their
/// escape record already holds), then repeatedly recomputed as the merge of
/// its own state and the states of its edge targets. A node that grows
/// re-enqueues its predecessors, so escape status flows backwards along
/// edges. Afterwards each allocation's record is raised to its node's state.
pub fn propagate(
    dfg: &mut DataFlowGraph,
    infos: &mut BTreeMap<NodeId, EscapeInfo>,
    unknown_is_bottom: bool,
) -> PropagationStats {
    let count = dfg.node_count();
    let mut worklist: VecDeque<NodeId> = VecDeque::with_capacity(count);
    let mut queued = vec![true; count];

    for idx in 0..count {
        let id = NodeId::new(idx as u32);
        let Some(kind) = dfg.kind(id) else {
            continue;
        };
        let mut seed = kind.initial_state();
        if let Some(info) = infos.get(&id) {
            seed = seed.merge_with(info.state, unknown_is_bottom);
        }
        dfg.set_escape_state(id, seed);
        worklist.push_back(id);
    }

    let mut stats = PropagationStats::default();
    while let Some(id) = worklist.pop_front() {
        queued[id.index()] = false;
        stats.iterations += 1;

        let Some(current) = dfg.escape_state(id) else {
            continue;
        };
        let merged = dfg
            .outgoing_edges(id)
            .filter_map(|edge| dfg.escape_state(edge.to))
            .fold(current, |acc, state| acc.merge_with(state, unknown_is_bottom));
        if merged == current {
            continue;
        }

        trace!(node = %id, from = %current, to = %merged, "escape state raised");
        dfg.set_escape_state(id, merged);
        stats.state_increases += 1;

        let preds: Vec<NodeId> = dfg.incoming_edges(id).map(|edge| edge.from).collect();
        for pred in preds {
            if !queued[pred.index()] {
                queued[pred.index()] = true;
                worklist.push_back(pred);
            }
        }
    }

    for info in infos.values_mut() {
        let Some(state) = dfg.escape_state(info.node) else {
            continue;
        };
        let merged = info.state.merge_with(state, unknown_is_bottom);
        if merged != info.state {
            info.state = merged;
            info.trail.push(EscapePoint {
                loc: info.loc,
                reason: EscapeReason::FlowsToEscapingValue,
            });
        }
    }

    stats
}

/// Mark allocations that stay local and are only ever used through named
/// field loads and stores.
pub fn classify_scalar_replacement(dfg: &DataFlowGraph, infos: &mut BTreeMap<NodeId, EscapeInfo>, enabled: bool) {
    for info in infos.values_mut() {
        info.can_scalar_replace = enabled
            && info.state == EscapeState::NoEscape
            && !info.fields.is_empty()
            && dfg.outgoing_edges(info.node).all(|edge| {
                dfg.kind(edge.to).is_some_and(NodeKind::is_field_access) && !shares_access(dfg, info.node, edge.to)
            });
    }
}

/// Whether another allocation also reaches `access` as its base. Such an
/// access has no single local to read from or write to.
fn shares_access(dfg: &DataFlowGraph, alloc: NodeId, access: NodeId) -> bool {
    dfg.incoming_edges(access).any(|edge| {
        edge.from != alloc && edge.kind == EdgeKind::DefUse && dfg.kind(edge.from) == Some(NodeKind::Allocation)
    })
}
