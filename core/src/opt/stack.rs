//! Heap vs. stack placement of allocation sites.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::trace;

use crate::config::{DefaultSizes, OptimizerConfig};
use crate::dfg::NodeId;
use crate::escape::{EscapeAnalyzer, EscapeInfo, EscapeState};

/// Stack slot inside the frame being laid out. Slots are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StackSlot(u32);

impl StackSlot {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocLocation {
    Heap,
    Stack,
    ScalarReplaced,
}

impl AllocLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            AllocLocation::Heap => "heap",
            AllocLocation::Stack => "stack",
            AllocLocation::ScalarReplaced => "scalar_replaced",
        }
    }
}

impl fmt::Display for AllocLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Escapes,
    TooLarge,
    StackOverflow,
    FitsOnStack,
    CanScalarReplace,
    /// Neither the analyzer nor the per-type defaults know a size.
    UnknownType,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::Escapes => "escapes",
            DecisionReason::TooLarge => "too_large",
            DecisionReason::StackOverflow => "stack_overflow",
            DecisionReason::FitsOnStack => "fits_on_stack",
            DecisionReason::CanScalarReplace => "can_scalar_replace",
            DecisionReason::UnknownType => "unknown_type",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocationDecision {
    pub node: NodeId,
    pub location: AllocLocation,
    /// Set only for [`AllocLocation::Stack`].
    pub slot: Option<StackSlot>,
    pub size: u32,
    pub reason: DecisionReason,
}

impl AllocationDecision {
    fn heap(node: NodeId, size: u32, reason: DecisionReason) -> Self {
        Self {
            node,
            location: AllocLocation::Heap,
            slot: None,
            size,
            reason,
        }
    }
}

/// Places every allocation on the heap, on the stack, or marks it for
/// scalar replacement.
///
/// Allocations are considered in discovery order and the first matching rule
/// wins: escaping values go to the heap, decomposable ones are scalar
/// replaced, values of unknown size or larger than the per-object limit go to
/// the heap, and the rest take the next stack slot while the frame budget
/// lasts.
#[derive(Debug, Clone)]
pub struct StackAllocationOptimizer {
    max_object_size: u32,
    max_frame_size: u32,
    default_sizes: DefaultSizes,
    decisions: BTreeMap<NodeId, AllocationDecision>,
    stack_size: u32,
    next_slot: u32,
}

impl Default for StackAllocationOptimizer {
    fn default() -> Self {
        Self::new(&OptimizerConfig::default())
    }
}

impl StackAllocationOptimizer {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            max_object_size: config.max_object_size,
            max_frame_size: config.max_frame_size,
            default_sizes: config.default_sizes,
            decisions: BTreeMap::new(),
            stack_size: 0,
            next_slot: 0,
        }
    }

    pub fn optimize(&mut self, analyzer: &EscapeAnalyzer) {
        self.place(analyzer.escape_infos());
    }

    /// Decide placement for `infos`, replacing any earlier decisions.
    pub fn place<'a>(&mut self, infos: impl IntoIterator<Item = &'a EscapeInfo>) {
        self.decisions.clear();
        self.stack_size = 0;
        self.next_slot = 0;
        for info in infos {
            let decision = self.decide(info);
            trace!(
                node = %info.node,
                location = %decision.location,
                reason = %decision.reason,
                size = decision.size,
                "allocation placed"
            );
            self.decisions.insert(info.node, decision);
        }
    }

    fn decide(&mut self, info: &EscapeInfo) -> AllocationDecision {
        let node = info.node;
        let size = self.size_of(info);
        if info.state != EscapeState::NoEscape {
            return AllocationDecision::heap(node, size, DecisionReason::Escapes);
        }
        if info.is_scalar_replaceable() {
            return AllocationDecision {
                node,
                location: AllocLocation::ScalarReplaced,
                slot: None,
                size,
                reason: DecisionReason::CanScalarReplace,
            };
        }
        if size == 0 {
            return AllocationDecision::heap(node, size, DecisionReason::UnknownType);
        }
        if size > self.max_object_size {
            return AllocationDecision::heap(node, size, DecisionReason::TooLarge);
        }
        if self.stack_size.saturating_add(size) > self.max_frame_size {
            return AllocationDecision::heap(node, size, DecisionReason::StackOverflow);
        }

        let slot = StackSlot(self.next_slot);
        self.next_slot += 1;
        self.stack_size += size;
        AllocationDecision {
            node,
            location: AllocLocation::Stack,
            slot: Some(slot),
            size,
            reason: DecisionReason::FitsOnStack,
        }
    }

    /// Explicit size when known, else the default for the object type.
    fn size_of(&self, info: &EscapeInfo) -> u32 {
        if info.size_is_explicit || info.estimated_size > 0 {
            return info.estimated_size;
        }
        self.default_sizes.for_type(info.object_type).unwrap_or(0)
    }

    pub fn decision(&self, id: NodeId) -> Option<&AllocationDecision> {
        self.decisions.get(&id)
    }

    pub fn decisions(&self) -> impl Iterator<Item = &AllocationDecision> + '_ {
        self.decisions.values()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    /// Running frame total: the sum of sizes of every stack decision.
    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    pub fn slot_count(&self) -> u32 {
        self.next_slot
    }

    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Bytes moved off the heap by stack placement.
    pub fn bytes_promoted(&self) -> u64 {
        self.decisions()
            .filter(|d| d.location == AllocLocation::Stack)
            .map(|d| u64::from(d.size))
            .sum()
    }

    pub fn count(&self, location: AllocLocation) -> usize {
        self.decisions().filter(|d| d.location == location).count()
    }
}
