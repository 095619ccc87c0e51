//! Decomposition of non-escaping allocations into independent locals.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::trace;

use crate::dfg::{NodeId, ValueType};
use crate::escape::{EscapeAnalyzer, EscapeInfo};

/// Local variable slot standing in for one field of a replaced allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LocalSlot(u32);

impl LocalSlot {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LocalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMapping {
    pub field: String,
    pub ty: ValueType,
    pub slot: LocalSlot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplacementPlan {
    pub allocation: NodeId,
    /// In field-discovery order.
    pub mappings: Vec<FieldMapping>,
    pub fully_replaced: bool,
    pub bytes_saved: u32,
}

impl ReplacementPlan {
    pub fn field_slot(&self, field: &str) -> Option<LocalSlot> {
        self.mappings.iter().find(|m| m.field == field).map(|m| m.slot)
    }
}

/// Assigns every field of each scalar-replaceable allocation its own local
/// slot. Local numbering is independent of stack slots and never reuses a
/// slot within one pass.
#[derive(Debug, Clone, Default)]
pub struct ScalarReplacementOptimizer {
    plans: BTreeMap<NodeId, ReplacementPlan>,
    next_local: u32,
    bytes_saved: u64,
}

impl ScalarReplacementOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&mut self, analyzer: &EscapeAnalyzer) {
        self.plan_all(analyzer.escape_infos());
    }

    /// Build plans for `infos`, replacing any earlier ones.
    pub fn plan_all<'a>(&mut self, infos: impl IntoIterator<Item = &'a EscapeInfo>) {
        self.plans.clear();
        self.next_local = 0;
        self.bytes_saved = 0;

        for info in infos.into_iter().filter(|info| info.is_scalar_replaceable()) {
            let mappings = info
                .fields
                .iter()
                .map(|field| {
                    let slot = LocalSlot(self.next_local);
                    self.next_local += 1;
                    FieldMapping {
                        field: field.name.clone(),
                        ty: field.ty,
                        slot,
                    }
                })
                .collect::<Vec<_>>();
            trace!(node = %info.node, fields = mappings.len(), "scalar replacement planned");
            self.bytes_saved += u64::from(info.estimated_size);
            self.plans.insert(
                info.node,
                ReplacementPlan {
                    allocation: info.node,
                    mappings,
                    fully_replaced: true,
                    bytes_saved: info.estimated_size,
                },
            );
        }
    }

    pub fn plan(&self, id: NodeId) -> Option<&ReplacementPlan> {
        self.plans.get(&id)
    }

    pub fn plans(&self) -> impl Iterator<Item = &ReplacementPlan> + '_ {
        self.plans.values()
    }

    pub fn field_slot(&self, id: NodeId, field: &str) -> Option<LocalSlot> {
        self.plan(id).and_then(|plan| plan.field_slot(field))
    }

    pub fn bytes_saved(&self) -> u64 {
        self.bytes_saved
    }

    pub fn locals_used(&self) -> u32 {
        self.next_local
    }
}
