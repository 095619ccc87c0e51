//! Allocation placement built on top of escape analysis.
//!
//! [`OptimizationResult`] drives both optimizers over one analyzed program and
//! keeps everything a downstream code generator or a human needs: per-site
//! decisions, field mappings, aggregate statistics and a textual report.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::ast::{Ast, Position};
use crate::config::OptimizerConfig;
use crate::dfg::NodeId;
use crate::escape::{EscapeAnalyzer, EscapeReason, EscapeState, ObjectType};

pub mod scalar;
pub mod stack;

pub use scalar::{FieldMapping, LocalSlot, ReplacementPlan, ScalarReplacementOptimizer};
pub use stack::{AllocLocation, AllocationDecision, DecisionReason, StackAllocationOptimizer, StackSlot};

#[cfg(test)]
mod opt_test;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total_allocations: usize,
    pub no_escape: usize,
    pub arg_escape: usize,
    pub global_escape: usize,
    pub unknown: usize,
    pub scalar_replaceable: usize,
    pub stack_allocated: usize,
    pub scalar_replaced: usize,
    pub heap_allocated: usize,
    /// Bytes moved from the heap into stack slots.
    pub stack_bytes: u64,
    pub scalar_bytes_saved: u64,
    pub dfg_nodes: usize,
    pub dfg_edges: usize,
    pub phis: usize,
    pub fixpoint_iterations: usize,
    pub analysis_micros: u64,
}

/// Everything known about one allocation site after optimization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationSummary {
    pub node: NodeId,
    pub object_type: ObjectType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<Position>,
    pub state: EscapeState,
    pub reasons: Vec<EscapeReason>,
    pub location: AllocLocation,
    pub decision: DecisionReason,
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<StackSlot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMapping>,
}

#[derive(Debug, Clone, Default)]
pub struct OptimizationResult {
    stack: StackAllocationOptimizer,
    scalar: ScalarReplacementOptimizer,
    allocations: Vec<AllocationSummary>,
    statistics: Statistics,
}

impl OptimizationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze `ast` with `config` and place every allocation.
    pub fn run(ast: &Ast, config: &OptimizerConfig) -> Self {
        let mut analyzer = EscapeAnalyzer::with_config(config);
        analyzer.analyze(ast);
        let mut result = Self::new();
        result.optimize(&analyzer);
        result
    }

    /// Run both optimizers over an analyzed program, replacing earlier results.
    pub fn optimize(&mut self, analyzer: &EscapeAnalyzer) {
        self.stack = StackAllocationOptimizer::new(analyzer.config());
        self.stack.optimize(analyzer);
        self.scalar.analyze(analyzer);

        self.allocations.clear();
        let mut stats = Statistics::default();
        for info in analyzer.escape_infos() {
            match info.state {
                EscapeState::NoEscape => stats.no_escape += 1,
                EscapeState::ArgEscape => stats.arg_escape += 1,
                EscapeState::GlobalEscape => stats.global_escape += 1,
                EscapeState::Unknown => stats.unknown += 1,
            }
            if info.is_scalar_replaceable() {
                stats.scalar_replaceable += 1;
            }
            let Some(decision) = self.stack.decision(info.node) else {
                continue;
            };
            self.allocations.push(AllocationSummary {
                node: info.node,
                object_type: info.object_type,
                class_name: info.class_name.clone(),
                loc: info.loc,
                state: info.state,
                reasons: info.reasons().collect(),
                location: decision.location,
                decision: decision.reason,
                size: decision.size,
                slot: decision.slot,
                fields: self
                    .scalar
                    .plan(info.node)
                    .map(|plan| plan.mappings.clone())
                    .unwrap_or_default(),
            });
        }

        let analysis = analyzer.stats();
        stats.total_allocations = self.allocations.len();
        stats.stack_allocated = self.stack.count(AllocLocation::Stack);
        stats.scalar_replaced = self.stack.count(AllocLocation::ScalarReplaced);
        stats.heap_allocated = self.stack.count(AllocLocation::Heap);
        stats.stack_bytes = self.stack.bytes_promoted();
        stats.scalar_bytes_saved = self.scalar.bytes_saved();
        stats.dfg_nodes = analyzer.dfg().node_count();
        stats.dfg_edges = analyzer.dfg().edge_count();
        stats.phis = analysis.phis;
        stats.fixpoint_iterations = analysis.fixpoint_iterations;
        stats.analysis_micros = u64::try_from(analysis.elapsed.as_micros()).unwrap_or(u64::MAX);
        self.statistics = stats;

        info!(
            allocations = stats.total_allocations,
            stack = stats.stack_allocated,
            scalar_replaced = stats.scalar_replaced,
            heap = stats.heap_allocated,
            stack_bytes = stats.stack_bytes,
            "allocation placement finished"
        );
    }

    pub fn stack(&self) -> &StackAllocationOptimizer {
        &self.stack
    }

    pub fn scalar(&self) -> &ScalarReplacementOptimizer {
        &self.scalar
    }

    pub fn placement(&self, id: NodeId) -> Option<AllocLocation> {
        self.stack.decision(id).map(|d| d.location)
    }

    pub fn allocations(&self) -> &[AllocationSummary] {
        &self.allocations
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    pub fn report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.statistics;
        writeln!(f, "Escape analysis report")?;
        writeln!(f, "======================")?;
        writeln!(
            f,
            "allocations:        {} (no escape {}, arg escape {}, global escape {}, unknown {})",
            s.total_allocations, s.no_escape, s.arg_escape, s.global_escape, s.unknown
        )?;
        writeln!(f, "scalar replaceable: {}", s.scalar_replaceable)?;
        writeln!(
            f,
            "placement:          stack {}, scalar replaced {}, heap {}",
            s.stack_allocated, s.scalar_replaced, s.heap_allocated
        )?;
        writeln!(
            f,
            "stack bytes:        {} / {} in {} slots",
            s.stack_bytes,
            self.stack.max_frame_size(),
            self.stack.slot_count()
        )?;
        writeln!(
            f,
            "scalar bytes saved: {} in {} locals",
            s.scalar_bytes_saved,
            self.scalar.locals_used()
        )?;
        writeln!(f, "dfg:                {} nodes, {} edges, {} phis", s.dfg_nodes, s.dfg_edges, s.phis)?;
        writeln!(f, "fixpoint:           {} iterations", s.fixpoint_iterations)?;
        writeln!(f, "analysis time:      {} us", s.analysis_micros)?;

        if self.allocations.is_empty() {
            return Ok(());
        }
        writeln!(f)?;
        writeln!(f, "Allocations:")?;
        for alloc in &self.allocations {
            write!(f, "  {} {}", alloc.node, alloc.object_type)?;
            if let Some(class) = &alloc.class_name {
                write!(f, " {class}")?;
            }
            if let Some(loc) = alloc.loc {
                write!(f, " at {loc}")?;
            }
            write!(f, ": {} -> {}", alloc.state, alloc.location)?;
            if let Some(slot) = alloc.slot {
                write!(f, " {slot}")?;
            }
            write!(f, " ({}, {} B)", alloc.decision, alloc.size)?;
            if !alloc.reasons.is_empty() {
                let reasons: Vec<&str> = alloc.reasons.iter().map(|r| r.as_str()).collect();
                write!(f, " [{}]", reasons.join(", "))?;
            }
            if !alloc.fields.is_empty() {
                let fields: Vec<String> = alloc.fields.iter().map(|m| format!("{}={}", m.field, m.slot)).collect();
                write!(f, " {{{}}}", fields.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
