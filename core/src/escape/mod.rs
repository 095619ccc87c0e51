//! Escape analysis over the data-flow graph.

mod analyzer;
mod info;
mod lattice;
mod propagate;

pub use analyzer::{AnalysisStats, EscapeAnalyzer};
pub use info::{EscapeInfo, EscapePoint, EscapeReason, ObjectType, ScalarField};
pub use lattice::EscapeState;
pub use propagate::{PropagationStats, classify_scalar_replacement, propagate};
