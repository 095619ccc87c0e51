//! Escape analysis and allocation placement for a dynamically typed
//! scripting language.
//!
//! [`escape::EscapeAnalyzer`] turns a parsed [`ast::Ast`] into a data-flow
//! graph in SSA form and classifies every allocation site;
//! [`opt::OptimizationResult`] then decides heap, stack or scalar
//! replacement for each of them.

pub mod ast;
pub mod config;
pub mod dfg;
mod error;
pub mod escape;
pub mod opt;

pub use config::OptimizerConfig;
pub use error::Error;
pub use escape::EscapeAnalyzer;
pub use opt::OptimizationResult;
