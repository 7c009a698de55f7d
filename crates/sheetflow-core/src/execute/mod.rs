//! Pipeline execution.
//!
//! - [`PipelineExecutor`]: validates the graph, preloads tables, runs every
//!   branch and then the Output node.
//! - [`BranchExecutor`]: one branch, one index value at a time.
//! - Contexts: see [`context`] for the three tiers and their owner.

mod branch;
pub mod context;
mod executor;

pub use branch::{BranchExecutor, BranchRun};
pub use context::{
    BranchContext, BranchContextSummary, ContextManager, ContextSummary, GlobalContext,
    PathContext,
};
pub use executor::PipelineExecutor;
