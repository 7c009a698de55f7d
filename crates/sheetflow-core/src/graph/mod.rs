//! Flow graph and branch decomposition.
//!
//! This module provides:
//! - A validated DAG view over a workspace's nodes and edges
//! - Reverse traversal from a target into independent execution branches
//! - Detection of nodes shared by several branches

mod model;
mod path_analyzer;

pub use model::GraphModel;
pub use path_analyzer::{ExecutionBranch, MultiInputNodeInfo, PathAnalysis, PathAnalyzer};
