//! Branch decomposition.
//!
//! Walks the graph backwards from the target node. Every time a node has more
//! than one predecessor the walk forks, so each IndexSource reaching the
//! target gets its own [`ExecutionBranch`] instead of being joined with the
//! others into a cross product.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::model::GraphModel;
use crate::error::{Error, Result};
use crate::model::{Edge, Node, NodeKind};

/// The node sequence from one IndexSource to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBranch {
    pub branch_id: String,
    pub index_source_id: String,
    /// Starts with the IndexSource and ends with the target.
    pub execution_nodes: Vec<String>,
    /// First node after the IndexSource that has more than one predecessor.
    pub merge_node_id: Option<String>,
    pub target_node_id: String,
}

impl ExecutionBranch {
    /// Zero-based discovery number parsed from the branch id.
    pub fn number(&self) -> usize {
        self.branch_id
            .rsplit('_')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    /// Nodes run once per index value: everything except the IndexSource and the target.
    pub fn per_index_nodes(&self) -> &[String] {
        let len = self.execution_nodes.len();
        if len <= 2 {
            return &[];
        }
        &self.execution_nodes[1..len - 1]
    }

    /// Whether the branch converges with others before reaching the target.
    pub fn merges_before_target(&self) -> bool {
        self.merge_node_id
            .as_deref()
            .is_some_and(|m| m != self.target_node_id)
    }
}

/// A node that appears in more than one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiInputNodeInfo {
    pub node_id: String,
    pub input_branches: Vec<String>,
    pub node_kind: NodeKind,
}

/// Branches and multi-input nodes found for one target, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathAnalysis {
    pub target_node_id: String,
    pub branches: Vec<ExecutionBranch>,
    pub multi_input_nodes: Vec<MultiInputNodeInfo>,
}

impl PathAnalysis {
    pub fn branch(&self, branch_id: &str) -> Option<&ExecutionBranch> {
        self.branches.iter().find(|b| b.branch_id == branch_id)
    }

    pub fn multi_input(&self, node_id: &str) -> Option<&MultiInputNodeInfo> {
        self.multi_input_nodes.iter().find(|m| m.node_id == node_id)
    }

    pub fn branch_ids(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.branch_id.clone()).collect()
    }

    /// Every node id any branch will run, without duplicates, in discovery order.
    pub fn all_nodes(&self) -> Vec<String> {
        let mut seen = rustc_hash::FxHashSet::default();
        let mut out = Vec::new();
        for branch in &self.branches {
            for id in &branch.execution_nodes {
                if seen.insert(id.as_str()) {
                    out.push(id.clone());
                }
            }
        }
        out
    }

    /// Branches that converge on the same intermediate node, keyed by that node.
    ///
    /// Groups are ordered by their first branch; branches meeting only at the
    /// target are not grouped.
    pub fn merge_groups(&self) -> Vec<(String, Vec<String>)> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for branch in self.branches.iter().filter(|b| b.merges_before_target()) {
            let Some(merge) = branch.merge_node_id.as_deref() else {
                continue;
            };
            match groups.iter_mut().find(|(node, _)| node == merge) {
                Some((_, members)) => members.push(branch.branch_id.clone()),
                None => groups.push((merge.to_string(), vec![branch.branch_id.clone()])),
            }
        }
        groups
    }
}

/// Reverse-traversal branch finder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathAnalyzer;

impl PathAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Decompose the flow reaching `target_node_id` into independent branches.
    pub fn analyze(
        &self,
        nodes: &[Node],
        edges: &[Edge],
        target_node_id: &str,
    ) -> Result<PathAnalysis> {
        let graph = GraphModel::new(nodes, edges)?;
        self.analyze_graph(&graph, target_node_id)
    }

    /// Same as [`PathAnalyzer::analyze`] over an already validated graph.
    pub fn analyze_graph(
        &self,
        graph: &GraphModel<'_>,
        target_node_id: &str,
    ) -> Result<PathAnalysis> {
        if !graph.contains(target_node_id) {
            return Err(Error::configuration(format!(
                "target node '{}' not found",
                target_node_id
            )));
        }

        let branches = self.discover_branches(graph, target_node_id);
        if branches.is_empty() {
            return Err(Error::path(format!(
                "no index source reaches target node '{}'",
                target_node_id
            )));
        }

        let multi_input_nodes = self.multi_input_nodes(graph, &branches);
        tracing::info!(
            target = target_node_id,
            branches = branches.len(),
            multi_input = multi_input_nodes.len(),
            "Discovered execution branches"
        );

        Ok(PathAnalysis {
            target_node_id: target_node_id.to_string(),
            branches,
            multi_input_nodes,
        })
    }

    fn discover_branches(
        &self,
        graph: &GraphModel<'_>,
        target_node_id: &str,
    ) -> Vec<ExecutionBranch> {
        let mut branches = Vec::new();
        // Each entry is a node and the walk so far, target first.
        let mut queue: VecDeque<(&str, Vec<&str>)> =
            VecDeque::from([(target_node_id, Vec::new())]);

        while let Some((current, walked)) = queue.pop_front() {
            let predecessors = graph.predecessors(current);

            if predecessors.is_empty() {
                if graph.kind(current) == Some(NodeKind::IndexSource) {
                    let mut execution_nodes: Vec<String> = Vec::with_capacity(walked.len() + 1);
                    execution_nodes.push(current.to_string());
                    execution_nodes.extend(walked.iter().rev().map(|id| id.to_string()));

                    let branch_id = format!("branch_{}", branches.len());
                    let merge_node_id = self.find_merge_node(graph, &execution_nodes);
                    tracing::debug!(
                        branch_id = %branch_id,
                        index_source = current,
                        nodes = execution_nodes.len(),
                        "Branch found"
                    );
                    branches.push(ExecutionBranch {
                        branch_id,
                        index_source_id: current.to_string(),
                        execution_nodes,
                        merge_node_id,
                        target_node_id: target_node_id.to_string(),
                    });
                } else {
                    tracing::warn!(
                        node_id = current,
                        "Dead end without index source, path dropped"
                    );
                }
                continue;
            }

            for predecessor in predecessors {
                let mut path = walked.clone();
                path.push(current);
                queue.push_back((predecessor, path));
            }
        }

        branches
    }

    fn find_merge_node(
        &self,
        graph: &GraphModel<'_>,
        execution_nodes: &[String],
    ) -> Option<String> {
        execution_nodes
            .iter()
            .skip(1)
            .find(|id| graph.predecessors(id).len() > 1)
            .cloned()
    }

    fn multi_input_nodes(
        &self,
        graph: &GraphModel<'_>,
        branches: &[ExecutionBranch],
    ) -> Vec<MultiInputNodeInfo> {
        let mut order: Vec<&str> = Vec::new();
        let mut membership: FxHashMap<&str, Vec<String>> = FxHashMap::default();

        for branch in branches {
            for node_id in &branch.execution_nodes {
                let entry = membership.entry(node_id.as_str()).or_insert_with(|| {
                    order.push(node_id.as_str());
                    Vec::new()
                });
                if !entry.contains(&branch.branch_id) {
                    entry.push(branch.branch_id.clone());
                }
            }
        }

        order
            .into_iter()
            .filter_map(|node_id| {
                let input_branches = membership.remove(node_id)?;
                if input_branches.len() < 2 {
                    return None;
                }
                Some(MultiInputNodeInfo {
                    node_id: node_id.to_string(),
                    input_branches,
                    node_kind: graph.kind(node_id)?,
                })
            })
            .collect()
    }
}
