//! Execution of one branch: its IndexSource once, then every per-index node
//! for each index value.

use std::sync::Arc;
use std::time::Instant;

use super::context::{BranchContext, GlobalContext, PathContext};
use crate::error::{Error, Result};
use crate::graph::ExecutionBranch;
use crate::model::{
    BranchExecutionResult, IndexExecutionResult, IndexValue, Node, NodeConfig,
    NodeExecutionResult, NodeKind, NodeOutputSummary, Table, WorkspaceConfig,
};
use crate::processors::{
    IndexSourceOutput, NodeProcessor, Outcome, ProcessContext, ProcessorRegistry,
};

/// Everything one branch run reports back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRun {
    pub result: BranchExecutionResult,
    pub index_results: Vec<IndexExecutionResult>,
    pub nodes_executed: usize,
    /// Non-fatal problems: failed index values and a failed IndexSource.
    pub warnings: Vec<String>,
}

impl BranchRun {
    /// Whether the branch produced no index values at all.
    pub fn is_empty(&self) -> bool {
        self.result.processed_indices.is_empty()
    }
}

/// Runs branches against one run's [`GlobalContext`].
///
/// Holds only shared references, so one executor can drive several branches
/// from different threads.
pub struct BranchExecutor<'r> {
    registry: ProcessorRegistry,
    global: &'r GlobalContext,
    workspace: &'r WorkspaceConfig,
}

impl<'r> BranchExecutor<'r> {
    pub fn new(
        registry: ProcessorRegistry,
        global: &'r GlobalContext,
        workspace: &'r WorkspaceConfig,
    ) -> Self {
        Self {
            registry,
            global,
            workspace,
        }
    }

    /// Run `branch`, accumulating aggregation results in `context`.
    ///
    /// Never fails as a whole: a node error only abandons the index value it
    /// happened on, and a failed IndexSource leaves the branch without values.
    pub fn execute_branch(
        &self,
        branch: &ExecutionBranch,
        context: &mut BranchContext,
    ) -> BranchRun {
        let span = tracing::info_span!("branch", branch_id = %branch.branch_id);
        let _enter = span.enter();

        let mut run = BranchRun {
            result: BranchExecutionResult {
                branch_id: branch.branch_id.clone(),
                index_source_node_id: branch.index_source_id.clone(),
                success: true,
                processed_indices: Vec::new(),
                final_aggregations: Vec::new(),
                raw_table_indices: Vec::new(),
                error: None,
            },
            index_results: Vec::new(),
            nodes_executed: 0,
            warnings: Vec::new(),
        };

        let index_values = match self.index_values(branch) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(error = %e, "Index source failed; branch produces nothing");
                run.nodes_executed = 1;
                run.result.success = false;
                run.result.error = Some(e.to_string());
                run.warnings
                    .push(format!("{}: index source failed: {}", branch.branch_id, e));
                return run;
            }
        };
        run.nodes_executed = 1;
        if index_values.is_empty() {
            tracing::warn!("Index source produced no values");
            run.warnings
                .push(format!("{}: index source produced no values", branch.branch_id));
            return run;
        }

        let nodes = match self.per_index_nodes(branch) {
            Ok(nodes) => nodes,
            Err(e) => {
                run.result.success = false;
                run.result.error = Some(e.to_string());
                run.warnings.push(format!("{}: {}", branch.branch_id, e));
                return run;
            }
        };
        let capture_raw = !nodes.iter().any(|n| n.kind() == NodeKind::Aggregator);

        tracing::debug!(
            indices = index_values.len(),
            nodes = nodes.len(),
            "Executing branch"
        );
        for index_value in index_values {
            let index_result =
                self.execute_index(branch, &nodes, &index_value, context, capture_raw);
            run.nodes_executed += index_result.node_results.len();
            if let Some(error) = &index_result.error {
                run.warnings.push(format!(
                    "{} / {}: {}",
                    branch.branch_id, index_value, error
                ));
            }
            run.result.processed_indices.push(index_value);
            run.index_results.push(index_result);
        }

        run.result.final_aggregations = context.aggregation_results().to_vec();
        run.result.raw_table_indices = context
            .raw_tables()
            .iter()
            .map(|(index, _)| index.clone())
            .collect();
        run
    }

    fn index_values(&self, branch: &ExecutionBranch) -> Result<Vec<IndexValue>> {
        let node = self.node(&branch.index_source_id)?;
        let NodeConfig::IndexSource(config) = &node.config else {
            return Err(Error::path(format!(
                "branch '{}' does not start at an index source",
                branch.branch_id
            )));
        };

        let path = PathContext::new(IndexValue::new(""));
        let started = Instant::now();
        let outcome = self.registry.index_source().process(
            &node.id,
            config,
            (),
            ProcessContext::new(self.global, &path),
        );
        let elapsed = elapsed_ms(started);
        self.global
            .metrics()
            .record_node(&node.id, NodeKind::IndexSource, elapsed, outcome.is_ok());

        Ok(match outcome? {
            Outcome::Produced(IndexSourceOutput { index_values, .. }) => index_values,
            Outcome::Empty(_) => Vec::new(),
        })
    }

    fn per_index_nodes(&self, branch: &ExecutionBranch) -> Result<Vec<&'r Node>> {
        branch
            .per_index_nodes()
            .iter()
            .map(|id| self.node(id))
            .collect()
    }

    fn node(&self, node_id: &str) -> Result<&'r Node> {
        self.workspace
            .node(node_id)
            .ok_or_else(|| Error::configuration(format!("node '{}' not found", node_id)))
    }

    fn execute_index(
        &self,
        branch: &ExecutionBranch,
        nodes: &[&Node],
        index_value: &IndexValue,
        context: &mut BranchContext,
        capture_raw: bool,
    ) -> IndexExecutionResult {
        let span = tracing::info_span!("index_value", value = %index_value);
        let _enter = span.enter();

        let started = Instant::now();
        let mut path = PathContext::new(index_value.clone());
        let mut node_results = Vec::with_capacity(nodes.len());
        let mut error = None;

        for node in nodes {
            let node_started = Instant::now();
            let outcome = self
                .registry
                .execute_step(node, index_value, self.global, &path, context);
            let elapsed = elapsed_ms(node_started);
            let kind = node.kind();
            self.global
                .metrics()
                .record_node(&node.id, kind, elapsed, outcome.is_ok());

            match outcome {
                Ok(Outcome::Produced(step)) => {
                    tracing::debug!(node = %node.id, kind = %kind, ms = elapsed, "Node executed");
                    node_results.push(NodeExecutionResult::succeeded(
                        &node.id,
                        kind,
                        step.summary(),
                        elapsed,
                    ));
                    if let Some(table) = step.table() {
                        path.set_table(Arc::clone(table));
                    }
                    path.record_trace(&node.id, "executed");
                }
                Ok(Outcome::Empty(reason)) => {
                    tracing::debug!(node = %node.id, reason = %reason, "Node produced nothing");
                    if kind == NodeKind::SheetSelector {
                        path.set_table(Arc::new(Table::empty()));
                    }
                    node_results.push(NodeExecutionResult::succeeded(
                        &node.id,
                        kind,
                        NodeOutputSummary::Empty { reason },
                        elapsed,
                    ));
                    path.record_trace(&node.id, "empty");
                }
                Err(e) => {
                    tracing::warn!(
                        node = %node.id,
                        error = %e,
                        "Node failed; skipping rest of index value"
                    );
                    node_results.push(NodeExecutionResult::failed(&node.id, kind, &e, elapsed));
                    path.record_trace(&node.id, "failed");
                    error = Some(format!("node '{}': {}", node.id, e));
                    break;
                }
            }
        }

        if error.is_none() && capture_raw {
            if let Some(table) = path.last_non_aggregator_table.take() {
                if table.column_count() > 0 {
                    context.record_raw_table(index_value.clone(), table);
                }
            }
        }

        IndexExecutionResult {
            branch_id: branch.branch_id.clone(),
            index_value: index_value.clone(),
            success: error.is_none(),
            node_results,
            error,
            total_execution_time_ms: elapsed_ms(started),
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::files::MemoryReader;
    use crate::model::{
        AggregationMethod, AggregatorConfig, CellValue, ExecutionMode, FileDescriptor,
        IndexSourceConfig, IndexSourceMode, SheetMeta, SheetSelection, SheetSelectorConfig,
    };

    fn workspace(with_aggregator: bool) -> WorkspaceConfig {
        let mut nodes = vec![
            Node::new(
                "src",
                NodeConfig::IndexSource(IndexSourceConfig {
                    source_file_id: "sales".into(),
                    source: IndexSourceMode::SheetNames,
                    display_name: None,
                }),
            ),
            Node::new(
                "sel",
                NodeConfig::SheetSelector(SheetSelectorConfig {
                    target_file_id: "sales".into(),
                    selection: SheetSelection::AutoByIndex,
                }),
            ),
        ];
        if with_aggregator {
            nodes.push(Node::new(
                "agg",
                NodeConfig::Aggregator(AggregatorConfig {
                    stat_column: "Amount".into(),
                    method: AggregationMethod::Sum,
                    output_as: "total".into(),
                }),
            ));
        }
        WorkspaceConfig {
            files: vec![FileDescriptor {
                id: "sales".into(),
                name: "Sales".into(),
                path: PathBuf::from("sales.xlsx"),
                sheet_metas: ["East", "West", "Ghost"]
                    .iter()
                    .map(|s| SheetMeta {
                        sheet_name: s.to_string(),
                        header_row: 0,
                    })
                    .collect(),
            }],
            nodes,
            ..Default::default()
        }
    }

    fn global(workspace: &WorkspaceConfig) -> GlobalContext {
        let reader = MemoryReader::new()
            .with_sheet(
                "sales.xlsx",
                "East",
                Table::from_rows(
                    ["Amount"],
                    vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]],
                ),
            )
            .with_sheet(
                "sales.xlsx",
                "West",
                Table::from_rows(["Amount"], vec![vec![CellValue::Int(5)]]),
            );
        GlobalContext::new(workspace, ExecutionMode::Production, Arc::new(reader))
    }

    fn branch(with_aggregator: bool) -> ExecutionBranch {
        let mut nodes = vec!["src".to_string(), "sel".to_string()];
        if with_aggregator {
            nodes.push("agg".into());
        }
        nodes.push("out".into());
        ExecutionBranch {
            branch_id: "branch_0".into(),
            index_source_id: "src".into(),
            execution_nodes: nodes,
            merge_node_id: None,
            target_node_id: "out".into(),
        }
    }

    #[test]
    fn test_aggregates_each_index_value() {
        let workspace = workspace(true);
        let global = global(&workspace);
        let executor = BranchExecutor::new(ProcessorRegistry::new(), &global, &workspace);
        let mut context = BranchContext::new("branch_0", "src");

        let run = executor.execute_branch(&branch(true), &mut context);
        assert!(run.result.success);
        assert_eq!(run.result.processed_indices.len(), 3);
        assert_eq!(
            context.result(&IndexValue::new("East"), "total"),
            Some(&CellValue::Float(3.0))
        );
        assert_eq!(
            context.result(&IndexValue::new("West"), "total"),
            Some(&CellValue::Float(5.0))
        );
        // The missing sheet yields no result but is not a failure.
        assert!(context.aggregation(&IndexValue::new("Ghost")).is_none());
        assert!(run.index_results.iter().all(|r| r.success));
        assert!(context.raw_tables().is_empty());
        // IndexSource + 3 x (selector + aggregator).
        assert_eq!(run.nodes_executed, 7);
    }

    #[test]
    fn test_raw_tables_without_aggregator() {
        let workspace = workspace(false);
        let global = global(&workspace);
        let executor = BranchExecutor::new(ProcessorRegistry::new(), &global, &workspace);
        let mut context = BranchContext::new("branch_0", "src");

        let run = executor.execute_branch(&branch(false), &mut context);
        assert_eq!(
            run.result.raw_table_indices,
            vec![IndexValue::new("East"), IndexValue::new("West")]
        );
        assert!(!context.has_aggregations());
    }

    #[test]
    fn test_node_error_abandons_index_value_only() {
        let mut workspace = workspace(true);
        if let NodeConfig::Aggregator(config) = &mut workspace.nodes[2].config {
            config.stat_column = "Price".into();
        }
        let global = global(&workspace);
        let executor = BranchExecutor::new(ProcessorRegistry::new(), &global, &workspace);
        let mut context = BranchContext::new("branch_0", "src");

        let run = executor.execute_branch(&branch(true), &mut context);
        assert!(run.result.success);
        let failed: Vec<_> = run.index_results.iter().filter(|r| !r.success).collect();
        assert_eq!(failed.len(), 2);
        assert_eq!(run.warnings.len(), 2);
        assert_eq!(global.metrics().snapshot().node("agg").unwrap().error_count, 2);
    }

    #[test]
    fn test_failed_index_source() {
        let mut workspace = workspace(true);
        if let NodeConfig::IndexSource(config) = &mut workspace.nodes[0].config {
            config.source_file_id = "missing".into();
        }
        let global = global(&workspace);
        let executor = BranchExecutor::new(ProcessorRegistry::new(), &global, &workspace);
        let mut context = BranchContext::new("branch_0", "src");

        let run = executor.execute_branch(&branch(true), &mut context);
        assert!(!run.result.success);
        assert!(run.is_empty());
        assert_eq!(run.warnings.len(), 1);
    }
}
