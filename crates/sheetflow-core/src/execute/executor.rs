//! Pipeline executor: one run from request to result.
//!
//! ```text
//! request
//!   ├── GraphModel (validate DAG)
//!   ├── PathAnalyzer (branches toward the Output node)
//!   ├── FileAnalyzer + BatchPreloader (warm the table cache)
//!   ├── BranchExecutor per branch (sequential or on rayon)
//!   └── OutputProcessor (sheets, optional workbook write)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use super::branch::{BranchExecutor, BranchRun, elapsed_ms};
use super::context::{BranchContext, ContextManager, GlobalContext, PathContext};
use crate::clean::SmartDataCleaner;
use crate::error::{Error, Result};
use crate::files::{BatchPreloader, FileAnalyzer, TableReader, WorkbookWriter};
use crate::graph::{GraphModel, PathAnalysis, PathAnalyzer};
use crate::model::{
    ExecutePipelineRequest, ExecutionSummary, ExecutorConfig, IndexValue, NodeConfig, NodeKind,
    OutputConfig, OutputResult, PipelineExecutionResult, WorkspaceConfig,
};
use crate::processors::{NodeProcessor, OutputInput, ProcessContext, ProcessorRegistry};

/// Executes pipeline requests against an injected reader and writer.
///
/// The executor itself is stateless between runs: every run builds a fresh
/// [`GlobalContext`] and [`ContextManager`] and drops them at the end.
pub struct PipelineExecutor {
    config: ExecutorConfig,
    reader: Arc<dyn TableReader>,
    writer: Option<Arc<dyn WorkbookWriter>>,
    registry: ProcessorRegistry,
    path_analyzer: PathAnalyzer,
    file_analyzer: FileAnalyzer,
}

impl PipelineExecutor {
    pub fn new(config: ExecutorConfig, reader: Arc<dyn TableReader>) -> Self {
        Self {
            config,
            reader,
            writer: None,
            registry: ProcessorRegistry::new(),
            path_analyzer: PathAnalyzer::new(),
            file_analyzer: FileAnalyzer::new(),
        }
    }

    /// Write output workbooks through `writer` in production runs.
    pub fn with_writer(mut self, writer: Arc<dyn WorkbookWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run one request. Failures are reported in the result, never panicked.
    pub fn execute_pipeline(&self, request: &ExecutePipelineRequest) -> PipelineExecutionResult {
        let span = tracing::info_span!("pipeline_run", target = %request.target_node_id);
        let _enter = span.enter();

        let started = Instant::now();
        tracing::info!(
            workspace = %request.workspace.id,
            mode = ?request.execution_mode,
            nodes = request.workspace.nodes.len(),
            "Pipeline run started"
        );

        match self.run(request, started) {
            Ok(result) => {
                tracing::info!(
                    indices = result.execution_summary.indices_processed,
                    nodes = result.execution_summary.nodes_executed,
                    sheets = result.output_data.as_ref().map_or(0, |o| o.total_sheets),
                    ms = result.execution_summary.total_time_ms,
                    "Pipeline run finished"
                );
                result
            }
            Err(e) => {
                tracing::error!(error = %e, kind = ?e.kind(), "Pipeline run failed");
                PipelineExecutionResult::failure(&e, request.execution_mode, elapsed_ms(started))
            }
        }
    }

    fn run(
        &self,
        request: &ExecutePipelineRequest,
        started: Instant,
    ) -> Result<PipelineExecutionResult> {
        let workspace = &request.workspace;
        let graph = GraphModel::new(&workspace.nodes, &workspace.edges)?;
        let target = graph.require_node(&request.target_node_id)?;
        let NodeConfig::Output(output_config) = &target.config else {
            return Err(Error::configuration(format!(
                "target node '{}' is a {} node, expected {}",
                target.id,
                target.kind(),
                NodeKind::Output
            )));
        };
        let analysis = self.path_analyzer.analyze_graph(&graph, &target.id)?;

        let global = Arc::new(self.global_context(request)?);
        let preload_warnings = self.preload(workspace, &analysis, &global);

        let mut contexts = ContextManager::new(Arc::clone(&global));
        let runs = if self.config.parallel_branches && analysis.branches.len() > 1 {
            self.run_parallel(workspace, &analysis, &global, &mut contexts)?
        } else {
            self.run_sequential(workspace, &analysis, &global, &mut contexts)?
        };

        if runs.iter().all(BranchRun::is_empty) {
            return Err(Error::data(format!(
                "no branch reaching '{}' produced any index values",
                target.id
            )));
        }
        for run in runs.iter().filter(|r| r.is_empty()) {
            contexts.remove_branch_context(&run.result.branch_id);
        }

        let output = self.run_output(
            &target.id,
            output_config,
            request.output_file_path.clone(),
            workspace,
            &analysis,
            &contexts,
        )?;

        let mut result = PipelineExecutionResult {
            success: true,
            execution_summary: ExecutionSummary {
                indices_processed: runs.iter().map(|r| r.result.processed_indices.len()).sum(),
                nodes_executed: runs.iter().map(|r| r.nodes_executed).sum::<usize>() + 1,
                branches: analysis.branches.len(),
                total_time_ms: 0.0,
                execution_mode: request.execution_mode,
            },
            output_file_path: output.output_file_path.clone(),
            output_file_size_bytes: output.output_file_size_bytes,
            output_data: Some(output),
            index_results: Vec::new(),
            branch_results: Vec::new(),
            warnings: preload_warnings,
            error: None,
            error_kind: None,
            metrics: None,
        };
        for run in runs {
            result.index_results.extend(run.index_results);
            result.branch_results.push(run.result);
            result.warnings.extend(run.warnings);
        }
        result.metrics = Some(global.metrics().snapshot());

        if let Err(e) = contexts.cleanup_branch_contexts() {
            tracing::warn!(error = %e, "Failed to release execution contexts");
        }
        result.execution_summary.total_time_ms = elapsed_ms(started);
        Ok(result)
    }

    fn global_context(&self, request: &ExecutePipelineRequest) -> Result<GlobalContext> {
        let global = GlobalContext::new(
            &request.workspace,
            request.execution_mode,
            Arc::clone(&self.reader),
        )
        .with_test_mode_max_rows(request.test_mode_max_rows);
        if self.config.clean_tables {
            Ok(global.with_cleaner(SmartDataCleaner::new(self.config.cleaning.clone())?))
        } else {
            Ok(global)
        }
    }

    /// Warm the cache with every sheet the branches will read. Failed sheets
    /// come back as warnings; the owning node retries them on demand.
    fn preload(
        &self,
        workspace: &WorkspaceConfig,
        analysis: &PathAnalysis,
        global: &GlobalContext,
    ) -> Vec<String> {
        let batches = self
            .file_analyzer
            .analyze_file_requirements(workspace, &analysis.all_nodes());
        if batches.is_empty() {
            return Vec::new();
        }
        let estimate = self.file_analyzer.estimate_preload_benefit(&batches);
        tracing::debug!(
            files = estimate.total_files,
            sheets = estimate.total_sheets,
            io_reduction = estimate.estimated_io_reduction,
            saving_percent = estimate.estimated_time_saving_percent,
            "Preload estimate"
        );
        let summary =
            BatchPreloader::new(self.config.preload_workers).preload_files(&batches, global);
        summary
            .failures
            .iter()
            .map(|f| {
                format!(
                    "preload of sheet '{}' in file '{}' failed: {}",
                    f.sheet_name, f.file_id, f.error
                )
            })
            .collect()
    }

    fn run_sequential(
        &self,
        workspace: &WorkspaceConfig,
        analysis: &PathAnalysis,
        global: &GlobalContext,
        contexts: &mut ContextManager,
    ) -> Result<Vec<BranchRun>> {
        let executor = BranchExecutor::new(self.registry, global, workspace);
        let mut runs = Vec::with_capacity(analysis.branches.len());
        for branch in &analysis.branches {
            let context = contexts
                .get_or_create_branch_context(&branch.branch_id, Some(&branch.index_source_id))?;
            runs.push(executor.execute_branch(branch, context));
        }
        Ok(runs)
    }

    /// Run branches on the rayon pool. Each worker owns its branch context
    /// and sends it back when done; results are put back in discovery order.
    fn run_parallel(
        &self,
        workspace: &WorkspaceConfig,
        analysis: &PathAnalysis,
        global: &GlobalContext,
        contexts: &mut ContextManager,
    ) -> Result<Vec<BranchRun>> {
        let executor = BranchExecutor::new(self.registry, global, workspace);
        let parent = tracing::Span::current();
        let (tx, rx) = crossbeam_channel::unbounded::<(usize, BranchContext, BranchRun)>();

        analysis
            .branches
            .par_iter()
            .enumerate()
            .for_each_with(tx, |tx, (order, branch)| {
                let mut context = BranchContext::new(&branch.branch_id, &branch.index_source_id);
                let run = parent.in_scope(|| executor.execute_branch(branch, &mut context));
                if tx.send((order, context, run)).is_err() {
                    tracing::warn!(branch = %branch.branch_id, "Branch result receiver dropped");
                }
            });

        let mut finished: Vec<(usize, BranchContext, BranchRun)> = rx.iter().collect();
        if finished.len() != analysis.branches.len() {
            return Err(Error::execution(format!(
                "{} of {} branch workers reported back",
                finished.len(),
                analysis.branches.len()
            )));
        }
        finished.sort_by_key(|(order, _, _)| *order);

        let mut runs = Vec::with_capacity(finished.len());
        for (_, context, run) in finished {
            contexts.adopt_branch_context(context)?;
            runs.push(run);
        }
        Ok(runs)
    }

    fn run_output(
        &self,
        node_id: &str,
        config: &OutputConfig,
        output_path: Option<PathBuf>,
        workspace: &WorkspaceConfig,
        analysis: &PathAnalysis,
        contexts: &ContextManager,
    ) -> Result<OutputResult> {
        let global = contexts.global();
        let path = PathContext::new(IndexValue::new(""));
        let input = OutputInput {
            workspace,
            analysis,
            contexts,
            output_path,
            writer: self.writer.as_deref(),
        };

        let started = Instant::now();
        let outcome = self.registry.output().process(
            node_id,
            config,
            input,
            ProcessContext::new(global, &path),
        );
        global
            .metrics()
            .record_node(node_id, NodeKind::Output, elapsed_ms(started), outcome.is_ok());
        Ok(outcome?.produced().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::error::ErrorKind;
    use crate::files::{MemoryReader, MemoryWriter};
    use crate::model::{
        AggregationMethod, AggregatorConfig, CellValue, Edge, ExecutionMode, FileDescriptor,
        IndexSourceConfig, IndexSourceMode, Node, Sheet, SheetMeta, SheetSelection,
        SheetSelectorConfig, Table,
    };

    fn workspace() -> WorkspaceConfig {
        WorkspaceConfig {
            id: "ws".into(),
            name: "Sales".into(),
            files: vec![FileDescriptor {
                id: "sales".into(),
                name: "Sales".into(),
                path: PathBuf::from("sales.xlsx"),
                sheet_metas: ["East", "West"]
                    .iter()
                    .map(|s| SheetMeta {
                        sheet_name: s.to_string(),
                        header_row: 0,
                    })
                    .collect(),
            }],
            nodes: vec![
                Node::new(
                    "src",
                    NodeConfig::IndexSource(IndexSourceConfig {
                        source_file_id: "sales".into(),
                        source: IndexSourceMode::SheetNames,
                        display_name: Some("Regions".into()),
                    }),
                ),
                Node::new(
                    "sel",
                    NodeConfig::SheetSelector(SheetSelectorConfig {
                        target_file_id: "sales".into(),
                        selection: SheetSelection::AutoByIndex,
                    }),
                ),
                Node::new(
                    "agg",
                    NodeConfig::Aggregator(AggregatorConfig {
                        stat_column: "Amount".into(),
                        method: AggregationMethod::Sum,
                        output_as: "total".into(),
                    }),
                ),
                Node::new(
                    "out",
                    NodeConfig::Output(OutputConfig {
                        output_path: Some("report.xlsx".into()),
                        ..Default::default()
                    }),
                ),
            ],
            edges: vec![
                Edge::new("src", "sel"),
                Edge::new("sel", "agg"),
                Edge::new("agg", "out"),
            ],
        }
    }

    fn reader() -> Arc<MemoryReader> {
        Arc::new(
            MemoryReader::new()
                .with_sheet(
                    "sales.xlsx",
                    "East",
                    Table::from_rows(["Amount"], vec![vec![CellValue::Int(2)]]),
                )
                .with_sheet(
                    "sales.xlsx",
                    "West",
                    Table::from_rows(["Amount"], vec![vec![CellValue::Int(9)]]),
                ),
        )
    }

    #[test]
    fn test_execute_writes_in_production() {
        let writer = Arc::new(MemoryWriter::new());
        let executor = PipelineExecutor::new(ExecutorConfig::default(), reader())
            .with_writer(writer.clone());
        let result = executor.execute_pipeline(&ExecutePipelineRequest::new(workspace(), "out"));

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.execution_summary.indices_processed, 2);
        assert_eq!(result.execution_summary.branches, 1);
        let sheet = result.output_data.as_ref().unwrap().sheet("0-Regions").unwrap();
        assert_eq!(sheet.row_count(), 2);
        assert_eq!(writer.write_count(), 1);
        assert_eq!(result.output_file_path, Some(PathBuf::from("report.xlsx")));
        assert!(result.metrics.is_some());
    }

    #[test]
    fn test_request_path_overrides_node_path() {
        let writer = Arc::new(MemoryWriter::new());
        let executor = PipelineExecutor::new(ExecutorConfig::default(), reader())
            .with_writer(writer.clone());
        let request =
            ExecutePipelineRequest::new(workspace(), "out").with_output_path("override.xlsx");
        let result = executor.execute_pipeline(&request);
        assert_eq!(writer.written()[0].0, PathBuf::from("override.xlsx"));
        assert_eq!(result.output_file_path, Some(PathBuf::from("override.xlsx")));
    }

    #[test]
    fn test_target_must_be_output() {
        let executor = PipelineExecutor::new(ExecutorConfig::default(), reader());
        let result = executor.execute_pipeline(&ExecutePipelineRequest::new(workspace(), "agg"));
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));

        let result = executor.execute_pipeline(&ExecutePipelineRequest::new(workspace(), "nope"));
        assert!(!result.success);
    }

    #[test]
    fn test_cycle_is_configuration_error() {
        let mut workspace = workspace();
        workspace.edges.push(Edge::new("agg", "sel"));
        let executor = PipelineExecutor::new(ExecutorConfig::default(), reader());
        let result = executor.execute_pipeline(&ExecutePipelineRequest::new(workspace, "out"));
        assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    }

    #[test]
    fn test_write_failure_is_fatal() {
        struct FailingWriter;
        impl WorkbookWriter for FailingWriter {
            fn write_workbook(&self, _: &std::path::Path, _: &[Sheet]) -> Result<u64> {
                Err(Error::Io(std::io::Error::other("disk full")))
            }
        }
        let executor = PipelineExecutor::new(ExecutorConfig::default(), reader())
            .with_writer(Arc::new(FailingWriter));
        let result = executor.execute_pipeline(&ExecutePipelineRequest::new(workspace(), "out"));
        assert!(!result.success);
        assert!(result.output_data.is_none());
    }

    #[test]
    fn test_test_mode_skips_write() {
        let writer = Arc::new(MemoryWriter::new());
        let executor = PipelineExecutor::new(ExecutorConfig::default(), reader())
            .with_writer(writer.clone());
        let request =
            ExecutePipelineRequest::new(workspace(), "out").with_mode(ExecutionMode::Test);
        let result = executor.execute_pipeline(&request);
        assert!(result.success);
        assert_eq!(writer.write_count(), 0);
        assert!(result.output_file_path.is_none());
    }

    #[test]
    fn test_failed_preload_reported_as_warning() {
        let mut workspace = workspace();
        workspace.files[0].sheet_metas.push(SheetMeta {
            sheet_name: "North".into(),
            header_row: 0,
        });
        let executor = PipelineExecutor::new(ExecutorConfig::default(), reader());
        let result = executor.execute_pipeline(&ExecutePipelineRequest::new(workspace, "out"));

        assert!(result.success, "{:?}", result.error);
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.contains("preload") && w.contains("'North'")),
            "{:?}",
            result.warnings
        );
        let sheet = result.output_data.as_ref().unwrap().sheet("0-Regions").unwrap();
        assert_eq!(sheet.row_count(), 2);
    }
}
