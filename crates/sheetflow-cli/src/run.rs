//! `sheetflow run`: execute a workspace against CSV workbooks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use sheetflow_core::model::{ExecutePipelineRequest, ExecutionMode, ExecutorConfig};
use sheetflow_core::{PipelineExecutor, WorkbookWriter};
use sheetflow_io::{CsvDirectoryWriter, CsvReader, JsonWorkbookWriter, load_workspace};

use crate::Format;
use crate::report;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output: Option<PathBuf>,
    pub format: Format,
    pub test: bool,
    pub max_rows: usize,
    pub parallel: bool,
    pub clean: bool,
    pub json: bool,
}

/// Run the flow. Returns whether the run succeeded.
pub fn execute(workspace_path: &Path, target: &str, options: &RunOptions) -> anyhow::Result<bool> {
    let workspace = load_workspace(workspace_path)
        .with_context(|| format!("loading {}", workspace_path.display()))?;

    let config = ExecutorConfig {
        parallel_branches: options.parallel,
        clean_tables: options.clean,
        ..Default::default()
    };
    let executor = PipelineExecutor::new(config, Arc::new(CsvReader::new()))
        .with_writer(writer(options.format));

    let mut request = ExecutePipelineRequest::new(workspace, target)
        .with_test_mode_max_rows(options.max_rows);
    if options.test {
        request = request.with_mode(ExecutionMode::Test);
    }
    if let Some(output) = &options.output {
        request = request.with_output_path(output);
    }

    let result = executor.execute_pipeline(&request);
    if options.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        report::print_result(&result);
    }
    Ok(result.success)
}

fn writer(format: Format) -> Arc<dyn WorkbookWriter> {
    match format {
        Format::Csv => Arc::new(CsvDirectoryWriter::new()),
        Format::Json => Arc::new(JsonWorkbookWriter::new().pretty()),
    }
}
