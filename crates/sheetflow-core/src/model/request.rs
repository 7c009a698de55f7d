//! Run requests and engine tuning.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::workspace::WorkspaceConfig;
use crate::clean::CleaningConfig;

/// Default row cap applied to sheet selections in test mode.
pub const DEFAULT_TEST_MODE_MAX_ROWS: usize = 100;

/// Default width of the batch-preload worker pool.
pub const DEFAULT_PRELOAD_WORKERS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Row-limited preview; never writes an output file.
    Test,
    #[default]
    Production,
}

/// One pipeline run.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutePipelineRequest {
    #[serde(alias = "workspace_config")]
    pub workspace: WorkspaceConfig,
    pub target_node_id: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default = "default_test_mode_max_rows")]
    pub test_mode_max_rows: usize,
    /// Overrides the Output node's `outputPath`.
    #[serde(default)]
    pub output_file_path: Option<PathBuf>,
}

fn default_test_mode_max_rows() -> usize {
    DEFAULT_TEST_MODE_MAX_ROWS
}

impl ExecutePipelineRequest {
    pub fn new(workspace: WorkspaceConfig, target_node_id: impl Into<String>) -> Self {
        Self {
            workspace,
            target_node_id: target_node_id.into(),
            execution_mode: ExecutionMode::default(),
            test_mode_max_rows: DEFAULT_TEST_MODE_MAX_ROWS,
            output_file_path: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_test_mode_max_rows(mut self, rows: usize) -> Self {
        self.test_mode_max_rows = rows;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file_path = Some(path.into());
        self
    }
}

/// Engine tuning shared by every run of one executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Width of the batch-preload worker pool.
    pub preload_workers: usize,
    /// Run branches on the rayon pool instead of one after another.
    pub parallel_branches: bool,
    /// Run the data cleaner on each table as it enters the cache.
    pub clean_tables: bool,
    pub cleaning: CleaningConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            preload_workers: DEFAULT_PRELOAD_WORKERS,
            parallel_branches: false,
            clean_tables: true,
            cleaning: CleaningConfig::default(),
        }
    }
}
