//! Execution engine for tabular node-graph pipelines.
//!
//! This crate provides:
//! - A typed workspace model parsed from the persisted JSON shape
//! - DAG validation and branch decomposition toward an Output node
//! - Batch preloading into a shared, load-once table cache
//! - Per-index-value execution of each branch through typed node processors
//! - Output sheet assembly, run metrics and an optional data cleaner
//!
//! File formats live outside the core: readers and writers are injected as
//! [`TableReader`] and [`WorkbookWriter`] implementations.

pub mod clean;
pub mod error;
pub mod execute;
pub mod files;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod processors;

pub use clean::{CleaningConfig, CleaningReport, SmartDataCleaner};
pub use error::{Error, ErrorKind, Result};
pub use execute::{
    BranchContext, BranchExecutor, ContextManager, GlobalContext, PathContext, PipelineExecutor,
};
pub use files::{
    BatchPreloader, FileAnalyzer, MemoryReader, MemoryWriter, TableCache, TableReader,
    WorkbookWriter,
};
pub use graph::{ExecutionBranch, GraphModel, PathAnalysis, PathAnalyzer};
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use model::{
    CellValue, ExecutePipelineRequest, ExecutionMode, ExecutorConfig, IndexValue, NodeConfig,
    NodeKind, PipelineExecutionResult, Sheet, Table, WorkspaceConfig,
};
pub use processors::{NodeProcessor, Outcome, ProcessorRegistry};
