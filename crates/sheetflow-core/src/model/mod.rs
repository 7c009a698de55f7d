//! Data model: tables, workspace configuration, run requests and results.

pub mod config;
mod request;
mod result;
mod table;
mod workspace;

pub use config::{
    AggregationMethod, AggregatorConfig, FilterCondition, FilterOperator, IndexSourceConfig,
    IndexSourceMode, Logic, MatchMode, NodeConfig, NodeKind, OutputConfig, RowFilterConfig,
    RowLookupConfig, SheetSelection, SheetSelectorConfig,
};
pub use request::{
    DEFAULT_PRELOAD_WORKERS, DEFAULT_TEST_MODE_MAX_ROWS, ExecutePipelineRequest, ExecutionMode,
    ExecutorConfig,
};
pub use result::{
    AggregationResult, BranchExecutionResult, ExecutionSummary, IndexAggregation,
    IndexExecutionResult, NodeExecutionResult, NodeOutputSummary, OutputResult,
    PipelineExecutionResult, Sheet, SheetKind, SheetMetadata,
};
pub use table::{CellValue, DATETIME_FORMAT, IndexValue, Table, cell_at};
pub use workspace::{Edge, FileDescriptor, Node, SheetMeta, WorkspaceConfig};
