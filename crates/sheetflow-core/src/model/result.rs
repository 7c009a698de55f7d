//! Records produced by a pipeline run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{AggregationMethod, NodeKind};
use super::request::ExecutionMode;
use super::table::{CellValue, IndexValue, Table, cell_at};
use crate::error::ErrorKind;
use crate::metrics::MetricsSnapshot;

/// One scalar produced by an Aggregator node for one index value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub index_value: IndexValue,
    pub column_name: String,
    pub operation: AggregationMethod,
    pub result_value: CellValue,
}

/// All aggregation results of one index value, in node order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAggregation {
    pub index_value: IndexValue,
    pub results: Vec<AggregationResult>,
}

impl IndexAggregation {
    pub fn value(&self, column_name: &str) -> Option<&CellValue> {
        self.results
            .iter()
            .find(|r| r.column_name == column_name)
            .map(|r| &r.result_value)
    }
}

/// What a sheet was assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    Aggregated,
    Merged,
    Raw,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetMetadata {
    pub kind: SheetKind,
    pub branch_ids: Vec<String>,
    /// Display name of the index source the sheet came from.
    pub source_name: String,
    /// Set for raw-table sheets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_value: Option<IndexValue>,
}

/// One named output sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub metadata: SheetMetadata,
}

impl Sheet {
    pub fn new(sheet_name: impl Into<String>, table: Table, metadata: SheetMetadata) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            columns: table.columns,
            rows: table.rows,
            metadata,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Cells of one column, in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<&CellValue>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| cell_at(row, idx)).collect())
    }
}

/// Output of the Output node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputResult {
    pub sheets: Vec<Sheet>,
    pub total_sheets: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_size_bytes: Option<u64>,
}

impl OutputResult {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.sheet_name == name)
    }
}

/// Serializable digest of a node's output. Whole tables are never carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeOutputSummary {
    IndexSource {
        index_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_column: Option<String>,
    },
    SheetSelector {
        sheet_name: String,
        rows: usize,
        total_rows: usize,
        columns: Vec<String>,
    },
    RowFilter {
        filtered_count: usize,
    },
    RowLookup {
        matched_count: usize,
    },
    Aggregator {
        column_name: String,
        operation: AggregationMethod,
        result_value: CellValue,
    },
    Output {
        total_sheets: usize,
    },
    /// The node legitimately produced nothing for this index value.
    Empty {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub node_kind: NodeKind,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeOutputSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub execution_time_ms: f64,
}

impl NodeExecutionResult {
    pub fn succeeded(
        node_id: impl Into<String>,
        node_kind: NodeKind,
        output: NodeOutputSummary,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_kind,
            success: true,
            output: Some(output),
            error: None,
            error_kind: None,
            execution_time_ms,
        }
    }

    pub fn failed(
        node_id: impl Into<String>,
        node_kind: NodeKind,
        error: &crate::error::Error,
        execution_time_ms: f64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_kind,
            success: false,
            output: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            execution_time_ms,
        }
    }
}

/// One index value's traversal of one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexExecutionResult {
    pub branch_id: String,
    pub index_value: IndexValue,
    pub success: bool,
    pub node_results: Vec<NodeExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub total_execution_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchExecutionResult {
    pub branch_id: String,
    pub index_source_node_id: String,
    pub success: bool,
    pub processed_indices: Vec<IndexValue>,
    pub final_aggregations: Vec<IndexAggregation>,
    /// Index values whose raw table was captured for output.
    pub raw_table_indices: Vec<IndexValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub indices_processed: usize,
    pub nodes_executed: usize,
    pub branches: usize,
    pub total_time_ms: f64,
    pub execution_mode: ExecutionMode,
}

/// Result of one pipeline run. Recoverable failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<OutputResult>,
    pub execution_summary: ExecutionSummary,
    pub index_results: Vec<IndexExecutionResult>,
    pub branch_results: Vec<BranchExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

impl PipelineExecutionResult {
    /// A failed run with no output.
    pub fn failure(
        error: &crate::error::Error,
        execution_mode: ExecutionMode,
        total_time_ms: f64,
    ) -> Self {
        Self {
            success: false,
            output_data: None,
            execution_summary: ExecutionSummary {
                indices_processed: 0,
                nodes_executed: 0,
                branches: 0,
                total_time_ms,
                execution_mode,
            },
            index_results: Vec::new(),
            branch_results: Vec::new(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            warnings: Vec::new(),
            output_file_path: None,
            output_file_size_bytes: None,
            metrics: None,
        }
    }

    pub fn branch(&self, branch_id: &str) -> Option<&BranchExecutionResult> {
        self.branch_results.iter().find(|b| b.branch_id == branch_id)
    }
}
