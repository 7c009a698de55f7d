//! The three execution-context tiers and their owner.
//!
//! - [`GlobalContext`]: one per run. File registry, table cache, execution
//!   mode, metrics and the injected reader. Shared read-only across branches.
//! - [`PathContext`]: one per (branch, index value). Carries the current table
//!   forward through a branch's nodes and is dropped afterwards.
//! - [`BranchContext`]: one per branch, alive for the whole run. Accumulates
//!   the branch's aggregation results across its index values.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::clean::SmartDataCleaner;
use crate::error::{Error, Result};
use crate::files::{CacheKey, TableCache, TableReader};
use crate::metrics::RunMetrics;
use crate::model::{
    AggregationResult, CellValue, DEFAULT_TEST_MODE_MAX_ROWS, ExecutionMode, FileDescriptor,
    IndexAggregation, IndexValue, Table, WorkspaceConfig,
};

// =============================================================================
// GlobalContext
// =============================================================================

/// Per-run state shared by every branch.
pub struct GlobalContext {
    files: FxHashMap<String, FileDescriptor>,
    table_cache: TableCache,
    execution_mode: ExecutionMode,
    test_mode_max_rows: usize,
    metrics: RunMetrics,
    reader: Arc<dyn TableReader>,
    cleaner: Option<SmartDataCleaner>,
}

impl GlobalContext {
    pub fn new(
        workspace: &WorkspaceConfig,
        execution_mode: ExecutionMode,
        reader: Arc<dyn TableReader>,
    ) -> Self {
        Self {
            files: workspace
                .files
                .iter()
                .map(|f| (f.id.clone(), f.clone()))
                .collect(),
            table_cache: TableCache::new(),
            execution_mode,
            test_mode_max_rows: DEFAULT_TEST_MODE_MAX_ROWS,
            metrics: RunMetrics::new(),
            reader,
            cleaner: None,
        }
    }

    pub fn with_test_mode_max_rows(mut self, max_rows: usize) -> Self {
        self.test_mode_max_rows = max_rows;
        self
    }

    /// Clean every table as it is read.
    pub fn with_cleaner(mut self, cleaner: SmartDataCleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn file(&self, file_id: &str) -> Option<&FileDescriptor> {
        self.files.get(file_id)
    }

    pub fn require_file(&self, file_id: &str) -> Result<&FileDescriptor> {
        self.file(file_id)
            .ok_or_else(|| Error::not_found(format!("file '{}' is not registered", file_id)))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    pub fn is_test_mode(&self) -> bool {
        self.execution_mode == ExecutionMode::Test
    }

    pub fn test_mode_max_rows(&self) -> usize {
        self.test_mode_max_rows
    }

    pub fn table_cache(&self) -> &TableCache {
        &self.table_cache
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Read a sheet through the injected reader and the cleaner, bypassing the
    /// cache and the read counters.
    pub fn read_sheet(&self, path: &Path, sheet_name: &str, header_row: usize) -> Result<Table> {
        let table = self.reader.read_table(path, sheet_name, header_row)?;
        Ok(match &self.cleaner {
            Some(cleaner) => cleaner.clean_table(&table).0,
            None => table,
        })
    }

    /// Get one sheet of a registered file, reading it on the first request only.
    pub fn load_table(&self, file_id: &str, sheet_name: &str) -> Result<Arc<Table>> {
        let file = self.require_file(file_id)?;
        let key = CacheKey::new(file_id, sheet_name);
        let (table, hit) = self.table_cache.get_or_load(&key, || {
            let start = Instant::now();
            let table = self.read_sheet(&file.path, sheet_name, file.header_row(sheet_name))?;
            self.metrics
                .record_table_read(table.row_count(), start.elapsed().as_secs_f64() * 1000.0);
            Ok(table)
        })?;
        if hit {
            self.metrics.record_cache_hit();
            tracing::debug!(key = %key, "Table cache hit");
        } else {
            self.metrics.record_cache_miss();
            tracing::debug!(key = %key, rows = table.row_count(), "Table cache miss");
        }
        Ok(table)
    }
}

// =============================================================================
// PathContext
// =============================================================================

/// State of one index value's walk through one branch.
#[derive(Debug, Clone, PartialEq)]
pub struct PathContext {
    pub current_index: IndexValue,
    pub current_table: Option<Arc<Table>>,
    /// Input of every Aggregator: aggregators never replace it.
    pub last_non_aggregator_table: Option<Arc<Table>>,
    pub execution_trace: Vec<String>,
}

impl PathContext {
    pub fn new(current_index: IndexValue) -> Self {
        Self {
            current_index,
            current_table: None,
            last_non_aggregator_table: None,
            execution_trace: Vec::new(),
        }
    }

    /// Install the table produced by a non-aggregator node.
    pub fn set_table(&mut self, table: Arc<Table>) {
        self.last_non_aggregator_table = Some(Arc::clone(&table));
        self.current_table = Some(table);
    }

    /// Append `"{node_id}: {action}"` to the trace.
    pub fn record_trace(&mut self, node_id: &str, action: &str) {
        self.execution_trace.push(format!("{}: {}", node_id, action));
    }
}

// =============================================================================
// BranchContext
// =============================================================================

/// Long-lived accumulator of one branch.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchContext {
    branch_id: String,
    index_source_node_id: String,
    /// One entry per index value, in the order values first produced a result.
    aggregations: Vec<IndexAggregation>,
    positions: FxHashMap<IndexValue, usize>,
    raw_tables: Vec<(IndexValue, Arc<Table>)>,
}

impl BranchContext {
    pub fn new(branch_id: impl Into<String>, index_source_node_id: impl Into<String>) -> Self {
        Self {
            branch_id: branch_id.into(),
            index_source_node_id: index_source_node_id.into(),
            aggregations: Vec::new(),
            positions: FxHashMap::default(),
            raw_tables: Vec::new(),
        }
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    pub fn index_source_node_id(&self) -> &str {
        &self.index_source_node_id
    }

    /// Store one aggregation scalar.
    ///
    /// Fails with a data error when the index value already has a result for
    /// the same output column. Nothing is overwritten: two aggregators sharing
    /// an `outputAs` column in one branch abort that index value instead of
    /// letting the later value win.
    pub fn add_aggregation_result(&mut self, result: AggregationResult) -> Result<()> {
        let position = match self.positions.get(&result.index_value) {
            Some(&pos) => pos,
            None => {
                self.aggregations.push(IndexAggregation {
                    index_value: result.index_value.clone(),
                    results: Vec::new(),
                });
                let pos = self.aggregations.len() - 1;
                self.positions.insert(result.index_value.clone(), pos);
                pos
            }
        };
        let entry = &mut self.aggregations[position];
        if entry.results.iter().any(|r| r.column_name == result.column_name) {
            return Err(Error::data(format!(
                "duplicate aggregation column '{}' for index '{}' in {}",
                result.column_name, result.index_value, self.branch_id
            )));
        }
        entry.results.push(result);
        Ok(())
    }

    /// Keep the final table of an index value for raw output.
    pub fn record_raw_table(&mut self, index_value: IndexValue, table: Arc<Table>) {
        match self.raw_tables.iter_mut().find(|(v, _)| *v == index_value) {
            Some((_, slot)) => *slot = table,
            None => self.raw_tables.push((index_value, table)),
        }
    }

    pub fn aggregation_results(&self) -> &[IndexAggregation] {
        &self.aggregations
    }

    pub fn has_aggregations(&self) -> bool {
        !self.aggregations.is_empty()
    }

    pub fn aggregation(&self, index_value: &IndexValue) -> Option<&IndexAggregation> {
        self.positions
            .get(index_value)
            .map(|&pos| &self.aggregations[pos])
    }

    /// One scalar, if the index value produced it.
    pub fn result(&self, index_value: &IndexValue, column_name: &str) -> Option<&CellValue> {
        self.aggregation(index_value)?.value(column_name)
    }

    /// Index values with at least one aggregation result.
    pub fn aggregated_indices(&self) -> Vec<IndexValue> {
        self.aggregations
            .iter()
            .map(|a| a.index_value.clone())
            .collect()
    }

    pub fn raw_tables(&self) -> &[(IndexValue, Arc<Table>)] {
        &self.raw_tables
    }
}

// =============================================================================
// ContextManager
// =============================================================================

/// Digest of one branch context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchContextSummary {
    pub branch_id: String,
    pub index_source_node_id: String,
    pub aggregation_count: usize,
    pub processed_indices: Vec<IndexValue>,
    pub raw_table_count: usize,
}

/// Digest of a [`ContextManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub execution_mode: ExecutionMode,
    pub registered_files: usize,
    pub cached_tables: usize,
    pub active_branch_count: usize,
    pub branches: Vec<BranchContextSummary>,
}

/// Owns a run's global context and every branch context.
///
/// One manager lives exactly as long as one run, so nothing leaks between runs.
pub struct ContextManager {
    global: Arc<GlobalContext>,
    branches: Vec<BranchContext>,
}

impl ContextManager {
    pub fn new(global: Arc<GlobalContext>) -> Self {
        Self {
            global,
            branches: Vec::new(),
        }
    }

    pub fn global(&self) -> &Arc<GlobalContext> {
        &self.global
    }

    pub fn create_path_context(&self, index_value: IndexValue) -> PathContext {
        PathContext::new(index_value)
    }

    /// Create the context of a branch, or return the existing one untouched.
    pub fn create_branch_context(
        &mut self,
        branch_id: &str,
        index_source_node_id: &str,
    ) -> &mut BranchContext {
        let position = match self.position(branch_id) {
            Some(pos) => pos,
            None => {
                self.branches
                    .push(BranchContext::new(branch_id, index_source_node_id));
                self.branches.len() - 1
            }
        };
        &mut self.branches[position]
    }

    fn position(&self, branch_id: &str) -> Option<usize> {
        self.branches.iter().position(|b| b.branch_id == branch_id)
    }

    pub fn get_branch_context(&self, branch_id: &str) -> Result<&BranchContext> {
        self.branches
            .iter()
            .find(|b| b.branch_id == branch_id)
            .ok_or_else(|| Error::not_found(format!("branch context '{}' not found", branch_id)))
    }

    /// Fetch a branch context, creating it when `index_source_node_id` is given.
    pub fn get_or_create_branch_context(
        &mut self,
        branch_id: &str,
        index_source_node_id: Option<&str>,
    ) -> Result<&mut BranchContext> {
        if let Some(pos) = self.position(branch_id) {
            return Ok(&mut self.branches[pos]);
        }
        let source = index_source_node_id.ok_or_else(|| {
            Error::configuration(format!(
                "index source node id required to create branch context '{}'",
                branch_id
            ))
        })?;
        Ok(self.create_branch_context(branch_id, source))
    }

    /// Take ownership of a context built elsewhere, such as on a branch worker.
    ///
    /// Fails if a context with the same id already exists.
    pub fn adopt_branch_context(&mut self, context: BranchContext) -> Result<()> {
        if self.position(&context.branch_id).is_some() {
            return Err(Error::execution(format!(
                "branch context '{}' already exists",
                context.branch_id
            )));
        }
        self.branches.push(context);
        Ok(())
    }

    /// Branch contexts in creation order.
    pub fn branch_contexts(&self) -> &[BranchContext] {
        &self.branches
    }

    /// Combine the aggregation results of several branches.
    ///
    /// Index values keep first-seen order across the listed branches. Unknown
    /// branch ids are skipped. Two branches producing the same column for the
    /// same index value is a data error.
    pub fn merge_branch_contexts<S: AsRef<str>>(
        &self,
        branch_ids: &[S],
    ) -> Result<Vec<IndexAggregation>> {
        let mut merged: Vec<IndexAggregation> = Vec::new();
        let mut positions: FxHashMap<&IndexValue, usize> = FxHashMap::default();

        for branch_id in branch_ids {
            let Ok(branch) = self.get_branch_context(branch_id.as_ref()) else {
                continue;
            };
            for aggregation in &branch.aggregations {
                let pos = *positions.entry(&aggregation.index_value).or_insert_with(|| {
                    merged.push(IndexAggregation {
                        index_value: aggregation.index_value.clone(),
                        results: Vec::new(),
                    });
                    merged.len() - 1
                });
                let target = &mut merged[pos];
                for result in &aggregation.results {
                    if target
                        .results
                        .iter()
                        .any(|r| r.column_name == result.column_name)
                    {
                        let ids: Vec<&str> = branch_ids.iter().map(AsRef::as_ref).collect();
                        return Err(Error::data(format!(
                            "duplicate aggregation column '{}' for index '{}' in branches [{}]",
                            result.column_name,
                            result.index_value,
                            ids.join(", ")
                        )));
                    }
                    target.results.push(result.clone());
                }
            }
        }
        Ok(merged)
    }

    /// Whether every listed branch aggregated the same set of index values.
    pub fn validate_aggregation_consistency<S: AsRef<str>>(&self, branch_ids: &[S]) -> bool {
        let Some((first, rest)) = branch_ids.split_first() else {
            return true;
        };
        let Ok(first) = self.get_branch_context(first.as_ref()) else {
            return false;
        };
        let mut expected = first.aggregated_indices();
        expected.sort();
        rest.iter().all(|id| match self.get_branch_context(id.as_ref()) {
            Ok(branch) => {
                let mut indices = branch.aggregated_indices();
                indices.sort();
                indices == expected
            }
            Err(_) => false,
        })
    }

    pub fn copy_path_context(&self, source: &PathContext) -> PathContext {
        source.clone()
    }

    pub fn record_trace(&self, path: &mut PathContext, node_id: &str, action: &str) {
        path.record_trace(node_id, action);
    }

    pub fn remove_branch_context(&mut self, branch_id: &str) -> Option<BranchContext> {
        let pos = self.position(branch_id)?;
        Some(self.branches.remove(pos))
    }

    /// Release every branch context and the cached tables.
    pub fn cleanup_branch_contexts(&mut self) -> Result<()> {
        let released = self.branches.len();
        self.branches.clear();
        self.global.table_cache().clear()?;
        tracing::debug!(branches = released, "Released execution contexts");
        Ok(())
    }

    pub fn active_branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn summary(&self) -> Result<ContextSummary> {
        Ok(ContextSummary {
            execution_mode: self.global.execution_mode(),
            registered_files: self.global.file_count(),
            cached_tables: self.global.table_cache().len()?,
            active_branch_count: self.branches.len(),
            branches: self
                .branches
                .iter()
                .map(|b| BranchContextSummary {
                    branch_id: b.branch_id.clone(),
                    index_source_node_id: b.index_source_node_id.clone(),
                    aggregation_count: b.aggregations.iter().map(|a| a.results.len()).sum(),
                    processed_indices: b.aggregated_indices(),
                    raw_table_count: b.raw_tables.len(),
                })
                .collect(),
        })
    }
}
