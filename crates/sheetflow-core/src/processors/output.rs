//! Output: turns branch contexts into named sheets and optionally writes them.
//!
//! Per branch, in discovery order:
//!
//! - aggregations present: one sheet, one row per index value, one column per
//!   distinct output column (gaps are null);
//! - only raw tables: one sheet per index value;
//! - neither: one empty sheet.
//!
//! Branches that converge before the Output node are combined into a single
//! merged sheet, emitted where the group's first branch would be.

use std::collections::HashSet;
use std::hash::BuildHasher;
use std::path::PathBuf;

use rustc_hash::FxHashSet;

use super::{NodeProcessor, Outcome, ProcessContext};
use crate::error::Result;
use crate::execute::{BranchContext, ContextManager};
use crate::files::WorkbookWriter;
use crate::graph::{ExecutionBranch, PathAnalysis};
use crate::model::{
    CellValue, IndexAggregation, NodeConfig, NodeKind, OutputConfig, OutputResult, Sheet,
    SheetKind, SheetMetadata, Table, WorkspaceConfig,
};

/// Longest sheet name a workbook accepts.
pub const MAX_SHEET_NAME_LEN: usize = 31;

const FALLBACK_SHEET_NAME: &str = "Sheet";

pub struct OutputInput<'a> {
    pub workspace: &'a WorkspaceConfig,
    pub analysis: &'a PathAnalysis,
    pub contexts: &'a ContextManager,
    /// Overrides the node's configured path.
    pub output_path: Option<PathBuf>,
    pub writer: Option<&'a dyn WorkbookWriter>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OutputProcessor;

impl NodeProcessor for OutputProcessor {
    type Config = OutputConfig;
    type Input<'a> = OutputInput<'a>;
    type Output = OutputResult;

    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    fn process(
        &self,
        node_id: &str,
        config: &OutputConfig,
        input: OutputInput<'_>,
        ctx: ProcessContext<'_>,
    ) -> Result<Outcome<OutputResult>> {
        let mut builder = SheetBuilder::new(config);
        let groups = input.analysis.merge_groups();
        let grouped: FxHashSet<&str> = groups
            .iter()
            .flat_map(|(_, members)| members.iter().map(String::as_str))
            .collect();

        for branch in &input.analysis.branches {
            if grouped.contains(branch.branch_id.as_str()) {
                let leading = groups
                    .iter()
                    .find(|(_, members)| members.first() == Some(&branch.branch_id));
                if let Some((_, members)) = leading {
                    builder.merged(&input, members)?;
                }
                continue;
            }
            let Ok(context) = input.contexts.get_branch_context(&branch.branch_id) else {
                tracing::debug!(branch = %branch.branch_id, "No context for branch; no sheet");
                continue;
            };
            let display = display_name(input.workspace, branch);
            builder.branch(branch, &display, context);
        }

        let sheets = builder.finish();
        let mut result = OutputResult {
            total_sheets: sheets.len(),
            sheets,
            ..Default::default()
        };

        let path = input.output_path.or_else(|| config.output_path.clone());
        match (path, input.writer) {
            _ if ctx.global.is_test_mode() => {
                tracing::debug!(node = node_id, "Test mode; output file not written");
            }
            (Some(path), Some(writer)) => {
                let size = writer.write_workbook(&path, &result.sheets)?;
                tracing::info!(
                    path = %path.display(),
                    sheets = result.total_sheets,
                    bytes = size,
                    "Wrote output workbook"
                );
                result.output_file_path = Some(path);
                result.output_file_size_bytes = Some(size);
            }
            (Some(path), None) => {
                tracing::warn!(
                    path = %path.display(),
                    "No workbook writer configured; output file not written"
                );
            }
            (None, _) => {}
        }

        Ok(Outcome::Produced(result))
    }
}

/// Display name of a branch: the IndexSource's display name, else its id.
fn display_name(workspace: &WorkspaceConfig, branch: &ExecutionBranch) -> String {
    match workspace.node(&branch.index_source_id).map(|n| &n.config) {
        Some(NodeConfig::IndexSource(config)) => config
            .display_name
            .clone()
            .unwrap_or_else(|| branch.index_source_id.clone()),
        _ => branch.index_source_id.clone(),
    }
}

struct SheetBuilder<'c> {
    config: &'c OutputConfig,
    sheets: Vec<Sheet>,
    used: FxHashSet<String>,
}

impl<'c> SheetBuilder<'c> {
    fn new(config: &'c OutputConfig) -> Self {
        Self {
            config,
            sheets: Vec::new(),
            used: FxHashSet::default(),
        }
    }

    fn branch(&mut self, branch: &ExecutionBranch, display: &str, context: &BranchContext) {
        let branch_ids = vec![branch.branch_id.clone()];
        if context.has_aggregations() {
            let table = self.aggregation_table(context.aggregation_results());
            self.push(
                format!("{}-{}", branch.number(), display),
                table,
                metadata(SheetKind::Aggregated, branch_ids, display),
            );
        } else if !context.raw_tables().is_empty() {
            for (index_value, table) in context.raw_tables() {
                let mut meta = metadata(SheetKind::Raw, branch_ids.clone(), display);
                meta.index_value = Some(index_value.clone());
                self.push(
                    format!("{}-{}", display, index_value),
                    (**table).clone(),
                    meta,
                );
            }
        } else {
            self.push(
                format!("{}-{}", branch.number(), display),
                self.empty_table(),
                metadata(SheetKind::Empty, branch_ids, display),
            );
        }
    }

    fn merged(&mut self, input: &OutputInput<'_>, members: &[String]) -> Result<()> {
        let aggregations = input.contexts.merge_branch_contexts(members)?;
        let mut displays = Vec::with_capacity(members.len());
        let mut first_number = 0;
        for (i, id) in members.iter().enumerate() {
            if let Some(branch) = input.analysis.branch(id) {
                if i == 0 {
                    first_number = branch.number();
                }
                displays.push(display_name(input.workspace, branch));
            }
        }
        let display = displays.join("+");
        let name = format!("{}-{}", first_number, display);

        if !input.contexts.validate_aggregation_consistency(members) {
            tracing::debug!(
                branches = ?members,
                "Merged branches cover different index values; gaps are null"
            );
        }
        let (kind, table) = if aggregations.is_empty() {
            (SheetKind::Empty, self.empty_table())
        } else {
            (SheetKind::Merged, self.aggregation_table(&aggregations))
        };
        self.push(name, table, metadata(kind, members.to_vec(), &display));
        Ok(())
    }

    fn aggregation_table(&self, aggregations: &[IndexAggregation]) -> Table {
        let mut value_columns: Vec<&str> = Vec::new();
        for aggregation in aggregations {
            for result in &aggregation.results {
                if !value_columns.contains(&result.column_name.as_str()) {
                    value_columns.push(&result.column_name);
                }
            }
        }

        let include_index = self.config.include_index_column;
        let mut columns = Vec::with_capacity(value_columns.len() + 1);
        if include_index {
            columns.push(self.config.index_column_name.clone());
        }
        columns.extend(value_columns.iter().map(|c| c.to_string()));

        let rows = aggregations
            .iter()
            .map(|aggregation| {
                let mut row = Vec::with_capacity(columns.len());
                if include_index {
                    row.push(CellValue::text(aggregation.index_value.as_str()));
                }
                row.extend(
                    value_columns
                        .iter()
                        .map(|c| aggregation.value(c).cloned().unwrap_or_default()),
                );
                row
            })
            .collect();
        Table::new(columns, rows)
    }

    fn empty_table(&self) -> Table {
        if self.config.include_index_column {
            Table::with_columns(vec![self.config.index_column_name.clone()])
        } else {
            Table::empty()
        }
    }

    fn push(&mut self, name: String, table: Table, meta: SheetMetadata) {
        let name = unique_sheet_name(&sanitize_sheet_name(&name), &self.used);
        self.used.insert(name.clone());
        self.sheets.push(Sheet::new(name, table, meta));
    }

    fn finish(self) -> Vec<Sheet> {
        self.sheets
    }
}

fn metadata(kind: SheetKind, branch_ids: Vec<String>, display: &str) -> SheetMetadata {
    SheetMetadata {
        kind,
        branch_ids,
        source_name: display.to_string(),
        index_value: None,
    }
}

/// Make `name` acceptable as a sheet name.
///
/// Strips `\ / ? * [ ]`, trims surrounding single quotes, truncates to
/// [`MAX_SHEET_NAME_LEN`] characters, and falls back to `"Sheet"` when
/// nothing is left.
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '?' | '*' | '[' | ']'))
        .collect();
    let truncated: String = cleaned
        .trim()
        .trim_matches('\'')
        .chars()
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    if truncated.trim().is_empty() {
        FALLBACK_SHEET_NAME.to_string()
    } else {
        truncated
    }
}

/// `base`, or `base_2`, `base_3`, ... with the stem shortened so the
/// suffixed name still fits in [`MAX_SHEET_NAME_LEN`] characters.
pub fn unique_sheet_name<S: BuildHasher>(base: &str, used: &HashSet<String, S>) -> String {
    if !used.contains(base) {
        return base.to_string();
    }
    (2usize..)
        .map(|k| {
            let suffix = format!("_{}", k);
            let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
            let stem: String = base.chars().take(keep).collect();
            format!("{}{}", stem, suffix)
        })
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}
