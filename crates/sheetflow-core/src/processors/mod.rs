//! Node processors.
//!
//! Each node kind has one processor implementing [`NodeProcessor`] with its own
//! config, input and output types. The [`ProcessorRegistry`] owns one instance
//! of each and dispatches on the typed [`NodeConfig`] union, so no processor
//! ever inspects the runtime type of another value.
//!
//! # Per-index inputs
//!
//! | Kind          | Input table                         |
//! |---------------|-------------------------------------|
//! | SheetSelector | none (reads through the cache)      |
//! | RowFilter     | `PathContext::current_table`        |
//! | RowLookup     | `PathContext::current_table`        |
//! | Aggregator    | `PathContext::last_non_aggregator_table` |
//!
//! IndexSource and Output run once per branch and once per run respectively,
//! outside the per-index loop.

mod aggregator;
mod index_source;
mod output;
mod row_filter;
mod row_lookup;
mod sheet_selector;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::execute::{BranchContext, GlobalContext, PathContext};
use crate::model::{IndexValue, Node, NodeConfig, NodeKind, NodeOutputSummary, Table, cell_at};

pub use aggregator::{AggregatorInput, AggregatorOutput, AggregatorProcessor, aggregate_column};
pub use index_source::{IndexSourceOutput, IndexSourceProcessor};
pub use output::{
    MAX_SHEET_NAME_LEN, OutputInput, OutputProcessor, sanitize_sheet_name, unique_sheet_name,
};
pub use row_filter::{RowFilterInput, RowFilterOutput, RowFilterProcessor};
pub use row_lookup::{RowLookupInput, RowLookupOutput, RowLookupProcessor};
pub use sheet_selector::{SheetSelectorInput, SheetSelectorOutput, SheetSelectorProcessor};

/// What a processor produced for one invocation.
///
/// `Empty` is a legitimate "nothing for this index value" and lets execution
/// continue; failures travel as `Err` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Produced(T),
    Empty(String),
}

impl<T> Outcome<T> {
    pub fn empty(reason: impl Into<String>) -> Self {
        Outcome::Empty(reason.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Outcome::Empty(_))
    }

    pub fn produced(self) -> Option<T> {
        match self {
            Outcome::Produced(value) => Some(value),
            Outcome::Empty(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Produced(value) => Outcome::Produced(f(value)),
            Outcome::Empty(reason) => Outcome::Empty(reason),
        }
    }
}

/// The contexts a processor may read. Only aggregators write, and only to
/// their own branch.
pub struct ProcessContext<'a> {
    pub global: &'a GlobalContext,
    pub path: &'a PathContext,
    pub branch: Option<&'a mut BranchContext>,
}

impl<'a> ProcessContext<'a> {
    pub fn new(global: &'a GlobalContext, path: &'a PathContext) -> Self {
        Self {
            global,
            path,
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: &'a mut BranchContext) -> Self {
        self.branch = Some(branch);
        self
    }
}

/// One node kind's processing contract.
pub trait NodeProcessor: Send + Sync {
    type Config;
    type Input<'a>;
    type Output;

    fn kind(&self) -> NodeKind;

    fn process(
        &self,
        node_id: &str,
        config: &Self::Config,
        input: Self::Input<'_>,
        ctx: ProcessContext<'_>,
    ) -> Result<Outcome<Self::Output>>;
}

/// Output of a node run inside the per-index loop.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    SheetSelector(SheetSelectorOutput),
    RowFilter(RowFilterOutput),
    RowLookup(RowLookupOutput),
    Aggregator(AggregatorOutput),
}

impl StepOutput {
    /// The table this step hands to the next node. Aggregators hand none.
    pub fn table(&self) -> Option<&Arc<Table>> {
        match self {
            StepOutput::SheetSelector(out) => Some(&out.table),
            StepOutput::RowFilter(out) => Some(&out.table),
            StepOutput::RowLookup(out) => Some(&out.table),
            StepOutput::Aggregator(_) => None,
        }
    }

    pub fn summary(&self) -> NodeOutputSummary {
        match self {
            StepOutput::SheetSelector(out) => NodeOutputSummary::SheetSelector {
                sheet_name: out.sheet_name.clone(),
                rows: out.table.row_count(),
                total_rows: out.table.total_rows,
                columns: out.table.columns.clone(),
            },
            StepOutput::RowFilter(out) => NodeOutputSummary::RowFilter {
                filtered_count: out.filtered_count,
            },
            StepOutput::RowLookup(out) => NodeOutputSummary::RowLookup {
                matched_count: out.matched_count,
            },
            StepOutput::Aggregator(out) => NodeOutputSummary::Aggregator {
                column_name: out.result.column_name.clone(),
                operation: out.result.operation,
                result_value: out.result.result_value.clone(),
            },
        }
    }
}

/// One processor per node kind, built once per executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessorRegistry {
    index_source: IndexSourceProcessor,
    sheet_selector: SheetSelectorProcessor,
    row_filter: RowFilterProcessor,
    row_lookup: RowLookupProcessor,
    aggregator: AggregatorProcessor,
    output: OutputProcessor,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kinds with a registered processor.
    pub fn kinds(&self) -> [NodeKind; 6] {
        [
            self.index_source.kind(),
            self.sheet_selector.kind(),
            self.row_filter.kind(),
            self.row_lookup.kind(),
            self.aggregator.kind(),
            self.output.kind(),
        ]
    }

    pub fn index_source(&self) -> &IndexSourceProcessor {
        &self.index_source
    }

    pub fn output(&self) -> &OutputProcessor {
        &self.output
    }

    /// Run one per-index node, taking its input from the path context.
    pub fn execute_step(
        &self,
        node: &Node,
        index_value: &IndexValue,
        global: &GlobalContext,
        path: &PathContext,
        branch: &mut BranchContext,
    ) -> Result<Outcome<StepOutput>> {
        let ctx = ProcessContext::new(global, path);
        match &node.config {
            NodeConfig::SheetSelector(config) => self
                .sheet_selector
                .process(&node.id, config, SheetSelectorInput { index_value }, ctx)
                .map(|o| o.map(StepOutput::SheetSelector)),
            NodeConfig::RowFilter(config) => {
                let table = current_table(node, path)?;
                self.row_filter
                    .process(&node.id, config, RowFilterInput { table, index_value }, ctx)
                    .map(|o| o.map(StepOutput::RowFilter))
            }
            NodeConfig::RowLookup(config) => {
                let table = current_table(node, path)?;
                self.row_lookup
                    .process(&node.id, config, RowLookupInput { table, index_value }, ctx)
                    .map(|o| o.map(StepOutput::RowLookup))
            }
            NodeConfig::Aggregator(config) => {
                let table = path
                    .last_non_aggregator_table
                    .clone()
                    .or_else(|| path.current_table.clone())
                    .ok_or_else(|| missing_input(node))?;
                self.aggregator
                    .process(
                        &node.id,
                        config,
                        AggregatorInput { table, index_value },
                        ctx.with_branch(branch),
                    )
                    .map(|o| o.map(StepOutput::Aggregator))
            }
            NodeConfig::IndexSource(_) | NodeConfig::Output(_) => Err(Error::execution(format!(
                "{} node '{}' cannot run per index value",
                node.kind(),
                node.id
            ))),
        }
    }
}

fn current_table(node: &Node, path: &PathContext) -> Result<Arc<Table>> {
    path.current_table.clone().ok_or_else(|| missing_input(node))
}

fn missing_input(node: &Node) -> Error {
    Error::data(format!(
        "no input table available for {} node '{}'",
        node.kind(),
        node.id
    ))
}

/// Cells of a column rendered as text; nulls stay `None`.
pub(crate) fn cell_texts(table: &Table, idx: usize) -> impl Iterator<Item = Option<String>> + '_ {
    table.rows.iter().map(move |row| {
        let cell = cell_at(row, idx);
        if cell.is_null() {
            None
        } else {
            Some(cell.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AggregationMethod, AggregationResult, CellValue};

    #[test]
    fn test_registry_covers_every_kind() {
        let kinds = ProcessorRegistry::new().kinds();
        for kind in [
            NodeKind::IndexSource,
            NodeKind::SheetSelector,
            NodeKind::RowFilter,
            NodeKind::RowLookup,
            NodeKind::Aggregator,
            NodeKind::Output,
        ] {
            assert!(kinds.contains(&kind));
        }
    }

    #[test]
    fn test_outcome_map() {
        let produced: Outcome<i32> = Outcome::Produced(2);
        assert_eq!(produced.map(|v| v * 2).produced(), Some(4));
        let empty: Outcome<i32> = Outcome::empty("no rows");
        assert!(empty.is_empty());
        assert_eq!(empty.map(|v| v * 2), Outcome::Empty("no rows".to_string()));
    }

    #[test]
    fn test_aggregator_step_has_no_table() {
        let step = StepOutput::Aggregator(AggregatorOutput {
            result: AggregationResult {
                index_value: IndexValue::new("East"),
                column_name: "sum_Amount".into(),
                operation: AggregationMethod::Sum,
                result_value: CellValue::Float(3.0),
            },
        });
        assert!(step.table().is_none());
        assert!(matches!(
            step.summary(),
            NodeOutputSummary::Aggregator { .. }
        ));
    }
}
