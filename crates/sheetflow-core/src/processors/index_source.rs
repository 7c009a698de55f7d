//! IndexSource: the ordered set of values a branch iterates over.

use rustc_hash::FxHashSet;

use super::{NodeProcessor, Outcome, ProcessContext};
use crate::error::{Error, Result};
use crate::model::{IndexSourceConfig, IndexSourceMode, IndexValue, NodeKind, NodeOutputSummary};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSourceOutput {
    /// Unique values in first-seen order.
    pub index_values: Vec<IndexValue>,
    /// The column read, or `None` when values are sheet names.
    pub source_column: Option<String>,
}

impl IndexSourceOutput {
    pub fn summary(&self) -> NodeOutputSummary {
        NodeOutputSummary::IndexSource {
            index_count: self.index_values.len(),
            source_column: self.source_column.clone(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IndexSourceProcessor;

impl NodeProcessor for IndexSourceProcessor {
    type Config = IndexSourceConfig;
    type Input<'a> = ();
    type Output = IndexSourceOutput;

    fn kind(&self) -> NodeKind {
        NodeKind::IndexSource
    }

    fn process(
        &self,
        node_id: &str,
        config: &IndexSourceConfig,
        _input: (),
        ctx: ProcessContext<'_>,
    ) -> Result<Outcome<IndexSourceOutput>> {
        let global = ctx.global;
        let file = global.require_file(&config.source_file_id)?;

        let output = match &config.source {
            IndexSourceMode::SheetNames => IndexSourceOutput {
                index_values: unique(file.sheet_names().map(str::to_string)),
                source_column: None,
            },
            IndexSourceMode::Column {
                sheet_name,
                column_name,
            } => {
                let table = global.load_table(&file.id, sheet_name)?;
                let cells = table.column(column_name).ok_or_else(|| {
                    Error::data(format!(
                        "column '{}' not found in sheet '{}' of '{}'",
                        column_name, sheet_name, file.name
                    ))
                })?;
                let values = cells
                    .filter(|cell| !cell.is_null())
                    .map(|cell| cell.to_string());
                IndexSourceOutput {
                    index_values: unique(values),
                    source_column: Some(column_name.clone()),
                }
            }
        };

        tracing::debug!(
            node = node_id,
            count = output.index_values.len(),
            "Collected index values"
        );
        if output.index_values.is_empty() {
            return Ok(Outcome::empty(format!(
                "index source '{}' produced no values",
                node_id
            )));
        }
        Ok(Outcome::Produced(output))
    }
}

/// Drop blanks and repeats, keeping first occurrence order.
fn unique(values: impl Iterator<Item = String>) -> Vec<IndexValue> {
    let mut seen = FxHashSet::default();
    values
        .filter(|v| !v.trim().is_empty())
        .filter(|v| seen.insert(v.clone()))
        .map(IndexValue::new)
        .collect()
}
