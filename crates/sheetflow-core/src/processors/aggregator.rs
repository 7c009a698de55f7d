//! Aggregator: reduces one column of the upstream table to a scalar per
//! index value and records it in the branch context.

use std::sync::Arc;

use super::{NodeProcessor, Outcome, ProcessContext};
use crate::error::{Error, Result};
use crate::model::{
    AggregationMethod, AggregationResult, AggregatorConfig, CellValue, IndexValue, NodeKind,
    Table,
};

#[derive(Debug, Clone)]
pub struct AggregatorInput<'a> {
    /// The last non-aggregator table of the path.
    pub table: Arc<Table>,
    pub index_value: &'a IndexValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorOutput {
    pub result: AggregationResult,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AggregatorProcessor;

impl NodeProcessor for AggregatorProcessor {
    type Config = AggregatorConfig;
    type Input<'a> = AggregatorInput<'a>;
    type Output = AggregatorOutput;

    fn kind(&self) -> NodeKind {
        NodeKind::Aggregator
    }

    fn process(
        &self,
        node_id: &str,
        config: &AggregatorConfig,
        input: AggregatorInput<'_>,
        ctx: ProcessContext<'_>,
    ) -> Result<Outcome<AggregatorOutput>> {
        if input.table.is_empty() {
            return Ok(Outcome::empty(format!(
                "no rows to aggregate for '{}'",
                input.index_value
            )));
        }
        let value = aggregate_column(&input.table, &config.stat_column, config.method)?;
        let result = AggregationResult {
            index_value: input.index_value.clone(),
            column_name: config.output_as.clone(),
            operation: config.method,
            result_value: value,
        };

        let branch = ctx.branch.ok_or_else(|| {
            Error::execution(format!(
                "aggregator '{}' ran without a branch context",
                node_id
            ))
        })?;
        branch.add_aggregation_result(result.clone())?;

        tracing::debug!(
            node = node_id,
            index = %result.index_value,
            column = %result.column_name,
            value = %result.result_value,
            "Aggregated"
        );
        Ok(Outcome::Produced(AggregatorOutput { result }))
    }
}

/// Reduce `column` of `table` with `method`.
///
/// `sum`/`avg` skip cells that are not numeric and give `Null` when none are.
/// `min`/`max` compare numerically when any cell is numeric, otherwise as text.
pub fn aggregate_column(
    table: &Table,
    column: &str,
    method: AggregationMethod,
) -> Result<CellValue> {
    let cells: Vec<&CellValue> = table
        .column(column)
        .ok_or_else(|| Error::data(format!("aggregation column '{}' not found", column)))?
        .filter(|cell| !cell.is_null())
        .collect();
    let numbers: Vec<f64> = cells.iter().filter_map(|c| number(c)).collect();

    let value = match method {
        AggregationMethod::Count => CellValue::Int(cells.len() as i64),
        AggregationMethod::Sum if numbers.is_empty() => CellValue::Null,
        AggregationMethod::Sum => CellValue::Float(numbers.iter().sum()),
        AggregationMethod::Avg if numbers.is_empty() => CellValue::Null,
        AggregationMethod::Avg => {
            CellValue::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
        }
        AggregationMethod::Min | AggregationMethod::Max => {
            extreme(&cells, &numbers, method == AggregationMethod::Max)
        }
        AggregationMethod::First => cells.first().map(|c| (*c).clone()).unwrap_or_default(),
        AggregationMethod::Last => cells.last().map(|c| (*c).clone()).unwrap_or_default(),
    };
    Ok(value)
}

fn number(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Bool(_) => None,
        other => other.as_f64(),
    }
}

fn extreme(cells: &[&CellValue], numbers: &[f64], max: bool) -> CellValue {
    if !numbers.is_empty() {
        let pick: fn(f64, f64) -> f64 = if max { f64::max } else { f64::min };
        let first = numbers[0];
        return CellValue::Float(numbers[1..].iter().copied().fold(first, pick));
    }
    let texts = cells.iter().map(|c| c.to_string());
    let found = if max { texts.max() } else { texts.min() };
    found.map(CellValue::Text).unwrap_or_default()
}
