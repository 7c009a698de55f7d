//! RowFilter: keeps rows matching an ordered list of conditions.
//!
//! Conditions fold left to right: the first sets the mask, each later one
//! joins it with its own `logic`. A condition that cannot be evaluated
//! (unknown column, malformed list value) matches nothing instead of failing
//! the index value.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;

use super::{NodeProcessor, Outcome, ProcessContext};
use crate::error::Result;
use crate::model::{
    CellValue, FilterCondition, FilterOperator, IndexValue, Logic, NodeKind, RowFilterConfig,
    Table, cell_at,
};

#[derive(Debug, Clone)]
pub struct RowFilterInput<'a> {
    pub table: Arc<Table>,
    pub index_value: &'a IndexValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowFilterOutput {
    pub table: Arc<Table>,
    pub filtered_count: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RowFilterProcessor;

impl NodeProcessor for RowFilterProcessor {
    type Config = RowFilterConfig;
    type Input<'a> = RowFilterInput<'a>;
    type Output = RowFilterOutput;

    fn kind(&self) -> NodeKind {
        NodeKind::RowFilter
    }

    fn process(
        &self,
        node_id: &str,
        config: &RowFilterConfig,
        input: RowFilterInput<'_>,
        _ctx: ProcessContext<'_>,
    ) -> Result<Outcome<RowFilterOutput>> {
        let table = input.table;
        if config.conditions.is_empty() || table.is_empty() {
            let filtered_count = table.row_count();
            return Ok(Outcome::Produced(RowFilterOutput {
                table,
                filtered_count,
            }));
        }

        let mut mask: Option<Vec<bool>> = None;
        for condition in &config.conditions {
            let current = condition_mask(node_id, &table, condition);
            mask = Some(match mask {
                None => current,
                Some(prev) => prev
                    .iter()
                    .zip(current)
                    .map(|(&a, b)| match condition.logic {
                        Logic::And => a && b,
                        Logic::Or => a || b,
                    })
                    .collect(),
            });
        }
        let mask = mask.unwrap_or_default();
        let filtered = table.filter_rows(&mask);
        let filtered_count = filtered.row_count();

        tracing::debug!(
            node = node_id,
            index = %input.index_value,
            before = table.row_count(),
            after = filtered_count,
            "Filtered rows"
        );
        Ok(Outcome::Produced(RowFilterOutput {
            table: Arc::new(filtered),
            filtered_count,
        }))
    }
}

fn condition_mask(node_id: &str, table: &Table, condition: &FilterCondition) -> Vec<bool> {
    let rows = table.row_count();
    let Some(idx) = table.column_index(&condition.column) else {
        tracing::warn!(
            node = node_id,
            column = %condition.column,
            "Filter column not found; condition matches nothing"
        );
        return vec![false; rows];
    };

    let list = match condition.operator {
        FilterOperator::In | FilterOperator::NotIn => match condition.value.as_array() {
            Some(items) => Some(items.as_slice()),
            None => return unevaluable(node_id, condition, rows),
        },
        FilterOperator::Between => match condition.value.as_array() {
            Some(items) if items.len() == 2 => Some(items.as_slice()),
            _ => return unevaluable(node_id, condition, rows),
        },
        _ => None,
    };

    table
        .rows
        .iter()
        .map(|row| matches(cell_at(row, idx), condition.operator, &condition.value, list))
        .collect()
}

fn unevaluable(node_id: &str, condition: &FilterCondition, rows: usize) -> Vec<bool> {
    tracing::warn!(
        node = node_id,
        column = %condition.column,
        operator = ?condition.operator,
        "Filter value has the wrong shape; condition matches nothing"
    );
    vec![false; rows]
}

fn matches(cell: &CellValue, op: FilterOperator, value: &Value, list: Option<&[Value]>) -> bool {
    if cell.is_null() {
        return matches!(
            op,
            FilterOperator::IsNull
                | FilterOperator::Ne
                | FilterOperator::NotContains
                | FilterOperator::NotIn
        );
    }
    let text = cell.to_string();
    match op {
        FilterOperator::IsNull => false,
        FilterOperator::IsNotNull => true,
        FilterOperator::Eq => compare(cell, value) == Some(Ordering::Equal),
        FilterOperator::Ne => compare(cell, value) != Some(Ordering::Equal),
        FilterOperator::Gt => compare(cell, value) == Some(Ordering::Greater),
        FilterOperator::Ge => matches!(
            compare(cell, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::Lt => compare(cell, value) == Some(Ordering::Less),
        FilterOperator::Le => matches!(
            compare(cell, value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::Contains => text.contains(&value_text(value)),
        FilterOperator::NotContains => !text.contains(&value_text(value)),
        FilterOperator::StartsWith => text.starts_with(&value_text(value)),
        FilterOperator::EndsWith => text.ends_with(&value_text(value)),
        FilterOperator::In => list
            .unwrap_or_default()
            .iter()
            .any(|v| compare(cell, v) == Some(Ordering::Equal)),
        FilterOperator::NotIn => !list
            .unwrap_or_default()
            .iter()
            .any(|v| compare(cell, v) == Some(Ordering::Equal)),
        FilterOperator::Between => match list {
            Some([low, high]) => {
                matches!(
                    compare(cell, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(compare(cell, high), Some(Ordering::Less | Ordering::Equal))
            }
            _ => false,
        },
    }
}

/// Numeric when both sides coerce, otherwise by text.
fn compare(cell: &CellValue, value: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (cell_number(cell), value_number(value)) {
        return a.partial_cmp(&b);
    }
    Some(cell.to_string().as_str().cmp(value_text(value).as_str()))
}

fn cell_number(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Bool(_) => None,
        other => other.as_f64(),
    }
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::execute::{GlobalContext, PathContext};
    use crate::files::MemoryReader;
    use crate::model::{ExecutionMode, WorkspaceConfig};

    fn table() -> Arc<Table> {
        Arc::new(Table::from_rows(
            ["Rep", "Amount", "Note"],
            vec![
                vec![CellValue::text("ann"), CellValue::Int(10), CellValue::text("vip")],
                vec![CellValue::text("bob"), CellValue::Float(25.5), CellValue::Null],
                vec![CellValue::text("cat"), CellValue::text("40"), CellValue::text("new")],
                vec![CellValue::text("dan"), CellValue::Null, CellValue::text("vip new")],
            ],
        ))
    }

    fn cond(column: &str, operator: FilterOperator, value: Value, logic: Logic) -> FilterCondition {
        FilterCondition {
            column: column.into(),
            operator,
            value,
            logic,
        }
    }

    fn run(table: Arc<Table>, conditions: Vec<FilterCondition>) -> RowFilterOutput {
        let global = GlobalContext::new(
            &WorkspaceConfig::default(),
            ExecutionMode::Production,
            Arc::new(MemoryReader::new()),
        );
        let index = IndexValue::new("East");
        let path = PathContext::new(index.clone());
        let out = RowFilterProcessor
            .process(
                "flt",
                &RowFilterConfig { conditions },
                RowFilterInput {
                    table,
                    index_value: &index,
                },
                ProcessContext::new(&global, &path),
            )
            .unwrap()
            .produced()
            .unwrap();
        assert_eq!(out.filtered_count, out.table.row_count());
        out
    }

    fn reps(conditions: Vec<FilterCondition>) -> Vec<String> {
        run(table(), conditions)
            .table
            .column("Rep")
            .unwrap()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn test_numeric_comparison_with_text_cells() {
        let got = reps(vec![cond("Amount", FilterOperator::Gt, json!(20), Logic::And)]);
        assert_eq!(got, vec!["bob", "cat"]);
    }

    #[test]
    fn test_and_or_fold_left_to_right() {
        let got = reps(vec![
            cond("Amount", FilterOperator::Lt, json!("30"), Logic::And),
            cond("Note", FilterOperator::Contains, json!("vip"), Logic::And),
            cond("Rep", FilterOperator::Eq, json!("cat"), Logic::Or),
        ]);
        assert_eq!(got, vec!["ann", "cat"]);
    }

    #[test]
    fn test_null_handling() {
        assert_eq!(
            reps(vec![cond("Note", FilterOperator::IsNull, Value::Null, Logic::And)]),
            vec!["bob"]
        );
        assert_eq!(
            reps(vec![cond("Note", FilterOperator::NotContains, json!("new"), Logic::And)]),
            vec!["ann", "bob"]
        );
        assert_eq!(
            reps(vec![cond("Amount", FilterOperator::Ne, json!(10), Logic::And)]),
            vec!["bob", "cat", "dan"]
        );
    }

    #[test]
    fn test_in_and_between() {
        assert_eq!(
            reps(vec![cond("Rep", FilterOperator::In, json!(["ann", "dan"]), Logic::And)]),
            vec!["ann", "dan"]
        );
        assert_eq!(
            reps(vec![cond("Amount", FilterOperator::Between, json!([10, 30]), Logic::And)]),
            vec!["ann", "bob"]
        );
    }

    #[test]
    fn test_bad_condition_matches_nothing() {
        assert!(reps(vec![cond("Missing", FilterOperator::Eq, json!(1), Logic::And)]).is_empty());
        assert!(reps(vec![cond("Amount", FilterOperator::Between, json!(5), Logic::And)]).is_empty());
        // An OR after a broken condition still applies.
        assert_eq!(
            reps(vec![
                cond("Rep", FilterOperator::In, json!("ann"), Logic::And),
                cond("Rep", FilterOperator::StartsWith, json!("b"), Logic::Or),
            ]),
            vec!["bob"]
        );
    }

    #[test]
    fn test_no_conditions_keeps_table() {
        assert_eq!(reps(Vec::new()).len(), 4);
    }

    #[test]
    fn test_empty_table_keeps_columns() {
        let empty = Arc::new(Table::with_columns(vec!["Rep".into(), "Amount".into()]));
        let out = run(
            empty.clone(),
            vec![cond("Amount", FilterOperator::Gt, json!(1), Logic::And)],
        );
        assert_eq!(out.table.row_count(), 0);
        assert_eq!(out.table.columns, empty.columns);

        let out = run(
            empty,
            vec![cond("Missing", FilterOperator::Eq, json!(1), Logic::And)],
        );
        assert_eq!(out.filtered_count, 0);
        assert_eq!(out.table.columns, vec!["Rep", "Amount"]);
    }

    #[test]
    fn test_short_rows_compare_as_null() {
        let ragged = Arc::new(Table {
            columns: vec!["Rep".into(), "Note".into()],
            rows: vec![
                vec![CellValue::text("ann")],
                vec![CellValue::text("bob"), CellValue::text("vip")],
            ],
            total_rows: 2,
        });
        let out = run(
            ragged,
            vec![cond("Note", FilterOperator::IsNull, Value::Null, Logic::And)],
        );
        let got: Vec<String> = out.table.column("Rep").unwrap().map(|c| c.to_string()).collect();
        assert_eq!(got, vec!["ann"]);
    }
}
