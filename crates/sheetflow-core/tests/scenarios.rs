//! End-to-end runs against an in-memory reader.

use std::sync::Arc;

use serde_json::{Value, json};
use sheetflow_core::files::{MemoryReader, MemoryWriter};
use sheetflow_core::model::{
    CellValue, ExecutePipelineRequest, ExecutionMode, ExecutorConfig, NodeOutputSummary,
    PipelineExecutionResult, SheetKind, Table, WorkspaceConfig,
};
use sheetflow_core::{IndexValue, PathAnalyzer, PipelineExecutor};

fn amounts(values: &[i64]) -> Table {
    Table::from_rows(
        ["Rep", "Amount"],
        values
            .iter()
            .enumerate()
            .map(|(i, v)| vec![CellValue::text(format!("rep{}", i)), CellValue::Int(*v)]),
    )
}

fn reader() -> MemoryReader {
    MemoryReader::new()
        .with_sheet(
            "regions.xlsx",
            "List",
            Table::from_rows(
                ["Region"],
                vec![vec!["East"], vec!["West"], vec!["East"], vec!["North"]],
            ),
        )
        .with_sheet("sales.xlsx", "East", amounts(&[10, 5]))
        .with_sheet("sales.xlsx", "West", amounts(&[7]))
        .with_sheet("other.xlsx", "p", amounts(&[1]))
        .with_sheet("other.xlsx", "q", amounts(&[2, 2]))
        .with_sheet("other.xlsx", "r", amounts(&[4, 4, 4]))
        .with_sheet(
            "orders.xlsx",
            "Orders",
            Table::from_rows(
                ["Region", "Amount"],
                vec![
                    vec![CellValue::text("East"), CellValue::Int(3)],
                    vec![CellValue::text("East"), CellValue::Int(8)],
                    vec![CellValue::text("West"), CellValue::Int(9)],
                    vec![CellValue::text("east"), CellValue::Int(20)],
                ],
            ),
        )
}

fn files() -> Value {
    json!([
        {"id": "regions", "name": "Regions", "path": "regions.xlsx",
         "sheet_metas": [{"sheet_name": "List"}]},
        {"id": "sales", "name": "Sales", "path": "sales.xlsx",
         "sheet_metas": [{"sheet_name": "East"}, {"sheet_name": "West"}]},
        {"id": "other", "name": "Other", "path": "other.xlsx",
         "sheet_metas": [{"sheet_name": "p"}, {"sheet_name": "q"}, {"sheet_name": "r"}]},
        {"id": "orders", "name": "Orders", "path": "orders.xlsx",
         "sheet_metas": [{"sheet_name": "Orders"}]}
    ])
}

fn region_source(id: &str) -> Value {
    json!({"id": id, "type": "indexSource", "data": {
        "sourceFileID": "regions", "byColumn": true, "sheetName": "List",
        "columnName": "Region", "displayName": "Regions"
    }})
}

fn auto_selector(id: &str, file: &str) -> Value {
    json!({"id": id, "type": "sheetSelector", "data": {"targetFileID": file, "mode": "auto_by_index"}})
}

fn aggregator(id: &str, method: &str, output_as: &str) -> Value {
    json!({"id": id, "type": "aggregator", "data": {
        "statColumn": "Amount", "method": method, "outputAs": output_as
    }})
}

fn edge(source: &str, target: &str) -> Value {
    json!({"source": source, "target": target})
}

fn workspace(nodes: Vec<Value>, edges: Vec<Value>) -> WorkspaceConfig {
    WorkspaceConfig::from_value(json!({
        "id": "ws", "name": "scenarios", "files": files(),
        "flow_nodes": nodes, "flow_edges": edges
    }))
    .unwrap()
}

fn output() -> Value {
    json!({"id": "out", "type": "output", "data": {"indexColumnName": "Region"}})
}

fn run_with(config: ExecutorConfig, request: ExecutePipelineRequest) -> PipelineExecutionResult {
    PipelineExecutor::new(config, Arc::new(reader())).execute_pipeline(&request)
}

fn run(workspace: WorkspaceConfig) -> PipelineExecutionResult {
    run_with(
        ExecutorConfig::default(),
        ExecutePipelineRequest::new(workspace, "out"),
    )
}

/// Region -> sales sheet per region -> sum(Amount) -> output.
fn single_branch(sheets: Value) -> WorkspaceConfig {
    let mut ws = workspace(
        vec![
            region_source("src"),
            auto_selector("sel", "sales"),
            aggregator("agg", "sum", "total"),
            output(),
        ],
        vec![edge("src", "sel"), edge("sel", "agg"), edge("agg", "out")],
    );
    ws.files[1].sheet_metas = serde_json::from_value(sheets).unwrap();
    ws
}

#[test]
fn test_scenario_a_sum_per_region() {
    let ws = single_branch(json!([{"sheet_name": "East"}, {"sheet_name": "West"}]));
    let reader = MemoryReader::new()
        .with_sheet(
            "regions.xlsx",
            "List",
            Table::from_rows(["Region"], vec![vec!["East"], vec!["West"]]),
        )
        .with_sheet("sales.xlsx", "East", amounts(&[10, 5]))
        .with_sheet("sales.xlsx", "West", amounts(&[7]));
    let result = PipelineExecutor::new(ExecutorConfig::default(), Arc::new(reader))
        .execute_pipeline(&ExecutePipelineRequest::new(ws, "out"));

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.execution_summary.indices_processed, 2);
    let branch = result.branch("branch_0").unwrap();
    assert_eq!(branch.final_aggregations.len(), 2);

    let output = result.output_data.unwrap();
    assert_eq!(output.total_sheets, 1);
    let sheet = output.sheet("0-Regions").unwrap();
    assert_eq!(sheet.row_count(), 2);
    assert_eq!(
        sheet.column_values("Region").unwrap(),
        vec![&CellValue::text("East"), &CellValue::text("West")]
    );
    assert_eq!(
        sheet.column_values("total").unwrap(),
        vec![&CellValue::Float(15.0), &CellValue::Float(7.0)]
    );
}

#[test]
fn test_scenario_b_independent_branches() {
    let ws = workspace(
        vec![
            json!({"id": "src_a", "type": "indexSource", "data": {
                "sourceFileID": "other", "byColumn": false, "displayName": "Letters"}}),
            auto_selector("sel_a", "other"),
            aggregator("agg_a", "count", "n"),
            json!({"id": "src_b", "type": "indexSource", "data": {
                "sourceFileID": "sales", "byColumn": false, "label": "Regions"}}),
            auto_selector("sel_b", "sales"),
            aggregator("agg_b", "count", "n"),
            output(),
        ],
        vec![
            edge("src_a", "sel_a"),
            edge("sel_a", "agg_a"),
            edge("agg_a", "out"),
            edge("src_b", "sel_b"),
            edge("sel_b", "agg_b"),
            edge("agg_b", "out"),
        ],
    );

    let analysis = PathAnalyzer::new()
        .analyze(&ws.nodes, &ws.edges, "out")
        .unwrap();
    assert_eq!(analysis.branches.len(), 2);
    let out = analysis.multi_input("out").unwrap();
    assert_eq!(out.input_branches, vec!["branch_0", "branch_1"]);

    let result = run(ws);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.execution_summary.indices_processed, 5);

    let output = result.output_data.as_ref().unwrap();
    assert_eq!(output.total_sheets, 2);
    let letters = output.sheet("0-Letters").unwrap();
    assert_eq!(letters.row_count(), 3);
    assert_eq!(
        letters.column_values("n").unwrap(),
        vec![&CellValue::Int(1), &CellValue::Int(2), &CellValue::Int(3)]
    );
    assert_eq!(output.sheet("1-Regions").unwrap().row_count(), 2);
    let a = result.branch("branch_0").unwrap();
    assert_eq!(a.processed_indices.len(), 3);
}

#[test]
fn test_scenario_c_missing_sheet_skips_one_index() {
    let result = run(single_branch(
        json!([{"sheet_name": "East"}, {"sheet_name": "West"}]),
    ));
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.execution_summary.indices_processed, 3);

    let branch = result.branch("branch_0").unwrap();
    let aggregated: Vec<&str> = branch
        .final_aggregations
        .iter()
        .map(|a| a.index_value.as_str())
        .collect();
    assert_eq!(aggregated, vec!["East", "West"]);

    let north = result
        .index_results
        .iter()
        .find(|r| r.index_value == IndexValue::new("North"))
        .unwrap();
    assert!(north.success);
    assert!(matches!(
        north.node_results[0].output,
        Some(NodeOutputSummary::Empty { .. })
    ));

    let sheet = result.output_data.unwrap().sheets.remove(0);
    assert_eq!(sheet.row_count(), 2);
}

#[test]
fn test_scenario_d_chained_aggregators_share_input() {
    let mut ws = workspace(
        vec![
            region_source("src"),
            auto_selector("sel", "sales"),
            aggregator("sum", "sum", "total"),
            aggregator("avg", "avg", "mean"),
            output(),
        ],
        vec![
            edge("src", "sel"),
            edge("sel", "sum"),
            edge("sum", "avg"),
            edge("avg", "out"),
        ],
    );
    ws.files[1].sheet_metas.truncate(1);

    let result = run(ws);
    assert!(result.success, "{:?}", result.error);
    let sheet = result.output_data.unwrap().sheets.remove(0);
    assert_eq!(sheet.columns, vec!["Region", "total", "mean"]);
    assert_eq!(sheet.row_count(), 1);
    assert_eq!(sheet.rows[0][1], CellValue::Float(15.0));
    assert_eq!(sheet.rows[0][2], CellValue::Float(7.5));
}

#[test]
fn test_lookup_and_filter_chain() {
    let ws = workspace(
        vec![
            region_source("src"),
            json!({"id": "sel", "type": "sheetSelector", "data": {
                "targetFileID": "orders", "mode": "manual", "manualSheetName": "Orders"}}),
            json!({"id": "lookup", "type": "rowLookup", "data": {
                "matchColumn": "Region", "matchMode": "exact", "caseSensitive": false}}),
            json!({"id": "filter", "type": "rowFilter", "data": {"conditions": [
                {"column": "Amount", "operator": ">", "value": 5}
            ]}}),
            aggregator("agg", "count", "big_orders"),
            output(),
        ],
        vec![
            edge("src", "sel"),
            edge("sel", "lookup"),
            edge("lookup", "filter"),
            edge("filter", "agg"),
            edge("agg", "out"),
        ],
    );

    let result = run(ws);
    assert!(result.success, "{:?}", result.error);
    let sheet = result.output_data.unwrap().sheets.remove(0);
    assert_eq!(
        sheet.column_values("big_orders").unwrap(),
        vec![&CellValue::Int(2), &CellValue::Int(1)]
    );
    // North matches nothing, so it reaches the aggregator with no rows.
    let north = result
        .index_results
        .iter()
        .find(|r| r.index_value.as_str() == "North")
        .unwrap();
    assert!(north.success);
}

#[test]
fn test_parallel_branches_keep_discovery_order() {
    let ws = workspace(
        vec![
            json!({"id": "src_a", "type": "indexSource", "data": {
                "sourceFileID": "other", "byColumn": false, "displayName": "Letters"}}),
            auto_selector("sel_a", "other"),
            aggregator("agg_a", "sum", "total"),
            region_source("src_b"),
            auto_selector("sel_b", "sales"),
            aggregator("agg_b", "sum", "total"),
            output(),
        ],
        vec![
            edge("src_a", "sel_a"),
            edge("sel_a", "agg_a"),
            edge("agg_a", "out"),
            edge("src_b", "sel_b"),
            edge("sel_b", "agg_b"),
            edge("agg_b", "out"),
        ],
    );
    let config = ExecutorConfig {
        parallel_branches: true,
        ..Default::default()
    };
    let sequential = run(ws.clone());
    let parallel = run_with(config, ExecutePipelineRequest::new(ws, "out"));

    assert!(parallel.success, "{:?}", parallel.error);
    let names = |r: &PipelineExecutionResult| -> Vec<String> {
        r.output_data
            .as_ref()
            .unwrap()
            .sheets
            .iter()
            .map(|s| s.sheet_name.clone())
            .collect()
    };
    assert_eq!(names(&parallel), vec!["0-Letters", "1-Regions"]);
    assert_eq!(names(&parallel), names(&sequential));
    assert_eq!(
        parallel.output_data.as_ref().unwrap().sheets,
        sequential.output_data.as_ref().unwrap().sheets
    );
    let ids: Vec<&str> = parallel
        .branch_results
        .iter()
        .map(|b| b.branch_id.as_str())
        .collect();
    assert_eq!(ids, vec!["branch_0", "branch_1"]);
}

#[test]
fn test_test_mode_limits_rows_and_skips_write() {
    let mut ws = workspace(
        vec![
            region_source("src"),
            auto_selector("sel", "orders"),
            json!({"id": "out", "type": "output", "data": {"outputPath": "report.xlsx"}}),
        ],
        vec![edge("src", "sel"), edge("sel", "out")],
    );
    ws.files[3].sheet_metas = serde_json::from_value(json!([{"sheet_name": "East"}])).unwrap();
    let reader = MemoryReader::new()
        .with_sheet(
            "regions.xlsx",
            "List",
            Table::from_rows(["Region"], vec![vec!["East"]]),
        )
        .with_sheet("orders.xlsx", "East", amounts(&[1, 2, 3, 4, 5]));
    let writer = Arc::new(MemoryWriter::new());
    let executor = PipelineExecutor::new(ExecutorConfig::default(), Arc::new(reader))
        .with_writer(writer.clone());

    let request = ExecutePipelineRequest::new(ws.clone(), "out")
        .with_mode(ExecutionMode::Test)
        .with_test_mode_max_rows(2);
    let result = executor.execute_pipeline(&request);
    assert!(result.success, "{:?}", result.error);
    assert_eq!(writer.write_count(), 0);

    let summary = result.index_results[0].node_results[0].output.clone().unwrap();
    assert!(matches!(
        summary,
        NodeOutputSummary::SheetSelector { rows: 2, total_rows: 5, .. }
    ));
    let sheet = result.output_data.unwrap().sheets.remove(0);
    assert_eq!(sheet.sheet_name, "Regions-East");
    assert_eq!(sheet.metadata.kind, SheetKind::Raw);
    assert_eq!(sheet.row_count(), 2);

    let result = executor.execute_pipeline(&ExecutePipelineRequest::new(ws, "out"));
    assert!(result.success);
    assert_eq!(writer.write_count(), 1);
    assert_eq!(result.output_data.unwrap().sheets[0].row_count(), 5);
}

#[test]
fn test_every_branch_empty_fails_run() {
    let ws = workspace(
        vec![
            json!({"id": "src", "type": "indexSource", "data": {
                "sourceFileID": "regions", "sheetName": "List", "columnName": "Missing"}}),
            output(),
        ],
        vec![edge("src", "out")],
    );
    let result = run(ws);
    assert!(!result.success);
    assert!(result.output_data.is_none());
    assert!(result.error.is_some());
}
