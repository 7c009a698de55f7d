//! Terminal rendering of analyses and run results.

use sheetflow_core::PathAnalysis;
use sheetflow_core::model::PipelineExecutionResult;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";

pub fn print_analysis(analysis: &PathAnalysis) {
    for line in analysis_lines(analysis) {
        println!("{}", line);
    }
}

fn analysis_lines(analysis: &PathAnalysis) -> Vec<String> {
    let mut lines = vec![format!(
        "{BOLD}{} branch(es) reach '{}'{RESET}",
        analysis.branches.len(),
        analysis.target_node_id
    )];
    for branch in &analysis.branches {
        let merge = match &branch.merge_node_id {
            Some(node) if node != &branch.target_node_id => format!(" {DIM}(merges at {node}){RESET}"),
            _ => String::new(),
        };
        lines.push(format!(
            "  {}: {}{}",
            branch.branch_id,
            branch.execution_nodes.join(" -> "),
            merge
        ));
    }
    for node in &analysis.multi_input_nodes {
        lines.push(format!(
            "  {DIM}{} ({}) joins {}{RESET}",
            node.node_id,
            node.node_kind,
            node.input_branches.join(", ")
        ));
    }
    lines
}

pub fn print_result(result: &PipelineExecutionResult) {
    let summary = &result.execution_summary;
    if !result.success {
        println!(
            "{RED}Failed{RESET}: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }

    if let Some(output) = &result.output_data {
        for sheet in &output.sheets {
            println!(
                "  {BOLD}{}{RESET} {DIM}{} rows x {} columns{RESET}",
                sheet.sheet_name,
                sheet.row_count(),
                sheet.columns.len()
            );
        }
    }
    for warning in &result.warnings {
        println!("  {YELLOW}warning{RESET}: {}", warning);
    }
    if let Some(path) = &result.output_file_path {
        println!("Wrote {}", path.display());
    }
    println!(
        "{GREEN}Completed{RESET} {} branch(es), {} index value(s), {} node run(s) in {:.1}ms",
        summary.branches, summary.indices_processed, summary.nodes_executed, summary.total_time_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetflow_core::ExecutionBranch;
    use sheetflow_core::graph::MultiInputNodeInfo;
    use sheetflow_core::model::NodeKind;

    #[test]
    fn test_analysis_lines() {
        let branch = |id: &str, src: &str| ExecutionBranch {
            branch_id: id.into(),
            index_source_id: src.into(),
            execution_nodes: vec![src.into(), "join".into(), "out".into()],
            merge_node_id: Some("join".into()),
            target_node_id: "out".into(),
        };
        let analysis = PathAnalysis {
            target_node_id: "out".into(),
            branches: vec![branch("branch_0", "a"), branch("branch_1", "b")],
            multi_input_nodes: vec![MultiInputNodeInfo {
                node_id: "join".into(),
                input_branches: vec!["branch_0".into(), "branch_1".into()],
                node_kind: NodeKind::Aggregator,
            }],
        };

        let lines = analysis_lines(&analysis);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("2 branch(es) reach 'out'"));
        assert!(lines[1].contains("branch_0: a -> join -> out"));
        assert!(lines[1].contains("merges at join"));
        assert!(lines[3].contains("join (aggregator) joins branch_0, branch_1"));
    }
}
