//! `sheetflow analyze`: print the branches of a flow.

use std::path::Path;

use anyhow::Context;
use sheetflow_core::PathAnalyzer;
use sheetflow_io::load_workspace;

use crate::report;

pub fn execute(workspace_path: &Path, target: &str) -> anyhow::Result<()> {
    let workspace = load_workspace(workspace_path)
        .with_context(|| format!("loading {}", workspace_path.display()))?;
    let analysis = PathAnalyzer::new().analyze(&workspace.nodes, &workspace.edges, target)?;
    report::print_analysis(&analysis);
    Ok(())
}
