//! Collects the `(file, sheet)` pairs a set of nodes will read.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::model::{NodeConfig, SheetSelection, WorkspaceConfig};

/// Sheets of one file that should be loaded together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBatchInfo {
    pub file_id: String,
    pub path: PathBuf,
    /// Unique sheet names, in the order they were first requested.
    pub required_sheets: Vec<String>,
    pub header_rows: BTreeMap<String, usize>,
}

impl FileBatchInfo {
    pub fn header_row(&self, sheet_name: &str) -> usize {
        self.header_rows.get(sheet_name).copied().unwrap_or(0)
    }
}

/// Rough payoff of preloading, reported before the preload runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadEstimate {
    pub total_files: usize,
    pub total_sheets: usize,
    /// File opens saved by reading every sheet of a file in one batch.
    pub estimated_io_reduction: usize,
    /// Capped at 80.
    pub estimated_time_saving_percent: f64,
}

const MAX_TIME_SAVING_PERCENT: f64 = 80.0;

/// Inspects SheetSelector nodes, the only kind that reads workbooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileAnalyzer;

impl FileAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Every `(file, sheet)` pair the given nodes need, grouped by file.
    ///
    /// A manual selector needs its one sheet. Auto-by-index and column-match
    /// selectors cannot know their sheet before index values exist, so they
    /// request every sheet of the file. Selectors pointing at unregistered
    /// files are skipped.
    pub fn analyze_file_requirements<S: AsRef<str>>(
        &self,
        workspace: &WorkspaceConfig,
        node_ids: &[S],
    ) -> Vec<FileBatchInfo> {
        let mut batches: Vec<FileBatchInfo> = Vec::new();
        let mut seen: FxHashSet<(String, String)> = FxHashSet::default();

        for node_id in node_ids {
            let node_id = node_id.as_ref();
            let Some(node) = workspace.node(node_id) else {
                continue;
            };
            let NodeConfig::SheetSelector(config) = &node.config else {
                continue;
            };
            let Some(file) = workspace.file(&config.target_file_id) else {
                tracing::warn!(
                    node = node_id,
                    file = %config.target_file_id,
                    "Sheet selector targets an unregistered file; not preloading"
                );
                continue;
            };

            let sheets: Vec<&str> = match &config.selection {
                SheetSelection::Manual { sheet_name } => vec![sheet_name.as_str()],
                SheetSelection::AutoByIndex => {
                    tracing::warn!(
                        node = node_id,
                        file = %file.id,
                        sheets = file.sheet_metas.len(),
                        "auto_by_index selector: preloading every sheet of the file"
                    );
                    file.sheet_names().collect()
                }
                SheetSelection::ColumnMatch { .. } => file.sheet_names().collect(),
            };

            for sheet in sheets {
                if !seen.insert((file.id.clone(), sheet.to_string())) {
                    continue;
                }
                let position = match batches.iter().position(|b| b.file_id == file.id) {
                    Some(pos) => pos,
                    None => {
                        batches.push(FileBatchInfo {
                            file_id: file.id.clone(),
                            path: file.path.clone(),
                            required_sheets: Vec::new(),
                            header_rows: BTreeMap::new(),
                        });
                        batches.len() - 1
                    }
                };
                let batch = &mut batches[position];
                batch.required_sheets.push(sheet.to_string());
                batch
                    .header_rows
                    .insert(sheet.to_string(), file.header_row(sheet));
            }
        }

        tracing::debug!(
            files = batches.len(),
            sheets = batches.iter().map(|b| b.required_sheets.len()).sum::<usize>(),
            "Analyzed file requirements"
        );
        batches
    }

    pub fn estimate_preload_benefit(&self, batches: &[FileBatchInfo]) -> PreloadEstimate {
        let total_files = batches.len();
        let total_sheets: usize = batches.iter().map(|b| b.required_sheets.len()).sum();
        let saved = total_sheets.saturating_sub(total_files);
        let percent = saved as f64 / total_sheets.max(1) as f64 * 100.0;
        PreloadEstimate {
            total_files,
            total_sheets,
            estimated_io_reduction: saved,
            estimated_time_saving_percent: percent.min(MAX_TIME_SAVING_PERCENT),
        }
    }
}
