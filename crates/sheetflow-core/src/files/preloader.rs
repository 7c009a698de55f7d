//! Bulk sheet loading ahead of branch execution.
//!
//! The preloader turns every [`FileBatchInfo`] into one task per sheet and runs
//! them on a bounded rayon pool. Successful loads are inserted into the run's
//! table cache. Failures are collected, never raised: a sheet that did not
//! preload is simply read lazily when a node asks for it.

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::analyzer::FileBatchInfo;
use super::cache::CacheKey;
use crate::error::Result;
use crate::execute::GlobalContext;
use crate::metrics::PreloadStats;
use crate::model::DEFAULT_PRELOAD_WORKERS;

/// A sheet that failed to preload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadFailure {
    pub file_id: String,
    pub sheet_name: String,
    pub error: String,
}

/// Outcome of one preload session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreloadSummary {
    pub total_files: usize,
    pub total_sheets: usize,
    pub successful_sheets: usize,
    pub failed_sheets: usize,
    pub total_rows: usize,
    pub total_time_ms: f64,
    /// Sheets minus files: opens saved by batching per file.
    pub io_reduction: usize,
    pub failures: Vec<PreloadFailure>,
}

impl PreloadSummary {
    pub fn stats(&self) -> PreloadStats {
        PreloadStats {
            sessions: 0,
            total_files: self.total_files as u64,
            total_sheets: self.total_sheets as u64,
            successful_sheets: self.successful_sheets as u64,
            failed_sheets: self.failed_sheets as u64,
            total_rows: self.total_rows as u64,
            total_time_ms: self.total_time_ms,
            io_reduction: self.io_reduction as u64,
        }
    }
}

struct LoadTask<'a> {
    batch: &'a FileBatchInfo,
    sheet_name: &'a str,
}

/// Loads `(file, sheet)` pairs concurrently into a [`GlobalContext`]'s cache.
#[derive(Debug, Clone)]
pub struct BatchPreloader {
    max_workers: usize,
}

impl Default for BatchPreloader {
    fn default() -> Self {
        Self::new(DEFAULT_PRELOAD_WORKERS)
    }
}

impl BatchPreloader {
    /// A preloader running at most `max_workers` reads at once (minimum 1).
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Load every required sheet into `context`'s table cache.
    pub fn preload_files(
        &self,
        batches: &[FileBatchInfo],
        context: &GlobalContext,
    ) -> PreloadSummary {
        let start = Instant::now();
        let tasks: Vec<LoadTask<'_>> = batches
            .iter()
            .flat_map(|batch| {
                batch.required_sheets.iter().map(move |sheet| LoadTask {
                    batch,
                    sheet_name: sheet.as_str(),
                })
            })
            .collect();
        let io_reduction = tasks.len().saturating_sub(batches.len());

        tracing::info!(
            files = batches.len(),
            sheets = tasks.len(),
            io_reduction,
            workers = self.max_workers,
            "Starting batch preload"
        );

        let results = self.run_tasks(&tasks, context);

        let mut summary = PreloadSummary {
            total_files: batches.len(),
            total_sheets: tasks.len(),
            io_reduction,
            ..Default::default()
        };
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(rows) => {
                    summary.successful_sheets += 1;
                    summary.total_rows += rows;
                }
                Err(e) => {
                    tracing::warn!(
                        file = %task.batch.file_id,
                        sheet = task.sheet_name,
                        error = %e,
                        "Preload failed; sheet will be loaded on demand"
                    );
                    summary.failed_sheets += 1;
                    summary.failures.push(PreloadFailure {
                        file_id: task.batch.file_id.clone(),
                        sheet_name: task.sheet_name.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }
        summary.total_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        context.metrics().record_preload(&summary.stats());
        tracing::info!(
            loaded = summary.successful_sheets,
            failed = summary.failed_sheets,
            rows = summary.total_rows,
            time_ms = summary.total_time_ms,
            "Batch preload complete"
        );
        summary
    }

    fn run_tasks(&self, tasks: &[LoadTask<'_>], context: &GlobalContext) -> Vec<Result<usize>> {
        let load = |task: &LoadTask<'_>| Self::load_one(task, context);
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
        {
            Ok(pool) => pool.install(|| tasks.par_iter().map(load).collect()),
            Err(e) => {
                tracing::warn!(error = %e, "Could not build preload pool; loading sequentially");
                tasks.iter().map(load).collect()
            }
        }
    }

    /// Load one sheet and return its row count.
    fn load_one(task: &LoadTask<'_>, context: &GlobalContext) -> Result<usize> {
        let key = CacheKey::new(task.batch.file_id.as_str(), task.sheet_name);
        if let Some(table) = context.table_cache().get(&key)? {
            return Ok(table.row_count());
        }
        let header_row = task.batch.header_row(task.sheet_name);
        let table = context.read_sheet(&task.batch.path, task.sheet_name, header_row)?;
        let rows = table.row_count();
        context.table_cache().insert_if_absent(key, table)?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::files::MemoryReader;
    use crate::model::{ExecutionMode, Table, WorkspaceConfig};

    fn batch(file_id: &str, sheets: &[&str]) -> FileBatchInfo {
        FileBatchInfo {
            file_id: file_id.to_string(),
            path: PathBuf::from(format!("{}.xlsx", file_id)),
            required_sheets: sheets.iter().map(|s| s.to_string()).collect(),
            header_rows: BTreeMap::new(),
        }
    }

    fn context(reader: Arc<MemoryReader>) -> GlobalContext {
        GlobalContext::new(&WorkspaceConfig::default(), ExecutionMode::Production, reader)
    }

    #[test]
    fn test_preload_populates_cache() {
        let reader = Arc::new(
            MemoryReader::new()
                .with_sheet(
                    "sales.xlsx",
                    "East",
                    Table::from_rows(["Amount"], vec![vec![1i64], vec![2]]),
                )
                .with_sheet(
                    "sales.xlsx",
                    "West",
                    Table::from_rows(["Amount"], vec![vec![3i64]]),
                ),
        );
        let ctx = context(Arc::clone(&reader));
        let summary = BatchPreloader::new(2).preload_files(&[batch("sales", &["East", "West"])], &ctx);

        assert_eq!(summary.total_files, 1);
        assert_eq!(summary.successful_sheets, 2);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.io_reduction, 1);
        assert_eq!(ctx.table_cache().len().unwrap(), 2);
        assert_eq!(ctx.metrics().snapshot().preload.sessions, 1);
    }

    #[test]
    fn test_partial_failure_is_recorded() {
        let reader = Arc::new(MemoryReader::new().with_sheet(
            "sales.xlsx",
            "East",
            Table::from_rows(["Amount"], vec![vec![1i64]]),
        ));
        let ctx = context(reader);
        let summary =
            BatchPreloader::default().preload_files(&[batch("sales", &["East", "North"])], &ctx);

        assert_eq!(summary.successful_sheets, 1);
        assert_eq!(summary.failed_sheets, 1);
        assert_eq!(summary.failures[0].sheet_name, "North");
        assert_eq!(ctx.table_cache().len().unwrap(), 1);
        assert_eq!(ctx.metrics().snapshot().preload.failed_sheets, 1);
    }

    #[test]
    fn test_cached_sheets_not_reread() {
        let reader = Arc::new(MemoryReader::new().with_sheet(
            "sales.xlsx",
            "East",
            Table::from_rows(["Amount"], vec![vec![1i64]]),
        ));
        let ctx = context(Arc::clone(&reader));
        let preloader = BatchPreloader::new(1);
        preloader.preload_files(&[batch("sales", &["East"])], &ctx);
        preloader.preload_files(&[batch("sales", &["East"])], &ctx);
        assert_eq!(reader.reads_of("sales.xlsx", "East"), 1);
    }

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(BatchPreloader::new(0).max_workers(), 1);
    }
}
