//! Tabular file reading capability.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result, lock_error};
use crate::model::Table;

/// Reads one sheet of a workbook into a [`Table`].
///
/// Implementations must return [`Error::NotFound`] when the file or the sheet
/// does not exist; sheet selectors rely on that to skip an index value instead
/// of failing it.
pub trait TableReader: Send + Sync {
    /// `header_row` is the zero-based row holding column names; rows above it are ignored.
    fn read_table(&self, path: &Path, sheet_name: &str, header_row: usize) -> Result<Table>;
}

/// In-memory reader over pre-built tables. Counts every read.
///
/// Tables are stored as already parsed, so `header_row` is ignored.
#[derive(Default)]
pub struct MemoryReader {
    sheets: FxHashMap<(PathBuf, String), Table>,
    reads: Mutex<FxHashMap<(PathBuf, String), usize>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sheet.
    pub fn with_sheet(
        mut self,
        path: impl Into<PathBuf>,
        sheet_name: impl Into<String>,
        table: Table,
    ) -> Self {
        self.sheets.insert((path.into(), sheet_name.into()), table);
        self
    }

    /// Total number of successful reads.
    pub fn read_count(&self) -> usize {
        self.reads
            .lock()
            .map(|reads| reads.values().sum())
            .unwrap_or(0)
    }

    /// Number of successful reads of one sheet.
    pub fn reads_of(&self, path: impl AsRef<Path>, sheet_name: &str) -> usize {
        let key = (path.as_ref().to_path_buf(), sheet_name.to_string());
        self.reads
            .lock()
            .map(|reads| reads.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

impl TableReader for MemoryReader {
    fn read_table(&self, path: &Path, sheet_name: &str, _header_row: usize) -> Result<Table> {
        let key = (path.to_path_buf(), sheet_name.to_string());
        let table = self.sheets.get(&key).cloned().ok_or_else(|| {
            Error::not_found(format!(
                "sheet '{}' not found in {}",
                sheet_name,
                path.display()
            ))
        })?;
        *self.reads.lock().map_err(lock_error)?.entry(key).or_default() += 1;
        Ok(table)
    }
}
