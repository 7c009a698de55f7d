//! Workbook writing capability.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, lock_error};
use crate::model::Sheet;

/// Persists output sheets as one multi-sheet file.
pub trait WorkbookWriter: Send + Sync {
    /// Write `sheets` to `path`, returning the size of what was written in bytes.
    fn write_workbook(&self, path: &Path, sheets: &[Sheet]) -> Result<u64>;
}

/// Keeps written workbooks in memory.
#[derive(Default)]
pub struct MemoryWriter {
    written: Mutex<Vec<(PathBuf, Vec<Sheet>)>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every workbook written so far, oldest first.
    pub fn written(&self) -> Vec<(PathBuf, Vec<Sheet>)> {
        self.written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.written.lock().map(|w| w.len()).unwrap_or(0)
    }
}

impl WorkbookWriter for MemoryWriter {
    fn write_workbook(&self, path: &Path, sheets: &[Sheet]) -> Result<u64> {
        let size = serde_json::to_vec(sheets)?.len() as u64;
        self.written
            .lock()
            .map_err(lock_error)?
            .push((path.to_path_buf(), sheets.to_vec()));
        Ok(size)
    }
}
