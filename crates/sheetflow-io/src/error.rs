//! Error types for the file adapters.

use std::path::PathBuf;

/// Result type for adapter operations.
pub type IoResult<T> = Result<T, IoError>;

/// Errors raised while reading or writing files on disk.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The workbook path does not exist.
    #[error("workbook not found: {0}")]
    WorkbookNotFound(PathBuf),

    /// The workbook exists but has no such sheet.
    #[error("sheet '{sheet}' not found in {path}")]
    SheetNotFound { path: PathBuf, sheet: String },

    /// The header row lies past the end of the sheet.
    #[error("header row {header_row} is past the end of {path}")]
    MissingHeader { path: PathBuf, header_row: usize },

    /// Malformed CSV.
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Failed to serialize/deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IoError> for sheetflow_core::Error {
    fn from(e: IoError) -> Self {
        use sheetflow_core::Error;
        match e {
            IoError::WorkbookNotFound(_) | IoError::SheetNotFound { .. } => {
                Error::not_found(e.to_string())
            }
            IoError::MissingHeader { .. } | IoError::Csv { .. } => Error::data(e.to_string()),
            IoError::Json(e) => Error::from(e),
            IoError::Io(e) => Error::Io(e),
        }
    }
}
