//! File adapters for sheetflow.
//!
//! Implements the core's reading and writing capabilities over plain files:
//!
//! ```text
//! flow.json ──► load_workspace ──► PipelineExecutor ──► JsonWorkbookWriter ──► report.json
//!                                        ▲        └────► CsvDirectoryWriter ──► report/<sheet>.csv
//!                                        │
//!                          CsvReader (<workbook>/<sheet>.csv)
//! ```

mod csv_reader;
mod error;
mod workspace;
mod writer;

pub use csv_reader::CsvReader;
pub use error::{IoError, IoResult};
pub use workspace::{describe_csv_workbook, load_workspace};
pub use writer::{CsvDirectoryWriter, JsonWorkbookWriter};
