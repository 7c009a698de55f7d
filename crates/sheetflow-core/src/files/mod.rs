//! File access: reading and writing capabilities, the table cache, and
//! batch preloading.
//!
//! The core never parses workbook bytes itself. A [`TableReader`] and a
//! [`WorkbookWriter`] are injected by the caller; `sheetflow-io` provides
//! file-backed ones and this module provides in-memory ones.

mod analyzer;
mod cache;
mod preloader;
mod reader;
mod writer;

pub use analyzer::{FileAnalyzer, FileBatchInfo, PreloadEstimate};
pub use cache::{CacheKey, TableCache};
pub use preloader::{BatchPreloader, PreloadFailure, PreloadSummary};
pub use reader::{MemoryReader, TableReader};
pub use writer::{MemoryWriter, WorkbookWriter};
