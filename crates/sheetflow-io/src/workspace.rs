//! Workspace documents on disk.

use std::path::Path;

use sheetflow_core::Result;
use sheetflow_core::model::{FileDescriptor, SheetMeta, WorkspaceConfig};

use crate::csv_reader::CsvReader;
use crate::error::IoError;

/// Load a workspace JSON document.
///
/// Relative file paths are resolved against the document's directory.
pub fn load_workspace(path: impl AsRef<Path>) -> Result<WorkspaceConfig> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IoError::WorkbookNotFound(path.to_path_buf()),
        _ => IoError::Io(e),
    })?;
    let mut workspace = WorkspaceConfig::from_json(&json)?;

    if let Some(base) = path.parent() {
        for file in &mut workspace.files {
            if file.path.is_relative() {
                file.path = base.join(&file.path);
            }
        }
    }
    tracing::info!(
        path = %path.display(),
        files = workspace.files.len(),
        nodes = workspace.nodes.len(),
        edges = workspace.edges.len(),
        "Loaded workspace"
    );
    Ok(workspace)
}

/// Describe a CSV workbook, declaring every sheet with a header on row 0.
pub fn describe_csv_workbook(
    reader: &CsvReader,
    id: impl Into<String>,
    path: impl AsRef<Path>,
) -> Result<FileDescriptor> {
    let path = path.as_ref();
    let sheet_metas = reader
        .sheet_names(path)?
        .into_iter()
        .map(|sheet_name| SheetMeta {
            sheet_name,
            header_row: 0,
        })
        .collect();
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(FileDescriptor {
        id: id.into(),
        name,
        path: path.to_path_buf(),
        sheet_metas,
    })
}
