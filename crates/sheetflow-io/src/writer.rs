//! On-disk workbook writers.

use std::fs;
use std::path::Path;

use serde::Serialize;
use sheetflow_core::model::Sheet;
use sheetflow_core::{Result, WorkbookWriter};

use crate::error::{IoError, IoResult};

/// Writes each sheet as `<path>/<sheet>.csv`, the layout [`crate::CsvReader`] reads.
#[derive(Debug, Clone, Default)]
pub struct CsvDirectoryWriter;

impl CsvDirectoryWriter {
    pub fn new() -> Self {
        Self
    }

    fn write_sheets(&self, path: &Path, sheets: &[Sheet]) -> IoResult<u64> {
        fs::create_dir_all(path)?;
        let mut total = 0;
        for sheet in sheets {
            let file = path.join(format!("{}.csv", sheet.sheet_name));
            let csv_error = |source| IoError::Csv {
                path: file.clone(),
                source,
            };
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(&sheet.columns).map_err(csv_error)?;
            for row in &sheet.rows {
                writer
                    .write_record(row.iter().map(|cell| cell.to_string()))
                    .map_err(csv_error)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|e| IoError::Io(e.into_error()))?;
            fs::write(&file, &bytes)?;
            total += bytes.len() as u64;
        }
        Ok(total)
    }
}

impl WorkbookWriter for CsvDirectoryWriter {
    fn write_workbook(&self, path: &Path, sheets: &[Sheet]) -> Result<u64> {
        let size = self.write_sheets(path, sheets)?;
        tracing::info!(path = %path.display(), sheets = sheets.len(), bytes = size, "Wrote CSV workbook");
        Ok(size)
    }
}

#[derive(Serialize)]
struct JsonWorkbook<'a> {
    sheets: &'a [Sheet],
}

/// Writes every sheet into one JSON document.
#[derive(Debug, Clone, Default)]
pub struct JsonWorkbookWriter {
    pretty: bool,
}

impl JsonWorkbookWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    fn write_sheets(&self, path: &Path, sheets: &[Sheet]) -> IoResult<u64> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let workbook = JsonWorkbook { sheets };
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&workbook)?
        } else {
            serde_json::to_vec(&workbook)?
        };
        fs::write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }
}

impl WorkbookWriter for JsonWorkbookWriter {
    fn write_workbook(&self, path: &Path, sheets: &[Sheet]) -> Result<u64> {
        let size = self.write_sheets(path, sheets)?;
        tracing::info!(path = %path.display(), sheets = sheets.len(), bytes = size, "Wrote JSON workbook");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CsvReader;
    use sheetflow_core::model::{CellValue, SheetKind, SheetMetadata, Table};
    use tempfile::TempDir;

    fn sheet(name: &str) -> Sheet {
        Sheet::new(
            name,
            Table::from_rows(
                ["Region", "total"],
                vec![
                    vec![CellValue::text("East"), CellValue::Float(15.0)],
                    vec![CellValue::text("West"), CellValue::Null],
                ],
            ),
            SheetMetadata {
                kind: SheetKind::Aggregated,
                branch_ids: vec!["branch_0".into()],
                source_name: "Regions".into(),
                index_value: None,
            },
        )
    }

    #[test]
    fn test_csv_directory_readable_back() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("report");
        let size = CsvDirectoryWriter::new()
            .write_workbook(&out, &[sheet("0-Regions"), sheet("1-Other")])
            .unwrap();

        let on_disk: u64 = ["0-Regions.csv", "1-Other.csv"]
            .iter()
            .map(|f| fs::metadata(out.join(f)).unwrap().len())
            .sum();
        assert_eq!(size, on_disk);

        let table = CsvReader::new().read_sheet(&out, "0-Regions", 0).unwrap();
        assert_eq!(table.columns, vec!["Region", "total"]);
        assert_eq!(table.rows[0], vec![CellValue::text("East"), CellValue::Int(15)]);
        assert_eq!(table.rows[1][1], CellValue::Null);
    }

    #[test]
    fn test_json_workbook() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("report.json");
        let size = JsonWorkbookWriter::new()
            .pretty()
            .write_workbook(&out, &[sheet("0-Regions")])
            .unwrap();
        assert_eq!(size, fs::metadata(&out).unwrap().len());

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&out).unwrap()).unwrap();
        assert_eq!(value["sheets"][0]["sheet_name"], "0-Regions");
        assert_eq!(value["sheets"][0]["rows"][0][1], 15.0);
    }
}
