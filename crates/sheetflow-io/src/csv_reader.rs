//! CSV-backed workbooks.
//!
//! A workbook is a directory holding one `<sheet>.csv` per sheet. A single
//! `.csv` file is also accepted as a workbook whose only sheet is the file stem.

use std::path::{Path, PathBuf};

use sheetflow_core::model::{CellValue, Table};
use sheetflow_core::{Result, TableReader};

use crate::error::{IoError, IoResult};

/// Reads sheets from CSV workbooks.
#[derive(Debug, Clone)]
pub struct CsvReader {
    delimiter: u8,
}

impl Default for CsvReader {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Sheet names of a workbook, sorted.
    pub fn sheet_names(&self, path: &Path) -> IoResult<Vec<String>> {
        if path.is_file() {
            return Ok(file_stem(path).into_iter().collect());
        }
        if !path.is_dir() {
            return Err(IoError::WorkbookNotFound(path.to_path_buf()));
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let file = entry?.path();
            if is_csv(&file) {
                names.extend(file_stem(&file));
            }
        }
        names.sort();
        Ok(names)
    }

    fn sheet_path(&self, path: &Path, sheet_name: &str) -> IoResult<PathBuf> {
        if path.is_file() {
            if file_stem(path).as_deref() == Some(sheet_name) {
                return Ok(path.to_path_buf());
            }
        } else if path.is_dir() {
            let file = path.join(format!("{}.csv", sheet_name));
            if file.is_file() {
                return Ok(file);
            }
        } else {
            return Err(IoError::WorkbookNotFound(path.to_path_buf()));
        }
        Err(IoError::SheetNotFound {
            path: path.to_path_buf(),
            sheet: sheet_name.to_string(),
        })
    }

    /// Read one sheet. Rows above `header_row` are skipped.
    pub fn read_sheet(&self, path: &Path, sheet_name: &str, header_row: usize) -> IoResult<Table> {
        let file = self.sheet_path(path, sheet_name)?;
        let csv_error = |source| IoError::Csv {
            path: file.clone(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_path(&file)
            .map_err(csv_error)?;

        let mut records = reader.records().skip(header_row);
        let header = match records.next() {
            Some(record) => record.map_err(csv_error)?,
            None => {
                return Err(IoError::MissingHeader {
                    path: file.clone(),
                    header_row,
                });
            }
        };
        let columns: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();

        let mut rows: Vec<Vec<CellValue>> = Vec::new();
        for record in records {
            let record = record.map_err(csv_error)?;
            rows.push(record.iter().map(parse_cell).collect());
        }

        tracing::debug!(
            file = %file.display(),
            rows = rows.len(),
            columns = columns.len(),
            "Read CSV sheet"
        );
        Ok(Table::new(columns, rows))
    }
}

impl TableReader for CsvReader {
    fn read_table(&self, path: &Path, sheet_name: &str, header_row: usize) -> Result<Table> {
        Ok(self.read_sheet(path, sheet_name, header_row)?)
    }
}

/// Empty fields are null; integers, floats and booleans are typed; the rest is text.
fn parse_cell(field: &str) -> CellValue {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return CellValue::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return CellValue::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return CellValue::Float(f);
        }
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => CellValue::Bool(true),
        "false" => CellValue::Bool(false),
        _ => CellValue::text(field),
    }
}

fn is_csv(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetflow_core::Error;
    use tempfile::TempDir;

    fn workbook() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("East.csv"),
            "Sales report,,\nRep,Amount,Closed\nann,10,true\nbob,2.5,\ncat\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("West.csv"), "Rep,Amount\ndan,7\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        dir
    }

    #[test]
    fn test_header_row_and_typed_cells() {
        let dir = workbook();
        let table = CsvReader::new().read_sheet(dir.path(), "East", 1).unwrap();

        assert_eq!(table.columns, vec!["Rep", "Amount", "Closed"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(
            table.rows[0],
            vec![CellValue::text("ann"), CellValue::Int(10), CellValue::Bool(true)]
        );
        assert_eq!(table.rows[1][1], CellValue::Float(2.5));
        assert_eq!(table.rows[1][2], CellValue::Null);
        assert_eq!(
            table.rows[2],
            vec![CellValue::text("cat"), CellValue::Null, CellValue::Null]
        );
    }

    #[test]
    fn test_sheet_names_only_csv() {
        let dir = workbook();
        assert_eq!(
            CsvReader::new().sheet_names(dir.path()).unwrap(),
            vec!["East", "West"]
        );
    }

    #[test]
    fn test_missing_sheet_is_not_found() {
        let dir = workbook();
        let err = CsvReader::new()
            .read_table(dir.path(), "North", 0)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = CsvReader::new()
            .read_table(&dir.path().join("missing"), "East", 0)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_single_file_workbook() {
        let dir = workbook();
        let file = dir.path().join("West.csv");
        let table = CsvReader::new().read_sheet(&file, "West", 0).unwrap();
        assert_eq!(table.rows, vec![vec![CellValue::text("dan"), CellValue::Int(7)]]);
        assert!(CsvReader::new().read_sheet(&file, "East", 0).is_err());
    }

    #[test]
    fn test_semicolon_delimiter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("s.csv"), "a;b\n1;x\n").unwrap();
        let table = CsvReader::new()
            .with_delimiter(b';')
            .read_sheet(dir.path(), "s", 0)
            .unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[0][1], CellValue::text("x"));
    }
}
