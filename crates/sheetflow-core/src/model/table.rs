//! In-memory tabular data.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Display format for datetime cells.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static NULL_CELL: CellValue = CellValue::Null;

/// Cell `idx` of `row`, or null when the row is shorter than the header.
pub fn cell_at(row: &[CellValue], idx: usize) -> &CellValue {
    row.get(idx).unwrap_or(&NULL_CELL)
}

/// A single cell of a [`Table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// Null cells and NaN floats both count as missing.
    pub fn is_null(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Numeric coercion: numbers as-is, booleans as 0/1, text if it parses.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Float(f) if !f.is_nan() => Some(*f),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
            _ => None,
        }
    }

    /// Name of the value's type, used in cleaning reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "bool",
            CellValue::Int(_) => "int",
            CellValue::Float(_) => "float",
            CellValue::Text(_) => "text",
            CellValue::DateTime(_) => "datetime",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Text(s) => f.write_str(s),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(i: i64) -> Self {
        CellValue::Int(i)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// One value of the set produced by an IndexSource node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexValue(String);

impl IndexValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Ordered named columns over a row-major grid.
///
/// `total_rows` reports the size of the source the table was taken from, which
/// differs from `rows.len()` only for [`Table::limit_rows`] projections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub total_rows: usize,
}

impl Table {
    /// Create a table. Short rows are padded with nulls, long rows truncated.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = columns.len();
        let rows: Vec<Vec<CellValue>> = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Null);
                row
            })
            .collect();
        let total_rows = rows.len();
        Self {
            columns,
            rows,
            total_rows,
        }
    }

    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table with the given header and no rows.
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self::new(columns, Vec::new())
    }

    /// Build a table from string-literal headers and rows; handy in tests.
    pub fn from_rows<C, R, V>(columns: C, rows: R) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        R: IntoIterator<Item = Vec<V>>,
        V: Into<CellValue>,
    {
        Self::new(
            columns.into_iter().map(Into::into).collect(),
            rows.into_iter()
                .map(|row| row.into_iter().map(Into::into).collect())
                .collect(),
        )
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Iterate over the cells of one column in row order.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &CellValue>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| cell_at(row, idx)))
    }

    /// Keep the rows whose mask entry is `true`.
    pub fn filter_rows(&self, mask: &[bool]) -> Table {
        let rows: Vec<Vec<CellValue>> = self
            .rows
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(row, _)| row.clone())
            .collect();
        Table::new(self.columns.clone(), rows)
    }

    /// Project the first `max_rows` rows without touching `self`.
    ///
    /// The projection keeps the source's `total_rows`.
    pub fn limit_rows(&self, max_rows: usize) -> Table {
        if self.rows.len() <= max_rows {
            return self.clone();
        }
        Table {
            columns: self.columns.clone(),
            rows: self.rows[..max_rows].to_vec(),
            total_rows: self.total_rows,
        }
    }
}
