//! Data cleaning and type inference for freshly read tables.
//!
//! Readers hand over spreadsheet text largely untyped. [`SmartDataCleaner`]
//! trims and normalizes text cells, maps null tokens to [`CellValue::Null`],
//! and infers numeric, datetime or boolean columns where enough cells agree.
//! Cells that already carry a type are left alone.

use chrono::{NaiveDate, NaiveDateTime};
use regex::RegexSet;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{CellValue, Table, cell_at};

/// Samples inspected by the datetime pattern pre-check.
const DATETIME_SAMPLE_SIZE: usize = 10;

/// A column with more distinct values than this is never boolean.
const MAX_BOOLEAN_UNIQUE: usize = 10;

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    pub trim_strings: bool,
    pub normalize_whitespace: bool,
    pub standardize_nulls: bool,
    pub enable_smart_inference: bool,
    pub numeric_threshold: f64,
    pub datetime_threshold: f64,
    pub boolean_threshold: f64,
    pub null_values: Vec<String>,
    pub currency_symbols: Vec<String>,
    pub percentage_handling: bool,
    pub thousand_separator: Option<String>,
    /// chrono formats tried in order.
    pub date_formats: Vec<String>,
    /// At least one sample must match one of these before dates are attempted.
    pub date_patterns: Vec<String>,
    pub true_values: Vec<String>,
    pub false_values: Vec<String>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            trim_strings: true,
            normalize_whitespace: true,
            standardize_nulls: true,
            enable_smart_inference: true,
            numeric_threshold: 0.85,
            datetime_threshold: 0.80,
            boolean_threshold: 0.90,
            null_values: strings(&[
                "N/A", "NULL", "null", "Null", "空", "", "无", "None", "NONE", "#N/A", "#NULL!",
                "#DIV/0!", "#VALUE!", "#REF!", "#NAME?", "#NUM!", "nan", "NaN",
            ]),
            currency_symbols: strings(&["$", "¥", "€", "£", "￥"]),
            percentage_handling: true,
            thousand_separator: Some(",".to_string()),
            date_formats: strings(&[
                "%Y-%m-%d",
                "%Y/%m/%d",
                "%d/%m/%Y",
                "%m/%d/%Y",
                "%Y年%m月%d日",
                "%Y-%m-%d %H:%M:%S",
                "%Y/%m/%d %H:%M:%S",
            ]),
            date_patterns: strings(&[
                r"\d{4}[-/]\d{1,2}[-/]\d{1,2}",
                r"\d{1,2}[-/]\d{1,2}[-/]\d{4}",
                r"\d{4}年\d{1,2}月\d{1,2}日",
                r"\d{1,2}/\d{1,2}/\d{2,4}",
            ]),
            true_values: strings(&[
                "True", "true", "TRUE", "是", "对", "Y", "y", "Yes", "yes", "YES", "1",
            ]),
            false_values: strings(&[
                "False", "false", "FALSE", "否", "错", "N", "n", "No", "no", "NO", "0",
            ]),
        }
    }
}

/// Inferred type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredType {
    Numeric,
    DateTime,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleaningStepKind {
    TrimStrings,
    NormalizeWhitespace,
    StandardizeNulls,
    SmartInference,
    KeepAsText,
    TypePreservation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningStep {
    pub step: CleaningStepKind,
    pub changes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_type: Option<InferredType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
}

impl CleaningStep {
    fn new(step: CleaningStepKind, changes: usize) -> Self {
        Self {
            step,
            changes,
            chosen_type: None,
            success_rate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnReport {
    pub column: String,
    pub original_type: String,
    pub final_type: String,
    pub null_count_before: usize,
    pub null_count_after: usize,
    pub steps: Vec<CleaningStep>,
    pub warnings: Vec<String>,
}

impl ColumnReport {
    pub fn type_changed(&self) -> bool {
        self.original_type != self.final_type
    }
}

/// What the cleaner did to one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub rows: usize,
    pub columns: Vec<ColumnReport>,
}

impl CleaningReport {
    pub fn column(&self, name: &str) -> Option<&ColumnReport> {
        self.columns.iter().find(|c| c.column == name)
    }

    /// Columns whose cell type changed.
    pub fn changed_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.type_changed())
            .map(|c| c.column.as_str())
            .collect()
    }
}

/// Outcome of trying one conversion over a column.
struct Conversion {
    kind: InferredType,
    cells: Vec<CellValue>,
    success_rate: f64,
    failed: usize,
}

/// Cleans tables and infers column types.
#[derive(Debug, Clone)]
pub struct SmartDataCleaner {
    config: CleaningConfig,
    date_patterns: RegexSet,
}

impl SmartDataCleaner {
    /// Build a cleaner. Fails when a configured date pattern is not a valid regex.
    pub fn new(config: CleaningConfig) -> Result<Self> {
        let date_patterns = RegexSet::new(&config.date_patterns)
            .map_err(|e| Error::configuration(format!("invalid date pattern: {}", e)))?;
        Ok(Self {
            config,
            date_patterns,
        })
    }

    pub fn config(&self) -> &CleaningConfig {
        &self.config
    }

    /// Clean every column of `table`, returning the new table and a report.
    pub fn clean_table(&self, table: &Table) -> (Table, CleaningReport) {
        let mut cleaned = Table {
            total_rows: table.total_rows,
            ..Table::new(table.columns.clone(), table.rows.clone())
        };
        let mut report = CleaningReport {
            rows: table.row_count(),
            columns: Vec::with_capacity(table.column_count()),
        };

        for (col_idx, column) in table.columns.iter().enumerate() {
            let cells: Vec<CellValue> = table
                .rows
                .iter()
                .map(|r| cell_at(r, col_idx).clone())
                .collect();
            let (cells, column_report) = self.clean_column(column, cells);
            for (row, cell) in cleaned.rows.iter_mut().zip(cells) {
                row[col_idx] = cell;
            }
            report.columns.push(column_report);
        }

        let changed = report.changed_columns();
        if !changed.is_empty() {
            tracing::debug!(rows = report.rows, columns = ?changed, "Inferred column types");
        }
        (cleaned, report)
    }

    fn clean_column(
        &self,
        column: &str,
        mut cells: Vec<CellValue>,
    ) -> (Vec<CellValue>, ColumnReport) {
        let original_type = column_type(&cells);
        let null_count_before = cells.iter().filter(|c| c.is_null()).count();
        let mut steps = Vec::new();
        let mut warnings = Vec::new();

        self.basic_cleaning(&mut cells, &mut steps);

        let has_text = cells.iter().any(|c| matches!(c, CellValue::Text(_)));
        if has_text && self.config.enable_smart_inference {
            match self.infer(&cells) {
                Some(conversion) => {
                    if conversion.failed > 0 {
                        warnings.push(format!(
                            "{} value(s) could not be converted to {:?} and were set to null",
                            conversion.failed, conversion.kind
                        ));
                    }
                    let changes = cells
                        .iter()
                        .zip(&conversion.cells)
                        .filter(|(a, b)| a != b)
                        .count();
                    steps.push(CleaningStep {
                        chosen_type: Some(conversion.kind),
                        success_rate: Some(conversion.success_rate),
                        ..CleaningStep::new(CleaningStepKind::SmartInference, changes)
                    });
                    cells = conversion.cells;
                }
                None => steps.push(CleaningStep::new(CleaningStepKind::KeepAsText, 0)),
            }
        } else {
            steps.push(CleaningStep::new(CleaningStepKind::TypePreservation, 0));
        }

        let report = ColumnReport {
            column: column.to_string(),
            original_type,
            final_type: column_type(&cells),
            null_count_before,
            null_count_after: cells.iter().filter(|c| c.is_null()).count(),
            steps,
            warnings,
        };
        (cells, report)
    }

    /// Trim, collapse whitespace and map null tokens. Text cells only.
    fn basic_cleaning(&self, cells: &mut [CellValue], steps: &mut Vec<CleaningStep>) {
        let mut trimmed = 0;
        let mut normalized = 0;
        let mut nulled = 0;

        for cell in cells.iter_mut() {
            let CellValue::Text(text) = cell else {
                continue;
            };
            if self.config.trim_strings {
                let t = text.trim();
                if t.len() != text.len() {
                    *text = t.to_string();
                    trimmed += 1;
                }
            }
            if self.config.normalize_whitespace {
                let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
                let unchanged = if self.config.trim_strings {
                    collapsed == *text
                } else {
                    collapsed == text.trim()
                };
                if !unchanged {
                    *text = collapsed;
                    normalized += 1;
                }
            }
            if self.config.standardize_nulls && self.is_null_token(text) {
                *cell = CellValue::Null;
                nulled += 1;
            }
        }

        for (kind, changes) in [
            (CleaningStepKind::TrimStrings, trimmed),
            (CleaningStepKind::NormalizeWhitespace, normalized),
            (CleaningStepKind::StandardizeNulls, nulled),
        ] {
            if changes > 0 {
                steps.push(CleaningStep::new(kind, changes));
            }
        }
    }

    fn is_null_token(&self, text: &str) -> bool {
        let t = text.trim();
        t.is_empty() || self.config.null_values.iter().any(|v| v == t)
    }

    /// Pick the best conversion above its threshold. Ties favour numeric, then datetime.
    fn infer(&self, cells: &[CellValue]) -> Option<Conversion> {
        let candidates = [
            (self.try_numeric(cells), self.config.numeric_threshold),
            (self.try_datetime(cells), self.config.datetime_threshold),
            (self.try_boolean(cells), self.config.boolean_threshold),
        ];

        let mut best: Option<Conversion> = None;
        for (conversion, threshold) in candidates {
            let Some(conversion) = conversion else {
                continue;
            };
            if conversion.success_rate < threshold {
                continue;
            }
            let better = best
                .as_ref()
                .is_none_or(|b| conversion.success_rate > b.success_rate);
            if better {
                best = Some(conversion);
            }
        }
        best
    }

    fn try_numeric(&self, cells: &[CellValue]) -> Option<Conversion> {
        let mut saw_percent = false;
        let parsed: Vec<Option<f64>> = cells
            .iter()
            .map(|cell| match cell {
                CellValue::Null => None,
                CellValue::Int(i) => Some(*i as f64),
                CellValue::Float(f) if !f.is_nan() => Some(*f),
                CellValue::Text(s) => {
                    let (value, percent) = self.parse_number(s)?;
                    saw_percent |= percent;
                    Some(value)
                }
                _ => None,
            })
            .collect();

        let (converted, non_null) = rate_counts(cells, parsed.iter().map(Option::is_some));
        if non_null == 0 {
            return None;
        }
        let integral = !saw_percent
            && parsed
                .iter()
                .flatten()
                .all(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64);

        let out = parsed
            .into_iter()
            .map(|v| match v {
                Some(v) if integral => CellValue::Int(v as i64),
                Some(v) => CellValue::Float(v),
                None => CellValue::Null,
            })
            .collect();
        Some(Conversion {
            kind: InferredType::Numeric,
            cells: out,
            success_rate: converted as f64 / non_null as f64,
            failed: non_null - converted,
        })
    }

    /// Parse a numeric string, returning the value and whether it was a percentage.
    fn parse_number(&self, text: &str) -> Option<(f64, bool)> {
        let mut s = text.to_string();
        for symbol in &self.config.currency_symbols {
            s = s.replace(symbol.as_str(), "");
        }
        if let Some(sep) = self
            .config
            .thousand_separator
            .as_deref()
            .filter(|sep| !sep.is_empty())
        {
            s = s.replace(sep, "");
        }
        let s = s.trim();
        if self.config.percentage_handling {
            if let Some(stripped) = s.strip_suffix('%') {
                let value: f64 = stripped.trim().parse().ok()?;
                return value.is_finite().then_some((value / 100.0, true));
            }
        }
        let value: f64 = s.parse().ok()?;
        value.is_finite().then_some((value, false))
    }

    fn try_datetime(&self, cells: &[CellValue]) -> Option<Conversion> {
        let looks_like_date = cells
            .iter()
            .filter(|c| !c.is_null())
            .take(DATETIME_SAMPLE_SIZE)
            .any(|c| self.date_patterns.is_match(&c.to_string()));
        if !looks_like_date {
            return None;
        }

        let parsed: Vec<Option<NaiveDateTime>> = cells
            .iter()
            .map(|cell| match cell {
                CellValue::DateTime(dt) => Some(*dt),
                CellValue::Text(s) => self.parse_datetime(s),
                _ => None,
            })
            .collect();

        let (converted, non_null) = rate_counts(cells, parsed.iter().map(Option::is_some));
        if non_null == 0 {
            return None;
        }
        Some(Conversion {
            kind: InferredType::DateTime,
            cells: parsed
                .into_iter()
                .map(|v| v.map(CellValue::DateTime).unwrap_or(CellValue::Null))
                .collect(),
            success_rate: converted as f64 / non_null as f64,
            failed: non_null - converted,
        })
    }

    fn parse_datetime(&self, text: &str) -> Option<NaiveDateTime> {
        let text = text.trim();
        self.config.date_formats.iter().find_map(|format| {
            NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
                NaiveDate::parse_from_str(text, format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
        })
    }

    fn try_boolean(&self, cells: &[CellValue]) -> Option<Conversion> {
        let distinct: FxHashSet<String> = cells
            .iter()
            .filter(|c| !c.is_null())
            .map(|c| c.to_string())
            .collect();
        if distinct.is_empty() || distinct.len() > MAX_BOOLEAN_UNIQUE {
            return None;
        }

        let lookup = |value: &str| -> Option<bool> {
            let value = value.trim().to_lowercase();
            if self.config.true_values.iter().any(|t| t.to_lowercase() == value) {
                Some(true)
            } else if self.config.false_values.iter().any(|f| f.to_lowercase() == value) {
                Some(false)
            } else {
                None
            }
        };

        let parsed: Vec<Option<bool>> = cells
            .iter()
            .map(|cell| match cell {
                CellValue::Null => None,
                CellValue::Bool(b) => Some(*b),
                other => lookup(&other.to_string()),
            })
            .collect();

        let (converted, non_null) = rate_counts(cells, parsed.iter().map(Option::is_some));
        Some(Conversion {
            kind: InferredType::Boolean,
            cells: parsed
                .into_iter()
                .map(|v| v.map(CellValue::Bool).unwrap_or(CellValue::Null))
                .collect(),
            success_rate: converted as f64 / non_null.max(1) as f64,
            failed: non_null - converted,
        })
    }
}

/// Count converted cells among the non-null ones.
fn rate_counts(cells: &[CellValue], converted: impl Iterator<Item = bool>) -> (usize, usize) {
    let mut ok = 0;
    let mut non_null = 0;
    for (cell, converted) in cells.iter().zip(converted) {
        if !cell.is_null() {
            non_null += 1;
            if converted {
                ok += 1;
            }
        }
    }
    (ok, non_null)
}

/// The single cell type of a column's non-null cells, or `mixed`.
fn column_type(cells: &[CellValue]) -> String {
    let mut kinds = cells.iter().filter(|c| !c.is_null()).map(CellValue::type_name);
    let Some(first) = kinds.next() else {
        return "null".to_string();
    };
    if kinds.all(|k| k == first) {
        first.to_string()
    } else {
        "mixed".to_string()
    }
}
