//! Typed node configuration.
//!
//! Node `data` arrives as free-form JSON. It is parsed once, at the workspace
//! boundary, into the closed [`NodeConfig`] union so processors never see a
//! missing or mistyped field.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    IndexSource,
    SheetSelector,
    RowFilter,
    RowLookup,
    Aggregator,
    Output,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::IndexSource => "indexSource",
            NodeKind::SheetSelector => "sheetSelector",
            NodeKind::RowFilter => "rowFilter",
            NodeKind::RowLookup => "rowLookup",
            NodeKind::Aggregator => "aggregator",
            NodeKind::Output => "output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "indexSource" => Ok(NodeKind::IndexSource),
            "sheetSelector" => Ok(NodeKind::SheetSelector),
            "rowFilter" => Ok(NodeKind::RowFilter),
            "rowLookup" => Ok(NodeKind::RowLookup),
            "aggregator" => Ok(NodeKind::Aggregator),
            "output" => Ok(NodeKind::Output),
            other => Err(Error::configuration(format!("unknown node kind '{}'", other))),
        }
    }
}

/// Kind-specific configuration of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    IndexSource(IndexSourceConfig),
    SheetSelector(SheetSelectorConfig),
    RowFilter(RowFilterConfig),
    RowLookup(RowLookupConfig),
    Aggregator(AggregatorConfig),
    Output(OutputConfig),
}

impl NodeConfig {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::IndexSource(_) => NodeKind::IndexSource,
            NodeConfig::SheetSelector(_) => NodeKind::SheetSelector,
            NodeConfig::RowFilter(_) => NodeKind::RowFilter,
            NodeConfig::RowLookup(_) => NodeKind::RowLookup,
            NodeConfig::Aggregator(_) => NodeKind::Aggregator,
            NodeConfig::Output(_) => NodeKind::Output,
        }
    }

    /// Parse the JSON `data` of node `node_id` for the given kind.
    pub fn parse(node_id: &str, kind: NodeKind, data: serde_json::Value) -> Result<Self> {
        let data = if data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            data
        };
        match kind {
            NodeKind::IndexSource => {
                let raw: RawIndexSource = from_data(node_id, data)?;
                raw.validate(node_id).map(NodeConfig::IndexSource)
            }
            NodeKind::SheetSelector => {
                let raw: RawSheetSelector = from_data(node_id, data)?;
                raw.validate(node_id).map(NodeConfig::SheetSelector)
            }
            NodeKind::RowFilter => {
                let raw: RawRowFilter = from_data(node_id, data)?;
                raw.validate(node_id).map(NodeConfig::RowFilter)
            }
            NodeKind::RowLookup => {
                let raw: RawRowLookup = from_data(node_id, data)?;
                raw.validate(node_id).map(NodeConfig::RowLookup)
            }
            NodeKind::Aggregator => {
                let raw: RawAggregator = from_data(node_id, data)?;
                raw.validate(node_id).map(NodeConfig::Aggregator)
            }
            NodeKind::Output => {
                let raw: RawOutput = from_data(node_id, data)?;
                Ok(NodeConfig::Output(raw.into_config()))
            }
        }
    }
}

fn from_data<T: DeserializeOwned>(node_id: &str, data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::configuration(format!("node '{}': {}", node_id, e)))
}

/// Accept booleans stored either as JSON bools or as `"true"`/`"False"` strings.
fn loose_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;

    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Bool(b)) => Ok(Some(b)),
        Some(serde_json::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" | "" => Ok(Some(false)),
            other => Err(D::Error::custom(format!("invalid boolean '{}'", other))),
        },
        Some(other) => Err(D::Error::custom(format!("invalid boolean {}", other))),
    }
}

fn required(node_id: &str, field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::configuration(format!(
            "node '{}': missing required field '{}'",
            node_id, field
        ))),
    }
}

// =============================================================================
// IndexSource
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSourceConfig {
    pub source_file_id: String,
    pub source: IndexSourceMode,
    /// Human-readable name used for output sheets.
    pub display_name: Option<String>,
}

/// Where index values come from.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexSourceMode {
    /// Unique non-null values of one column.
    Column {
        sheet_name: String,
        column_name: String,
    },
    /// Every sheet name of the file.
    SheetNames,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndexSource {
    #[serde(rename = "sourceFileID")]
    source_file_id: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    by_column: Option<bool>,
    sheet_name: Option<String>,
    column_name: Option<String>,
    display_name: Option<String>,
    label: Option<String>,
}

impl RawIndexSource {
    fn validate(self, node_id: &str) -> Result<IndexSourceConfig> {
        let source_file_id = required(node_id, "sourceFileID", self.source_file_id)?;
        let source = if self.by_column.unwrap_or(true) {
            IndexSourceMode::Column {
                sheet_name: required(node_id, "sheetName", self.sheet_name)?,
                column_name: required(node_id, "columnName", self.column_name)?,
            }
        } else {
            IndexSourceMode::SheetNames
        };
        let display_name = self
            .display_name
            .or(self.label)
            .filter(|s| !s.trim().is_empty());
        Ok(IndexSourceConfig {
            source_file_id,
            source,
            display_name,
        })
    }
}

// =============================================================================
// SheetSelector
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SheetSelectorConfig {
    pub target_file_id: String,
    pub selection: SheetSelection,
}

/// How a SheetSelector picks its sheet for an index value.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetSelection {
    /// A fixed sheet name.
    Manual { sheet_name: String },
    /// The sheet named exactly like the current index value.
    AutoByIndex,
    /// The first sheet whose `match_column` contains the index value.
    ColumnMatch { match_column: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSheetSelector {
    #[serde(rename = "targetFileID")]
    target_file_id: Option<String>,
    mode: Option<String>,
    manual_sheet_name: Option<String>,
    match_column: Option<String>,
}

impl RawSheetSelector {
    fn validate(self, node_id: &str) -> Result<SheetSelectorConfig> {
        let target_file_id = required(node_id, "targetFileID", self.target_file_id)?;
        let selection = match self.mode.as_deref().unwrap_or("auto_by_index") {
            "manual" => SheetSelection::Manual {
                sheet_name: required(node_id, "manualSheetName", self.manual_sheet_name)?,
            },
            "auto_by_index" => SheetSelection::AutoByIndex,
            "column_match" => SheetSelection::ColumnMatch {
                match_column: required(node_id, "matchColumn", self.match_column)?,
            },
            other => {
                return Err(Error::configuration(format!(
                    "node '{}': unknown sheet selector mode '{}'",
                    node_id, other
                )));
            }
        };
        Ok(SheetSelectorConfig {
            target_file_id,
            selection,
        })
    }
}

// =============================================================================
// RowFilter
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowFilterConfig {
    pub conditions: Vec<FilterCondition>,
}

/// One `{column, operator, value, logic}` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub column: String,
    pub operator: FilterOperator,
    pub value: serde_json::Value,
    /// How this condition joins the conditions before it. Ignored on the first one.
    pub logic: Logic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = "starts_with")]
    StartsWith,
    #[serde(rename = "ends_with")]
    EndsWith,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "between")]
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

#[derive(Deserialize)]
struct RawRowFilter {
    #[serde(default)]
    conditions: Vec<RawCondition>,
}

#[derive(Deserialize)]
struct RawCondition {
    column: Option<String>,
    operator: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
    logic: Option<String>,
}

impl RawRowFilter {
    fn validate(self, node_id: &str) -> Result<RowFilterConfig> {
        let mut conditions = Vec::with_capacity(self.conditions.len());
        for raw in self.conditions {
            // Half-filled conditions from the editor carry no constraint.
            let (Some(column), Some(operator)) = (raw.column, raw.operator) else {
                continue;
            };
            if column.is_empty() || operator.is_empty() {
                continue;
            }
            let operator: FilterOperator =
                serde_json::from_value(serde_json::Value::String(operator.clone())).map_err(
                    |_| {
                        Error::configuration(format!(
                            "node '{}': unknown filter operator '{}'",
                            node_id, operator
                        ))
                    },
                )?;
            let logic = match raw.logic.as_deref().map(str::to_ascii_uppercase).as_deref() {
                None | Some("AND") | Some("") => Logic::And,
                Some("OR") => Logic::Or,
                Some(other) => {
                    return Err(Error::configuration(format!(
                        "node '{}': unknown logic operator '{}'",
                        node_id, other
                    )));
                }
            };
            conditions.push(FilterCondition {
                column,
                operator,
                value: raw.value,
                logic,
            });
        }
        Ok(RowFilterConfig { conditions })
    }
}

// =============================================================================
// RowLookup
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RowLookupConfig {
    pub match_column: String,
    pub match_mode: MatchMode,
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRowLookup {
    #[serde(alias = "lookupColumn")]
    match_column: Option<String>,
    #[serde(default)]
    match_mode: MatchMode,
    #[serde(default, deserialize_with = "loose_bool")]
    case_sensitive: Option<bool>,
}

impl RawRowLookup {
    fn validate(self, node_id: &str) -> Result<RowLookupConfig> {
        Ok(RowLookupConfig {
            match_column: required(node_id, "matchColumn", self.match_column)?,
            match_mode: self.match_mode,
            case_sensitive: self.case_sensitive.unwrap_or(false),
        })
    }
}

// =============================================================================
// Aggregator
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    pub stat_column: String,
    pub method: AggregationMethod,
    /// Output column name; defaults to `{method}_{stat_column}`.
    pub output_as: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    Sum,
    #[serde(alias = "average")]
    Avg,
    Count,
    Min,
    Max,
    First,
    Last,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::Sum => "sum",
            AggregationMethod::Avg => "avg",
            AggregationMethod::Count => "count",
            AggregationMethod::Min => "min",
            AggregationMethod::Max => "max",
            AggregationMethod::First => "first",
            AggregationMethod::Last => "last",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAggregator {
    stat_column: Option<String>,
    method: Option<String>,
    output_as: Option<String>,
}

impl RawAggregator {
    fn validate(self, node_id: &str) -> Result<AggregatorConfig> {
        let stat_column = required(node_id, "statColumn", self.stat_column)?;
        let method_name = required(node_id, "method", self.method)?;
        let method: AggregationMethod =
            serde_json::from_value(serde_json::Value::String(method_name.clone())).map_err(
                |_| {
                    Error::configuration(format!(
                        "node '{}': unsupported aggregation method '{}'",
                        node_id, method_name
                    ))
                },
            )?;
        let output_as = self
            .output_as
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{}_{}", method_name, stat_column));
        Ok(AggregatorConfig {
            stat_column,
            method,
            output_as,
        })
    }
}

// =============================================================================
// Output
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub output_path: Option<PathBuf>,
    pub include_index_column: bool,
    pub index_column_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_path: None,
            include_index_column: true,
            index_column_name: "Index".to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOutput {
    #[serde(alias = "outputFilePath")]
    output_path: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    include_index_column: Option<bool>,
    index_column_name: Option<String>,
}

impl RawOutput {
    fn into_config(self) -> OutputConfig {
        let defaults = OutputConfig::default();
        OutputConfig {
            output_path: self
                .output_path
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            include_index_column: self
                .include_index_column
                .unwrap_or(defaults.include_index_column),
            index_column_name: self
                .index_column_name
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.index_column_name),
        }
    }
}
