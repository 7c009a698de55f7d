//! RowLookup: keeps rows whose match column matches the current index value.

use std::sync::Arc;

use regex::RegexBuilder;

use super::{NodeProcessor, Outcome, ProcessContext, cell_texts};
use crate::error::{Error, Result};
use crate::model::{IndexValue, MatchMode, NodeKind, RowLookupConfig, Table};

#[derive(Debug, Clone)]
pub struct RowLookupInput<'a> {
    pub table: Arc<Table>,
    pub index_value: &'a IndexValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowLookupOutput {
    pub table: Arc<Table>,
    pub matched_count: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RowLookupProcessor;

impl NodeProcessor for RowLookupProcessor {
    type Config = RowLookupConfig;
    type Input<'a> = RowLookupInput<'a>;
    type Output = RowLookupOutput;

    fn kind(&self) -> NodeKind {
        NodeKind::RowLookup
    }

    fn process(
        &self,
        node_id: &str,
        config: &RowLookupConfig,
        input: RowLookupInput<'_>,
        _ctx: ProcessContext<'_>,
    ) -> Result<Outcome<RowLookupOutput>> {
        let table = input.table;
        if table.is_empty() {
            return Ok(Outcome::Produced(RowLookupOutput {
                table: Arc::new(Table::with_columns(table.columns.clone())),
                matched_count: 0,
            }));
        }
        let idx = table.column_index(&config.match_column).ok_or_else(|| {
            Error::data(format!(
                "lookup column '{}' not found (node '{}')",
                config.match_column, node_id
            ))
        })?;

        let matcher = Matcher::new(config, input.index_value)?;
        let mask: Vec<bool> = cell_texts(&table, idx)
            .map(|text| text.is_some_and(|t| matcher.is_match(&t)))
            .collect();
        let matched = table.filter_rows(&mask);
        let matched_count = matched.row_count();

        tracing::debug!(
            node = node_id,
            index = %input.index_value,
            mode = ?config.match_mode,
            matched = matched_count,
            "Looked up rows"
        );
        Ok(Outcome::Produced(RowLookupOutput {
            table: Arc::new(matched),
            matched_count,
        }))
    }
}

enum Matcher {
    Regex(regex::Regex),
    Text {
        mode: MatchMode,
        needle: String,
        case_sensitive: bool,
    },
}

impl Matcher {
    fn new(config: &RowLookupConfig, index_value: &IndexValue) -> Result<Self> {
        if config.match_mode == MatchMode::Regex {
            let re = RegexBuilder::new(index_value.as_str())
                .case_insensitive(!config.case_sensitive)
                .build()
                .map_err(|e| {
                    Error::data(format!("invalid lookup pattern '{}': {}", index_value, e))
                })?;
            return Ok(Matcher::Regex(re));
        }
        let needle = if config.case_sensitive {
            index_value.as_str().to_string()
        } else {
            index_value.as_str().to_lowercase()
        };
        Ok(Matcher::Text {
            mode: config.match_mode,
            needle,
            case_sensitive: config.case_sensitive,
        })
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(text),
            Matcher::Text {
                mode,
                needle,
                case_sensitive,
            } => {
                let lowered;
                let hay = if *case_sensitive {
                    text
                } else {
                    lowered = text.to_lowercase();
                    lowered.as_str()
                };
                match mode {
                    MatchMode::Exact => hay == needle,
                    MatchMode::Contains => hay.contains(needle.as_str()),
                    MatchMode::StartsWith => hay.starts_with(needle.as_str()),
                    MatchMode::EndsWith => hay.ends_with(needle.as_str()),
                    MatchMode::Regex => false,
                }
            }
        }
    }
}
