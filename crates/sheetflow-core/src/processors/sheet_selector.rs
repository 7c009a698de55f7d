//! SheetSelector: picks the sheet an index value reads from.

use std::sync::Arc;

use super::{NodeProcessor, Outcome, ProcessContext, cell_texts};
use crate::error::{Error, Result};
use crate::execute::GlobalContext;
use crate::model::{
    FileDescriptor, IndexValue, NodeKind, SheetSelection, SheetSelectorConfig, Table,
};

#[derive(Debug, Clone, Copy)]
pub struct SheetSelectorInput<'a> {
    pub index_value: &'a IndexValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetSelectorOutput {
    pub table: Arc<Table>,
    pub sheet_name: String,
    pub index_value: IndexValue,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SheetSelectorProcessor;

impl NodeProcessor for SheetSelectorProcessor {
    type Config = SheetSelectorConfig;
    type Input<'a> = SheetSelectorInput<'a>;
    type Output = SheetSelectorOutput;

    fn kind(&self) -> NodeKind {
        NodeKind::SheetSelector
    }

    /// A sheet that does not exist under manual or auto-by-index selection
    /// yields `Empty`, so only this index value is skipped.
    fn process(
        &self,
        node_id: &str,
        config: &SheetSelectorConfig,
        input: SheetSelectorInput<'_>,
        ctx: ProcessContext<'_>,
    ) -> Result<Outcome<SheetSelectorOutput>> {
        let global = ctx.global;
        let file = global.require_file(&config.target_file_id)?;

        let (sheet_name, table) = match &config.selection {
            SheetSelection::Manual { sheet_name } => {
                match load_named(global, file, sheet_name)? {
                    Some(table) => (sheet_name.clone(), table),
                    None => return Ok(missing_sheet(node_id, file, sheet_name)),
                }
            }
            SheetSelection::AutoByIndex => {
                let sheet_name = input.index_value.as_str();
                match load_named(global, file, sheet_name)? {
                    Some(table) => (sheet_name.to_string(), table),
                    None => return Ok(missing_sheet(node_id, file, sheet_name)),
                }
            }
            SheetSelection::ColumnMatch { match_column } => {
                find_by_column(global, file, match_column, input.index_value)?
            }
        };

        let table = if global.is_test_mode() && table.row_count() > global.test_mode_max_rows() {
            Arc::new(table.limit_rows(global.test_mode_max_rows()))
        } else {
            table
        };

        tracing::debug!(
            node = node_id,
            sheet = %sheet_name,
            rows = table.row_count(),
            "Selected sheet"
        );
        Ok(Outcome::Produced(SheetSelectorOutput {
            table,
            sheet_name,
            index_value: input.index_value.clone(),
        }))
    }
}

/// Load a sheet the file declares; `None` when it is absent.
fn load_named(
    global: &GlobalContext,
    file: &FileDescriptor,
    sheet_name: &str,
) -> Result<Option<Arc<Table>>> {
    if !file.has_sheet(sheet_name) {
        return Ok(None);
    }
    match global.load_table(&file.id, sheet_name) {
        Ok(table) => Ok(Some(table)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn missing_sheet<T>(node_id: &str, file: &FileDescriptor, sheet_name: &str) -> Outcome<T> {
    tracing::warn!(
        node = node_id,
        file = %file.id,
        sheet = sheet_name,
        "Sheet not found; skipping index value"
    );
    Outcome::empty(format!(
        "sheet '{}' not found in file '{}'",
        sheet_name, file.name
    ))
}

/// First sheet, in declaration order, whose `match_column` holds the index value.
fn find_by_column(
    global: &GlobalContext,
    file: &FileDescriptor,
    match_column: &str,
    index_value: &IndexValue,
) -> Result<(String, Arc<Table>)> {
    for sheet_name in file.sheet_names() {
        let table = match global.load_table(&file.id, sheet_name) {
            Ok(table) => table,
            Err(e) => {
                tracing::debug!(sheet = sheet_name, error = %e, "Skipping unreadable sheet");
                continue;
            }
        };
        let Some(idx) = table.column_index(match_column) else {
            continue;
        };
        if cell_texts(&table, idx).any(|text| text.as_deref() == Some(index_value.as_str())) {
            return Ok((sheet_name.to_string(), table));
        }
    }
    Err(Error::data(format!(
        "no sheet of '{}' has column '{}' containing '{}'",
        file.name, match_column, index_value
    )))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::execute::PathContext;
    use crate::files::MemoryReader;
    use crate::model::{CellValue, ExecutionMode, SheetMeta, WorkspaceConfig};

    fn global(mode: ExecutionMode) -> GlobalContext {
        let workspace = WorkspaceConfig {
            files: vec![FileDescriptor {
                id: "sales".into(),
                name: "Sales".into(),
                path: PathBuf::from("sales.xlsx"),
                sheet_metas: ["East", "West", "Ghost"]
                    .iter()
                    .map(|s| SheetMeta {
                        sheet_name: s.to_string(),
                        header_row: 0,
                    })
                    .collect(),
            }],
            ..Default::default()
        };
        let reader = MemoryReader::new()
            .with_sheet(
                "sales.xlsx",
                "East",
                Table::from_rows(
                    ["Rep", "Amount"],
                    (0..5).map(|n| vec![CellValue::text(format!("e{}", n)), CellValue::Int(n)]),
                ),
            )
            .with_sheet(
                "sales.xlsx",
                "West",
                Table::from_rows(["Rep", "Amount"], vec![vec!["w0", "7"]]),
            );
        GlobalContext::new(&workspace, mode, Arc::new(reader)).with_test_mode_max_rows(2)
    }

    fn select(
        global: &GlobalContext,
        selection: SheetSelection,
        index: &str,
    ) -> Result<Outcome<SheetSelectorOutput>> {
        let config = SheetSelectorConfig {
            target_file_id: "sales".into(),
            selection,
        };
        let index = IndexValue::new(index);
        let path = PathContext::new(index.clone());
        SheetSelectorProcessor.process(
            "sel",
            &config,
            SheetSelectorInput {
                index_value: &index,
            },
            ProcessContext::new(global, &path),
        )
    }

    #[test]
    fn test_auto_by_index() {
        let global = global(ExecutionMode::Production);
        let out = select(&global, SheetSelection::AutoByIndex, "East")
            .unwrap()
            .produced()
            .unwrap();
        assert_eq!(out.sheet_name, "East");
        assert_eq!(out.table.row_count(), 5);
    }

    #[test]
    fn test_missing_sheet_is_empty() {
        let global = global(ExecutionMode::Production);
        assert!(
            select(&global, SheetSelection::AutoByIndex, "North")
                .unwrap()
                .is_empty()
        );
        // Declared in sheet_metas but absent from the workbook.
        assert!(
            select(
                &global,
                SheetSelection::Manual {
                    sheet_name: "Ghost".into()
                },
                "East"
            )
            .unwrap()
            .is_empty()
        );
    }

    #[test]
    fn test_column_match() {
        let global = global(ExecutionMode::Production);
        let selection = SheetSelection::ColumnMatch {
            match_column: "Rep".into(),
        };
        let out = select(&global, selection.clone(), "w0")
            .unwrap()
            .produced()
            .unwrap();
        assert_eq!(out.sheet_name, "West");

        let err = select(&global, selection, "nobody").unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[test]
    fn test_test_mode_limits_rows() {
        let global = global(ExecutionMode::Test);
        let out = select(&global, SheetSelection::AutoByIndex, "East")
            .unwrap()
            .produced()
            .unwrap();
        assert_eq!(out.table.row_count(), 2);
        assert_eq!(out.table.total_rows, 5);
        // The cached source table is untouched.
        let cached = global.load_table("sales", "East").unwrap();
        assert_eq!(cached.row_count(), 5);
    }

    #[test]
    fn test_unknown_file_is_not_found() {
        let global = global(ExecutionMode::Production);
        let config = SheetSelectorConfig {
            target_file_id: "ghost".into(),
            selection: SheetSelection::AutoByIndex,
        };
        let index = IndexValue::new("East");
        let path = PathContext::new(index.clone());
        let err = SheetSelectorProcessor
            .process(
                "sel",
                &config,
                SheetSelectorInput {
                    index_value: &index,
                },
                ProcessContext::new(&global, &path),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
