//! Workspace configuration: files, nodes and edges of one flow.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{NodeConfig, NodeKind};
use crate::error::{Error, Result};

/// A sheet of a registered file and the row its header sits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetMeta {
    pub sheet_name: String,
    #[serde(default)]
    pub header_row: usize,
}

/// A tabular file registered with the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub sheet_metas: Vec<SheetMeta>,
}

impl FileDescriptor {
    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheet_metas.iter().map(|m| m.sheet_name.as_str())
    }

    pub fn sheet_meta(&self, sheet_name: &str) -> Option<&SheetMeta> {
        self.sheet_metas.iter().find(|m| m.sheet_name == sheet_name)
    }

    pub fn has_sheet(&self, sheet_name: &str) -> bool {
        self.sheet_meta(sheet_name).is_some()
    }

    /// Header row of a sheet; unknown sheets use row 0.
    pub fn header_row(&self, sheet_name: &str) -> usize {
        self.sheet_meta(sheet_name).map(|m| m.header_row).unwrap_or(0)
    }
}

/// A node with its typed configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    pub config: NodeConfig,
}

impl Node {
    pub fn new(id: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }
}

/// A directed edge from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A parsed workspace.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(try_from = "RawWorkspace")]
pub struct WorkspaceConfig {
    pub id: String,
    pub name: String,
    pub files: Vec<FileDescriptor>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl WorkspaceConfig {
    /// Parse the persisted JSON shape, typing every node's `data`.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawWorkspace = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid workspace document: {}", e)))?;
        raw.into_config()
    }

    /// Same as [`WorkspaceConfig::from_json`] for an already parsed value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let raw: RawWorkspace = serde_json::from_value(value)
            .map_err(|e| Error::configuration(format!("invalid workspace document: {}", e)))?;
        raw.into_config()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn file(&self, id: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|f| f.id == id)
    }

    /// Look up a file, failing with `NotFound` when it is not registered.
    pub fn require_file(&self, id: &str) -> Result<&FileDescriptor> {
        self.file(id)
            .ok_or_else(|| Error::not_found(format!("file '{}' is not registered", id)))
    }
}

#[derive(Deserialize)]
struct RawWorkspace {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    files: Vec<FileDescriptor>,
    #[serde(default, alias = "flow_nodes", alias = "flowNodes")]
    nodes: Vec<RawNode>,
    #[serde(default, alias = "flow_edges", alias = "flowEdges")]
    edges: Vec<Edge>,
}

#[derive(Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl TryFrom<RawWorkspace> for WorkspaceConfig {
    type Error = Error;

    fn try_from(raw: RawWorkspace) -> Result<Self> {
        raw.into_config()
    }
}

impl RawWorkspace {
    fn into_config(self) -> Result<WorkspaceConfig> {
        let nodes = self
            .nodes
            .into_iter()
            .map(|raw| {
                let kind: NodeKind = raw.kind.parse().map_err(|_| {
                    Error::configuration(format!(
                        "node '{}': unknown node type '{}'",
                        raw.id, raw.kind
                    ))
                })?;
                let config = NodeConfig::parse(&raw.id, kind, raw.data)?;
                Ok(Node::new(raw.id, config))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(WorkspaceConfig {
            id: self.id,
            name: self.name,
            files: self.files,
            nodes,
            edges: self.edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_flow_aliases() {
        let workspace = WorkspaceConfig::from_value(json!({
            "id": "ws1",
            "name": "demo",
            "files": [{
                "id": "f1",
                "name": "sales.xlsx",
                "path": "/data/sales",
                "sheet_metas": [{"sheet_name": "East", "header_row": 1}]
            }],
            "flow_nodes": [
                {"id": "src", "type": "indexSource", "data": {"sourceFileID": "f1", "byColumn": false}},
                {"id": "out", "type": "output", "data": {}}
            ],
            "flowEdges": [{"id": "e1", "source": "src", "target": "out"}]
        }))
        .unwrap();

        assert_eq!(workspace.nodes.len(), 2);
        assert_eq!(workspace.edges, vec![Edge::new("src", "out")]);
        assert_eq!(workspace.node("out").unwrap().kind(), NodeKind::Output);
        assert_eq!(workspace.require_file("f1").unwrap().header_row("East"), 1);
        assert_eq!(workspace.file("f1").unwrap().header_row("Other"), 0);
    }

    #[test]
    fn test_unknown_node_type_names_node() {
        let err = WorkspaceConfig::from_value(json!({
            "nodes": [{"id": "n7", "type": "pivot", "data": {}}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("n7"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let workspace = WorkspaceConfig::default();
        let err = workspace.require_file("nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
