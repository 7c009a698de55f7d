//! Immutable graph view over a workspace's nodes and edges.

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::model::{Edge, Node, NodeKind};

/// The node/edge set of one flow, validated as a DAG.
///
/// Edges go from producer to consumer. Predecessor lists keep the order in
/// which edges were declared, which fixes branch discovery order.
pub struct GraphModel<'a> {
    /// Node weights are positions into `nodes`.
    graph: DiGraph<usize, ()>,
    nodes: &'a [Node],
    node_indices: FxHashMap<&'a str, NodeIndex>,
}

impl<'a> GraphModel<'a> {
    /// Build and validate the graph.
    ///
    /// Fails with a configuration error on duplicate node ids, edges naming
    /// unknown nodes, or cycles.
    pub fn new(nodes: &'a [Node], edges: &[Edge]) -> Result<Self> {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut node_indices = FxHashMap::default();

        for (pos, node) in nodes.iter().enumerate() {
            let idx = graph.add_node(pos);
            if node_indices.insert(node.id.as_str(), idx).is_some() {
                return Err(Error::configuration(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in edges {
            let source = *node_indices.get(edge.source.as_str()).ok_or_else(|| {
                Error::configuration(format!(
                    "edge {} -> {} references unknown node '{}'",
                    edge.source, edge.target, edge.source
                ))
            })?;
            let target = *node_indices.get(edge.target.as_str()).ok_or_else(|| {
                Error::configuration(format!(
                    "edge {} -> {} references unknown node '{}'",
                    edge.source, edge.target, edge.target
                ))
            })?;
            if source == target {
                return Err(Error::configuration(format!(
                    "node '{}' has an edge to itself",
                    edge.source
                )));
            }
            // Repeated edges would fork identical branches.
            if graph.find_edge(source, target).is_none() {
                graph.add_edge(source, target, ());
            }
        }

        let model = Self {
            graph,
            nodes,
            node_indices,
        };
        model.detect_cycles()?;
        Ok(model)
    }

    fn detect_cycles(&self) -> Result<()> {
        use petgraph::algo::kosaraju_scc;

        for scc in kosaraju_scc(&self.graph) {
            if scc.len() > 1 {
                let mut members: Vec<&str> = scc.iter().map(|&idx| self.id_of(idx)).collect();
                members.sort_unstable();
                return Err(Error::configuration(format!(
                    "cyclic flow detected: {} -> {}",
                    members.join(" -> "),
                    members[0]
                )));
            }
        }
        Ok(())
    }

    fn id_of(&self, idx: NodeIndex) -> &'a str {
        self.nodes[self.graph[idx]].id.as_str()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.node_indices.contains_key(node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&'a Node> {
        self.node_indices
            .get(node_id)
            .map(|&idx| &self.nodes[self.graph[idx]])
    }

    /// Look up a node, failing with a configuration error when it is absent.
    pub fn require_node(&self, node_id: &str) -> Result<&'a Node> {
        self.node(node_id)
            .ok_or_else(|| Error::configuration(format!("node '{}' not found", node_id)))
    }

    pub fn kind(&self, node_id: &str) -> Option<NodeKind> {
        self.node(node_id).map(Node::kind)
    }

    /// Direct predecessors, in edge declaration order.
    pub fn predecessors(&self, node_id: &str) -> Vec<&'a str> {
        self.neighbors(node_id, Direction::Incoming)
    }

    /// Direct successors, in edge declaration order.
    pub fn successors(&self, node_id: &str) -> Vec<&'a str> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    fn neighbors(&self, node_id: &str, direction: Direction) -> Vec<&'a str> {
        let Some(&idx) = self.node_indices.get(node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, direction)
            .map(|e| {
                let other = match direction {
                    Direction::Incoming => e.source(),
                    Direction::Outgoing => e.target(),
                };
                (e.id(), other)
            })
            .collect();
        edges.sort_by_key(|(id, _)| *id);
        edges.into_iter().map(|(_, other)| self.id_of(other)).collect()
    }

    /// Every IndexSource node, in declaration order.
    pub fn index_sources(&self) -> Vec<&'a Node> {
        self.nodes
            .iter()
            .filter(|n| n.kind() == NodeKind::IndexSource)
            .collect()
    }

    /// Node ids in an order that respects every edge.
    pub fn topological_order(&self) -> Result<Vec<&'a str>> {
        use petgraph::algo::toposort;

        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|idx| self.id_of(idx)).collect())
            .map_err(|cycle| {
                Error::configuration(format!(
                    "cycle detected at node '{}'",
                    self.id_of(cycle.node_id())
                ))
            })
    }

    pub fn nodes(&self) -> &'a [Node] {
        self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
