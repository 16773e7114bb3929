use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::engine::{Action, Node};

/// What a node in a [`Plan`] does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// An explicit input bound by the caller.
    Constant,
    /// Runs the named producer.
    Computed(String),
    /// Assembles a collection from element producers.
    Collection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanNode {
    pub key: String,
    pub kind: NodeKind,
}

/// A static snapshot of a graph's shape, for diagnostics.
///
/// Edges point from a dependency to its dependent and carry the type of the
/// value passed along them. The plan renders as a Mermaid flowchart through
/// [`Display`], and as JSON through [`Plan::to_json`].
#[derive(Debug, Clone)]
pub struct Plan {
    graph: DiGraph<PlanNode, &'static str>,
    root: NodeIndex,
}

impl Plan {
    /// `nodes` must list dependencies before their dependents.
    pub(crate) fn new(nodes: &[Arc<Node>], root: &Arc<Node>) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for node in nodes {
            let kind = match &node.action {
                None => NodeKind::Constant,
                Some(Action::Produce(producer)) => NodeKind::Computed(producer.name().to_string()),
                Some(Action::Assemble(_)) => NodeKind::Collection,
            };

            let index = graph.add_node(PlanNode {
                key: node.key.to_string(),
                kind,
            });

            for dependency in &node.dependencies {
                if let Some(&source) = indices.get(&Arc::as_ptr(dependency)) {
                    graph.add_edge(source, index, dependency.output_type_name());
                }
            }

            indices.insert(Arc::as_ptr(node), index);
        }

        let root = indices
            .get(&Arc::as_ptr(root))
            .copied()
            .unwrap_or_else(|| NodeIndex::new(graph.node_count().saturating_sub(1)));

        Self { graph, root }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn root(&self) -> &PlanNode {
        &self.graph[self.root]
    }

    /// Nodes in dependency order.
    pub fn nodes(&self) -> impl Iterator<Item = &PlanNode> {
        self.graph.node_weights()
    }

    /// The explicit inputs of the graph.
    pub fn inputs(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes()
            .filter(|node| node.kind == NodeKind::Constant)
    }

    /// Returns the keys `key` directly depends on.
    pub fn dependencies_of(&self, key: &str) -> Vec<&PlanNode> {
        self.neighbors(key, Direction::Incoming)
    }

    /// Returns the keys directly consuming `key`.
    pub fn dependents_of(&self, key: &str) -> Vec<&PlanNode> {
        self.neighbors(key, Direction::Outgoing)
    }

    fn neighbors(&self, key: &str, direction: Direction) -> Vec<&PlanNode> {
        let Some(index) = self
            .graph
            .node_indices()
            .find(|&index| self.graph[index].key == key)
        else {
            return vec![];
        };

        let mut found: Vec<_> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|index| &self.graph[index])
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Flat<'a> {
            root: usize,
            nodes: Vec<&'a PlanNode>,
            edges: Vec<(usize, usize)>,
        }

        let flat = Flat {
            root: self.root.index(),
            nodes: self.graph.node_weights().collect(),
            edges: self
                .graph
                .raw_edges()
                .iter()
                .map(|edge| (edge.source().index(), edge.target().index()))
                .collect(),
        };

        serde_json::to_string_pretty(&flat)
    }
}

fn escape(text: &str) -> String {
    text.replace('"', "#quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            let key = escape(&node.key);

            match &node.kind {
                NodeKind::Constant => writeln!(f, "    {}[/\"{}\"/]", index.index(), key)?,
                NodeKind::Computed(name) => writeln!(
                    f,
                    "    {}[\"{}<br/>{}\"]",
                    index.index(),
                    key,
                    escape(name)
                )?,
                NodeKind::Collection => writeln!(f, "    {}[[\"{}\"]]", index.index(), key)?,
            }

            if index == self.root {
                writeln!(f, "    {} --> Output", index.index())?;
            }
        }

        writeln!(f, "    Output[Output]")?;

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} -- \"{}\" --> {}",
                edge.source().index(),
                escape(edge.weight),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
