pub mod edge;
pub mod node;

use std::collections::HashSet;

use edge::{CodeEdge, RelType};
use node::{CodeNode, DeclarationKind, NodeId, ProjectId};

/// The result of extracting one file or folder: declarations plus the relations between them.
///
/// Edges only ever reference nodes contained in the same extraction; [`Extraction::dangling_edges`]
/// checks this.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub nodes: Vec<CodeNode>,
    pub edges: Vec<CodeEdge>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Append a node and return its id.
    pub fn push_node(&mut self, node: CodeNode) -> NodeId {
        let id = node.id;
        self.nodes.push(node);
        id
    }

    pub fn link(&mut self, source: NodeId, target: NodeId, rel_type: RelType) {
        self.edges.push(CodeEdge::new(source, target, rel_type));
    }

    /// Move everything from `other` into `self`.
    pub fn merge(&mut self, other: Extraction) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
    }

    /// Attach every node to `project`.
    pub fn assign_project(&mut self, project: ProjectId) {
        for node in &mut self.nodes {
            node.project_id = Some(project);
        }
    }

    /// Edges with an endpoint that is not among this extraction's nodes.
    pub fn dangling_edges(&self) -> Vec<&CodeEdge> {
        let ids: HashSet<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        self.edges
            .iter()
            .filter(|e| !ids.contains(&e.source_id) || !ids.contains(&e.target_id))
            .collect()
    }

    /// Nodes with the given name, in extraction order.
    pub fn nodes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a CodeNode> + 'a {
        self.nodes.iter().filter(move |n| n.identifier_name == name)
    }

    /// Number of nodes per declaration kind.
    pub fn count_kind(&self, kind: DeclarationKind) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.declaration_kind == kind)
            .count()
    }
}
